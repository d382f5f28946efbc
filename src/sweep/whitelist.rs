//! Whitelist guard: the authoritative protected-account set.
//!
//! Two population paths. Rules (verified accounts, follower thresholds,
//! handle globs) run at sync time and only ever ADD entries. Manual adds and
//! file imports are sticky: they overwrite rule provenance and survive every
//! rule re-evaluation. Removal is manual-only.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::core::config::WhitelistRulesConfig;
use crate::core::errors::{FswError, Result};
use crate::store::model::{FollowedAccount, WhitelistEntry, WhitelistSource};
use crate::store::sqlite::Store;

/// In-memory protected-id set, loaded once per run so selection stays
/// consistent even while rules or manual edits land concurrently elsewhere.
#[derive(Debug)]
pub struct WhitelistGuard {
    ids: HashSet<String>,
}

impl WhitelistGuard {
    /// Snapshot the current whitelist.
    pub fn load(store: &Store) -> Result<Self> {
        Ok(Self {
            ids: store.whitelist_ids()?,
        })
    }

    /// Whether scoring/selection must treat this account as untouchable.
    #[must_use]
    pub fn is_protected(&self, account_id: &str) -> bool {
        self.ids.contains(account_id)
    }

    /// Number of protected accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Counts from one rule-evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedRules {
    pub verified_added: usize,
    pub followers_added: usize,
    pub pattern_added: usize,
}

impl AppliedRules {
    #[must_use]
    pub const fn total(self) -> usize {
        self.verified_added + self.followers_added + self.pattern_added
    }
}

/// Evaluate auto-protection rules over all active accounts.
///
/// Idempotent: entries that already exist (of any source) are left alone,
/// so a manual entry is never demoted and re-runs add nothing new.
pub fn apply_rules(
    store: &Store,
    rules: &WhitelistRulesConfig,
    now: DateTime<Utc>,
) -> Result<AppliedRules> {
    let patterns = compile_patterns(&rules.handle_patterns)?;
    let mut applied = AppliedRules::default();

    for account in store.active_accounts()? {
        if rules.protect_verified && account.verified {
            let added = store.whitelist_add_rule(&rule_entry(
                &account,
                WhitelistSource::RuleVerified,
                "auto: verified account".to_string(),
                now,
            ))?;
            if added {
                applied.verified_added += 1;
                continue;
            }
        }
        if rules.protect_high_followers && account.follower_count >= rules.min_follower_threshold {
            let added = store.whitelist_add_rule(&rule_entry(
                &account,
                WhitelistSource::RuleFollowers,
                format!("auto: high influence ({} followers)", account.follower_count),
                now,
            ))?;
            if added {
                applied.followers_added += 1;
                continue;
            }
        }
        if let Some(pattern) = patterns
            .iter()
            .find(|pattern| pattern.matches(&account.handle))
        {
            let added = store.whitelist_add_rule(&rule_entry(
                &account,
                WhitelistSource::RuleHandlePattern,
                format!("auto: handle matches {}", pattern.original),
                now,
            ))?;
            if added {
                applied.pattern_added += 1;
            }
        }
    }

    Ok(applied)
}

fn rule_entry(
    account: &FollowedAccount,
    source: WhitelistSource,
    reason: String,
    now: DateTime<Utc>,
) -> WhitelistEntry {
    WhitelistEntry {
        account_id: account.account_id.clone(),
        handle: Some(account.handle.clone()),
        reason,
        source,
        added_at: now,
    }
}

// ──────────────────── manual operations ────────────────────

/// Add a manual entry by handle (`@name` or `name`) or numeric account id.
pub fn add_manual(
    store: &Store,
    identifier: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<WhitelistEntry> {
    let account = resolve(store, identifier)?;
    let entry = WhitelistEntry {
        account_id: account.account_id,
        handle: Some(account.handle),
        reason: reason.to_string(),
        source: WhitelistSource::Manual,
        added_at: now,
    };
    store.whitelist_add_manual(&entry)?;
    Ok(entry)
}

/// Remove an entry by handle or id. Returns `false` when none existed.
pub fn remove(store: &Store, identifier: &str) -> Result<bool> {
    let account_id = match resolve(store, identifier) {
        Ok(account) => account.account_id,
        // Unknown handle can still name a stale whitelist row by raw id.
        Err(_) => trim_handle(identifier).to_string(),
    };
    store.whitelist_remove(&account_id)
}

fn resolve(store: &Store, identifier: &str) -> Result<FollowedAccount> {
    let cleaned = trim_handle(identifier);
    let found = if cleaned.chars().all(|c| c.is_ascii_digit()) && !cleaned.is_empty() {
        store.account(cleaned)?
    } else {
        store.account_by_handle(cleaned)?
    };
    found.ok_or_else(|| FswError::Runtime {
        details: format!("unknown account {identifier:?}; sync the following list first"),
    })
}

fn trim_handle(identifier: &str) -> &str {
    identifier.trim().trim_start_matches('@')
}

// ──────────────────── import / export ────────────────────

/// Result of a whitelist file import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub unknown: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImportItem {
    Bare(String),
    Detailed {
        #[serde(default)]
        handle: Option<String>,
        #[serde(default)]
        account_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Import entries from a JSON array (`.json`) or newline-delimited text
/// file (`#` starts a comment). Unknown identifiers are counted, not fatal.
pub fn import_from_file(store: &Store, path: &Path, now: DateTime<Utc>) -> Result<ImportReport> {
    let raw = fs::read_to_string(path).map_err(|source| FswError::io(path, source))?;

    let items: Vec<(String, String)> = if path.extension().is_some_and(|ext| ext == "json") {
        let parsed: Vec<ImportItem> = serde_json::from_str(&raw)?;
        parsed
            .into_iter()
            .filter_map(|item| match item {
                ImportItem::Bare(identifier) => {
                    Some((identifier, "imported from file".to_string()))
                }
                ImportItem::Detailed {
                    handle,
                    account_id,
                    reason,
                } => handle.or(account_id).map(|identifier| {
                    (
                        identifier,
                        reason.unwrap_or_else(|| "imported from file".to_string()),
                    )
                }),
            })
            .collect()
    } else {
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| (line.to_string(), "imported from file".to_string()))
            .collect()
    };

    let mut report = ImportReport::default();
    for (identifier, reason) in items {
        match resolve(store, &identifier) {
            Ok(account) => {
                store.whitelist_add_manual(&WhitelistEntry {
                    account_id: account.account_id,
                    handle: Some(account.handle),
                    reason,
                    source: WhitelistSource::Import,
                    added_at: now,
                })?;
                report.added += 1;
            }
            Err(_) => report.unknown += 1,
        }
    }
    Ok(report)
}

/// Export the whitelist as pretty JSON. Returns the entry count.
pub fn export_to_file(store: &Store, path: &Path) -> Result<usize> {
    let entries = store.whitelist_entries()?;
    let json = serde_json::to_string_pretty(&entries)?;
    fs::write(path, json).map_err(|source| FswError::io(path, source))?;
    Ok(entries.len())
}

// ──────────────────── handle patterns ────────────────────

#[derive(Debug, Clone)]
struct HandlePattern {
    original: String,
    compiled: Regex,
}

impl HandlePattern {
    fn matches(&self, handle: &str) -> bool {
        self.compiled.is_match(handle)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<HandlePattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Ok(HandlePattern {
                original: pattern.clone(),
                compiled: glob_to_regex(pattern)?,
            })
        })
        .collect()
}

/// Validate that a handle glob can be compiled.
pub fn validate_handle_pattern(pattern: &str) -> Result<()> {
    glob_to_regex(pattern).map(|_| ())
}

/// Convert a shell-style handle glob to an anchored, case-insensitive regex.
///
/// `*` matches any run of characters, `?` matches a single character; all
/// other characters are literal.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex_str = String::with_capacity(pattern.len() * 2 + 6);
    regex_str.push_str("(?i)^");

    for c in pattern.chars() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            other => regex_str.push(other),
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| FswError::InvalidConfig {
        details: format!("invalid handle pattern {pattern:?}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::wire::AccountSnapshot;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn temp_store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("wl.db")).unwrap();
        (dir, Arc::new(store))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap()
    }

    fn seed(store: &Store, id: &str, handle: &str, verified: bool, followers: u64) {
        store
            .upsert_synced_account(
                &AccountSnapshot {
                    account_id: id.to_string(),
                    handle: handle.to_string(),
                    display_name: handle.to_string(),
                    verified,
                    follower_count: followers,
                    tweet_count: 10,
                    last_activity_at: None,
                    is_private: false,
                    has_profile_image: true,
                },
                1,
                now(),
            )
            .unwrap();
    }

    fn rules() -> WhitelistRulesConfig {
        WhitelistRulesConfig {
            protect_verified: true,
            protect_high_followers: true,
            min_follower_threshold: 100_000,
            handle_patterns: vec!["team_*".to_string()],
        }
    }

    #[test]
    fn rules_add_verified_followers_and_patterns() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "famous", true, 50);
        seed(&store, "2", "influencer", false, 250_000);
        seed(&store, "3", "team_ops", false, 12);
        seed(&store, "4", "nobody", false, 12);

        let applied = apply_rules(&store, &rules(), now()).unwrap();
        assert_eq!(applied.verified_added, 1);
        assert_eq!(applied.followers_added, 1);
        assert_eq!(applied.pattern_added, 1);
        assert_eq!(applied.total(), 3);

        let guard = WhitelistGuard::load(&store).unwrap();
        assert!(guard.is_protected("1"));
        assert!(guard.is_protected("2"));
        assert!(guard.is_protected("3"));
        assert!(!guard.is_protected("4"));
    }

    #[test]
    fn rule_reevaluation_is_idempotent() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "famous", true, 50);

        assert_eq!(apply_rules(&store, &rules(), now()).unwrap().total(), 1);
        assert_eq!(apply_rules(&store, &rules(), now()).unwrap().total(), 0);
    }

    #[test]
    fn rules_never_remove_manual_entries() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "keeper", false, 5);
        add_manual(&store, "@keeper", "important human", now()).unwrap();

        // Re-evaluation with rules that match nothing must leave it alone.
        apply_rules(&store, &rules(), now()).unwrap();

        let entries = store.whitelist_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, WhitelistSource::Manual);
        assert_eq!(entries[0].reason, "important human");
    }

    #[test]
    fn manual_entry_survives_matching_rule_pass() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "famous", true, 500_000);
        add_manual(&store, "famous", "hand-picked", now()).unwrap();

        apply_rules(&store, &rules(), now()).unwrap();

        let entries = store.whitelist_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, WhitelistSource::Manual);
        assert_eq!(entries[0].reason, "hand-picked");
    }

    #[test]
    fn add_manual_resolves_handle_and_id() {
        let (_dir, store) = temp_store();
        seed(&store, "77", "resolver", false, 5);

        let by_handle = add_manual(&store, "@Resolver", "via handle", now()).unwrap();
        assert_eq!(by_handle.account_id, "77");

        store.whitelist_remove("77").unwrap();
        let by_id = add_manual(&store, "77", "via id", now()).unwrap();
        assert_eq!(by_id.handle.as_deref(), Some("resolver"));
    }

    #[test]
    fn add_manual_unknown_account_fails() {
        let (_dir, store) = temp_store();
        let err = add_manual(&store, "@stranger", "nope", now()).unwrap_err();
        assert!(err.to_string().contains("stranger"));
    }

    #[test]
    fn remove_accepts_handle_or_raw_id() {
        let (_dir, store) = temp_store();
        seed(&store, "9", "leaver", false, 5);
        add_manual(&store, "leaver", "temp", now()).unwrap();

        assert!(remove(&store, "@leaver").unwrap());
        assert!(!remove(&store, "9").unwrap());
    }

    #[test]
    fn import_json_and_text_formats() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "alpha", false, 5);
        seed(&store, "2", "beta", false, 5);
        seed(&store, "3", "gamma", false, 5);

        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("list.json");
        fs::write(
            &json_path,
            r#"["alpha", {"handle": "beta", "reason": "old friend"}, {"account_id": "404"}]"#,
        )
        .unwrap();
        let report = import_from_file(&store, &json_path, now()).unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.unknown, 1);

        let txt_path = dir.path().join("list.txt");
        fs::write(&txt_path, "# comment\n@gamma\n\n").unwrap();
        let report = import_from_file(&store, &txt_path, now()).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.unknown, 0);

        let guard = WhitelistGuard::load(&store).unwrap();
        assert_eq!(guard.len(), 3);
    }

    #[test]
    fn export_round_trips_entries() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "alpha", false, 5);
        add_manual(&store, "alpha", "exported", now()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let count = export_to_file(&store, &path).unwrap();
        assert_eq!(count, 1);

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: Vec<WhitelistEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed[0].account_id, "1");
        assert_eq!(parsed[0].source, WhitelistSource::Manual);
    }

    #[test]
    fn handle_globs_match_case_insensitively() {
        let patterns = compile_patterns(&["team_*".to_string(), "ops?".to_string()]).unwrap();
        assert!(patterns[0].matches("Team_Infra"));
        assert!(patterns[0].matches("team_"));
        assert!(!patterns[0].matches("ateam_x"));
        assert!(patterns[1].matches("ops1"));
        assert!(!patterns[1].matches("ops12"));
    }

    #[test]
    fn glob_metacharacters_are_literal() {
        let patterns = compile_patterns(&["a.b+c".to_string()]).unwrap();
        assert!(patterns[0].matches("a.b+c"));
        assert!(!patterns[0].matches("aXb+c"));
    }

    #[test]
    fn empty_guard_protects_nothing() {
        let (_dir, store) = temp_store();
        let guard = WhitelistGuard::load(&store).unwrap();
        assert!(guard.is_empty());
        assert!(!guard.is_protected("1"));
    }
}
