//! Domain row types shared by the store and the sweep pipeline.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::wire::AccountSnapshot;

/// A followed account as tracked across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowedAccount {
    pub account_id: String,
    pub handle: String,
    pub display_name: String,
    pub verified: bool,
    pub follower_count: u64,
    pub tweet_count: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub is_private: bool,
    pub has_profile_image: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub check_count: u32,
    pub current_score: Option<i64>,
    pub removed: bool,
    pub removed_at: Option<DateTime<Utc>>,
    pub terminal_reason: Option<String>,
}

impl FollowedAccount {
    /// Seed a row from a sync snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &AccountSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            account_id: snapshot.account_id.clone(),
            handle: snapshot.handle.clone(),
            display_name: snapshot.display_name.clone(),
            verified: snapshot.verified,
            follower_count: snapshot.follower_count,
            tweet_count: snapshot.tweet_count,
            last_activity_at: snapshot.last_activity_at,
            is_private: snapshot.is_private,
            has_profile_image: snapshot.has_profile_image,
            first_seen_at: now,
            last_checked_at: None,
            check_count: 0,
            current_score: None,
            removed: false,
            removed_at: None,
            terminal_reason: None,
        }
    }

    /// Whole days since the last visible activity; `None` when never probed
    /// successfully or the account never posted.
    #[must_use]
    pub fn days_inactive(&self, now: DateTime<Utc>) -> Option<u32> {
        self.last_activity_at
            .map(|ts| u32::try_from((now - ts).num_days().max(0)).unwrap_or(u32::MAX))
    }

    /// Whether the external API has marked this account unreachable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal_reason.is_some()
    }
}

/// Provenance of a whitelist entry. Manual entries outrank every rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistSource {
    Manual,
    RuleVerified,
    RuleFollowers,
    RuleHandlePattern,
    Import,
}

impl WhitelistSource {
    /// Stable label stored in the `source` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::RuleVerified => "rule:verified",
            Self::RuleFollowers => "rule:followers",
            Self::RuleHandlePattern => "rule:handle-pattern",
            Self::Import => "import",
        }
    }

    /// Parse a stored label back into a source.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "manual" => Some(Self::Manual),
            "rule:verified" => Some(Self::RuleVerified),
            "rule:followers" => Some(Self::RuleFollowers),
            "rule:handle-pattern" => Some(Self::RuleHandlePattern),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    /// Whether this source survives being overwritten by a rule pass.
    #[must_use]
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual | Self::Import)
    }
}

/// One protected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub account_id: String,
    pub handle: Option<String>,
    pub reason: String,
    pub source: WhitelistSource,
    pub added_at: DateTime<Utc>,
}

/// Result of one attempted unfollow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
    Skipped,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Immutable audit record of one attempted unfollow, snapshotting the
/// account at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfollowTransaction {
    /// Assigned by the store on append; 0 before insertion.
    pub id: i64,
    pub batch_id: String,
    pub account_id: String,
    pub handle: String,
    pub follower_count: u64,
    pub score: i64,
    pub executed_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

/// Persisted rate window counter. Mutated only by the `RateLimiter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    pub endpoint: String,
    pub window_start: i64,
    pub window_secs: u64,
    pub max_calls: u32,
    pub used: u32,
}

/// Aggregate snapshot for status output and the reporting collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_following: u64,
    pub inactive_1y: u64,
    pub inactive_6m: u64,
    pub inactive_3m: u64,
    pub active: u64,
    pub unchecked: u64,
    pub candidates: u64,
    pub whitelisted: u64,
    pub terminal: u64,
    pub unfollowed_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> AccountSnapshot {
        AccountSnapshot {
            account_id: "42".to_string(),
            handle: "dormouse".to_string(),
            display_name: "Dor Mouse".to_string(),
            verified: false,
            follower_count: 12,
            tweet_count: 3,
            last_activity_at: Some(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()),
            is_private: false,
            has_profile_image: true,
        }
    }

    #[test]
    fn from_snapshot_seeds_fresh_row() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let account = FollowedAccount::from_snapshot(&snapshot(), now);
        assert_eq!(account.account_id, "42");
        assert_eq!(account.first_seen_at, now);
        assert_eq!(account.check_count, 0);
        assert!(!account.removed);
        assert!(account.current_score.is_none());
    }

    #[test]
    fn days_inactive_from_last_activity() {
        let now = Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap();
        let account = FollowedAccount::from_snapshot(&snapshot(), now);
        assert_eq!(account.days_inactive(now), Some(400));
    }

    #[test]
    fn days_inactive_none_without_activity() {
        let now = Utc::now();
        let mut account = FollowedAccount::from_snapshot(&snapshot(), now);
        account.last_activity_at = None;
        assert_eq!(account.days_inactive(now), None);
    }

    #[test]
    fn future_activity_clamps_to_zero_days() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let account = FollowedAccount::from_snapshot(&snapshot(), now);
        assert_eq!(account.days_inactive(now), Some(0));
    }

    #[test]
    fn whitelist_source_round_trips() {
        for source in [
            WhitelistSource::Manual,
            WhitelistSource::RuleVerified,
            WhitelistSource::RuleFollowers,
            WhitelistSource::RuleHandlePattern,
            WhitelistSource::Import,
        ] {
            assert_eq!(WhitelistSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(WhitelistSource::parse("rule:unknown"), None);
    }

    #[test]
    fn manual_and_import_sources_are_sticky() {
        assert!(WhitelistSource::Manual.is_manual());
        assert!(WhitelistSource::Import.is_manual());
        assert!(!WhitelistSource::RuleVerified.is_manual());
    }

    #[test]
    fn outcome_round_trips() {
        for outcome in [Outcome::Success, Outcome::Failed, Outcome::Skipped] {
            assert_eq!(Outcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(Outcome::parse("partial"), None);
    }
}
