//! Shared fixtures: a scripted social-graph API, snapshot builders, and a
//! CLI runner with per-case log capture.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use follow_sweeper::api::client::SocialGraphApi;
use follow_sweeper::api::wire::{AccountSnapshot, FollowingPage, LookupResult, UnfollowAck};
use follow_sweeper::core::config::Config;
use follow_sweeper::core::errors::{FswError, PermanentReason, Result};
use follow_sweeper::store::sqlite::Store;

// ──────────────────── snapshot builders ────────────────────

/// An account snapshot with sensible defaults, `days` since last activity.
pub fn account(id: &str, days_inactive: i64, followers: u64) -> AccountSnapshot {
    AccountSnapshot {
        account_id: id.to_string(),
        handle: format!("user_{id}"),
        display_name: format!("User {id}"),
        verified: false,
        follower_count: followers,
        tweet_count: 400,
        last_activity_at: Some(Utc::now() - Duration::days(days_inactive)),
        is_private: false,
        has_profile_image: true,
    }
}

/// An account that never posted.
pub fn silent_account(id: &str, followers: u64) -> AccountSnapshot {
    AccountSnapshot {
        last_activity_at: None,
        tweet_count: 0,
        ..account(id, 0, followers)
    }
}

// ──────────────────── scripted API ────────────────────

/// Scriptable in-memory social-graph service.
///
/// Serves a fixed population with paging, answers batched lookups from the
/// same population (ids listed in `terminal` come back as per-item errors),
/// and records every mutating call.
pub struct MockSocialGraphApi {
    pub population: Mutex<Vec<AccountSnapshot>>,
    pub page_size: usize,
    pub terminal: Mutex<Vec<(String, PermanentReason)>>,
    /// account_id -> transient failures to serve before success.
    pub flaky_unfollows: Mutex<Vec<(String, u32)>>,
    pub unfollow_calls: Mutex<Vec<String>>,
    pub lookup_calls: Mutex<usize>,
    pub list_calls: Mutex<usize>,
}

impl MockSocialGraphApi {
    pub fn new(population: Vec<AccountSnapshot>) -> Self {
        Self {
            population: Mutex::new(population),
            page_size: 1_000,
            terminal: Mutex::new(Vec::new()),
            flaky_unfollows: Mutex::new(Vec::new()),
            unfollow_calls: Mutex::new(Vec::new()),
            lookup_calls: Mutex::new(0),
            list_calls: Mutex::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn mark_terminal(&self, id: &str, reason: PermanentReason) {
        self.terminal.lock().push((id.to_string(), reason));
    }

    pub fn mutating_calls(&self) -> usize {
        self.unfollow_calls.lock().len()
    }
}

impl SocialGraphApi for MockSocialGraphApi {
    fn list_following(&self, page_token: Option<&str>) -> Result<FollowingPage> {
        *self.list_calls.lock() += 1;
        let population = self.population.lock();
        let offset: usize = page_token.map_or(0, |t| t.parse().unwrap_or(0));
        let end = (offset + self.page_size).min(population.len());
        Ok(FollowingPage {
            accounts: population[offset..end].to_vec(),
            next_token: (end < population.len()).then(|| end.to_string()),
        })
    }

    fn lookup_accounts(&self, account_ids: &[String]) -> Result<Vec<LookupResult>> {
        *self.lookup_calls.lock() += 1;
        let population = self.population.lock();
        let terminal = self.terminal.lock();
        Ok(account_ids
            .iter()
            .filter_map(|id| {
                if let Some((_, reason)) = terminal.iter().find(|(tid, _)| tid == id) {
                    return Some(LookupResult::Terminal {
                        account_id: id.clone(),
                        reason: *reason,
                    });
                }
                population
                    .iter()
                    .find(|a| &a.account_id == id)
                    .cloned()
                    .map(LookupResult::Snapshot)
            })
            .collect())
    }

    fn unfollow(&self, account_id: &str) -> Result<UnfollowAck> {
        self.unfollow_calls.lock().push(account_id.to_string());

        let mut flaky = self.flaky_unfollows.lock();
        if let Some(entry) = flaky.iter_mut().find(|(id, _)| id == account_id)
            && entry.1 > 0
        {
            entry.1 -= 1;
            return Err(FswError::transient("unfollow", "scripted transient"));
        }
        drop(flaky);

        let mut population = self.population.lock();
        let before = population.len();
        population.retain(|a| a.account_id != account_id);
        if population.len() == before {
            return Ok(UnfollowAck::NotFollowing);
        }
        Ok(UnfollowAck::Removed)
    }
}

// ──────────────────── store / config fixtures ────────────────────

pub fn temp_store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Store::open(&dir.path().join("fsw-test.db")).expect("open store");
    (dir, Arc::new(store))
}

/// Config tuned for fast tests: no pacing, millisecond backoff.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.cleaner.inter_call_delay_secs = 0;
    config.cleaner.retry_base_delay_ms = 1;
    config.cleaner.retry_max_delay_ms = 4;
    config.cleaner.acquire_deadline_secs = 2;
    config.whitelist.protect_high_followers = false;
    config
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc::now()
}

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fsw") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "fsw.exe" } else { "fsw" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve fsw binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("fsw-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute fsw command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
