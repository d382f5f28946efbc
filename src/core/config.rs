//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FswError, Result};

/// Full Follow Sweeper configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub cleaner: CleanerConfig,
    pub scoring: ScoreTableConfig,
    pub rate: RateConfig,
    pub probe: ProbeConfig,
    pub whitelist: WhitelistRulesConfig,
    pub api: ApiConfig,
    pub paths: PathsConfig,
}

/// Batch-execution safety knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanerConfig {
    /// Days without activity before an account counts as inactive in reports.
    pub inactive_days_threshold: u32,
    /// Hard cap on committed unfollow transactions per run.
    pub max_unfollows_per_run: usize,
    /// Hard cap across all runs within a rolling day.
    pub max_unfollows_per_day: usize,
    /// Candidates below this score are never selected.
    pub min_score_threshold: i64,
    /// Pause between consecutive live unfollow calls.
    pub inter_call_delay_secs: u64,
    /// Plan-only mode: record the batch, issue zero mutating calls.
    pub dry_run: bool,
    /// Attempts per unfollow call before outcome=failed (includes the first).
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Longest a live run will wait for a rate window to roll.
    pub acquire_deadline_secs: u64,
}

/// Versioned, named score weight table.
///
/// Point values are defaults drawn from operator experience, not tuned
/// constants; every tier is swappable through config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScoreTableConfig {
    pub version: u32,
    pub name: String,
    /// Inactivity tiers, strictly descending `min_days`. First match wins.
    pub inactivity_tiers: Vec<InactivityTier>,
    /// Low-follower bonuses, strictly ascending `below`. First match wins.
    pub low_follower_tiers: Vec<BelowTier>,
    /// High-follower penalties, strictly descending `above`. First match wins.
    pub high_follower_tiers: Vec<AboveTier>,
    pub verified_points: i64,
    pub private_points: i64,
    pub missing_profile_image_points: i64,
    /// Sparse-posting bonuses keyed on total tweet count, ascending `below`.
    pub sparse_tweet_tiers: Vec<BelowTier>,
    /// Forced score for whitelisted accounts. Must sit below any threshold.
    pub whitelist_sentinel: i64,
    /// Clamp non-whitelisted scores at zero.
    pub floor_at_zero: bool,
}

/// One inactivity tier: `age_days >= min_days` earns `points`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InactivityTier {
    pub min_days: u32,
    pub points: i64,
}

/// One "value < below" tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BelowTier {
    pub below: u64,
    pub points: i64,
}

/// One "value > above" tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AboveTier {
    pub above: u64,
    pub points: i64,
}

/// Per-endpoint rate window ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateConfig {
    /// Window length shared by all endpoints.
    pub window_secs: u64,
    pub following_limit: u32,
    pub lookup_limit: u32,
    pub unfollow_limit: u32,
}

/// Activity probe batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Skip accounts checked more recently than this.
    pub recheck_after_days: u32,
    /// Accounts per lookup call; the external API caps this at 100.
    pub lookup_chunk_size: usize,
    /// Worker threads for concurrent chunk lookups.
    pub parallelism: usize,
}

/// Rules for auto-populating the whitelist at sync time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WhitelistRulesConfig {
    pub protect_verified: bool,
    pub protect_high_followers: bool,
    pub min_follower_threshold: u64,
    /// Shell-style globs matched against handles (e.g. `"team_*"`).
    pub handle_patterns: Vec<String>,
}

/// Social-graph API endpoint settings. Credentials come from the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Accounts per following-list page; the external API caps this at 1000.
    pub page_size: u32,
}

/// Filesystem paths used by fsw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub sqlite_db: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            inactive_days_threshold: 180,
            max_unfollows_per_run: 50,
            max_unfollows_per_day: 100,
            min_score_threshold: 50,
            inter_call_delay_secs: 2,
            dry_run: false,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            acquire_deadline_secs: 900,
        }
    }
}

impl Default for ScoreTableConfig {
    fn default() -> Self {
        Self {
            version: 1,
            name: "default".to_string(),
            inactivity_tiers: vec![
                InactivityTier {
                    min_days: 730,
                    points: 100,
                },
                InactivityTier {
                    min_days: 365,
                    points: 80,
                },
                InactivityTier {
                    min_days: 180,
                    points: 50,
                },
                InactivityTier {
                    min_days: 90,
                    points: 20,
                },
            ],
            low_follower_tiers: vec![
                BelowTier {
                    below: 50,
                    points: 30,
                },
                BelowTier {
                    below: 500,
                    points: 15,
                },
                BelowTier {
                    below: 5_000,
                    points: 5,
                },
            ],
            high_follower_tiers: vec![
                AboveTier {
                    above: 1_000_000,
                    points: -50,
                },
                AboveTier {
                    above: 100_000,
                    points: -20,
                },
            ],
            verified_points: -40,
            private_points: 10,
            missing_profile_image_points: 15,
            sparse_tweet_tiers: vec![
                BelowTier {
                    below: 10,
                    points: 25,
                },
                BelowTier {
                    below: 100,
                    points: 10,
                },
            ],
            whitelist_sentinel: -1_000,
            floor_at_zero: true,
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window_secs: 900,
            following_limit: 15,
            lookup_limit: 900,
            unfollow_limit: 50,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            recheck_after_days: 7,
            lookup_chunk_size: 100,
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
        }
    }
}

impl Default for WhitelistRulesConfig {
    fn default() -> Self {
        Self {
            protect_verified: true,
            protect_high_followers: true,
            min_follower_threshold: 100_000,
            handle_patterns: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.com/2".to_string(),
            user_agent: concat!("follow-sweeper/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            page_size: 1_000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[FSW-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("fsw").join("config.toml");
        let data = home_dir.join(".local").join("share").join("fsw");
        Self {
            config_file: cfg,
            sqlite_db: data.join("sweeper.sqlite3"),
            jsonl_log: data.join("run-events.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| FswError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(FswError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for run provenance.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes
    /// and Rust releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Apply `FSW_*` overrides through an injectable lookup (testable without
    /// touching process environment).
    #[allow(clippy::too_many_lines)]
    pub fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // cleaner
        if let Some(raw) = lookup("FSW_INACTIVE_DAYS_THRESHOLD") {
            self.cleaner.inactive_days_threshold =
                parse_env_u32("FSW_INACTIVE_DAYS_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("FSW_MAX_UNFOLLOWS_PER_RUN") {
            self.cleaner.max_unfollows_per_run =
                parse_env_usize("FSW_MAX_UNFOLLOWS_PER_RUN", &raw)?;
        }
        if let Some(raw) = lookup("FSW_MAX_UNFOLLOWS_PER_DAY") {
            self.cleaner.max_unfollows_per_day =
                parse_env_usize("FSW_MAX_UNFOLLOWS_PER_DAY", &raw)?;
        }
        if let Some(raw) = lookup("FSW_MIN_SCORE_THRESHOLD") {
            self.cleaner.min_score_threshold = parse_env_i64("FSW_MIN_SCORE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("FSW_INTER_CALL_DELAY_SECS") {
            self.cleaner.inter_call_delay_secs = parse_env_u64("FSW_INTER_CALL_DELAY_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FSW_DRY_RUN") {
            self.cleaner.dry_run = parse_env_bool("FSW_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("FSW_RETRY_MAX_ATTEMPTS") {
            self.cleaner.retry_max_attempts = parse_env_u32("FSW_RETRY_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("FSW_ACQUIRE_DEADLINE_SECS") {
            self.cleaner.acquire_deadline_secs = parse_env_u64("FSW_ACQUIRE_DEADLINE_SECS", &raw)?;
        }

        // rate
        if let Some(raw) = lookup("FSW_RATE_WINDOW_SECS") {
            self.rate.window_secs = parse_env_u64("FSW_RATE_WINDOW_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FSW_RATE_FOLLOWING_LIMIT") {
            self.rate.following_limit = parse_env_u32("FSW_RATE_FOLLOWING_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("FSW_RATE_LOOKUP_LIMIT") {
            self.rate.lookup_limit = parse_env_u32("FSW_RATE_LOOKUP_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("FSW_RATE_UNFOLLOW_LIMIT") {
            self.rate.unfollow_limit = parse_env_u32("FSW_RATE_UNFOLLOW_LIMIT", &raw)?;
        }

        // probe
        if let Some(raw) = lookup("FSW_PROBE_RECHECK_AFTER_DAYS") {
            self.probe.recheck_after_days = parse_env_u32("FSW_PROBE_RECHECK_AFTER_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("FSW_PROBE_CHUNK_SIZE") {
            self.probe.lookup_chunk_size = parse_env_usize("FSW_PROBE_CHUNK_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("FSW_PROBE_PARALLELISM") {
            self.probe.parallelism = parse_env_usize("FSW_PROBE_PARALLELISM", &raw)?;
        }

        // whitelist rules
        if let Some(raw) = lookup("FSW_PROTECT_VERIFIED") {
            self.whitelist.protect_verified = parse_env_bool("FSW_PROTECT_VERIFIED", &raw)?;
        }
        if let Some(raw) = lookup("FSW_PROTECT_HIGH_FOLLOWERS") {
            self.whitelist.protect_high_followers =
                parse_env_bool("FSW_PROTECT_HIGH_FOLLOWERS", &raw)?;
        }
        if let Some(raw) = lookup("FSW_MIN_FOLLOWER_THRESHOLD") {
            self.whitelist.min_follower_threshold =
                parse_env_u64("FSW_MIN_FOLLOWER_THRESHOLD", &raw)?;
        }

        // api
        if let Some(raw) = lookup("FSW_API_BASE_URL") {
            self.api.base_url = raw;
        }
        if let Some(raw) = lookup("FSW_API_TIMEOUT_SECS") {
            self.api.timeout_secs = parse_env_u64("FSW_API_TIMEOUT_SECS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("FSW_DB_PATH") {
            self.paths.sqlite_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("FSW_JSONL_PATH") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Fail fast on invalid threshold combinations, before any external call.
    #[allow(clippy::too_many_lines)]
    pub fn validate(&self) -> Result<()> {
        if self.cleaner.max_unfollows_per_run == 0 {
            return Err(FswError::InvalidConfig {
                details: "cleaner.max_unfollows_per_run must be >= 1".to_string(),
            });
        }
        if self.cleaner.max_unfollows_per_day < self.cleaner.max_unfollows_per_run {
            return Err(FswError::InvalidConfig {
                details: format!(
                    "cleaner.max_unfollows_per_day ({}) must be >= max_unfollows_per_run ({})",
                    self.cleaner.max_unfollows_per_day, self.cleaner.max_unfollows_per_run
                ),
            });
        }
        if self.cleaner.retry_max_attempts == 0 {
            return Err(FswError::InvalidConfig {
                details: "cleaner.retry_max_attempts must be >= 1".to_string(),
            });
        }
        if self.cleaner.retry_base_delay_ms > self.cleaner.retry_max_delay_ms {
            return Err(FswError::InvalidConfig {
                details: "cleaner.retry_base_delay_ms must be <= retry_max_delay_ms".to_string(),
            });
        }

        // The sentinel must dominate: a whitelisted account can never clear
        // any usable threshold.
        if self.scoring.whitelist_sentinel >= 0 {
            return Err(FswError::InvalidConfig {
                details: format!(
                    "scoring.whitelist_sentinel must be negative, got {}",
                    self.scoring.whitelist_sentinel
                ),
            });
        }
        if self.cleaner.min_score_threshold <= self.scoring.whitelist_sentinel {
            return Err(FswError::InvalidConfig {
                details: format!(
                    "cleaner.min_score_threshold ({}) must be > scoring.whitelist_sentinel ({})",
                    self.cleaner.min_score_threshold, self.scoring.whitelist_sentinel
                ),
            });
        }

        if self.scoring.inactivity_tiers.is_empty() {
            return Err(FswError::InvalidConfig {
                details: "scoring.inactivity_tiers must not be empty".to_string(),
            });
        }
        if !self
            .scoring
            .inactivity_tiers
            .is_sorted_by(|a, b| a.min_days > b.min_days)
        {
            return Err(FswError::InvalidConfig {
                details: "scoring.inactivity_tiers must strictly descend by min_days".to_string(),
            });
        }
        if !self
            .scoring
            .low_follower_tiers
            .is_sorted_by(|a, b| a.below < b.below)
        {
            return Err(FswError::InvalidConfig {
                details: "scoring.low_follower_tiers must strictly ascend by below".to_string(),
            });
        }
        if !self
            .scoring
            .high_follower_tiers
            .is_sorted_by(|a, b| a.above > b.above)
        {
            return Err(FswError::InvalidConfig {
                details: "scoring.high_follower_tiers must strictly descend by above".to_string(),
            });
        }
        if !self
            .scoring
            .sparse_tweet_tiers
            .is_sorted_by(|a, b| a.below < b.below)
        {
            return Err(FswError::InvalidConfig {
                details: "scoring.sparse_tweet_tiers must strictly ascend by below".to_string(),
            });
        }

        if self.rate.window_secs == 0 {
            return Err(FswError::InvalidConfig {
                details: "rate.window_secs must be >= 1".to_string(),
            });
        }
        for (name, limit) in [
            ("following_limit", self.rate.following_limit),
            ("lookup_limit", self.rate.lookup_limit),
            ("unfollow_limit", self.rate.unfollow_limit),
        ] {
            if limit == 0 {
                return Err(FswError::InvalidConfig {
                    details: format!("rate.{name} must be >= 1"),
                });
            }
        }

        if !(1..=100).contains(&self.probe.lookup_chunk_size) {
            return Err(FswError::InvalidConfig {
                details: format!(
                    "probe.lookup_chunk_size must be in [1, 100], got {}",
                    self.probe.lookup_chunk_size
                ),
            });
        }
        if self.probe.parallelism == 0 {
            return Err(FswError::InvalidConfig {
                details: "probe.parallelism must be >= 1".to_string(),
            });
        }

        if !(1..=1_000).contains(&self.api.page_size) {
            return Err(FswError::InvalidConfig {
                details: format!("api.page_size must be in [1, 1000], got {}", self.api.page_size),
            });
        }
        if self.api.base_url.trim().is_empty() {
            return Err(FswError::InvalidConfig {
                details: "api.base_url must not be empty".to_string(),
            });
        }

        // Validate handle patterns are compilable globs.
        for pattern in &self.whitelist.handle_patterns {
            crate::sweep::whitelist::validate_handle_pattern(pattern)?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| FswError::ConfigParse {
        context: "env",
        details: format!("{name} must be an unsigned integer, got {raw:?}"),
    })
}

fn parse_env_u32(name: &str, raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|_| FswError::ConfigParse {
        context: "env",
        details: format!("{name} must be an unsigned integer, got {raw:?}"),
    })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim().parse().map_err(|_| FswError::ConfigParse {
        context: "env",
        details: format!("{name} must be an unsigned integer, got {raw:?}"),
    })
}

fn parse_env_i64(name: &str, raw: &str) -> Result<i64> {
    raw.trim().parse().map_err(|_| FswError::ConfigParse {
        context: "env",
        details: format!("{name} must be an integer, got {raw:?}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(FswError::ConfigParse {
            context: "env",
            details: format!("{name} must be a boolean (true/false/1/0/on/off), got {raw:?}"),
        }),
    }
}
