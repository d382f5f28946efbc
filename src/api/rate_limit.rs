//! Per-endpoint rate budgets with fixed windows and a single mutation point.
//!
//! Every outbound call acquires from one of three budgets (`Following`,
//! `Lookup`, `Unfollow`), each with its own ceiling over a shared window
//! length. Counters roll at fixed boundaries aligned to the epoch, and all
//! mutations happen under one mutex so `used <= limit` holds even with
//! concurrent probe workers. Budgets persist through the store, so an
//! interrupted run resumes with the quota it already spent.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::RateConfig;
use crate::core::errors::{FswError, Result};
use crate::store::model::RateBudget;
use crate::store::sqlite::Store;

/// Rate-governed endpoints of the social-graph API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Following,
    Lookup,
    Unfollow,
}

impl Endpoint {
    pub const ALL: [Self; 3] = [Self::Following, Self::Lookup, Self::Unfollow];

    /// Stable key used in the store and in error messages.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Following => "following",
            Self::Lookup => "lookup",
            Self::Unfollow => "unfollow",
        }
    }

    /// Parse a stored key back into an endpoint.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "following" => Some(Self::Following),
            "lookup" => Some(Self::Lookup),
            "unfollow" => Some(Self::Unfollow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    window_start: i64,
    used: u32,
}

/// Gate for all outbound API calls.
pub struct RateLimiter {
    window_secs: u64,
    limits: HashMap<Endpoint, u32>,
    windows: Mutex<HashMap<Endpoint, Window>>,
    store: Option<Arc<Store>>,
}

impl RateLimiter {
    /// Build an in-memory limiter (budgets do not survive the process).
    #[must_use]
    pub fn new(config: &RateConfig) -> Self {
        Self {
            window_secs: config.window_secs,
            limits: HashMap::from([
                (Endpoint::Following, config.following_limit),
                (Endpoint::Lookup, config.lookup_limit),
                (Endpoint::Unfollow, config.unfollow_limit),
            ]),
            windows: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Build a limiter backed by the store, adopting any still-current
    /// persisted windows so quota spent by an interrupted run is honored.
    pub fn with_store(config: &RateConfig, store: Arc<Store>) -> Result<Self> {
        let mut limiter = Self::new(config);
        let now = now_epoch();
        {
            let mut windows = limiter.windows.lock();
            for endpoint in Endpoint::ALL {
                if let Some(budget) = store.load_rate_budget(endpoint.key())? {
                    let window_end = budget.window_start + i64::try_from(budget.window_secs)
                        .unwrap_or(i64::MAX);
                    if now < window_end {
                        windows.insert(
                            endpoint,
                            Window {
                                window_start: budget.window_start,
                                used: budget.used,
                            },
                        );
                    }
                }
            }
        }
        limiter.store = Some(store);
        Ok(limiter)
    }

    /// Immediately try to reserve one call. Returns `false` when the window
    /// is exhausted.
    pub fn try_acquire(&self, endpoint: Endpoint) -> Result<bool> {
        let limit = self.limit(endpoint);
        let now = now_epoch();
        let mut windows = self.windows.lock();
        let window = Self::rolled(&mut windows, endpoint, now, self.window_secs);
        if window.used >= limit {
            return Ok(false);
        }
        window.used += 1;
        let snapshot = *window;
        // Persist while still holding the window lock: budget rows must never
        // be written out of order by racing acquirers.
        self.persist(endpoint, snapshot)?;
        drop(windows);
        Ok(true)
    }

    /// Reserve one call, sleeping through window rollovers until `deadline`.
    pub fn acquire(&self, endpoint: Endpoint, deadline: Instant) -> Result<()> {
        loop {
            if self.try_acquire(endpoint)? {
                return Ok(());
            }
            let retry_after = self.seconds_until_reset(endpoint);
            let now = Instant::now();
            if now >= deadline {
                return Err(FswError::RateLimited {
                    endpoint: endpoint.key(),
                    retry_after_secs: retry_after,
                });
            }
            let until_reset = Duration::from_secs(retry_after.max(1));
            let until_deadline = deadline.duration_since(now);
            std::thread::sleep(until_reset.min(until_deadline));
        }
    }

    /// Fold a server-reported rate header pair into the local window.
    ///
    /// Aligns the window to the server's reset boundary and adopts its
    /// remaining count; a reset in the past is ignored.
    pub fn observe_reset(&self, endpoint: Endpoint, reset_epoch: i64, remaining: u32) -> Result<()> {
        let limit = self.limit(endpoint);
        let now = now_epoch();
        if reset_epoch <= now {
            return Ok(());
        }
        let window_start = reset_epoch - i64::try_from(self.window_secs).unwrap_or(i64::MAX);
        let window = Window {
            window_start,
            used: limit.saturating_sub(remaining),
        };
        let mut windows = self.windows.lock();
        windows.insert(endpoint, window);
        self.persist(endpoint, window)?;
        drop(windows);
        Ok(())
    }

    /// Calls still available in the current window.
    #[must_use]
    pub fn remaining(&self, endpoint: Endpoint) -> u32 {
        let limit = self.limit(endpoint);
        let now = now_epoch();
        let mut windows = self.windows.lock();
        let window = Self::rolled(&mut windows, endpoint, now, self.window_secs);
        // A persisted window recorded under a higher configured ceiling may
        // carry used > limit; report zero rather than underflow.
        limit.saturating_sub(window.used)
    }

    /// Seconds until the current window rolls over.
    #[must_use]
    pub fn seconds_until_reset(&self, endpoint: Endpoint) -> u64 {
        let now = now_epoch();
        let mut windows = self.windows.lock();
        let window = Self::rolled(&mut windows, endpoint, now, self.window_secs);
        let end = window.window_start + i64::try_from(self.window_secs).unwrap_or(i64::MAX);
        u64::try_from(end - now).unwrap_or(0)
    }

    /// Current budget rows (for status output).
    #[must_use]
    pub fn budgets(&self) -> Vec<RateBudget> {
        let now = now_epoch();
        let mut windows = self.windows.lock();
        Endpoint::ALL
            .iter()
            .map(|&endpoint| {
                let window = Self::rolled(&mut windows, endpoint, now, self.window_secs);
                RateBudget {
                    endpoint: endpoint.key().to_string(),
                    window_start: window.window_start,
                    window_secs: self.window_secs,
                    max_calls: self.limit(endpoint),
                    used: window.used,
                }
            })
            .collect()
    }

    fn limit(&self, endpoint: Endpoint) -> u32 {
        self.limits.get(&endpoint).copied().unwrap_or(0)
    }

    /// Fetch the window for `endpoint`, rolling it forward if it has lapsed.
    fn rolled<'a>(
        windows: &'a mut HashMap<Endpoint, Window>,
        endpoint: Endpoint,
        now: i64,
        window_secs: u64,
    ) -> &'a mut Window {
        let span = i64::try_from(window_secs).unwrap_or(i64::MAX);
        let aligned_start = now - now.rem_euclid(span);
        let window = windows.entry(endpoint).or_insert(Window {
            window_start: aligned_start,
            used: 0,
        });
        if now >= window.window_start + span {
            window.window_start = aligned_start;
            window.used = 0;
        }
        window
    }

    fn persist(&self, endpoint: Endpoint, window: Window) -> Result<()> {
        if let Some(store) = &self.store {
            store.save_rate_budget(&RateBudget {
                endpoint: endpoint.key().to_string(),
                window_start: window.window_start,
                window_secs: self.window_secs,
                max_calls: self.limit(endpoint),
                used: window.used,
            })?;
        }
        Ok(())
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_secs: u64, lookup: u32, unfollow: u32) -> RateConfig {
        RateConfig {
            window_secs,
            following_limit: 15,
            lookup_limit: lookup,
            unfollow_limit: unfollow,
        }
    }

    #[test]
    fn try_acquire_respects_ceiling() {
        let limiter = RateLimiter::new(&config(900, 3, 50));
        for _ in 0..3 {
            assert!(limiter.try_acquire(Endpoint::Lookup).unwrap());
        }
        assert!(!limiter.try_acquire(Endpoint::Lookup).unwrap());
        assert_eq!(limiter.remaining(Endpoint::Lookup), 0);
    }

    #[test]
    fn endpoints_have_independent_budgets() {
        let limiter = RateLimiter::new(&config(900, 2, 1));
        assert!(limiter.try_acquire(Endpoint::Unfollow).unwrap());
        assert!(!limiter.try_acquire(Endpoint::Unfollow).unwrap());
        // Lookup budget untouched by unfollow spending.
        assert_eq!(limiter.remaining(Endpoint::Lookup), 2);
    }

    #[test]
    fn window_rollover_resets_used() {
        let limiter = RateLimiter::new(&config(1, 1, 1));
        assert!(limiter.try_acquire(Endpoint::Lookup).unwrap());
        assert!(!limiter.try_acquire(Endpoint::Lookup).unwrap());
        std::thread::sleep(Duration::from_millis(1_100));
        assert!(limiter.try_acquire(Endpoint::Lookup).unwrap());
    }

    #[test]
    fn acquire_fails_with_rate_limited_past_deadline() {
        let limiter = RateLimiter::new(&config(900, 50, 1));
        assert!(limiter.try_acquire(Endpoint::Unfollow).unwrap());

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = limiter.acquire(Endpoint::Unfollow, deadline).unwrap_err();
        match err {
            FswError::RateLimited {
                endpoint,
                retry_after_secs,
            } => {
                assert_eq!(endpoint, "unfollow");
                assert!(retry_after_secs <= 900);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn acquire_waits_through_rollover() {
        let limiter = RateLimiter::new(&config(1, 50, 1));
        assert!(limiter.try_acquire(Endpoint::Unfollow).unwrap());

        let deadline = Instant::now() + Duration::from_secs(3);
        limiter
            .acquire(Endpoint::Unfollow, deadline)
            .expect("window rolls within the deadline");
    }

    #[test]
    fn concurrent_acquires_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(&config(900, 50, 50)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                let mut granted = 0u32;
                for _ in 0..20 {
                    if limiter.try_acquire(Endpoint::Lookup).unwrap() {
                        granted += 1;
                    }
                }
                granted
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50, "exactly the ceiling must be granted");
        assert_eq!(limiter.remaining(Endpoint::Lookup), 0);
    }

    #[test]
    fn observe_reset_adopts_server_remaining() {
        let limiter = RateLimiter::new(&config(900, 100, 50));
        let reset = now_epoch() + 600;
        limiter
            .observe_reset(Endpoint::Lookup, reset, 40)
            .unwrap();
        assert_eq!(limiter.remaining(Endpoint::Lookup), 40);
    }

    #[test]
    fn observe_reset_in_the_past_is_ignored() {
        let limiter = RateLimiter::new(&config(900, 100, 50));
        limiter
            .observe_reset(Endpoint::Lookup, now_epoch() - 10, 1)
            .unwrap();
        assert_eq!(limiter.remaining(Endpoint::Lookup), 100);
    }

    #[test]
    fn observe_reset_cannot_push_used_above_limit() {
        let limiter = RateLimiter::new(&config(900, 10, 50));
        limiter
            .observe_reset(Endpoint::Lookup, now_epoch() + 600, 0)
            .unwrap();
        let budgets = limiter.budgets();
        let lookup = budgets.iter().find(|b| b.endpoint == "lookup").unwrap();
        assert!(lookup.used <= lookup.max_calls);
    }

    #[test]
    fn budgets_snapshot_reports_all_endpoints() {
        let limiter = RateLimiter::new(&config(900, 900, 50));
        assert!(limiter.try_acquire(Endpoint::Following).unwrap());
        let budgets = limiter.budgets();
        assert_eq!(budgets.len(), 3);
        let following = budgets.iter().find(|b| b.endpoint == "following").unwrap();
        assert_eq!(following.used, 1);
        assert_eq!(following.max_calls, 15);
    }

    #[test]
    fn persisted_budget_survives_limiter_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("budget.db")).unwrap());
        let cfg = config(900, 5, 50);

        let limiter = RateLimiter::with_store(&cfg, Arc::clone(&store)).unwrap();
        for _ in 0..5 {
            assert!(limiter.try_acquire(Endpoint::Lookup).unwrap());
        }
        drop(limiter);

        let revived = RateLimiter::with_store(&cfg, store).unwrap();
        assert!(!revived.try_acquire(Endpoint::Lookup).unwrap());
        assert_eq!(revived.remaining(Endpoint::Lookup), 0);
    }

    #[test]
    fn endpoint_keys_round_trip() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::parse(endpoint.key()), Some(endpoint));
        }
        assert_eq!(Endpoint::parse("bogus"), None);
    }
}
