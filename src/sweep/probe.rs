//! Activity probe: refreshes per-account snapshots in rate-gated batches.
//!
//! Account ids are partitioned into chunks no larger than the external
//! API's per-call limit. Chunks may be looked up concurrently by a small
//! worker pool (each call still acquires the Lookup budget), but all store
//! writes happen on the coordinating thread. Per-item failures inside a
//! chunk (suspended, deleted, access-restricted) mark that one account
//! terminal and never abort the rest.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;

use crate::api::client::SocialGraphApi;
use crate::api::rate_limit::{Endpoint, RateLimiter};
use crate::api::wire::LookupResult;
use crate::core::config::ProbeConfig;
use crate::core::errors::{FswError, Result};
use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::store::sqlite::Store;
use crate::sweep::executor::backoff_delay;

/// Attempts per chunk before it is counted as failed.
const CHUNK_ATTEMPTS: u32 = 3;
const CHUNK_BACKOFF_BASE: Duration = Duration::from_millis(500);
const CHUNK_BACKOFF_MAX: Duration = Duration::from_secs(8);

/// Summary of one probe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub requested: usize,
    pub refreshed: usize,
    pub terminal: usize,
    pub failed_chunks: usize,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
}

enum ChunkOutcome {
    Results(Vec<LookupResult>),
    Exhausted(u64),
    Failed(String),
}

/// Batched, rate-gated activity refresher.
pub struct ActivityProbe {
    config: ProbeConfig,
    store: Arc<Store>,
    logger: Option<RunLoggerHandle>,
}

impl ActivityProbe {
    pub fn new(config: ProbeConfig, store: Arc<Store>, logger: Option<RunLoggerHandle>) -> Self {
        Self {
            config,
            store,
            logger,
        }
    }

    /// Refresh every account whose last check is older than the recheck
    /// window, most influential first.
    pub fn refresh_stale(
        &self,
        api: &dyn SocialGraphApi,
        limiter: &RateLimiter,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<ProbeReport> {
        let stale = self
            .store
            .stale_account_ids(self.config.recheck_after_days, now)?;
        self.probe_ids(api, limiter, &stale, deadline)
    }

    /// Probe an explicit id list.
    pub fn probe_ids(
        &self,
        api: &dyn SocialGraphApi,
        limiter: &RateLimiter,
        account_ids: &[String],
        deadline: Instant,
    ) -> Result<ProbeReport> {
        let start = Instant::now();
        let mut report = ProbeReport {
            requested: account_ids.len(),
            ..ProbeReport::default()
        };
        if account_ids.is_empty() {
            return Ok(report);
        }

        let chunks: Vec<&[String]> = account_ids.chunks(self.config.lookup_chunk_size).collect();
        let workers = self.config.parallelism.min(chunks.len()).max(1);

        let (job_tx, job_rx) = bounded::<&[String]>(chunks.len());
        let (result_tx, result_rx) = bounded::<ChunkOutcome>(chunks.len());
        for &chunk in &chunks {
            job_tx
                .send(chunk)
                .map_err(|_| FswError::ChannelClosed { component: "probe" })?;
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(chunk) = job_rx.recv() {
                        let outcome = lookup_chunk(api, limiter, chunk, deadline);
                        let stop = matches!(outcome, ChunkOutcome::Exhausted(_));
                        if result_tx.send(outcome).is_err() || stop {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // Coordinator applies all store writes.
            let now = Utc::now();
            for outcome in result_rx {
                match outcome {
                    ChunkOutcome::Results(results) => {
                        for result in results {
                            self.apply(result, now, &mut report)?;
                        }
                    }
                    ChunkOutcome::Exhausted(retry_after_secs) => {
                        report.budget_exhausted = true;
                        self.log(RunEvent::RateWindowWait {
                            endpoint: Endpoint::Lookup.key(),
                            retry_after_secs,
                        });
                    }
                    ChunkOutcome::Failed(details) => {
                        report.failed_chunks += 1;
                        self.log(RunEvent::Error {
                            code: "FSW-2002".to_string(),
                            message: details,
                        });
                    }
                }
            }
            Ok::<(), FswError>(())
        })?;

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log(RunEvent::ProbeCompleted {
            requested: report.requested,
            refreshed: report.refreshed,
            terminal: report.terminal,
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    fn apply(
        &self,
        result: LookupResult,
        now: DateTime<Utc>,
        report: &mut ProbeReport,
    ) -> Result<()> {
        match result {
            LookupResult::Snapshot(snapshot) => {
                if self.store.apply_probe(&snapshot, now)? {
                    report.refreshed += 1;
                }
            }
            LookupResult::Terminal { account_id, reason } => {
                if self.store.mark_terminal(&account_id, reason, now)? {
                    report.terminal += 1;
                    self.log(RunEvent::AccountTerminal {
                        account_id,
                        reason: reason.as_str().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn log(&self, event: RunEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

/// One rate-gated, retry-bounded chunk lookup, run on a worker thread.
fn lookup_chunk(
    api: &dyn SocialGraphApi,
    limiter: &RateLimiter,
    chunk: &[String],
    deadline: Instant,
) -> ChunkOutcome {
    let mut last_error = String::new();
    for attempt in 1..=CHUNK_ATTEMPTS {
        match limiter.acquire(Endpoint::Lookup, deadline) {
            Ok(()) => {}
            Err(FswError::RateLimited {
                retry_after_secs, ..
            }) => return ChunkOutcome::Exhausted(retry_after_secs),
            Err(e) => return ChunkOutcome::Failed(e.to_string()),
        }
        match api.lookup_accounts(chunk) {
            Ok(results) => return ChunkOutcome::Results(results),
            Err(e) if e.is_retryable() => {
                last_error = e.to_string();
                if attempt < CHUNK_ATTEMPTS {
                    std::thread::sleep(backoff_delay(
                        attempt,
                        CHUNK_BACKOFF_BASE,
                        CHUNK_BACKOFF_MAX,
                    ));
                }
            }
            Err(e) => return ChunkOutcome::Failed(e.to_string()),
        }
    }
    ChunkOutcome::Failed(format!(
        "chunk lookup gave up after {CHUNK_ATTEMPTS} attempts: {last_error}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::wire::{AccountSnapshot, FollowingPage, UnfollowAck};
    use crate::core::config::RateConfig;
    use crate::core::errors::PermanentReason;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    /// Scripted lookup API: per-id outcomes, call counting.
    struct ScriptedApi {
        terminal: Vec<(String, PermanentReason)>,
        transient_failures: Mutex<u32>,
        lookup_calls: Mutex<u32>,
    }

    impl ScriptedApi {
        fn new() -> Self {
            Self {
                terminal: Vec::new(),
                transient_failures: Mutex::new(0),
                lookup_calls: Mutex::new(0),
            }
        }
    }

    impl SocialGraphApi for ScriptedApi {
        fn list_following(&self, _page_token: Option<&str>) -> Result<FollowingPage> {
            unimplemented!("probe tests never list")
        }

        fn lookup_accounts(&self, account_ids: &[String]) -> Result<Vec<LookupResult>> {
            *self.lookup_calls.lock() += 1;
            {
                let mut budget = self.transient_failures.lock();
                if *budget > 0 {
                    *budget -= 1;
                    return Err(FswError::transient("lookup", "flaky upstream"));
                }
            }
            Ok(account_ids
                .iter()
                .map(|id| {
                    if let Some((_, reason)) =
                        self.terminal.iter().find(|(tid, _)| tid == id)
                    {
                        LookupResult::Terminal {
                            account_id: id.clone(),
                            reason: *reason,
                        }
                    } else {
                        LookupResult::Snapshot(snapshot(id, 77))
                    }
                })
                .collect())
        }

        fn unfollow(&self, _account_id: &str) -> Result<UnfollowAck> {
            unimplemented!("probe tests never unfollow")
        }
    }

    fn snapshot(id: &str, tweets: u64) -> AccountSnapshot {
        AccountSnapshot {
            account_id: id.to_string(),
            handle: format!("u{id}"),
            display_name: format!("User {id}"),
            verified: false,
            follower_count: 10,
            tweet_count: tweets,
            last_activity_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            is_private: false,
            has_profile_image: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap()
    }

    fn temp_store_with(ids: &[&str]) -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("probe.db")).unwrap());
        for id in ids {
            store
                .upsert_synced_account(&snapshot(id, 5), 1, now())
                .unwrap();
        }
        (dir, store)
    }

    fn probe(store: &Arc<Store>, chunk_size: usize, parallelism: usize) -> ActivityProbe {
        ActivityProbe::new(
            ProbeConfig {
                recheck_after_days: 7,
                lookup_chunk_size: chunk_size,
                parallelism,
            },
            Arc::clone(store),
            None,
        )
    }

    fn limiter(lookup: u32) -> RateLimiter {
        RateLimiter::new(&RateConfig {
            window_secs: 900,
            following_limit: 15,
            lookup_limit: lookup,
            unfollow_limit: 50,
        })
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn refresh_updates_snapshots_and_check_counts() {
        let (_dir, store) = temp_store_with(&["1", "2", "3"]);
        let api = ScriptedApi::new();
        let report = probe(&store, 100, 1)
            .refresh_stale(&api, &limiter(900), now(), far_deadline())
            .unwrap();

        assert_eq!(report.requested, 3);
        assert_eq!(report.refreshed, 3);
        assert_eq!(report.terminal, 0);
        for id in ["1", "2", "3"] {
            let account = store.account(id).unwrap().unwrap();
            assert_eq!(account.check_count, 1);
            assert_eq!(account.tweet_count, 77);
        }
    }

    #[test]
    fn per_item_failures_do_not_abort_the_chunk() {
        let (_dir, store) = temp_store_with(&["1", "2", "3"]);
        let mut api = ScriptedApi::new();
        api.terminal
            .push(("2".to_string(), PermanentReason::Suspended));

        let report = probe(&store, 100, 1)
            .refresh_stale(&api, &limiter(900), now(), far_deadline())
            .unwrap();

        assert_eq!(report.refreshed, 2);
        assert_eq!(report.terminal, 1);
        let suspended = store.account("2").unwrap().unwrap();
        assert_eq!(suspended.terminal_reason.as_deref(), Some("suspended"));
        // The other accounts still got their refresh.
        assert_eq!(store.account("1").unwrap().unwrap().check_count, 1);
    }

    #[test]
    fn chunking_respects_per_call_limit() {
        let ids: Vec<String> = (0..250).map(|i| format!("{i:04}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (_dir, store) = temp_store_with(&refs);
        let api = ScriptedApi::new();

        let report = probe(&store, 100, 1)
            .refresh_stale(&api, &limiter(900), now(), far_deadline())
            .unwrap();

        assert_eq!(report.refreshed, 250);
        assert_eq!(*api.lookup_calls.lock(), 3, "250 ids should take 3 calls");
    }

    #[test]
    fn transient_lookup_errors_are_retried() {
        let (_dir, store) = temp_store_with(&["1"]);
        let mut api = ScriptedApi::new();
        *api.transient_failures.get_mut() = 2;

        let report = probe(&store, 100, 1)
            .refresh_stale(&api, &limiter(900), now(), far_deadline())
            .unwrap();

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed_chunks, 0);
        assert_eq!(*api.lookup_calls.lock(), 3);
    }

    #[test]
    fn persistent_chunk_failure_is_counted_not_fatal() {
        let (_dir, store) = temp_store_with(&["1"]);
        let mut api = ScriptedApi::new();
        *api.transient_failures.get_mut() = 99;

        let report = probe(&store, 100, 1)
            .refresh_stale(&api, &limiter(900), now(), far_deadline())
            .unwrap();

        assert_eq!(report.refreshed, 0);
        assert_eq!(report.failed_chunks, 1);
    }

    #[test]
    fn exhausted_budget_stops_with_flag() {
        let (_dir, store) = temp_store_with(&["1", "2", "3"]);
        let api = ScriptedApi::new();

        // One lookup call allowed; deadline too close for a window roll.
        let report = probe(&store, 1, 1)
            .probe_ids(
                &api,
                &limiter(1),
                &["1".to_string(), "2".to_string(), "3".to_string()],
                Instant::now() + Duration::from_millis(100),
            )
            .unwrap();

        assert!(report.budget_exhausted);
        assert_eq!(report.refreshed, 1);
    }

    #[test]
    fn parallel_probe_matches_sequential_results() {
        let ids: Vec<String> = (0..40).map(|i| format!("{i:03}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (_dir, store) = temp_store_with(&refs);
        let api = ScriptedApi::new();

        let report = probe(&store, 10, 4)
            .probe_ids(&api, &limiter(900), &ids, far_deadline())
            .unwrap();

        assert_eq!(report.refreshed, 40);
        assert_eq!(*api.lookup_calls.lock(), 4);
        for id in &ids {
            assert_eq!(store.account(id).unwrap().unwrap().check_count, 1);
        }
    }

    #[test]
    fn empty_id_list_is_a_noop() {
        let (_dir, store) = temp_store_with(&[]);
        let api = ScriptedApi::new();
        let report = probe(&store, 100, 2)
            .probe_ids(&api, &limiter(900), &[], far_deadline())
            .unwrap();
        assert_eq!(report, ProbeReport::default());
        assert_eq!(*api.lookup_calls.lock(), 0);
    }
}
