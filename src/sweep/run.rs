//! Cleaning-run orchestration: one cooperative batch job under the run lock.
//!
//! Order of operations: sync following list → apply whitelist rules → probe
//! stale activity → re-score → select → execute through the configured
//! outlet. Configuration is validated before the first external call, and
//! the run lock guarantees a single active run per store.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::api::client::SocialGraphApi;
use crate::api::rate_limit::{Endpoint, RateLimiter};
use crate::core::config::Config;
use crate::core::errors::{FswError, Result};
use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::store::model::FollowedAccount;
use crate::store::sqlite::Store;
use crate::sweep::executor::{BatchExecutor, BatchReport, ExecutorConfig, Outlet, backoff_delay};
use crate::sweep::probe::{ActivityProbe, ProbeReport};
use crate::sweep::scoring::ScoringEngine;
use crate::sweep::whitelist::{self, WhitelistGuard};

/// A run lock older than this is considered abandoned and taken over.
const RUN_LOCK_TTL: Duration = Duration::from_secs(4 * 3600);

/// Attempts per following-list page before the sync fails.
const SYNC_PAGE_ATTEMPTS: u32 = 3;

/// Summary of one following-list sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: usize,
    pub accounts: usize,
    pub new_accounts: usize,
    pub vanished: usize,
    pub duration_ms: u64,
}

/// Summary of one full cleaning cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: String,
    pub sync: SyncReport,
    pub whitelist_added: usize,
    pub probe: ProbeReport,
    pub scored: usize,
    pub batch: BatchReport,
    pub duration_ms: u64,
}

/// One cooperative cleaning run over a shared store.
pub struct CleaningRun {
    config: Config,
    store: Arc<Store>,
    logger: Option<RunLoggerHandle>,
}

impl std::fmt::Debug for CleaningRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleaningRun")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CleaningRun {
    /// Validate configuration up front: an invalid threshold combination
    /// must fail before any external call is issued.
    pub fn new(
        config: Config,
        store: Arc<Store>,
        logger: Option<RunLoggerHandle>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            logger,
        })
    }

    /// Execute the full cycle. Holds the run lock for the duration.
    pub fn execute(&self, api: &dyn SocialGraphApi) -> Result<RunReport> {
        let start = Instant::now();
        let _lock = self.store.acquire_run_lock(RUN_LOCK_TTL)?;
        let limiter = RateLimiter::with_store(&self.config.rate, Arc::clone(&self.store))?;

        let mode = if self.config.cleaner.dry_run {
            "plan-only"
        } else {
            "live"
        };
        self.log(RunEvent::RunStarted {
            mode: mode.to_string(),
            config_hash: self.config.stable_hash()?,
        });

        let sync = self.sync_following(api, &limiter)?;

        let whitelist_added =
            whitelist::apply_rules(&self.store, &self.config.whitelist, Utc::now())?.total();
        self.log(RunEvent::WhitelistRulesApplied {
            added: whitelist_added,
        });

        let probe = ActivityProbe::new(
            self.config.probe.clone(),
            Arc::clone(&self.store),
            self.logger.clone(),
        )
        .refresh_stale(api, &limiter, Utc::now(), self.deadline())?;

        let scored = self.rescore()?;

        let executor = BatchExecutor::new(
            ExecutorConfig::from_cleaner(&self.config.cleaner),
            Arc::clone(&self.store),
            self.logger.clone(),
        );
        let candidates = executor.select()?;
        let outlet = if self.config.cleaner.dry_run {
            Outlet::PlanOnly
        } else {
            Outlet::Live {
                api,
                limiter: &limiter,
            }
        };
        let batch = executor.execute(&candidates, &outlet)?;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log(RunEvent::RunFinished {
            batch_id: Some(batch.batch_id.clone()),
            succeeded: batch.succeeded,
            failed: batch.failed,
            duration_ms,
        });

        Ok(RunReport {
            mode: mode.to_string(),
            sync,
            whitelist_added,
            probe,
            scored,
            batch,
            duration_ms,
        })
    }

    /// Mirror the complete following list into the store.
    ///
    /// Pages through `list_following` under the Following budget; accounts
    /// that disappeared since the previous sync are soft-removed.
    pub fn sync_following(
        &self,
        api: &dyn SocialGraphApi,
        limiter: &RateLimiter,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let generation = self.store.begin_sync_generation()?;
        let mut report = SyncReport::default();
        let mut page_token: Option<String> = None;

        loop {
            limiter.acquire(Endpoint::Following, self.deadline())?;
            let page = self.fetch_page_with_retry(api, page_token.as_deref())?;

            let now = Utc::now();
            for snapshot in &page.accounts {
                if self.store.upsert_synced_account(snapshot, generation, now)? {
                    report.new_accounts += 1;
                }
            }
            report.accounts += page.accounts.len();
            report.pages += 1;

            match page.next_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        report.vanished = self.store.mark_unseen_removed(generation, Utc::now())?;
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log(RunEvent::SyncCompleted {
            pages: report.pages,
            accounts: report.accounts,
            vanished: report.vanished,
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    fn fetch_page_with_retry(
        &self,
        api: &dyn SocialGraphApi,
        page_token: Option<&str>,
    ) -> Result<crate::api::wire::FollowingPage> {
        let mut last_error: Option<FswError> = None;
        for attempt in 1..=SYNC_PAGE_ATTEMPTS {
            match api.list_following(page_token) {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < SYNC_PAGE_ATTEMPTS => {
                    std::thread::sleep(backoff_delay(
                        attempt,
                        Duration::from_millis(self.config.cleaner.retry_base_delay_ms),
                        Duration::from_millis(self.config.cleaner.retry_max_delay_ms),
                    ));
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(FswError::Runtime {
            details: "sync retry loop exited without an error".to_string(),
        }))
    }

    /// Re-score every active account against the current whitelist.
    /// Deterministic: one `now`, one guard snapshot, one weight table.
    pub fn rescore(&self) -> Result<usize> {
        let now = Utc::now();
        let guard = WhitelistGuard::load(&self.store)?;
        let engine = ScoringEngine::from_config(&self.config.scoring);
        let accounts = self.store.active_accounts()?;
        let scores =
            engine.score_batch(&accounts, now, |account| {
                guard.is_protected(&account.account_id)
            });
        self.store.set_scores(&scores)?;
        self.log(RunEvent::ScoresUpdated {
            scored: scores.len(),
            table: engine.table_label(),
        });
        Ok(scores.len())
    }

    /// Current selection without executing anything (CLI `plan`).
    pub fn plan(&self) -> Result<Vec<FollowedAccount>> {
        let executor = BatchExecutor::new(
            ExecutorConfig::from_cleaner(&self.config.cleaner),
            Arc::clone(&self.store),
            None,
        );
        executor.select()
    }

    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.cleaner.acquire_deadline_secs)
    }

    fn log(&self, event: RunEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
