//! Batch executor: bounded, paced, audited unfollow execution.
//!
//! One pipeline, two outlets. Selection, pacing, retry, and audit logic are
//! identical for dry runs and live runs; only the side-effect capability
//! injected at the external-call boundary differs. `PlanOnly` records the
//! batch with outcome=skipped and issues zero mutating calls; `Live`
//! acquires the unfollow budget per call, retries transient failures with
//! jittered exponential backoff, and paces calls with an explicit
//! inter-call delay so the externally observed rate stays predictable.
//!
//! Every candidate commits atomically (audit insert + account update in one
//! store transaction): interrupting a run between candidates never leaves a
//! half-applied unfollow.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;

use crate::api::client::SocialGraphApi;
use crate::api::rate_limit::{Endpoint, RateLimiter};
use crate::api::wire::UnfollowAck;
use crate::core::config::CleanerConfig;
use crate::core::errors::{FswError, Result};
use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::store::model::{FollowedAccount, Outcome, UnfollowTransaction};
use crate::store::sqlite::Store;

/// Safety knobs for one batch, derived from [`CleanerConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub min_score_threshold: i64,
    pub max_unfollows_per_run: usize,
    pub max_unfollows_per_day: usize,
    pub inter_call_delay: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub acquire_deadline: Duration,
}

impl ExecutorConfig {
    #[must_use]
    pub fn from_cleaner(cleaner: &CleanerConfig) -> Self {
        Self {
            min_score_threshold: cleaner.min_score_threshold,
            max_unfollows_per_run: cleaner.max_unfollows_per_run,
            max_unfollows_per_day: cleaner.max_unfollows_per_day,
            inter_call_delay: Duration::from_secs(cleaner.inter_call_delay_secs),
            retry_max_attempts: cleaner.retry_max_attempts,
            retry_base_delay: Duration::from_millis(cleaner.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(cleaner.retry_max_delay_ms),
            acquire_deadline: Duration::from_secs(cleaner.acquire_deadline_secs),
        }
    }
}

/// Side-effect capability injected at the external-call boundary.
pub enum Outlet<'a> {
    /// Record the plan; never touch the network.
    PlanOnly,
    /// Execute for real, gated by the unfollow budget.
    Live {
        api: &'a dyn SocialGraphApi,
        limiter: &'a RateLimiter,
    },
}

impl Outlet<'_> {
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    #[must_use]
    pub const fn mode_label(&self) -> &'static str {
        match self {
            Self::PlanOnly => "plan-only",
            Self::Live { .. } => "live",
        }
    }
}

/// Summary of one executed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: String,
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub mutating_calls: u64,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
}

enum AttemptResult {
    Done {
        outcome: Outcome,
        detail: Option<String>,
        mark_removed: bool,
    },
    BudgetExhausted {
        retry_after_secs: u64,
    },
}

/// The SafetyController: selects and executes one bounded batch.
pub struct BatchExecutor {
    config: ExecutorConfig,
    store: Arc<Store>,
    logger: Option<RunLoggerHandle>,
}

impl BatchExecutor {
    pub fn new(config: ExecutorConfig, store: Arc<Store>, logger: Option<RunLoggerHandle>) -> Self {
        Self {
            config,
            store,
            logger,
        }
    }

    /// Ranked selection under both caps: at most `max_unfollows_per_run`,
    /// shrunk further by whatever the rolling daily cap has left.
    ///
    /// The store query already excludes whitelisted, removed, and terminal
    /// accounts and breaks score ties by account id.
    pub fn select(&self) -> Result<Vec<FollowedAccount>> {
        let day_used = self
            .store
            .unfollows_since(Utc::now() - chrono::Duration::days(1))?;
        let day_remaining = self
            .config
            .max_unfollows_per_day
            .saturating_sub(usize::try_from(day_used).unwrap_or(usize::MAX));
        let cap = self.config.max_unfollows_per_run.min(day_remaining);
        if cap == 0 {
            return Ok(Vec::new());
        }
        self.store.candidates(self.config.min_score_threshold, cap)
    }

    /// Run the pipeline over a selection through the given outlet.
    pub fn execute(
        &self,
        candidates: &[FollowedAccount],
        outlet: &Outlet<'_>,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let batch_id = new_batch_id();
        let mut report = BatchReport {
            batch_id: batch_id.clone(),
            selected: candidates.len(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            mutating_calls: 0,
            budget_exhausted: false,
            duration_ms: 0,
        };

        for (index, account) in candidates
            .iter()
            .take(self.config.max_unfollows_per_run)
            .enumerate()
        {
            let attempt = match outlet {
                Outlet::PlanOnly => AttemptResult::Done {
                    outcome: Outcome::Skipped,
                    detail: Some("planned".to_string()),
                    mark_removed: false,
                },
                Outlet::Live { api, limiter } => {
                    if index > 0 {
                        // Bound externally observed burstiness, independent of
                        // whatever spacing the rate window happens to allow.
                        std::thread::sleep(self.config.inter_call_delay);
                    }
                    self.attempt_unfollow(*api, limiter, account, &mut report)?
                }
            };

            match attempt {
                AttemptResult::BudgetExhausted { retry_after_secs } => {
                    report.budget_exhausted = true;
                    self.log(RunEvent::RateWindowWait {
                        endpoint: Endpoint::Unfollow.key(),
                        retry_after_secs,
                    });
                    break;
                }
                AttemptResult::Done {
                    outcome,
                    detail,
                    mark_removed,
                } => {
                    self.commit(&batch_id, account, outcome, detail, mark_removed, &mut report)?;
                }
            }
        }

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(report)
    }

    /// One candidate through the live outlet: budget, call, bounded retry.
    fn attempt_unfollow(
        &self,
        api: &dyn SocialGraphApi,
        limiter: &RateLimiter,
        account: &FollowedAccount,
        report: &mut BatchReport,
    ) -> Result<AttemptResult> {
        let deadline = Instant::now() + self.config.acquire_deadline;
        let mut last_error = String::new();

        for attempt in 1..=self.config.retry_max_attempts {
            // Retries consume the run's mutating-call allowance too: the cap
            // bounds calls issued, not candidates attempted.
            if report.mutating_calls >= self.config.max_unfollows_per_run as u64 {
                return Ok(AttemptResult::BudgetExhausted {
                    retry_after_secs: 0,
                });
            }
            match limiter.acquire(Endpoint::Unfollow, deadline) {
                Ok(()) => {}
                Err(FswError::RateLimited {
                    retry_after_secs, ..
                }) => {
                    return Ok(AttemptResult::BudgetExhausted { retry_after_secs });
                }
                Err(e) => return Err(e),
            }

            report.mutating_calls += 1;
            match api.unfollow(&account.account_id) {
                Ok(ack) => {
                    let detail = match ack {
                        UnfollowAck::Removed => None,
                        UnfollowAck::NotFollowing => {
                            Some("already not following".to_string())
                        }
                    };
                    return Ok(AttemptResult::Done {
                        outcome: Outcome::Success,
                        detail,
                        mark_removed: true,
                    });
                }
                Err(FswError::PermanentApi { reason, .. }) => {
                    self.store
                        .mark_terminal(&account.account_id, reason, Utc::now())?;
                    self.log(RunEvent::AccountTerminal {
                        account_id: account.account_id.clone(),
                        reason: reason.as_str().to_string(),
                    });
                    return Ok(AttemptResult::Done {
                        outcome: Outcome::Skipped,
                        detail: Some(format!("terminal: {reason}")),
                        mark_removed: false,
                    });
                }
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    if attempt < self.config.retry_max_attempts {
                        std::thread::sleep(backoff_delay(
                            attempt,
                            self.config.retry_base_delay,
                            self.config.retry_max_delay,
                        ));
                    }
                }
                Err(e) => {
                    return Ok(AttemptResult::Done {
                        outcome: Outcome::Failed,
                        detail: Some(e.to_string()),
                        mark_removed: false,
                    });
                }
            }
        }

        Ok(AttemptResult::Done {
            outcome: Outcome::Failed,
            detail: Some(format!(
                "gave up after {} attempts: {last_error}",
                self.config.retry_max_attempts
            )),
            mark_removed: false,
        })
    }

    fn commit(
        &self,
        batch_id: &str,
        account: &FollowedAccount,
        outcome: Outcome,
        detail: Option<String>,
        mark_removed: bool,
        report: &mut BatchReport,
    ) -> Result<()> {
        let transaction = UnfollowTransaction {
            id: 0,
            batch_id: batch_id.to_string(),
            account_id: account.account_id.clone(),
            handle: account.handle.clone(),
            follower_count: account.follower_count,
            score: account.current_score.unwrap_or(0),
            executed_at: Utc::now(),
            outcome,
            detail: detail.clone(),
        };
        self.store.commit_unfollow(&transaction, mark_removed)?;

        match outcome {
            Outcome::Success => {
                report.succeeded += 1;
                self.log(RunEvent::UnfollowExecuted {
                    batch_id: batch_id.to_string(),
                    account_id: account.account_id.clone(),
                    handle: account.handle.clone(),
                    score: transaction.score,
                    outcome: outcome.as_str().to_string(),
                });
            }
            Outcome::Failed => {
                report.failed += 1;
                self.log(RunEvent::UnfollowFailed {
                    batch_id: batch_id.to_string(),
                    account_id: account.account_id.clone(),
                    error_code: "FSW-2002".to_string(),
                    error_message: detail.unwrap_or_default(),
                });
            }
            Outcome::Skipped => {
                report.skipped += 1;
                self.log(RunEvent::UnfollowExecuted {
                    batch_id: batch_id.to_string(),
                    account_id: account.account_id.clone(),
                    handle: account.handle.clone(),
                    score: transaction.score,
                    outcome: outcome.as_str().to_string(),
                });
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

/// Short random batch identifier (8 hex chars).
fn new_batch_id() -> String {
    format!("{:08x}", rand::rng().random::<u32>())
}

/// Jittered exponential backoff: `base * 2^(attempt-1)` capped at `max`,
/// with up to 25% random jitter added to avoid retry alignment.
pub(crate) fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(2_u32.saturating_pow(exponent)).min(max);
    let jitter_cap = (scaled.as_millis() / 4).max(1);
    let jitter = rand::rng().random_range(0..u64::try_from(jitter_cap).unwrap_or(1));
    (scaled + Duration::from_millis(jitter)).min(max)
}
