//! Run-event coordinator: a dedicated logger thread owns the JSONL writer.
//!
//! Pipeline stages send [`RunEvent`]s via a bounded crossbeam channel using
//! non-blocking `try_send()`, so probing and execution are never stalled by
//! logging back-pressure. Dropped events are counted and reported.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::Result;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the cleaning pipeline.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        mode: String,
        config_hash: String,
    },
    RunFinished {
        batch_id: Option<String>,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    },
    SyncCompleted {
        pages: usize,
        accounts: usize,
        vanished: usize,
        duration_ms: u64,
    },
    ProbeCompleted {
        requested: usize,
        refreshed: usize,
        terminal: usize,
        duration_ms: u64,
    },
    ScoresUpdated {
        scored: usize,
        table: String,
    },
    WhitelistRulesApplied {
        added: usize,
    },
    AccountTerminal {
        account_id: String,
        reason: String,
    },
    UnfollowExecuted {
        batch_id: String,
        account_id: String,
        handle: String,
        score: i64,
        outcome: String,
    },
    UnfollowFailed {
        batch_id: String,
        account_id: String,
        error_code: String,
        error_message: String,
    },
    RateWindowWait {
        endpoint: &'static str,
        retry_after_secs: u64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

/// Thread-safe, cheaply-cloneable handle for sending run events.
#[derive(Clone)]
pub struct RunLoggerHandle {
    tx: Sender<RunEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl RunLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and the dropped-events
    /// counter is incremented.
    pub fn send(&self, event: RunEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown of the logger thread.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RunEvent::Shutdown);
    }
}

/// Options for building the run logger.
pub struct RunLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for RunLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle.
///
/// The returned handle is `Clone + Send` and can be shared across probe
/// workers. The thread runs until `handle.shutdown()` is called or all
/// senders are dropped.
pub fn spawn_logger(config: RunLoggerConfig) -> Result<(RunLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<RunEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = RunLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("fsw-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.jsonl_config, dropped_clone);
        })
        .map_err(|e| crate::core::errors::FswError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: Receiver<RunEvent>, jsonl_config: JsonlConfig, dropped: Arc<AtomicU64>) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, RunEvent::Shutdown) {
            jsonl.flush();
            jsonl.fsync();
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
    }
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &RunEvent) -> LogEntry {
    match event {
        RunEvent::RunStarted { mode, config_hash } => {
            let mut entry = LogEntry::new(EventType::RunStart, Severity::Info);
            entry.details = Some(format!("mode={mode} config={config_hash}"));
            entry
        }
        RunEvent::RunFinished {
            batch_id,
            succeeded,
            failed,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::RunFinish, Severity::Info);
            entry.batch_id.clone_from(batch_id);
            entry.count = Some(*succeeded as u64);
            entry.duration_ms = Some(*duration_ms);
            entry.ok = Some(*failed == 0);
            if *failed > 0 {
                entry.details = Some(format!("{failed} transactions failed"));
            }
            entry
        }
        RunEvent::SyncCompleted {
            pages,
            accounts,
            vanished,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::SyncComplete, Severity::Info);
            entry.count = Some(*accounts as u64);
            entry.duration_ms = Some(*duration_ms);
            entry.details = Some(format!("pages={pages} vanished={vanished}"));
            entry
        }
        RunEvent::ProbeCompleted {
            requested,
            refreshed,
            terminal,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::ProbeComplete, Severity::Info);
            entry.count = Some(*refreshed as u64);
            entry.duration_ms = Some(*duration_ms);
            entry.details = Some(format!("requested={requested} terminal={terminal}"));
            entry
        }
        RunEvent::ScoresUpdated { scored, table } => {
            let mut entry = LogEntry::new(EventType::ScoreComplete, Severity::Info);
            entry.count = Some(*scored as u64);
            entry.details = Some(format!("table={table}"));
            entry
        }
        RunEvent::WhitelistRulesApplied { added } => {
            let mut entry = LogEntry::new(EventType::WhitelistApplied, Severity::Info);
            entry.count = Some(*added as u64);
            entry
        }
        RunEvent::AccountTerminal { account_id, reason } => {
            let mut entry = LogEntry::new(EventType::AccountTerminal, Severity::Info);
            entry.account_id = Some(account_id.clone());
            entry.details = Some(reason.clone());
            entry
        }
        RunEvent::UnfollowExecuted {
            batch_id,
            account_id,
            handle,
            score,
            outcome,
        } => {
            let mut entry = LogEntry::new(EventType::UnfollowExecute, Severity::Info);
            entry.batch_id = Some(batch_id.clone());
            entry.account_id = Some(account_id.clone());
            entry.handle = Some(handle.clone());
            entry.score = Some(*score);
            entry.outcome = Some(outcome.clone());
            entry.ok = Some(true);
            entry
        }
        RunEvent::UnfollowFailed {
            batch_id,
            account_id,
            error_code,
            error_message,
        } => {
            let mut entry = LogEntry::new(EventType::UnfollowFail, Severity::Warning);
            entry.batch_id = Some(batch_id.clone());
            entry.account_id = Some(account_id.clone());
            entry.error_code = Some(error_code.clone());
            entry.error_message = Some(error_message.clone());
            entry.ok = Some(false);
            entry
        }
        RunEvent::RateWindowWait {
            endpoint,
            retry_after_secs,
        } => {
            let mut entry = LogEntry::new(EventType::RateWait, Severity::Info);
            entry.endpoint = Some((*endpoint).to_string());
            entry.duration_ms = Some(retry_after_secs * 1_000);
            entry
        }
        RunEvent::Error { code, message } => {
            let mut entry = LogEntry::new(EventType::Error, Severity::Critical);
            entry.error_code = Some(code.clone());
            entry.error_message = Some(message.clone());
            entry.ok = Some(false);
            entry
        }
        RunEvent::Shutdown => LogEntry::new(EventType::Error, Severity::Info),
    }
}
