//! WAL-mode SQLite store: accounts, whitelist, append-only audit log,
//! rate budgets, and the run-level lock.
//!
//! One connection behind a mutex; prepared statements for the hot paths;
//! idempotent schema creation. Per-account commits (audit insert + account
//! update) run inside a single SQLite transaction so an interrupted run
//! never leaves a half-applied unfollow.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::api::wire::AccountSnapshot;
use crate::core::errors::{FswError, PermanentReason, Result};
use crate::store::model::{
    FollowedAccount, Outcome, RateBudget, StoreStats, UnfollowTransaction, WhitelistEntry,
    WhitelistSource,
};

/// Relational store shared by every pipeline stage.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FswError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Test-only access to the raw connection.
    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }

    // ──────────────────── followed accounts ────────────────────

    /// Next sync generation number (monotonic per database).
    pub fn begin_sync_generation(&self) -> Result<i64> {
        let generation: i64 = self.conn.lock().query_row(
            "SELECT COALESCE(MAX(sync_generation), 0) + 1 FROM followed_accounts",
            [],
            |row| row.get(0),
        )?;
        Ok(generation)
    }

    /// Upsert one account from a following-list page.
    ///
    /// New accounts are seeded with `first_seen_at = now`. Existing rows keep
    /// their probe history; a previously removed account that reappears in
    /// the list is revived. Returns `true` when the account was new.
    pub fn upsert_synced_account(
        &self,
        snapshot: &AccountSnapshot,
        generation: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let existed: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM followed_accounts WHERE account_id = ?1)",
            params![snapshot.account_id],
            |row| row.get(0),
        )?;
        conn.prepare_cached(
            "INSERT INTO followed_accounts (
                account_id, handle, display_name, verified, follower_count,
                tweet_count, last_activity_at, is_private, has_profile_image,
                first_seen_at, sync_generation
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(account_id) DO UPDATE SET
                handle = excluded.handle,
                display_name = excluded.display_name,
                verified = excluded.verified,
                follower_count = excluded.follower_count,
                tweet_count = excluded.tweet_count,
                last_activity_at = COALESCE(excluded.last_activity_at, last_activity_at),
                is_private = excluded.is_private,
                has_profile_image = excluded.has_profile_image,
                sync_generation = excluded.sync_generation,
                removed = 0,
                removed_at = NULL,
                terminal_reason = NULL",
        )?
        .execute(params![
            snapshot.account_id,
            snapshot.handle,
            snapshot.display_name,
            snapshot.verified,
            i64::try_from(snapshot.follower_count).unwrap_or(i64::MAX),
            i64::try_from(snapshot.tweet_count).unwrap_or(i64::MAX),
            snapshot.last_activity_at.map(format_ts),
            snapshot.is_private,
            snapshot.has_profile_image,
            format_ts(now),
            generation,
        ])?;
        Ok(!existed)
    }

    /// Soft-remove accounts that vanished from the latest following sync
    /// (unfollowed externally). Returns the number marked.
    pub fn mark_unseen_removed(&self, generation: i64, now: DateTime<Utc>) -> Result<usize> {
        let changed = self.conn.lock().execute(
            "UPDATE followed_accounts SET removed = 1, removed_at = ?1
             WHERE removed = 0 AND sync_generation < ?2",
            params![format_ts(now), generation],
        )?;
        Ok(changed)
    }

    /// Apply a probe snapshot: refresh attributes, stamp `last_checked_at`,
    /// bump `check_count`. Returns `false` for unknown accounts.
    pub fn apply_probe(&self, snapshot: &AccountSnapshot, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE followed_accounts SET
                handle = ?2, display_name = ?3, verified = ?4, follower_count = ?5,
                tweet_count = ?6, last_activity_at = ?7, is_private = ?8,
                has_profile_image = ?9, last_checked_at = ?10,
                check_count = check_count + 1
             WHERE account_id = ?1",
            params![
                snapshot.account_id,
                snapshot.handle,
                snapshot.display_name,
                snapshot.verified,
                i64::try_from(snapshot.follower_count).unwrap_or(i64::MAX),
                i64::try_from(snapshot.tweet_count).unwrap_or(i64::MAX),
                snapshot.last_activity_at.map(format_ts),
                snapshot.is_private,
                snapshot.has_profile_image,
                format_ts(now),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Mark an account terminal (suspended/deleted/access-restricted).
    pub fn mark_terminal(
        &self,
        account_id: &str,
        reason: PermanentReason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE followed_accounts
             SET terminal_reason = ?2, last_checked_at = ?3
             WHERE account_id = ?1",
            params![account_id, reason.as_str(), format_ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Fetch one account.
    pub fn account(&self, account_id: &str) -> Result<Option<FollowedAccount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM followed_accounts WHERE account_id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![account_id], row_to_account)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Look an account up by handle (exact match, case-insensitive).
    pub fn account_by_handle(&self, handle: &str) -> Result<Option<FollowedAccount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM followed_accounts
             WHERE handle = ?1 COLLATE NOCASE
             ORDER BY account_id ASC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![handle], row_to_account)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// All accounts still followed and reachable, id order.
    pub fn active_accounts(&self) -> Result<Vec<FollowedAccount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM followed_accounts
             WHERE removed = 0 AND terminal_reason IS NULL
             ORDER BY account_id ASC"
        ))?;
        let rows = stmt
            .query_map([], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Ids of accounts due for a probe, most influential first (the original
    /// system prioritized high-follower accounts so a cut-off budget still
    /// covers the relationships that matter most).
    pub fn stale_account_ids(
        &self,
        recheck_after_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let cutoff = now - chrono::Duration::days(i64::from(recheck_after_days));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT account_id FROM followed_accounts
             WHERE removed = 0 AND terminal_reason IS NULL
               AND (last_checked_at IS NULL OR last_checked_at < ?1)
             ORDER BY follower_count DESC, account_id ASC",
        )?;
        let rows = stmt
            .query_map(params![format_ts(cutoff)], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Write a batch of scores in one transaction.
    pub fn set_scores(&self, scores: &[(String, i64)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE followed_accounts SET current_score = ?2 WHERE account_id = ?1",
            )?;
            for (account_id, score) in scores {
                stmt.execute(params![account_id, score])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Ranked candidate selection: non-removed, non-terminal, non-whitelisted
    /// accounts at or above `min_score`, score descending, account id as the
    /// deterministic tie-break.
    pub fn candidates(&self, min_score: i64, limit: usize) -> Result<Vec<FollowedAccount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM followed_accounts a
             WHERE a.removed = 0 AND a.terminal_reason IS NULL
               AND a.current_score IS NOT NULL AND a.current_score >= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM whitelist_entries w WHERE w.account_id = a.account_id
               )
             ORDER BY a.current_score DESC, a.account_id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                params![min_score, i64::try_from(limit).unwrap_or(i64::MAX)],
                row_to_account,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── whitelist ────────────────────

    /// Add or update a manual/import entry. Manual provenance always wins.
    pub fn whitelist_add_manual(&self, entry: &WhitelistEntry) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO whitelist_entries
                (account_id, handle, reason, source, added_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                entry.account_id,
                entry.handle,
                entry.reason,
                entry.source.as_str(),
                format_ts(entry.added_at),
            ],
        )?;
        Ok(())
    }

    /// Add a rule-sourced entry without disturbing existing rows. Returns
    /// `true` when a new entry was created.
    pub fn whitelist_add_rule(&self, entry: &WhitelistEntry) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "INSERT OR IGNORE INTO whitelist_entries
                (account_id, handle, reason, source, added_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                entry.account_id,
                entry.handle,
                entry.reason,
                entry.source.as_str(),
                format_ts(entry.added_at),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Remove an entry by account id. Returns `true` when one existed.
    pub fn whitelist_remove(&self, account_id: &str) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "DELETE FROM whitelist_entries WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(changed > 0)
    }

    /// Whether an account is protected.
    pub fn is_whitelisted(&self, account_id: &str) -> Result<bool> {
        let protected: bool = self.conn.lock().query_row(
            "SELECT EXISTS(SELECT 1 FROM whitelist_entries WHERE account_id = ?1)",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(protected)
    }

    /// All whitelist entries, newest first.
    pub fn whitelist_entries(&self) -> Result<Vec<WhitelistEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT account_id, handle, reason, source, added_at
             FROM whitelist_entries ORDER BY added_at DESC, account_id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_whitelist_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Protected account ids as a set, for in-memory guards.
    pub fn whitelist_ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT account_id FROM whitelist_entries")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── audit log ────────────────────

    /// Atomic per-account commit: append the audit record and, for live
    /// successes, flip the account to removed — one SQLite transaction.
    /// Returns the assigned audit row id.
    pub fn commit_unfollow(
        &self,
        transaction: &UnfollowTransaction,
        mark_removed: bool,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.prepare_cached(
            "INSERT INTO unfollow_log (
                batch_id, account_id, handle, follower_count, score,
                executed_at, outcome, detail
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        )?
        .execute(params![
            transaction.batch_id,
            transaction.account_id,
            transaction.handle,
            i64::try_from(transaction.follower_count).unwrap_or(i64::MAX),
            transaction.score,
            format_ts(transaction.executed_at),
            transaction.outcome.as_str(),
            transaction.detail,
        ])?;
        let id = tx.last_insert_rowid();
        if mark_removed {
            tx.execute(
                "UPDATE followed_accounts SET removed = 1, removed_at = ?2
                 WHERE account_id = ?1",
                params![transaction.account_id, format_ts(transaction.executed_at)],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Audit records for one batch, insertion order.
    pub fn transactions_by_batch(&self, batch_id: &str) -> Result<Vec<UnfollowTransaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unfollow_log
             WHERE batch_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![batch_id], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Audit records for one account, insertion order.
    pub fn transactions_for_account(&self, account_id: &str) -> Result<Vec<UnfollowTransaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unfollow_log
             WHERE account_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![account_id], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Audit records in a date range (inclusive start, exclusive end).
    pub fn transactions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnfollowTransaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unfollow_log
             WHERE executed_at >= ?1 AND executed_at < ?2 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![format_ts(from), format_ts(to)], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Successful unfollows since `since` (feeds the rolling daily cap).
    pub fn unfollows_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM unfollow_log
             WHERE outcome = 'success' AND executed_at >= ?1",
            params![format_ts(since)],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    // ──────────────────── rate budgets ────────────────────

    /// Load the persisted budget for an endpoint key.
    pub fn load_rate_budget(&self, endpoint: &str) -> Result<Option<RateBudget>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT endpoint, window_start, window_secs, max_calls, used
             FROM rate_budgets WHERE endpoint = ?1",
        )?;
        let mut rows = stmt.query_map(params![endpoint], |row| {
            Ok(RateBudget {
                endpoint: row.get(0)?,
                window_start: row.get(1)?,
                window_secs: row.get::<_, i64>(2)?.try_into().unwrap_or(0),
                max_calls: row.get::<_, i64>(3)?.try_into().unwrap_or(0),
                used: row.get::<_, i64>(4)?.try_into().unwrap_or(0),
            })
        })?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Persist a budget row (single-writer: only the `RateLimiter` calls this).
    pub fn save_rate_budget(&self, budget: &RateBudget) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO rate_budgets
                (endpoint, window_start, window_secs, max_calls, used)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                budget.endpoint,
                budget.window_start,
                i64::try_from(budget.window_secs).unwrap_or(i64::MAX),
                i64::from(budget.max_calls),
                i64::from(budget.used),
            ],
        )?;
        Ok(())
    }

    // ──────────────────── run lock ────────────────────

    /// Claim exclusive run access, taking over locks older than `ttl`.
    pub fn acquire_run_lock(self: &Arc<Self>, ttl: Duration) -> Result<RunLockGuard> {
        let pid = std::process::id();
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(3600));

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<(u32, String)> = tx
            .query_row(
                "SELECT owner_pid, started_at FROM run_lock WHERE id = 1",
                [],
                |row| {
                    let pid = u32::try_from(row.get::<_, i64>(0)?).unwrap_or(0);
                    Ok((pid, row.get(1)?))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some((owner_pid, started_at)) = existing {
            let live = parse_ts_opt(Some(started_at.clone()))
                .is_some_and(|started| started > stale_before);
            if live && owner_pid != pid {
                return Err(FswError::RunLockHeld {
                    owner_pid,
                    started_at,
                });
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO run_lock (id, owner_pid, started_at)
             VALUES (1, ?1, ?2)",
            params![i64::from(pid), format_ts(now)],
        )?;
        tx.commit()?;
        drop(conn);

        Ok(RunLockGuard {
            store: Arc::clone(self),
            pid,
        })
    }

    fn release_run_lock(&self, pid: u32) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM run_lock WHERE id = 1 AND owner_pid = ?1",
            params![i64::from(pid)],
        )?;
        Ok(())
    }

    // ──────────────────── statistics ────────────────────

    /// Aggregate activity/candidacy snapshot for status output.
    pub fn stats(&self, now: DateTime<Utc>, min_score_threshold: i64) -> Result<StoreStats> {
        let cutoff_1y = format_ts(now - chrono::Duration::days(365));
        let cutoff_6m = format_ts(now - chrono::Duration::days(180));
        let cutoff_3m = format_ts(now - chrono::Duration::days(90));

        let conn = self.conn.lock();
        let (total, inactive_1y, inactive_6m, inactive_3m, active, unchecked, terminal) = conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COUNT(CASE WHEN last_activity_at < ?1
                               OR (last_checked_at IS NOT NULL AND last_activity_at IS NULL)
                          THEN 1 END),
                    COUNT(CASE WHEN last_activity_at >= ?1 AND last_activity_at < ?2 THEN 1 END),
                    COUNT(CASE WHEN last_activity_at >= ?2 AND last_activity_at < ?3 THEN 1 END),
                    COUNT(CASE WHEN last_activity_at >= ?3 THEN 1 END),
                    COUNT(CASE WHEN last_checked_at IS NULL THEN 1 END),
                    COUNT(CASE WHEN terminal_reason IS NOT NULL THEN 1 END)
                 FROM followed_accounts WHERE removed = 0",
                params![cutoff_1y, cutoff_6m, cutoff_3m],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )?;

        let candidates: i64 = conn.query_row(
            "SELECT COUNT(*) FROM followed_accounts a
             WHERE a.removed = 0 AND a.terminal_reason IS NULL
               AND a.current_score IS NOT NULL AND a.current_score >= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM whitelist_entries w WHERE w.account_id = a.account_id
               )",
            params![min_score_threshold],
            |row| row.get(0),
        )?;
        let whitelisted: i64 =
            conn.query_row("SELECT COUNT(*) FROM whitelist_entries", [], |row| {
                row.get(0)
            })?;
        let unfollowed_total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM unfollow_log WHERE outcome = 'success'",
            [],
            |row| row.get(0),
        )?;

        let as_u64 = |v: i64| u64::try_from(v).unwrap_or(0);
        Ok(StoreStats {
            total_following: as_u64(total),
            inactive_1y: as_u64(inactive_1y),
            inactive_6m: as_u64(inactive_6m),
            inactive_3m: as_u64(inactive_3m),
            active: as_u64(active),
            unchecked: as_u64(unchecked),
            candidates: as_u64(candidates),
            whitelisted: as_u64(whitelisted),
            terminal: as_u64(terminal),
            unfollowed_total: as_u64(unfollowed_total),
        })
    }
}

/// RAII guard for the run lock; releases on drop.
pub struct RunLockGuard {
    store: Arc<Store>,
    pid: u32,
}

impl std::fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLockGuard")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_run_lock(self.pid) {
            eprintln!("[FSW-STORE] failed to release run lock: {e}");
        }
    }
}

// ──────────────────── row mapping ────────────────────

const ACCOUNT_COLUMNS: &str = "account_id, handle, display_name, verified, follower_count, \
    tweet_count, last_activity_at, is_private, has_profile_image, first_seen_at, \
    last_checked_at, check_count, current_score, removed, removed_at, terminal_reason";

const TRANSACTION_COLUMNS: &str =
    "id, batch_id, account_id, handle, follower_count, score, executed_at, outcome, detail";

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowedAccount> {
    Ok(FollowedAccount {
        account_id: row.get(0)?,
        handle: row.get(1)?,
        display_name: row.get(2)?,
        verified: row.get(3)?,
        follower_count: row.get::<_, i64>(4)?.try_into().unwrap_or(0),
        tweet_count: row.get::<_, i64>(5)?.try_into().unwrap_or(0),
        last_activity_at: parse_ts_opt(row.get(6)?),
        is_private: row.get(7)?,
        has_profile_image: row.get(8)?,
        first_seen_at: parse_ts_required(9, &row.get::<_, String>(9)?)?,
        last_checked_at: parse_ts_opt(row.get(10)?),
        check_count: row.get::<_, i64>(11)?.try_into().unwrap_or(0),
        current_score: row.get(12)?,
        removed: row.get(13)?,
        removed_at: parse_ts_opt(row.get(14)?),
        terminal_reason: row.get(15)?,
    })
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnfollowTransaction> {
    let outcome_raw: String = row.get(7)?;
    let outcome = Outcome::parse(&outcome_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown outcome {outcome_raw:?}").into(),
        )
    })?;
    Ok(UnfollowTransaction {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        account_id: row.get(2)?,
        handle: row.get(3)?,
        follower_count: row.get::<_, i64>(4)?.try_into().unwrap_or(0),
        score: row.get(5)?,
        executed_at: parse_ts_required(6, &row.get::<_, String>(6)?)?,
        outcome,
        detail: row.get(8)?,
    })
}

fn row_to_whitelist_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<WhitelistEntry> {
    let source_raw: String = row.get(3)?;
    let source = WhitelistSource::parse(&source_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown whitelist source {source_raw:?}").into(),
        )
    })?;
    Ok(WhitelistEntry {
        account_id: row.get(0)?,
        handle: row.get(1)?,
        reason: row.get(2)?,
        source,
        added_at: parse_ts_required(4, &row.get::<_, String>(4)?)?,
    })
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn parse_ts_required(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[FSW-STORE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS followed_accounts (
            account_id TEXT PRIMARY KEY,
            handle TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            verified INTEGER NOT NULL DEFAULT 0,
            follower_count INTEGER NOT NULL DEFAULT 0,
            tweet_count INTEGER NOT NULL DEFAULT 0,
            last_activity_at TEXT,
            is_private INTEGER NOT NULL DEFAULT 0,
            has_profile_image INTEGER NOT NULL DEFAULT 1,
            first_seen_at TEXT NOT NULL,
            last_checked_at TEXT,
            check_count INTEGER NOT NULL DEFAULT 0,
            current_score INTEGER,
            removed INTEGER NOT NULL DEFAULT 0,
            removed_at TEXT,
            terminal_reason TEXT,
            sync_generation INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS whitelist_entries (
            account_id TEXT PRIMARY KEY,
            handle TEXT,
            reason TEXT NOT NULL,
            source TEXT NOT NULL,
            added_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS unfollow_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            handle TEXT NOT NULL,
            follower_count INTEGER NOT NULL,
            score INTEGER NOT NULL,
            executed_at TEXT NOT NULL,
            outcome TEXT NOT NULL,
            detail TEXT
        );

        CREATE TABLE IF NOT EXISTS rate_budgets (
            endpoint TEXT PRIMARY KEY,
            window_start INTEGER NOT NULL,
            window_secs INTEGER NOT NULL,
            max_calls INTEGER NOT NULL,
            used INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            owner_pid INTEGER NOT NULL,
            started_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_handle ON followed_accounts(handle);
        CREATE INDEX IF NOT EXISTS idx_accounts_score ON followed_accounts(current_score);
        CREATE INDEX IF NOT EXISTS idx_accounts_checked ON followed_accounts(last_checked_at);
        CREATE INDEX IF NOT EXISTS idx_unfollow_batch ON unfollow_log(batch_id);
        CREATE INDEX IF NOT EXISTS idx_unfollow_account ON unfollow_log(account_id);
        CREATE INDEX IF NOT EXISTS idx_unfollow_executed ON unfollow_log(executed_at);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
