//! Top-level CLI definition and dispatch.
//!
//! Thin presentation shim: every behavior lives in the library; this module
//! parses arguments, wires the store/API/logger together, and formats
//! output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;

use follow_sweeper::api::client::HttpSocialGraphApi;
use follow_sweeper::api::rate_limit::RateLimiter;
use follow_sweeper::core::config::Config;
use follow_sweeper::core::errors::{FswError, Result};
use follow_sweeper::logger::events::{RunLoggerConfig, RunLoggerHandle, spawn_logger};
use follow_sweeper::logger::jsonl::JsonlConfig;
use follow_sweeper::store::model::UnfollowTransaction;
use follow_sweeper::store::sqlite::Store;
use follow_sweeper::sweep::probe::ActivityProbe;
use follow_sweeper::sweep::run::CleaningRun;
use follow_sweeper::sweep::whitelist;

/// Follow Sweeper — follow-graph hygiene against a rate-limited API.
#[derive(Debug, Parser)]
#[command(
    name = "fsw",
    author,
    version,
    about = "Follow Sweeper - inactive-account cleanup with safety rails",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the full cleaning cycle (sync, probe, score, execute).
    Run(RunArgs),
    /// Sync the following list into the local store.
    Sync,
    /// Probe stale accounts for fresh activity snapshots.
    Probe,
    /// Re-score all active accounts.
    Score,
    /// Show the current selection without executing anything.
    Plan,
    /// Manage the protected-account whitelist.
    Whitelist(WhitelistArgs),
    /// Query the append-only unfollow audit log.
    Audit(AuditArgs),
    /// Show store statistics.
    Stats,
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Plan the batch without issuing any unfollow call.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct WhitelistArgs {
    #[command(subcommand)]
    action: WhitelistAction,
}

#[derive(Debug, Clone, Subcommand)]
enum WhitelistAction {
    /// Protect an account by handle or id.
    Add {
        /// Handle (with or without @) or numeric account id.
        identifier: String,
        /// Reason recorded with the entry.
        #[arg(long, default_value = "manual addition")]
        reason: String,
    },
    /// Remove protection from an account.
    Remove { identifier: String },
    /// List protected accounts.
    List,
    /// Import entries from a JSON or text file.
    Import { file: PathBuf },
    /// Export entries to a JSON file.
    Export { file: PathBuf },
    /// Evaluate auto-protection rules now.
    ApplyRules,
}

#[derive(Debug, Clone, Args, Default)]
struct AuditArgs {
    /// Filter by batch id.
    #[arg(long, conflicts_with_all = ["account", "since"])]
    batch: Option<String>,
    /// Filter by account id.
    #[arg(long, conflicts_with = "batch")]
    account: Option<String>,
    /// Start date (YYYY-MM-DD), paired with --until.
    #[arg(long, requires = "until")]
    since: Option<String>,
    /// End date (YYYY-MM-DD), exclusive.
    #[arg(long, requires = "since")]
    until: Option<String>,
}

/// Dispatch a parsed CLI invocation.
pub fn run(cli: &Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref())?;
    let store = Arc::new(Store::open(&config.paths.sqlite_db)?);

    match &cli.command {
        Command::Run(args) => cmd_run(cli, &config, &store, args),
        Command::Sync => cmd_sync(cli, &config, &store),
        Command::Probe => cmd_probe(cli, &config, &store),
        Command::Score => cmd_score(&config, &store),
        Command::Plan => cmd_plan(cli, &config, &store),
        Command::Whitelist(args) => cmd_whitelist(cli, &config, &store, args),
        Command::Audit(args) => cmd_audit(cli, &store, args),
        Command::Stats => cmd_stats(cli, &config, &store),
    }
}

// ──────────────────── commands ────────────────────

fn cmd_run(cli: &Cli, config: &Config, store: &Arc<Store>, args: &RunArgs) -> Result<()> {
    let mut effective = config.clone();
    if args.dry_run {
        effective.cleaner.dry_run = true;
    }

    let api = api_from_env(&effective)?;
    let (logger, join) = spawn_run_logger(&effective)?;

    let run = CleaningRun::new(effective.clone(), Arc::clone(store), Some(logger.clone()))?;
    let outcome = run.execute(&api);

    logger.shutdown();
    let _ = join.join();
    let report = outcome?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "mode": report.mode,
                "synced": report.sync.accounts,
                "vanished": report.sync.vanished,
                "probed": report.probe.refreshed,
                "terminal": report.probe.terminal,
                "scored": report.scored,
                "whitelist_added": report.whitelist_added,
                "batch_id": report.batch.batch_id,
                "selected": report.batch.selected,
                "succeeded": report.batch.succeeded,
                "failed": report.batch.failed,
                "skipped": report.batch.skipped,
                "mutating_calls": report.batch.mutating_calls,
                "budget_exhausted": report.batch.budget_exhausted,
                "duration_ms": report.duration_ms,
            }))?
        );
        return Ok(());
    }

    let mode = if report.mode == "live" {
        report.mode.red().bold()
    } else {
        report.mode.green().bold()
    };
    println!("{} cleaning cycle complete ({mode})", "fsw".bold());
    println!(
        "  synced {} accounts ({} vanished), probed {}, scored {}",
        report.sync.accounts, report.sync.vanished, report.probe.refreshed, report.scored
    );
    println!(
        "  batch {}: {} succeeded, {} failed, {} skipped ({} mutating calls)",
        report.batch.batch_id.cyan(),
        report.batch.succeeded.to_string().green(),
        report.batch.failed.to_string().red(),
        report.batch.skipped,
        report.batch.mutating_calls
    );
    if report.batch.budget_exhausted {
        println!("  {}", "rate budget exhausted; remaining candidates persist".yellow());
    }
    Ok(())
}

fn cmd_sync(cli: &Cli, config: &Config, store: &Arc<Store>) -> Result<()> {
    let api = api_from_env(config)?;
    let limiter = RateLimiter::with_store(&config.rate, Arc::clone(store))?;
    let run = CleaningRun::new(config.clone(), Arc::clone(store), None)?;
    let report = run.sync_following(&api, &limiter)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "pages": report.pages,
                "accounts": report.accounts,
                "new_accounts": report.new_accounts,
                "vanished": report.vanished,
            }))?
        );
    } else {
        println!(
            "synced {} accounts over {} pages ({} new, {} vanished)",
            report.accounts, report.pages, report.new_accounts, report.vanished
        );
    }
    Ok(())
}

fn cmd_probe(cli: &Cli, config: &Config, store: &Arc<Store>) -> Result<()> {
    let api = api_from_env(config)?;
    let limiter = RateLimiter::with_store(&config.rate, Arc::clone(store))?;
    let probe = ActivityProbe::new(config.probe.clone(), Arc::clone(store), None);
    let deadline = Instant::now() + Duration::from_secs(config.cleaner.acquire_deadline_secs);
    let report = probe.refresh_stale(&api, &limiter, Utc::now(), deadline)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "requested": report.requested,
                "refreshed": report.refreshed,
                "terminal": report.terminal,
                "failed_chunks": report.failed_chunks,
                "budget_exhausted": report.budget_exhausted,
            }))?
        );
    } else {
        println!(
            "probed {}/{} accounts ({} terminal, {} failed chunks)",
            report.refreshed, report.requested, report.terminal, report.failed_chunks
        );
        if report.budget_exhausted {
            println!("{}", "lookup budget exhausted before finishing".yellow());
        }
    }
    Ok(())
}

fn cmd_score(config: &Config, store: &Arc<Store>) -> Result<()> {
    let run = CleaningRun::new(config.clone(), Arc::clone(store), None)?;
    let scored = run.rescore()?;
    println!("re-scored {scored} accounts");
    Ok(())
}

fn cmd_plan(cli: &Cli, config: &Config, store: &Arc<Store>) -> Result<()> {
    let run = CleaningRun::new(config.clone(), Arc::clone(store), None)?;
    let candidates = run.plan()?;

    if cli.json {
        let rows: Vec<_> = candidates
            .iter()
            .map(|c| {
                json!({
                    "account_id": c.account_id,
                    "handle": c.handle,
                    "score": c.current_score,
                    "follower_count": c.follower_count,
                    "last_activity_at": c.last_activity_at.map(|t| t.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("no accounts meet the selection criteria");
        return Ok(());
    }
    println!("{} candidates selected:", candidates.len());
    let now = Utc::now();
    for (i, candidate) in candidates.iter().enumerate() {
        let days = candidate
            .days_inactive(now)
            .map_or_else(|| "never".to_string(), |d| format!("{d}d"));
        println!(
            "  {:>2}. @{:<20} score {:>4}  inactive {:>6}  {} followers",
            i + 1,
            candidate.handle,
            candidate.current_score.unwrap_or(0),
            days,
            candidate.follower_count
        );
    }
    Ok(())
}

fn cmd_whitelist(
    cli: &Cli,
    config: &Config,
    store: &Arc<Store>,
    args: &WhitelistArgs,
) -> Result<()> {
    match &args.action {
        WhitelistAction::Add { identifier, reason } => {
            let entry = whitelist::add_manual(store, identifier, reason, Utc::now())?;
            println!(
                "{} @{} ({})",
                "protected".green(),
                entry.handle.as_deref().unwrap_or(&entry.account_id),
                entry.reason
            );
        }
        WhitelistAction::Remove { identifier } => {
            if whitelist::remove(store, identifier)? {
                println!("{} {identifier}", "unprotected".yellow());
            } else {
                println!("{identifier} was not protected");
            }
        }
        WhitelistAction::List => {
            let entries = store.whitelist_entries()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if entries.is_empty() {
                println!("whitelist is empty");
                return Ok(());
            }
            println!("{} protected accounts:", entries.len());
            for entry in entries {
                println!(
                    "  @{:<20} [{}] {}",
                    entry.handle.as_deref().unwrap_or(&entry.account_id),
                    entry.source.as_str(),
                    entry.reason
                );
            }
        }
        WhitelistAction::Import { file } => {
            let report = whitelist::import_from_file(store, file, Utc::now())?;
            println!(
                "imported {} entries ({} unknown identifiers skipped)",
                report.added, report.unknown
            );
        }
        WhitelistAction::Export { file } => {
            let count = whitelist::export_to_file(store, file)?;
            println!("exported {count} entries to {}", file.display());
        }
        WhitelistAction::ApplyRules => {
            let applied = whitelist::apply_rules(store, &config.whitelist, Utc::now())?;
            println!(
                "rules added {} entries ({} verified, {} high-follower, {} pattern)",
                applied.total(),
                applied.verified_added,
                applied.followers_added,
                applied.pattern_added
            );
        }
    }
    Ok(())
}

fn cmd_audit(cli: &Cli, store: &Arc<Store>, args: &AuditArgs) -> Result<()> {
    let transactions: Vec<UnfollowTransaction> = if let Some(batch) = &args.batch {
        store.transactions_by_batch(batch)?
    } else if let Some(account) = &args.account {
        store.transactions_for_account(account)?
    } else if let (Some(since), Some(until)) = (&args.since, &args.until) {
        store.transactions_between(parse_date(since)?, parse_date(until)?)?
    } else {
        // Default window: the last day.
        store.transactions_between(Utc::now() - chrono::Duration::days(1), Utc::now())?
    };

    if cli.json {
        let rows: Vec<_> = transactions
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "batch_id": t.batch_id,
                    "account_id": t.account_id,
                    "handle": t.handle,
                    "score": t.score,
                    "executed_at": t.executed_at.to_rfc3339(),
                    "outcome": t.outcome.as_str(),
                    "detail": t.detail,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if transactions.is_empty() {
        println!("no matching audit entries");
        return Ok(());
    }
    for t in transactions {
        let outcome = match t.outcome.as_str() {
            "success" => t.outcome.as_str().green(),
            "failed" => t.outcome.as_str().red(),
            _ => t.outcome.as_str().yellow(),
        };
        println!(
            "  {} {} @{:<20} score {:>4} [{}] {}",
            t.executed_at.format("%Y-%m-%d %H:%M:%S"),
            t.batch_id.cyan(),
            t.handle,
            t.score,
            outcome,
            t.detail.unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_stats(cli: &Cli, config: &Config, store: &Arc<Store>) -> Result<()> {
    let stats = store.stats(Utc::now(), config.cleaner.min_score_threshold)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "total_following": stats.total_following,
                "inactive_1y": stats.inactive_1y,
                "inactive_6m": stats.inactive_6m,
                "inactive_3m": stats.inactive_3m,
                "active": stats.active,
                "unchecked": stats.unchecked,
                "candidates": stats.candidates,
                "whitelisted": stats.whitelisted,
                "terminal": stats.terminal,
                "unfollowed_total": stats.unfollowed_total,
            }))?
        );
        return Ok(());
    }

    println!("{}", "store statistics".bold());
    println!("  following:        {}", stats.total_following);
    println!("  inactive 1y+:     {}", stats.inactive_1y);
    println!("  inactive 6m-1y:   {}", stats.inactive_6m);
    println!("  inactive 3m-6m:   {}", stats.inactive_3m);
    println!("  active (<3m):     {}", stats.active);
    println!("  never checked:    {}", stats.unchecked);
    println!("  terminal:         {}", stats.terminal);
    println!(
        "  candidates:       {}",
        stats.candidates.to_string().yellow()
    );
    println!("  whitelisted:      {}", stats.whitelisted);
    println!("  unfollowed total: {}", stats.unfollowed_total);
    Ok(())
}

// ──────────────────── wiring helpers ────────────────────

/// Bearer token environment variable; token acquisition itself belongs to
/// the OAuth collaborator.
const TOKEN_ENV: &str = "FSW_BEARER_TOKEN";

fn api_from_env(config: &Config) -> Result<HttpSocialGraphApi> {
    let token = std::env::var(TOKEN_ENV).map_err(|_| FswError::InvalidConfig {
        details: format!("{TOKEN_ENV} must be set for commands that reach the API"),
    })?;
    HttpSocialGraphApi::new(&config.api, token)
}

fn spawn_run_logger(
    config: &Config,
) -> Result<(RunLoggerHandle, std::thread::JoinHandle<()>)> {
    spawn_logger(RunLoggerConfig {
        jsonl_config: JsonlConfig {
            path: config.paths.jsonl_log.clone(),
            ..JsonlConfig::default()
        },
        channel_capacity: 1024,
    })
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| FswError::InvalidConfig {
        details: format!("invalid date {raw:?} (expected YYYY-MM-DD): {e}"),
    })?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| FswError::Runtime {
        details: format!("could not build midnight timestamp for {raw:?}"),
    })?;
    Ok(DateTime::from_naive_utc_and_offset(midnight, Utc))
}
