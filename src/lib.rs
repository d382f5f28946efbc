#![forbid(unsafe_code)]

//! Follow Sweeper (fsw) — batch-job hygiene for a follow relationship graph.
//!
//! Pipeline against a rate-limited social-graph API:
//! 1. **Sync** — mirror the following list into the local store
//! 2. **Probe** — refresh per-account activity snapshots in rate-gated batches
//! 3. **Score** — table-driven removal-candidacy scoring, whitelist override
//! 4. **Execute** — bounded, paced, audited unfollow batches (plan-only or live)
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use follow_sweeper::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use follow_sweeper::core::config::Config;
//! use follow_sweeper::sweep::scoring::ScoringEngine;
//! ```

pub mod prelude;

pub mod api;
pub mod core;
pub mod logger;
pub mod store;
pub mod sweep;
