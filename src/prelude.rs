//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use follow_sweeper::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{FswError, Result};

// API
pub use crate::api::client::{HttpSocialGraphApi, SocialGraphApi};
pub use crate::api::rate_limit::{Endpoint, RateLimiter};

// Store
pub use crate::store::model::{FollowedAccount, Outcome, UnfollowTransaction, WhitelistEntry};
pub use crate::store::sqlite::Store;

// Sweep
pub use crate::sweep::executor::{BatchExecutor, Outlet};
pub use crate::sweep::probe::ActivityProbe;
pub use crate::sweep::run::{CleaningRun, RunReport};
pub use crate::sweep::scoring::ScoringEngine;
pub use crate::sweep::whitelist::WhitelistGuard;
