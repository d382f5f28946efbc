//! FSW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FswError>;

/// Why the external API rejected an account permanently.
///
/// These are per-account conditions: the account can never be probed or
/// unfollowed again, but the rest of the batch is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentReason {
    Suspended,
    Deleted,
    AccessRestricted,
}

impl PermanentReason {
    /// Stable label stored in the `terminal_reason` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
            Self::AccessRestricted => "access_restricted",
        }
    }

    /// Parse a stored label back into a reason.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "suspended" => Some(Self::Suspended),
            "deleted" => Some(Self::Deleted),
            "access_restricted" => Some(Self::AccessRestricted),
            _ => None,
        }
    }
}

impl fmt::Display for PermanentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for Follow Sweeper.
#[derive(Debug, Error)]
pub enum FswError {
    #[error("[FSW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FSW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FSW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FSW-2001] rate window exhausted for {endpoint}, retry in {retry_after_secs}s")]
    RateLimited {
        endpoint: &'static str,
        retry_after_secs: u64,
    },

    #[error("[FSW-2002] transient API failure on {endpoint}: {details}")]
    TransientApi {
        endpoint: &'static str,
        details: String,
    },

    #[error("[FSW-2003] account {account_id} is terminal: {reason}")]
    PermanentApi {
        account_id: String,
        reason: PermanentReason,
    },

    #[error("[FSW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FSW-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[FSW-2103] store integrity violation: {details}")]
    StoreIntegrity { details: String },

    #[error("[FSW-2201] cleaning run already active (pid {owner_pid}, started {started_at})")]
    RunLockHeld { owner_pid: u32, started_at: String },

    #[error("[FSW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[FSW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FswError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FSW-1001",
            Self::MissingConfig { .. } => "FSW-1002",
            Self::ConfigParse { .. } => "FSW-1003",
            Self::RateLimited { .. } => "FSW-2001",
            Self::TransientApi { .. } => "FSW-2002",
            Self::PermanentApi { .. } => "FSW-2003",
            Self::Serialization { .. } => "FSW-2101",
            Self::Sql { .. } => "FSW-2102",
            Self::StoreIntegrity { .. } => "FSW-2103",
            Self::RunLockHeld { .. } => "FSW-2201",
            Self::Io { .. } => "FSW-3002",
            Self::ChannelClosed { .. } => "FSW-3003",
            Self::Runtime { .. } => "FSW-3900",
        }
    }

    /// Whether waiting and retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::TransientApi { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the error must abort the whole run (vs. skip one account).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::Sql { .. }
                | Self::StoreIntegrity { .. }
                | Self::RunLockHeld { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for transient API failures.
    #[must_use]
    pub fn transient(endpoint: &'static str, details: impl Into<String>) -> Self {
        Self::TransientApi {
            endpoint,
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for FswError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for FswError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FswError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
