//! Wire-format types for the social-graph API and their domain translation.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::PermanentReason;

/// Attribute snapshot for one account, as the probe consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub handle: String,
    pub display_name: String,
    pub verified: bool,
    pub follower_count: u64,
    pub tweet_count: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub is_private: bool,
    pub has_profile_image: bool,
}

/// One page of the following list.
#[derive(Debug, Clone)]
pub struct FollowingPage {
    pub accounts: Vec<AccountSnapshot>,
    pub next_token: Option<String>,
}

/// Per-account result of a batched lookup. Item failures are data, not
/// errors: one suspended account must not abort its chunk.
#[derive(Debug, Clone)]
pub enum LookupResult {
    Snapshot(AccountSnapshot),
    Terminal {
        account_id: String,
        reason: PermanentReason,
    },
}

/// Server acknowledgement of an unfollow call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfollowAck {
    Removed,
    /// The relationship was already gone; counted as success.
    NotFollowing,
}

// ──────────────────── raw wire shapes ────────────────────

/// Envelope shared by list/lookup responses: `data` carries users,
/// `errors` carries per-resource failures, `meta` carries pagination.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEnvelope {
    #[serde(default)]
    pub data: Vec<WireUser>,
    #[serde(default)]
    pub errors: Vec<WireResourceError>,
    #[serde(default)]
    pub meta: WireMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub public_metrics: WirePublicMetrics,
    /// RFC 3339 timestamp of the most recent visible post, absent for
    /// accounts that never posted.
    #[serde(default)]
    pub last_activity_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WirePublicMetrics {
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub tweet_count: u64,
}

/// Per-resource failure entry inside an otherwise successful response.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResourceError {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMeta {
    #[serde(default)]
    pub next_token: Option<String>,
    #[serde(default)]
    pub result_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnfollowEnvelope {
    pub data: UnfollowData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnfollowData {
    pub following: bool,
}

impl WireUser {
    /// Translate a wire user into the domain snapshot.
    ///
    /// An unparseable activity timestamp degrades to `None` (maximal age)
    /// rather than failing the whole chunk.
    #[must_use]
    pub fn into_snapshot(self) -> AccountSnapshot {
        let last_activity_at = self.last_activity_at.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        });
        let has_profile_image = self
            .profile_image_url
            .as_deref()
            .is_some_and(|url| !url.is_empty() && !url.contains("default_profile"));
        AccountSnapshot {
            account_id: self.id,
            handle: self.username,
            display_name: self.name,
            verified: self.verified,
            follower_count: self.public_metrics.followers_count,
            tweet_count: self.public_metrics.tweet_count,
            last_activity_at,
            is_private: self.protected,
            has_profile_image,
        }
    }
}

impl WireResourceError {
    /// Classify a per-resource error title into a terminal reason.
    #[must_use]
    pub fn permanent_reason(&self) -> PermanentReason {
        let title = self.title.to_ascii_lowercase();
        let detail = self.detail.to_ascii_lowercase();
        if title.contains("suspend") || detail.contains("suspend") {
            PermanentReason::Suspended
        } else if title.contains("not found") || detail.contains("not found") {
            PermanentReason::Deleted
        } else {
            PermanentReason::AccessRestricted
        }
    }
}

impl UserEnvelope {
    /// Flatten into per-account lookup results, successes first.
    #[must_use]
    pub fn into_lookup_results(self) -> Vec<LookupResult> {
        let mut results: Vec<LookupResult> = self
            .data
            .into_iter()
            .map(|user| LookupResult::Snapshot(user.into_snapshot()))
            .collect();
        for err in self.errors {
            let reason = err.permanent_reason();
            results.push(LookupResult::Terminal {
                account_id: err.resource_id,
                reason,
            });
        }
        results
    }
}
