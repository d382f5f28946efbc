//! Social-graph API client: narrow trait seam plus the blocking HTTP
//! implementation.
//!
//! The three operations the core consumes (`list_following`,
//! `lookup_accounts`, `unfollow`) are expressed as a trait so the pipeline
//! can run against a scripted mock in tests. The HTTP implementation maps
//! transport and status failures onto the crate error taxonomy and feeds
//! server rate headers back into the [`RateLimiter`].

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::HeaderMap;

use crate::api::rate_limit::{Endpoint, RateLimiter};
use crate::api::wire::{
    FollowingPage, LookupResult, UnfollowAck, UnfollowEnvelope, UserEnvelope,
};
use crate::core::config::ApiConfig;
use crate::core::errors::{FswError, PermanentReason, Result};

/// Narrow interface to the external social-graph service.
///
/// Implementations must be shareable across probe workers.
pub trait SocialGraphApi: Send + Sync {
    /// One page of the authenticated account's following list.
    fn list_following(&self, page_token: Option<&str>) -> Result<FollowingPage>;

    /// Batched attribute/activity lookup. Item-level failures are returned
    /// as [`LookupResult::Terminal`] entries, not errors.
    fn lookup_accounts(&self, account_ids: &[String]) -> Result<Vec<LookupResult>>;

    /// Remove the follow edge to `account_id`.
    fn unfollow(&self, account_id: &str) -> Result<UnfollowAck>;
}

/// Blocking HTTP client for the production API.
pub struct HttpSocialGraphApi {
    http: Client,
    base_url: String,
    bearer_token: String,
    page_size: u32,
    rate_feedback: Option<Arc<RateLimiter>>,
}

impl HttpSocialGraphApi {
    /// Build a client from config plus a caller-provided bearer token
    /// (token acquisition is the OAuth collaborator's job).
    pub fn new(config: &ApiConfig, bearer_token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FswError::Runtime {
                details: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
            page_size: config.page_size,
            rate_feedback: None,
        })
    }

    /// Fold server rate headers into `limiter` after every response.
    #[must_use]
    pub fn with_rate_feedback(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_feedback = Some(limiter);
        self
    }

    fn dispatch(&self, endpoint: Endpoint, request: RequestBuilder) -> Result<Response> {
        let response = request
            .bearer_auth(&self.bearer_token)
            .send()
            .map_err(|e| transport_error(endpoint, &e))?;

        if let Some(limiter) = &self.rate_feedback
            && let Some((reset, remaining)) = rate_headers(response.headers())
        {
            limiter.observe_reset(endpoint, reset, remaining)?;
        }

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FswError::RateLimited {
                endpoint: endpoint.key(),
                retry_after_secs: retry_after_secs(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(FswError::transient(
                endpoint.key(),
                format!("server error {status}"),
            ));
        }
        Ok(response)
    }

    fn read_envelope(endpoint: Endpoint, response: Response) -> Result<UserEnvelope> {
        let status = response.status();
        if !status.is_success() {
            return Err(FswError::Runtime {
                details: format!("{} request failed with status {status}", endpoint.key()),
            });
        }
        response
            .json::<UserEnvelope>()
            .map_err(|e| FswError::Serialization {
                context: "api json",
                details: e.to_string(),
            })
    }
}

impl SocialGraphApi for HttpSocialGraphApi {
    fn list_following(&self, page_token: Option<&str>) -> Result<FollowingPage> {
        let url = format!("{}/users/me/following", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("max_results", self.page_size.to_string()),
            (
                "user.fields",
                "name,profile_image_url,protected,public_metrics,verified,last_activity_at"
                    .to_string(),
            ),
        ];
        if let Some(token) = page_token {
            query.push(("pagination_token", token.to_string()));
        }

        let response = self.dispatch(Endpoint::Following, self.http.get(&url).query(&query))?;
        let envelope = Self::read_envelope(Endpoint::Following, response)?;
        let next_token = envelope.meta.next_token.clone();
        let accounts = envelope
            .data
            .into_iter()
            .map(super::wire::WireUser::into_snapshot)
            .collect();
        Ok(FollowingPage {
            accounts,
            next_token,
        })
    }

    fn lookup_accounts(&self, account_ids: &[String]) -> Result<Vec<LookupResult>> {
        if account_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/users", self.base_url);
        let query: Vec<(&str, String)> = vec![
            ("ids", account_ids.join(",")),
            (
                "user.fields",
                "name,profile_image_url,protected,public_metrics,verified,last_activity_at"
                    .to_string(),
            ),
        ];

        let response = self.dispatch(Endpoint::Lookup, self.http.get(&url).query(&query))?;
        let envelope = Self::read_envelope(Endpoint::Lookup, response)?;
        Ok(envelope.into_lookup_results())
    }

    fn unfollow(&self, account_id: &str) -> Result<UnfollowAck> {
        let url = format!("{}/users/me/following/{account_id}", self.base_url);
        let response = self.dispatch(Endpoint::Unfollow, self.http.delete(&url))?;

        match response.status() {
            StatusCode::OK => {
                let envelope =
                    response
                        .json::<UnfollowEnvelope>()
                        .map_err(|e| FswError::Serialization {
                            context: "api json",
                            details: e.to_string(),
                        })?;
                if envelope.data.following {
                    Err(FswError::transient(
                        Endpoint::Unfollow.key(),
                        "server reported relationship still present",
                    ))
                } else {
                    Ok(UnfollowAck::Removed)
                }
            }
            // Relationship (or account) already gone: nothing left to remove.
            StatusCode::NOT_FOUND => Ok(UnfollowAck::NotFollowing),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(FswError::PermanentApi {
                account_id: account_id.to_string(),
                reason: PermanentReason::AccessRestricted,
            }),
            status => Err(FswError::Runtime {
                details: format!("unfollow request failed with status {status}"),
            }),
        }
    }
}

fn transport_error(endpoint: Endpoint, err: &reqwest::Error) -> FswError {
    // Timeouts and connection resets are transient by definition; anything
    // else at the transport layer is treated the same way since a retry is
    // harmless for these idempotent calls.
    FswError::transient(endpoint.key(), err.to_string())
}

fn rate_headers(headers: &HeaderMap) -> Option<(i64, u32)> {
    let reset = header_number::<i64>(headers, "x-rate-limit-reset")?;
    let remaining = header_number::<u32>(headers, "x-rate-limit-remaining")?;
    Some((reset, remaining))
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
    header_number::<i64>(headers, "x-rate-limit-reset")
        .map(|reset| {
            let now = chrono::Utc::now().timestamp();
            u64::try_from(reset - now).unwrap_or(DEFAULT_RETRY_AFTER_SECS)
        })
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse().ok())
}
