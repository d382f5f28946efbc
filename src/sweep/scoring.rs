//! Removal-candidacy scoring: table-driven weighted sum over independent
//! factors, with a whitelist override that dominates everything else.
//!
//! `score(account, now)` is a pure function of its inputs, with no hidden
//! state or clock reads, so interrupted runs can re-score safely and always
//! reproduce the same ranking.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};

use crate::core::config::ScoreTableConfig;
use crate::store::model::FollowedAccount;

/// One factor's contribution to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreTerm {
    pub name: &'static str,
    pub points: i64,
}

/// Full scoring evidence for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub total: i64,
    pub whitelisted: bool,
    pub terms: Vec<ScoreTerm>,
}

/// Deterministic scoring engine over a versioned weight table.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    table: ScoreTableConfig,
}

impl ScoringEngine {
    #[must_use]
    pub fn from_config(table: &ScoreTableConfig) -> Self {
        Self {
            table: table.clone(),
        }
    }

    /// Name and version of the active weight table.
    #[must_use]
    pub fn table_label(&self) -> String {
        format!("{}@v{}", self.table.name, self.table.version)
    }

    /// Score one account. `protected` comes from the whitelist guard and
    /// forces the sentinel regardless of every other factor.
    #[must_use]
    pub fn score(&self, account: &FollowedAccount, now: DateTime<Utc>, protected: bool) -> i64 {
        self.breakdown(account, now, protected).total
    }

    /// Score with per-factor evidence, for audit detail and plan output.
    #[must_use]
    pub fn breakdown(
        &self,
        account: &FollowedAccount,
        now: DateTime<Utc>,
        protected: bool,
    ) -> ScoreBreakdown {
        if protected {
            return ScoreBreakdown {
                total: self.table.whitelist_sentinel,
                whitelisted: true,
                terms: vec![ScoreTerm {
                    name: "whitelist_override",
                    points: self.table.whitelist_sentinel,
                }],
            };
        }

        let mut terms = Vec::new();

        // Absent activity reads as maximal age: an account that never posted
        // (or whose history is invisible) lands in the oldest tier.
        let age_days = account
            .days_inactive(now)
            .map_or(u64::MAX, u64::from);
        if let Some(tier) = self
            .table
            .inactivity_tiers
            .iter()
            .find(|tier| age_days >= u64::from(tier.min_days))
        {
            terms.push(ScoreTerm {
                name: "inactivity",
                points: tier.points,
            });
        }

        if let Some(tier) = self
            .table
            .high_follower_tiers
            .iter()
            .find(|tier| account.follower_count > tier.above)
        {
            terms.push(ScoreTerm {
                name: "high_followers",
                points: tier.points,
            });
        } else if let Some(tier) = self
            .table
            .low_follower_tiers
            .iter()
            .find(|tier| account.follower_count < tier.below)
        {
            terms.push(ScoreTerm {
                name: "low_followers",
                points: tier.points,
            });
        }

        if account.verified {
            terms.push(ScoreTerm {
                name: "verified",
                points: self.table.verified_points,
            });
        }
        if account.is_private {
            terms.push(ScoreTerm {
                name: "private",
                points: self.table.private_points,
            });
        }
        if !account.has_profile_image {
            terms.push(ScoreTerm {
                name: "missing_profile_image",
                points: self.table.missing_profile_image_points,
            });
        }

        if let Some(tier) = self
            .table
            .sparse_tweet_tiers
            .iter()
            .find(|tier| account.tweet_count < tier.below)
        {
            terms.push(ScoreTerm {
                name: "sparse_posting",
                points: tier.points,
            });
        }

        let raw: i64 = terms.iter().map(|term| term.points).sum();
        let total = if self.table.floor_at_zero {
            raw.max(0)
        } else {
            raw
        };

        ScoreBreakdown {
            total,
            whitelisted: false,
            terms,
        }
    }

    /// Score a slice of accounts against one fixed `now`, in input order.
    pub fn score_batch<F>(
        &self,
        accounts: &[FollowedAccount],
        now: DateTime<Utc>,
        mut is_protected: F,
    ) -> Vec<(String, i64)>
    where
        F: FnMut(&FollowedAccount) -> bool,
    {
        accounts
            .iter()
            .map(|account| {
                let protected = is_protected(account);
                (account.account_id.clone(), self.score(account, now, protected))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BelowTier, InactivityTier};
    use chrono::TimeZone;

    fn engine() -> ScoringEngine {
        ScoringEngine::from_config(&ScoreTableConfig::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap()
    }

    fn account(days_inactive: Option<i64>, followers: u64) -> FollowedAccount {
        FollowedAccount {
            account_id: "1".to_string(),
            handle: "subject".to_string(),
            display_name: "Subject".to_string(),
            verified: false,
            follower_count: followers,
            tweet_count: 500,
            last_activity_at: days_inactive.map(|d| now() - chrono::Duration::days(d)),
            is_private: false,
            has_profile_image: true,
            first_seen_at: now(),
            last_checked_at: Some(now()),
            check_count: 1,
            current_score: None,
            removed: false,
            removed_at: None,
            terminal_reason: None,
        }
    }

    #[test]
    fn four_hundred_days_and_three_followers_scores_110() {
        let subject = account(Some(400), 3);
        let breakdown = engine().breakdown(&subject, now(), false);
        // 365d tier (+80) plus <50 followers (+30).
        assert_eq!(breakdown.total, 110);
        assert!(breakdown.terms.iter().any(|t| t.name == "inactivity" && t.points == 80));
        assert!(breakdown.terms.iter().any(|t| t.name == "low_followers" && t.points == 30));
    }

    #[test]
    fn whitelisted_account_forced_to_sentinel() {
        let subject = account(Some(400), 3);
        assert_eq!(engine().score(&subject, now(), true), -1_000);
    }

    #[test]
    fn scoring_is_deterministic() {
        let subject = account(Some(250), 120);
        let eng = engine();
        let a = eng.breakdown(&subject, now(), false);
        let b = eng.breakdown(&subject, now(), false);
        assert_eq!(a, b);
    }

    #[test]
    fn absent_activity_reads_as_maximal_age() {
        let subject = account(None, 10_000);
        let breakdown = engine().breakdown(&subject, now(), false);
        assert!(
            breakdown
                .terms
                .iter()
                .any(|t| t.name == "inactivity" && t.points == 100),
            "no-activity account should land in the oldest tier: {breakdown:?}"
        );
    }

    #[test]
    fn inactivity_tiers_are_monotonic() {
        let eng = engine();
        let mut last = i64::MAX;
        for days in [800, 400, 200, 100, 30] {
            let score = eng.score(&account(Some(days), 10_000), now(), false);
            assert!(
                score <= last,
                "score should not increase as activity gets more recent"
            );
            last = score;
        }
    }

    #[test]
    fn million_follower_penalty_beats_hundred_k() {
        let eng = engine();
        let two_m = eng.breakdown(&account(Some(400), 2_000_000), now(), false);
        assert!(
            two_m
                .terms
                .iter()
                .any(|t| t.name == "high_followers" && t.points == -50),
            "most specific tier must win: {two_m:?}"
        );
        let two_hundred_k = eng.breakdown(&account(Some(400), 200_000), now(), false);
        assert!(
            two_hundred_k
                .terms
                .iter()
                .any(|t| t.name == "high_followers" && t.points == -20)
        );
    }

    #[test]
    fn influence_protects_active_accounts_via_floor() {
        // Recently active, verified, huge following: raw score is negative,
        // floored at zero.
        let mut subject = account(Some(5), 2_000_000);
        subject.verified = true;
        assert_eq!(engine().score(&subject, now(), false), 0);
    }

    #[test]
    fn quality_indicators_add_up() {
        let mut subject = account(Some(400), 3);
        subject.is_private = true;
        subject.has_profile_image = false;
        subject.tweet_count = 4;
        let breakdown = engine().breakdown(&subject, now(), false);
        // 80 + 30 + 10 + 15 + 25
        assert_eq!(breakdown.total, 160);
    }

    #[test]
    fn sparse_tweet_tiers_first_match_wins() {
        let eng = engine();
        let mut subject = account(Some(400), 3);
        subject.tweet_count = 40;
        let breakdown = eng.breakdown(&subject, now(), false);
        assert!(
            breakdown
                .terms
                .iter()
                .any(|t| t.name == "sparse_posting" && t.points == 10)
        );
    }

    #[test]
    fn custom_table_changes_output() {
        let mut table = ScoreTableConfig::default();
        table.name = "aggressive".to_string();
        table.version = 2;
        table.inactivity_tiers = vec![InactivityTier {
            min_days: 30,
            points: 500,
        }];
        table.sparse_tweet_tiers = vec![BelowTier {
            below: 1_000,
            points: 7,
        }];
        let eng = ScoringEngine::from_config(&table);
        assert_eq!(eng.table_label(), "aggressive@v2");

        let subject = account(Some(45), 10_000);
        let breakdown = eng.breakdown(&subject, now(), false);
        assert_eq!(breakdown.total, 507);
    }

    #[test]
    fn score_batch_keeps_input_order_and_applies_guard() {
        let eng = engine();
        let accounts = vec![account(Some(400), 3), {
            let mut a = account(Some(400), 3);
            a.account_id = "2".to_string();
            a
        }];
        let scores = eng.score_batch(&accounts, now(), |a| a.account_id == "2");
        assert_eq!(scores[0], ("1".to_string(), 110));
        assert_eq!(scores[1], ("2".to_string(), -1_000));
    }
}
