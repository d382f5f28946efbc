//! Property-based tests for scoring and selection invariants.
//!
//! Uses `proptest` to verify the contracts that keep bulk unfollows safe:
//! deterministic scoring, whitelist-sentinel dominance over arbitrary
//! account attributes, and selection never exceeding the run cap.

mod common;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use std::sync::Arc;

use follow_sweeper::core::config::ScoreTableConfig;
use follow_sweeper::store::model::FollowedAccount;
use follow_sweeper::store::sqlite::Store;
use follow_sweeper::sweep::scoring::ScoringEngine;

// ──────────────────── strategies ────────────────────

fn arb_account() -> impl Strategy<Value = FollowedAccount> {
    (
        1u64..=9_999_999,
        proptest::option::of(0i64..3_000),
        0u64..=5_000_000,
        0u64..=1_000_000,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(id, days_inactive, followers, tweets, verified, private, has_image)| {
                let now = Utc::now();
                FollowedAccount {
                    account_id: id.to_string(),
                    handle: format!("user_{id}"),
                    display_name: String::new(),
                    verified,
                    follower_count: followers,
                    tweet_count: tweets,
                    last_activity_at: days_inactive.map(|d| now - Duration::days(d)),
                    is_private: private,
                    has_profile_image: has_image,
                    first_seen_at: now,
                    last_checked_at: Some(now),
                    check_count: 1,
                    current_score: None,
                    removed: false,
                    removed_at: None,
                    terminal_reason: None,
                }
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn score_is_deterministic(account in arb_account()) {
        let engine = ScoringEngine::from_config(&ScoreTableConfig::default());
        let now = Utc::now();
        let first = engine.score(&account, now, false);
        let second = engine.score(&account, now, false);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn whitelist_sentinel_dominates_every_attribute_mix(account in arb_account()) {
        let engine = ScoringEngine::from_config(&ScoreTableConfig::default());
        let now = Utc::now();
        let protected = engine.score(&account, now, true);
        prop_assert_eq!(protected, -1_000);
        // Below any usable execution threshold, whatever the raw factors say.
        prop_assert!(protected < 0);
    }

    #[test]
    fn unprotected_scores_are_floored_at_zero(account in arb_account()) {
        let engine = ScoringEngine::from_config(&ScoreTableConfig::default());
        let score = engine.score(&account, Utc::now(), false);
        prop_assert!(score >= 0);
    }

    #[test]
    fn selection_never_exceeds_cap(
        scores in proptest::collection::vec(0i64..300, 1..60),
        cap in 1usize..30,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("prop.db")).unwrap());
        for (i, score) in scores.iter().enumerate() {
            let snapshot = common::account(&format!("{i:04}"), 100, 10);
            store.upsert_synced_account(&snapshot, 1, Utc::now()).unwrap();
            store.set_scores(&[(format!("{i:04}"), *score)]).unwrap();
        }

        let selected = store.candidates(50, cap).unwrap();
        prop_assert!(selected.len() <= cap);
        // Everything selected clears the threshold, best first.
        prop_assert!(selected.iter().all(|a| a.current_score.unwrap() >= 50));
        let totals: Vec<i64> = selected.iter().map(|a| a.current_score.unwrap()).collect();
        let mut sorted = totals.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        prop_assert_eq!(totals, sorted);
    }
}
