//! Property tests: accepted magnitudes never exceed the daily cap in any
//! rolling 24-hour window.

use std::sync::Mutex;
use std::thread;

use chrono::Duration;
use proptest::prelude::*;
use serde_json::Value;
use veto_rate_limit::{ChangeLimitEntry, ChangeLimits};
use veto_tests::{epoch, limiter_with};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// A request: minutes since the previous one, and its magnitude.
fn arb_request() -> impl Strategy<Value = (i64, f64)> {
    (0i64..240, 0.0f64..0.12)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rolling_window_sum_stays_under_cap(
        requests in prop::collection::vec(arb_request(), 1..60),
        burst in 1u32..6,
    ) {
        let max_daily = 0.25;
        let limiter = limiter_with(vec![ChangeLimitEntry::new(
            "personality_evolution",
            "evolution",
            ChangeLimits::new(0.1, max_daily).with_cooldown(600, burst),
        )]);

        let mut now = epoch();
        let mut accepted = Vec::new();
        for (gap, magnitude) in requests {
            now += Duration::minutes(gap);
            let result = limiter
                .validate_change_request_at(
                    "personality_evolution",
                    "evolution",
                    magnitude,
                    "prop",
                    &Value::Null,
                    now,
                )
                .unwrap();
            if result.approved {
                let id = result.reservation_id.clone().unwrap();
                limiter.commit_reservation_at(&id, now).unwrap();
                accepted.push((now, magnitude));
            }
        }

        for (end, _) in &accepted {
            let start = *end - Duration::hours(24);
            let total: f64 = accepted
                .iter()
                .filter(|(t, _)| *t > start && t <= end)
                .map(|(_, m)| m)
                .sum();
            prop_assert!(total <= max_daily + 1e-9, "window ending {end} holds {total}");
        }
    }

    #[test]
    fn concurrent_requests_never_overspend(
        workers in 2usize..16,
        per_worker in 1usize..6,
        magnitude in 0.01f64..0.1,
    ) {
        let max_daily = 0.25;
        let limiter = limiter_with(vec![ChangeLimitEntry::new(
            "personality_evolution",
            "evolution",
            ChangeLimits::new(0.1, max_daily).with_cooldown(1, 10_000),
        )]);
        let now = epoch();
        let approved = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    for _ in 0..per_worker {
                        let result = limiter
                            .validate_change_request_at(
                                "personality_evolution",
                                "evolution",
                                magnitude,
                                "worker",
                                &Value::Null,
                                now,
                            )
                            .unwrap();
                        if let Some(id) = result.reservation_id {
                            limiter.commit_reservation_at(&id, now).unwrap();
                            approved.lock().unwrap().push(result.magnitude);
                        }
                    }
                });
            }
        });

        let approved = approved.into_inner().unwrap();
        let total: f64 = approved.iter().sum();
        prop_assert!(total <= max_daily + 1e-9, "{} approvals spent {total}", approved.len());
        let fits = ((max_daily + 1e-9) / magnitude).floor() as usize;
        prop_assert_eq!(approved.len(), fits.min(workers * per_worker));
    }
}
