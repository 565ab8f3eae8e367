//! Property tests: the burst allowance caps accepted changes inside one
//! cooldown window.

use chrono::Duration;
use proptest::prelude::*;
use serde_json::Value;
use veto_rate_limit::{ChangeLimitEntry, ChangeLimits};
use veto_tests::{epoch, limiter_with};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn change_after_burst_waits_for_cooldown(
        burst in 1u32..8,
        cooldown in 60u64..7200,
        spacing in 0i64..30,
    ) {
        let limiter = limiter_with(vec![ChangeLimitEntry::new(
            "memory",
            "write",
            ChangeLimits::new(1.0, 1000.0).with_cooldown(cooldown, burst),
        )]);

        let mut now = epoch();
        for _ in 0..burst {
            let result = limiter
                .validate_change_request_at("memory", "write", 0.1, "prop", &Value::Null, now)
                .unwrap();
            prop_assert!(result.approved, "{}", result.reason);
            limiter
                .commit_reservation_at(result.reservation_id.as_deref().unwrap(), now)
                .unwrap();
            now += Duration::seconds(spacing);
        }

        // Still inside the window opened by the first change.
        let elapsed = spacing * burst as i64;
        prop_assume!(elapsed < cooldown as i64);
        let extra = limiter
            .validate_change_request_at("memory", "write", 0.1, "prop", &Value::Null, now)
            .unwrap();
        prop_assert!(!extra.approved);
        prop_assert!(extra.cooldown_remaining.unwrap_or(0) > 0);
    }
}
