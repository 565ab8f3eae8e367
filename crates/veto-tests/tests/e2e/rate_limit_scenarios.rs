//! End-to-end test: personality evolution budget over a day.

use chrono::Duration;
use serde_json::Value;
use veto_tests::{epoch, limiter};
use veto_types::Severity;

#[test]
fn small_evolution_on_empty_ledger_is_low_risk() {
    let (limiter, _) = limiter();
    let result = limiter
        .validate_change_request_at(
            "personality_evolution",
            "evolution",
            0.05,
            "personality_engine",
            &Value::Null,
            epoch(),
        )
        .unwrap();
    assert!(result.approved, "{}", result.reason);
    assert_eq!(result.risk_level, Severity::Low);
    assert!(result.reservation_id.is_some());
}

#[test]
fn oversized_evolution_gets_adjusted_magnitude() {
    let (limiter, _) = limiter();
    let result = limiter
        .validate_change_request_at(
            "personality_evolution",
            "evolution",
            0.15,
            "personality_engine",
            &Value::Null,
            epoch(),
        )
        .unwrap();
    assert!(!result.approved);
    let adjusted = result.adjusted_magnitude.unwrap();
    assert!((adjusted - 0.09).abs() < 1e-9);
    assert!(result.risk_level >= Severity::Medium);
    assert!(result.reservation_id.is_none());
}

#[test]
fn fourth_change_breaks_the_daily_budget() {
    let (limiter, _) = limiter();
    let mut now = epoch();
    for step in 1..=3 {
        let result = limiter
            .validate_change_request_at(
                "personality_evolution",
                "evolution",
                0.08,
                "personality_engine",
                &Value::Null,
                now,
            )
            .unwrap();
        assert!(result.approved, "step {step}: {}", result.reason);
        if step == 3 {
            assert!((result.proposed_new_total - 0.24).abs() < 1e-9);
        }
        limiter
            .commit_reservation_at(result.reservation_id.as_deref().unwrap(), now)
            .unwrap();
        now += Duration::minutes(5);
    }

    let fourth = limiter
        .validate_change_request_at(
            "personality_evolution",
            "evolution",
            0.08,
            "personality_engine",
            &Value::Null,
            now,
        )
        .unwrap();
    assert!(!fourth.approved);
    assert!((fourth.proposed_new_total - 0.32).abs() < 1e-9);
    assert!(fourth.reason.contains("daily"));
}

#[test]
fn budget_frees_up_after_24_hours() {
    let (limiter, _) = limiter();
    let start = epoch();
    for i in 0..3 {
        let at = start + Duration::minutes(i);
        let result = limiter
            .validate_change_request_at("personality_evolution", "evolution", 0.08, "pe", &Value::Null, at)
            .unwrap();
        limiter
            .commit_reservation_at(result.reservation_id.as_deref().unwrap(), at)
            .unwrap();
    }

    let next_day = start + Duration::hours(25);
    let result = limiter
        .validate_change_request_at("personality_evolution", "evolution", 0.08, "pe", &Value::Null, next_day)
        .unwrap();
    assert!(result.approved, "{}", result.reason);
    assert!(result.cumulative_today.abs() < 1e-9);
}

#[test]
fn released_reservation_returns_budget() {
    let (limiter, _) = limiter();
    let now = epoch();
    let first = limiter
        .validate_change_request_at("personality_evolution", "evolution", 0.1, "pe", &Value::Null, now)
        .unwrap();
    let second = limiter
        .validate_change_request_at("personality_evolution", "evolution", 0.1, "pe", &Value::Null, now)
        .unwrap();
    assert!(first.approved && second.approved);
    // Two live reservations hold 0.2 of 0.25.
    let third = limiter
        .validate_change_request_at("personality_evolution", "evolution", 0.1, "pe", &Value::Null, now)
        .unwrap();
    assert!(!third.approved);

    limiter
        .release_reservation(first.reservation_id.as_deref().unwrap())
        .unwrap();
    let retry = limiter
        .validate_change_request_at("personality_evolution", "evolution", 0.05, "pe", &Value::Null, now)
        .unwrap();
    assert!(retry.approved, "{}", retry.reason);
}
