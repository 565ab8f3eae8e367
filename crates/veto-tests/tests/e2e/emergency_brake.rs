//! End-to-end test: emergency brakes stop every change until released or expired.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::Value;
use veto_tests::{epoch, limiter};

#[test]
fn brake_blocks_until_released() {
    let (limiter, _) = limiter();
    let now = epoch();
    limiter
        .engage_emergency_brake_at(
            "sass_adjustment",
            "sass spiral",
            Some(StdDuration::from_secs(3600)),
            now,
        )
        .unwrap();

    for minutes in [0, 10, 59] {
        let result = limiter
            .validate_change_request_at(
                "sass_adjustment",
                "sass_level",
                0.01,
                "sass_engine",
                &Value::Null,
                now + Duration::minutes(minutes),
            )
            .unwrap();
        assert!(!result.approved);
        assert!(result.reason.contains("emergency brake"));
        assert!(result.cooldown_remaining.unwrap() > 0);
    }

    // Other subsystems are unaffected.
    let memory = limiter
        .validate_change_request_at("memory", "write", 0.5, "memory", &Value::Null, now)
        .unwrap();
    assert!(memory.approved);

    assert!(limiter
        .release_emergency_brake("sass_adjustment", "alice")
        .unwrap());
    let after = limiter
        .validate_change_request_at(
            "sass_adjustment",
            "sass_level",
            0.01,
            "sass_engine",
            &Value::Null,
            now + Duration::minutes(1),
        )
        .unwrap();
    assert!(after.approved, "{}", after.reason);
}

#[test]
fn timed_brake_expires() {
    let (limiter, _) = limiter();
    let now = epoch();
    limiter
        .engage_emergency_brake_at(
            "personality_evolution",
            "drift",
            Some(StdDuration::from_secs(3600)),
            now,
        )
        .unwrap();
    let later = now + Duration::seconds(3601);
    let result = limiter
        .validate_change_request_at(
            "personality_evolution",
            "evolution",
            0.02,
            "pe",
            &Value::Null,
            later,
        )
        .unwrap();
    assert!(result.approved, "{}", result.reason);
}

#[test]
fn global_brake_covers_every_subsystem() {
    let (limiter, _) = limiter();
    let now = epoch();
    limiter
        .engage_emergency_brake_at("all", "shutdown", None, now)
        .unwrap();
    for (subsystem, kind) in [("memory", "write"), ("research", "query"), ("code_generation", "generation")] {
        let result = limiter
            .validate_change_request_at(subsystem, kind, 0.01, "x", &Value::Null, now + Duration::days(3))
            .unwrap();
        assert!(!result.approved, "{subsystem}/{kind} passed a global brake");
    }
    assert!(!limiter.release_emergency_brake("memory", "alice").unwrap());
    assert!(limiter.release_emergency_brake("all", "alice").unwrap());
}
