//! End-to-end test: daily budgets and brakes survive a restart through the
//! JSONL audit log.

use serde_json::Value;
use veto_audit::AuditSink;
use veto_coordinator::{AuditBackend, MutationProposal, SafetyConfig, SafetyCoordinator};
use veto_oversight::MemoryDisplay;

fn config(path: &std::path::Path) -> SafetyConfig {
    SafetyConfig {
        audit: AuditBackend::Jsonl {
            path: path.to_path_buf(),
        },
        ..SafetyConfig::default()
    }
}

fn build(path: &std::path::Path) -> SafetyCoordinator {
    SafetyCoordinator::builder(config(path))
        .display(std::sync::Arc::new(MemoryDisplay::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn committed_changes_count_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("veto.jsonl");

    {
        let coordinator = build(&path);
        for _ in 0..2 {
            let decision = coordinator
                .evaluate_mutation(MutationProposal::new(
                    "personality_evolution",
                    "personality_evolution",
                    "evolution",
                    "evolve",
                    0.04,
                ))
                .await;
            assert!(decision.approved, "{}", decision.reason);
            coordinator.commit_mutation(&decision).unwrap();
        }
        coordinator
            .emergency_system_isolation("sass_adjustment", "runaway sarcasm", "alice")
            .unwrap();
    }

    let restarted = build(&path);
    let result = restarted
        .rate_limiter()
        .validate_change_request(
            "personality_evolution",
            "evolution",
            0.01,
            "personality_engine",
            &Value::Null,
        )
        .unwrap();
    assert!((result.cumulative_today - 0.08).abs() < 1e-9);
    assert!(restarted.rate_limiter().is_brake_engaged("sass_adjustment"));
    restarted.audit().verify_chain().unwrap();
}

#[test]
fn corrupt_config_is_rejected_before_anything_is_built() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir.path().join("veto.jsonl"));
    config.coordinator.tick_interval_secs = 0;
    assert!(SafetyCoordinator::new(config).is_err());
    assert!(!dir.path().join("veto.jsonl").exists());
}
