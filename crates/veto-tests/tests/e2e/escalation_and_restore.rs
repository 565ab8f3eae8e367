//! End-to-end test: incidents escalate to emergency shutdown, and only a
//! human-approved system_restore brings the system back.

use serde_json::{json, Value};
use veto_audit::{AuditSink, AuditTable, QueryWindow};
use veto_coordinator::{
    CoordinatorError, IncidentSignal, IncidentType, MutationProposal, SafetyStatus,
    SYSTEM_RESTORE_OPERATION, SYSTEM_WIDE,
};
use veto_drift::Interaction;
use veto_isolation::SystemStatus;
use veto_oversight::OperatorResponse;
use veto_tests::{next_pending, Fixture};
use veto_types::{Severity, Urgency};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn trip_shutdown(fx: &Fixture) {
    for subsystem in ["research", "memory", "conversation"] {
        fx.coordinator
            .report_incident(IncidentSignal::new(
                IncidentType::SystemInstability,
                Severity::High,
                subsystem,
                "component unresponsive",
            ))
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_serious_incidents_shut_everything_down() {
    let fx = Fixture::new();
    assert_eq!(fx.coordinator.status().unwrap(), SafetyStatus::Operational);
    trip_shutdown(&fx).await;

    assert_eq!(fx.coordinator.status().unwrap(), SafetyStatus::EmergencyShutdown);
    for name in fx.coordinator.isolation().subsystems() {
        assert_eq!(
            fx.coordinator.isolation().status(&name),
            Some(SystemStatus::Quarantined),
            "{name} left running"
        );
    }
    let notices = fx.notifier.notices();
    assert!(notices
        .iter()
        .any(|n| n.status == SafetyStatus::EmergencyShutdown));

    let emergency = fx
        .audit
        .list(Some(AuditTable::EmergencyActions), QueryWindow::default())
        .unwrap();
    assert!(emergency
        .iter()
        .any(|r| r.payload["event"] == "emergency_shutdown"));

    let decision = fx
        .coordinator
        .evaluate_mutation(MutationProposal::new("memory", "memory", "write", "write", 0.1))
        .await;
    assert!(!decision.approved);

    let history = fx.coordinator.status_history().unwrap();
    assert_eq!(history.last().unwrap().to, SafetyStatus::EmergencyShutdown);
}

#[tokio::test]
async fn human_restore_lifts_shutdown() {
    let fx = Fixture::new();
    trip_shutdown(&fx).await;

    assert!(matches!(
        fx.coordinator.restore_system_from_isolation("memory", "alice"),
        Err(CoordinatorError::EmergencyShutdownActive)
    ));

    let coordinator = fx.coordinator.clone();
    let waiter = tokio::spawn(async move {
        coordinator
            .oversight()
            .request_human_approval(
                SYSTEM_RESTORE_OPERATION,
                json!({ "reason": "root cause fixed" }),
                Urgency::High,
                "alice",
                Value::Null,
            )
            .await
            .unwrap()
    });
    let request = next_pending(fx.coordinator.oversight()).await;
    fx.coordinator
        .oversight()
        .respond(
            &request.id,
            OperatorResponse::Approve {
                reviewer: "safety-officer".into(),
                note: Some("verified".into()),
            },
        )
        .await
        .unwrap();
    let approval = waiter.await.unwrap();

    let status = fx
        .coordinator
        .restore_from_emergency("alice", &approval)
        .unwrap();
    // Incidents are still open, so the status drops to what they imply.
    assert!(status < SafetyStatus::EmergencyShutdown);
    assert_eq!(
        fx.coordinator.isolation().status("memory"),
        Some(SystemStatus::Active)
    );

    for incident in fx.coordinator.open_incidents().unwrap() {
        fx.coordinator
            .resolve_incident(&incident.id, "alice", "component restarted")
            .unwrap();
    }
    assert_eq!(fx.coordinator.status().unwrap(), SafetyStatus::Operational);
    assert_eq!(fx.coordinator.incident_history().unwrap().len(), 3);

    let decision = fx
        .coordinator
        .evaluate_mutation(MutationProposal::new("memory", "memory", "write", "write", 0.1))
        .await;
    assert!(decision.approved, "{}", decision.reason);
}

#[tokio::test]
async fn auto_approved_restore_is_not_enough() {
    let fx = Fixture::new();
    trip_shutdown(&fx).await;

    // An approval for some other operation cannot lift the shutdown.
    let other = fx
        .coordinator
        .oversight()
        .request_human_approval("conversation_reply", Value::Null, Urgency::Low, "alice", Value::Null)
        .await
        .unwrap();
    assert!(matches!(
        fx.coordinator.restore_from_emergency("alice", &other),
        Err(CoordinatorError::RestoreNotAuthorized(_))
    ));
    assert!(fx.coordinator.is_shutdown().unwrap());
}

#[tokio::test]
async fn critical_drift_brakes_personality_changes() {
    let fx = Fixture::new();
    for _ in 0..12 {
        fx.coordinator
            .observe_interaction(
                Interaction::new("you're all I have, I need you", "I'll always be here, rely on me")
                    .with_personality_adjustment(),
            )
            .unwrap();
    }
    let report = fx.coordinator.run_monitoring_cycle().await.unwrap();
    let drift = report
        .open_incidents
        .iter()
        .find(|i| i.incident_type == IncidentType::BehavioralDrift)
        .expect("drift incident opened");
    assert_eq!(drift.subsystem, SYSTEM_WIDE);
    assert!(drift.severity >= Severity::High);
    assert!(report.status >= SafetyStatus::ElevatedRisk);

    let decision = fx
        .coordinator
        .evaluate_mutation(MutationProposal::new(
            "personality_evolution",
            "personality_evolution",
            "evolution",
            "evolve",
            0.01,
        ))
        .await;
    assert!(!decision.approved);
    assert!(decision.reason.contains("emergency brake"));

    // A second cycle does not duplicate the open incident.
    let again = fx.coordinator.run_monitoring_cycle().await.unwrap();
    let drift_incidents = again
        .open_incidents
        .iter()
        .filter(|i| i.incident_type == IncidentType::BehavioralDrift)
        .count();
    assert_eq!(drift_incidents, 1);
}
