//! End-to-end test: human oversight decisions, auto rules and fail-closed timeouts.

use serde_json::{json, Value};
use veto_oversight::{ApprovalStatus, OperatorResponse, OversightError};
use veto_tests::{next_pending, oversight};
use veto_types::Urgency;

// ---------------------------------------------------------------------------
// Automatic decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dangerous_code_execution_is_auto_denied_without_prompt() {
    let (manager, display) = oversight();
    let response = manager
        .request_human_approval(
            "code_execution",
            json!({ "code": "subprocess.call('rm -rf /')" }),
            Urgency::Normal,
            "code_generation",
            Value::Null,
        )
        .await
        .unwrap();
    assert_eq!(response.status, ApprovalStatus::Denied);
    assert!(!response.approved);
    assert!(response.auto_decided);
    assert!(display.shown().is_empty());
    assert!(manager.pending_requests().unwrap().is_empty());
}

#[tokio::test]
async fn small_code_generation_is_auto_approved() {
    let (manager, display) = oversight();
    let response = manager
        .request_human_approval(
            "code_generation",
            json!({ "lines_of_code": 12, "code": "fn add(a: i32, b: i32) -> i32 { a + b }" }),
            Urgency::Low,
            "code_generation",
            Value::Null,
        )
        .await
        .unwrap();
    assert!(response.approved);
    assert!(response.auto_decided);
    assert!(display.shown().is_empty());
}

#[tokio::test]
async fn unmatched_operation_needs_no_approval() {
    let (manager, _) = oversight();
    let response = manager
        .request_human_approval("conversation_reply", Value::Null, Urgency::Low, "conversation", Value::Null)
        .await
        .unwrap();
    assert!(response.approved);
    assert!(response.auto_decided);
}

// ---------------------------------------------------------------------------
// Human decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reviewer_denial_is_final() {
    let (manager, display) = oversight();
    let manager = std::sync::Arc::new(manager);
    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_human_approval(
                    "memory_delete",
                    json!({ "scope": "all conversations" }),
                    Urgency::High,
                    "memory",
                    Value::Null,
                )
                .await
                .unwrap()
        })
    };

    let request = next_pending(&manager).await;
    assert_eq!(display.shown(), vec![request.id.clone()]);
    let status = manager
        .respond(
            &request.id,
            OperatorResponse::Deny {
                reviewer: "carol".into(),
                reason: Some("too broad".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(status, ApprovalStatus::Denied);

    let response = waiter.await.unwrap();
    assert!(!response.approved);
    assert_eq!(response.reviewer.as_deref(), Some("carol"));
    assert_eq!(manager.status_of(&request.id).unwrap(), Some(ApprovalStatus::Denied));

    let again = manager
        .respond(
            &request.id,
            OperatorResponse::Approve {
                reviewer: "dave".into(),
                note: None,
            },
        )
        .await;
    assert!(matches!(again, Err(OversightError::AlreadyResolved(_))));
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_closed() {
    let (manager, display) = oversight();
    let response = manager
        .request_human_approval(
            "memory_purge",
            json!({ "reason": "cleanup" }),
            Urgency::Normal,
            "memory",
            Value::Null,
        )
        .await
        .unwrap();
    assert_eq!(display.shown().len(), 1);
    assert_eq!(response.status, ApprovalStatus::Timeout);
    assert!(!response.approved);
    assert!(response.follow_up_required);

    // A late cancel loses to the timeout.
    let late = manager
        .respond(
            &response.request_id,
            OperatorResponse::Cancel {
                reviewer: "erin".into(),
            },
        )
        .await;
    assert!(matches!(late, Err(OversightError::AlreadyResolved(_))));

    let stats = manager.statistics().unwrap();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn emergency_mode_routes_auto_approvals_to_a_human() {
    let (manager, display) = oversight();
    let manager = std::sync::Arc::new(manager);
    manager.require_approval_for_all(true);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_human_approval(
                    "research_lookup",
                    json!({ "query": "weather" }),
                    Urgency::Low,
                    "research",
                    Value::Null,
                )
                .await
                .unwrap()
        })
    };
    let request = next_pending(&manager).await;
    assert_eq!(display.shown(), vec![request.id.clone()]);
    manager
        .respond(
            &request.id,
            OperatorResponse::Approve {
                reviewer: "frank".into(),
                note: Some("fine".into()),
            },
        )
        .await
        .unwrap();
    let response = waiter.await.unwrap();
    assert!(response.approved);
    assert!(!response.auto_decided);
}
