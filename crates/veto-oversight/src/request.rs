use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use veto_types::{RiskLevel, Severity, Urgency};

use crate::policy::ReviewerLevel;

// ── Status ──────────────────────────────────────────────────────────────

/// Lifecycle of an approval request. Every state but `Pending` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ── Request ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub factors: Vec<String>,
}

/// A request waiting on a human decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub operation: String,
    pub details: Value,
    pub context: Value,
    pub urgency: Urgency,
    pub requester: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub timeout_seconds: u64,
    pub reviewer_level: ReviewerLevel,
    pub escalation_path: Vec<String>,
    pub risk_assessment: RiskAssessment,
    /// Auto-approve rules that did not hold, as readable text.
    pub approval_criteria: Vec<String>,
}

/// What an operator can answer to a pending request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorResponse {
    Approve {
        reviewer: String,
        #[serde(default)]
        note: Option<String>,
    },
    Deny {
        reviewer: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Cancel {
        reviewer: String,
    },
    /// Re-render the request; it stays pending.
    Details,
}

// ── Response ────────────────────────────────────────────────────────────

/// Outcome of `request_human_approval`.
///
/// `approved` is true only for `Approved`; a timeout is a denial that
/// also sets `follow_up_required`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub request_id: String,
    pub operation: String,
    pub requester: String,
    pub status: ApprovalStatus,
    pub approved: bool,
    pub auto_decided: bool,
    pub reason: String,
    pub reviewer: Option<String>,
    pub follow_up_required: bool,
    pub requested_at: DateTime<Utc>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalResponse {
    pub(crate) fn decided(
        request_id: String,
        operation: &str,
        requester: &str,
        status: ApprovalStatus,
        reason: impl Into<String>,
        requested_at: DateTime<Utc>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            operation: operation.to_string(),
            requester: requester.to_string(),
            status,
            approved: status == ApprovalStatus::Approved,
            auto_decided: false,
            reason: reason.into(),
            reviewer: None,
            follow_up_required: status == ApprovalStatus::Timeout,
            requested_at,
            decided_at,
        }
    }

    pub(crate) fn auto(mut self) -> Self {
        self.auto_decided = true;
        self
    }

    pub(crate) fn reviewed_by(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = Some(reviewer.into());
        self
    }

    /// Seconds between request and decision.
    pub fn response_secs(&self) -> f64 {
        (self.decided_at - self.requested_at).num_milliseconds() as f64 / 1000.0
    }
}

// ── Statistics ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStatistics {
    pub total_requests: u64,
    pub auto_approved: u64,
    pub auto_denied: u64,
    pub approved: u64,
    pub denied: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub pending: usize,
    /// Approved (auto or human) over all decided requests.
    pub approval_rate: f64,
    /// Timeouts over requests routed to a human and resolved.
    pub timeout_rate: f64,
    /// Mean human response time in seconds.
    pub avg_response_secs: f64,
    pub require_approval_for_all: bool,
}

impl ApprovalStatistics {
    pub fn decided(&self) -> u64 {
        self.auto_approved
            + self.auto_denied
            + self.approved
            + self.denied
            + self.timed_out
            + self.cancelled
    }

    pub fn human_routed(&self) -> u64 {
        self.approved + self.denied + self.timed_out + self.cancelled
    }
}

pub(crate) fn risk_for_reviewer(level: ReviewerLevel) -> RiskLevel {
    match level {
        ReviewerLevel::Operator => Severity::Medium,
        ReviewerLevel::Senior => Severity::High,
        ReviewerLevel::SafetyOfficer => Severity::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_denial_with_follow_up() {
        let now = Utc::now();
        let r = ApprovalResponse::decided(
            "apr-1".into(),
            "code_execution",
            "planner",
            ApprovalStatus::Timeout,
            "no response",
            now,
            now,
        );
        assert!(!r.approved);
        assert!(r.follow_up_required);
        assert!(r.status.is_terminal());
    }

    #[test]
    fn operator_response_tagged() {
        let r: OperatorResponse =
            serde_json::from_str(r#"{ "action": "deny", "reviewer": "ops" }"#).unwrap();
        assert_eq!(
            r,
            OperatorResponse::Deny {
                reviewer: "ops".into(),
                reason: None
            }
        );
    }

    #[test]
    fn reviewer_level_drives_risk() {
        assert_eq!(risk_for_reviewer(ReviewerLevel::Operator), Severity::Medium);
        assert_eq!(
            risk_for_reviewer(ReviewerLevel::SafetyOfficer),
            Severity::Critical
        );
    }
}
