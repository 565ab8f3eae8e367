use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use veto_isolation::{IsolationDecision, ViolationType};
use veto_oversight::{ApprovalResponse, ApprovalStatus};
use veto_rate_limit::ChangeValidationResult;
use veto_types::{Severity, Urgency};

use crate::error::SafetyError;

/// A proposed self-modification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationProposal {
    /// Subsystem asking for the change.
    pub requestor: String,
    /// Subsystem being changed.
    pub subsystem: String,
    /// Rate-limit change kind, e.g. `"evolution"`.
    pub kind: String,
    /// Isolation operation, e.g. `"evolve"`.
    pub operation: String,
    pub magnitude: f64,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub urgency: Urgency,
    /// Operation name shown to the oversight manager.
    /// Defaults to `"{subsystem}_{operation}"`.
    #[serde(default)]
    pub approval_operation: Option<String>,
}

impl MutationProposal {
    pub fn new(
        requestor: impl Into<String>,
        subsystem: impl Into<String>,
        kind: impl Into<String>,
        operation: impl Into<String>,
        magnitude: f64,
    ) -> Self {
        Self {
            requestor: requestor.into(),
            subsystem: subsystem.into(),
            kind: kind.into(),
            operation: operation.into(),
            magnitude,
            details: Value::Null,
            context: Value::Null,
            urgency: Urgency::Normal,
            approval_operation: None,
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn approval_operation(mut self, operation: impl Into<String>) -> Self {
        self.approval_operation = Some(operation.into());
        self
    }

    pub fn approval_operation_name(&self) -> String {
        self.approval_operation
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.subsystem, self.operation))
    }

    /// Details for the approval request: the caller's details plus the
    /// change coordinates.
    pub(crate) fn approval_details(&self) -> Value {
        let mut details = match &self.details {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".into(), other.clone());
                map
            }
        };
        details.insert("subsystem".into(), json!(self.subsystem));
        details.insert("kind".into(), json!(self.kind));
        details.insert("magnitude".into(), json!(self.magnitude));
        Value::Object(details)
    }
}

/// Pipeline stage that produced the decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    Isolation,
    RateLimit,
    Oversight,
    Internal,
    Approved,
}

/// Outcome of [`SafetyCoordinator::evaluate_mutation`](crate::SafetyCoordinator::evaluate_mutation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationDecision {
    pub approved: bool,
    pub stage: DecisionStage,
    pub reason: String,
    pub proposal: MutationProposal,
    pub isolation: Option<IsolationDecision>,
    pub rate_limit: Option<ChangeValidationResult>,
    pub approval: Option<ApprovalResponse>,
    /// Concrete ways forward when denied.
    pub remediation: Vec<String>,
    /// Budget held until `commit_mutation` or `abandon_mutation`.
    pub reservation_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl MutationDecision {
    pub(crate) fn new(proposal: MutationProposal, now: DateTime<Utc>) -> Self {
        Self {
            approved: false,
            stage: DecisionStage::Internal,
            reason: String::new(),
            proposal,
            isolation: None,
            rate_limit: None,
            approval: None,
            remediation: Vec::new(),
            reservation_id: None,
            decided_at: now,
        }
    }

    pub(crate) fn deny(mut self, stage: DecisionStage, reason: impl Into<String>) -> Self {
        self.approved = false;
        self.stage = stage;
        self.reason = reason.into();
        self.reservation_id = None;
        self
    }

    /// The decision as a `Result`, mapping refusals onto [`SafetyError`].
    pub fn into_result(self) -> Result<MutationDecision, SafetyError> {
        if self.approved {
            return Ok(self);
        }
        let error = match self.stage {
            DecisionStage::Isolation => match &self.isolation {
                Some(d) if d.violation_type == Some(ViolationType::UnknownSystem) => {
                    SafetyError::UnknownSubsystem(if d.reason.starts_with("unknown target") {
                        self.proposal.subsystem.clone()
                    } else {
                        self.proposal.requestor.clone()
                    })
                }
                Some(d) => SafetyError::PolicyViolation {
                    reason: d.reason.clone(),
                    severity: d.severity,
                },
                None => SafetyError::PolicyViolation {
                    reason: self.reason.clone(),
                    severity: Severity::High,
                },
            },
            DecisionStage::RateLimit => match &self.rate_limit {
                Some(r) if r.reason.starts_with("unknown change kind") => {
                    SafetyError::UnknownChangeKind {
                        subsystem: r.subsystem.clone(),
                        kind: r.kind.clone(),
                    }
                }
                Some(r) => SafetyError::RateLimitExceeded {
                    reason: r.reason.clone(),
                    adjusted_magnitude: r.adjusted_magnitude,
                    cooldown_remaining: r.cooldown_remaining,
                },
                None => SafetyError::RateLimitExceeded {
                    reason: self.reason.clone(),
                    adjusted_magnitude: None,
                    cooldown_remaining: None,
                },
            },
            DecisionStage::Oversight => match &self.approval {
                Some(a) if a.status == ApprovalStatus::Timeout => SafetyError::ApprovalTimeout {
                    request_id: a.request_id.clone(),
                },
                Some(a) => SafetyError::ApprovalDenied {
                    reason: a.reason.clone(),
                },
                None => SafetyError::ApprovalDenied {
                    reason: self.reason.clone(),
                },
            },
            DecisionStage::Internal | DecisionStage::Approved => {
                SafetyError::Internal(self.reason.clone())
            }
        };
        Err(error)
    }
}
