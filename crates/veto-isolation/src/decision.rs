use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veto_types::Severity;

use crate::policy::{IsolationLevel, SystemStatus};

/// Why an interaction was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    UnknownSystem,
    SystemIsolated,
    ForbiddenModification,
    BannedOperation,
    UnauthorizedAccess,
    UnauthorizedOperation,
    ResourceLimitExceeded,
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UnknownSystem => "unknown_system",
            Self::SystemIsolated => "system_isolated",
            Self::ForbiddenModification => "forbidden_modification",
            Self::BannedOperation => "banned_operation",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::UnauthorizedOperation => "unauthorized_operation",
            Self::ResourceLimitExceeded => "resource_limit_exceeded",
        };
        f.write_str(name)
    }
}

/// What the caller should do with a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Proceed,
    RequestApproval,
    Deny,
    RetryLater,
    Investigate,
}

/// Outcome of [`IsolationRegistry::validate_interaction`](crate::IsolationRegistry::validate_interaction).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsolationDecision {
    pub allowed: bool,
    pub violation_type: Option<ViolationType>,
    pub severity: Severity,
    pub reason: String,
    pub recommended_action: RecommendedAction,
    pub requires_approval: bool,
}

impl IsolationDecision {
    pub fn allow(requires_approval: bool) -> Self {
        Self {
            allowed: true,
            violation_type: None,
            severity: Severity::Low,
            reason: if requires_approval {
                "allowed; operation requires human approval".into()
            } else {
                "allowed".into()
            },
            recommended_action: if requires_approval {
                RecommendedAction::RequestApproval
            } else {
                RecommendedAction::Proceed
            },
            requires_approval,
        }
    }

    pub fn deny(violation_type: ViolationType, severity: Severity, reason: impl Into<String>) -> Self {
        let recommended_action = match violation_type {
            ViolationType::UnknownSystem => RecommendedAction::Investigate,
            ViolationType::ResourceLimitExceeded => RecommendedAction::RetryLater,
            _ => RecommendedAction::Deny,
        };
        Self {
            allowed: false,
            violation_type: Some(violation_type),
            severity,
            reason: reason.into(),
            recommended_action,
            requires_approval: false,
        }
    }
}

/// A logged isolation denial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub timestamp: DateTime<Utc>,
    pub requestor: String,
    pub target: String,
    pub operation: String,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub reason: String,
}

/// A logged status transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub timestamp: DateTime<Utc>,
    pub subsystem: String,
    pub from: SystemStatus,
    pub to: SystemStatus,
    pub level_from: IsolationLevel,
    pub level_to: IsolationLevel,
    pub actor: String,
    pub reason: String,
}

/// Snapshot of isolation health for the coordinator tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IsolationIntegrity {
    pub generated_at: Option<DateTime<Utc>>,
    pub statuses: BTreeMap<String, SystemStatus>,
    pub isolated: Vec<String>,
    pub quarantined: Vec<String>,
    pub violations_last_hour: usize,
    pub violations_by_severity: BTreeMap<Severity, usize>,
    pub critical_violations: usize,
    /// Requestors with the most denials in the last hour, highest first.
    pub top_offenders: Vec<(String, usize)>,
}

impl IsolationIntegrity {
    /// No subsystem fenced off and no critical violation in the window.
    pub fn is_healthy(&self) -> bool {
        self.isolated.is_empty() && self.quarantined.is_empty() && self.critical_violations == 0
    }
}
