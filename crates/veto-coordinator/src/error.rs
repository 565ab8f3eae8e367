use thiserror::Error;
use veto_types::Severity;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Failures of the coordinator or one of the components it owns.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Isolation(#[from] veto_isolation::IsolationError),

    #[error(transparent)]
    RateLimit(#[from] veto_rate_limit::RateLimitError),

    #[error(transparent)]
    Drift(#[from] veto_drift::DriftError),

    #[error(transparent)]
    Oversight(#[from] veto_oversight::OversightError),

    #[error(transparent)]
    Audit(#[from] veto_audit::AuditError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no open incident with id {0}")]
    UnknownIncident(String),

    #[error("restore not authorized: {0}")]
    RestoreNotAuthorized(String),

    #[error("emergency shutdown in effect; restore through restore_from_emergency")]
    EmergencyShutdownActive,

    #[error("mutation was not approved: {0}")]
    NotApproved(String),

    #[error("coordinator state unavailable: {0}")]
    Backend(String),
}

impl From<config::ConfigError> for CoordinatorError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Caller-facing taxonomy of a refused mutation.
///
/// Produced by [`MutationDecision::into_result`](crate::MutationDecision::into_result)
/// for callers that prefer `?` over inspecting the decision record.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SafetyError {
    #[error("policy violation ({severity}): {reason}")]
    PolicyViolation { reason: String, severity: Severity },

    #[error("rate limit exceeded: {reason}")]
    RateLimitExceeded {
        reason: String,
        adjusted_magnitude: Option<f64>,
        cooldown_remaining: Option<u64>,
    },

    #[error("approval denied: {reason}")]
    ApprovalDenied { reason: String },

    #[error("approval request {request_id} timed out")]
    ApprovalTimeout { request_id: String },

    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    #[error("unknown change kind '{kind}' for subsystem '{subsystem}'")]
    UnknownChangeKind { subsystem: String, kind: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl SafetyError {
    /// UNKNOWN_* and internal failures are always critical.
    pub fn severity(&self) -> Severity {
        match self {
            Self::PolicyViolation { severity, .. } => *severity,
            Self::UnknownSubsystem(_) | Self::UnknownChangeKind { .. } | Self::Internal(_) => {
                Severity::Critical
            }
            Self::RateLimitExceeded { .. } | Self::ApprovalTimeout { .. } => Severity::Medium,
            Self::ApprovalDenied { .. } | Self::Storage(_) => Severity::Low,
        }
    }
}
