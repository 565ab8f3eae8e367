use thiserror::Error;

use crate::policy::SystemStatus;

/// Result type for isolation registry operations.
pub type IsolationResult<T> = Result<T, IsolationError>;

/// Errors from the isolation registry.
///
/// Denials are not errors: they come back as an
/// [`IsolationDecision`](crate::IsolationDecision) with `allowed = false`.
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    #[error("invalid status transition for {subsystem}: {to} is only reachable through {via}")]
    InvalidTransition {
        subsystem: String,
        to: SystemStatus,
        via: &'static str,
    },

    #[error("duplicate policy for subsystem: {0}")]
    DuplicatePolicy(String),

    #[error("invalid isolation configuration: {0}")]
    InvalidConfig(String),

    #[error("registry state unavailable: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = IsolationError::InvalidTransition {
            subsystem: "memory".into(),
            to: SystemStatus::Active,
            via: "restore",
        };
        assert!(err.to_string().contains("restore"));
        assert!(IsolationError::UnknownSubsystem("x".into())
            .to_string()
            .contains("unknown"));
    }
}
