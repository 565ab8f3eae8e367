use thiserror::Error;

/// Result type for rate limiter operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Errors from the change rate limiter.
///
/// A rejected change is not an error; it is a
/// [`ChangeValidationResult`](crate::ChangeValidationResult) with
/// `approved = false`.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("no limits configured for change kind '{kind}' on subsystem '{subsystem}'")]
    UnknownChangeKind { subsystem: String, kind: String },

    #[error("unknown or expired reservation: {0}")]
    UnknownReservation(String),

    #[error("invalid magnitude: {0}")]
    InvalidMagnitude(f64),

    #[error("tightening factor must be in (0, 1], got {0}")]
    InvalidFactor(f64),

    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    #[error("rate limiter state unavailable: {0}")]
    Backend(String),

    #[error("audit replay failed: {0}")]
    Audit(#[from] veto_audit::AuditError),
}
