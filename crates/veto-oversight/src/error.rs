use thiserror::Error;

/// Result type for oversight operations.
pub type OversightResult<T> = Result<T, OversightError>;

/// Errors from the oversight manager.
///
/// Denials and timeouts are outcomes, not errors; they arrive as an
/// [`ApprovalResponse`](crate::ApprovalResponse).
#[derive(Debug, Error)]
pub enum OversightError {
    #[error("no pending approval request with id {0}")]
    UnknownRequest(String),

    #[error("approval request {0} has already been resolved")]
    AlreadyResolved(String),

    #[error("invalid approval policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("display failed: {0}")]
    Display(String),

    #[error("oversight state unavailable: {0}")]
    Backend(String),
}
