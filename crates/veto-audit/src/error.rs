use thiserror::Error;

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Audit-layer errors.
///
/// These never influence a safety decision: call sites log and drop them
/// through [`crate::record_or_warn`].
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hash chain broken at sequence {sequence}: {reason}")]
    ChainBroken { sequence: u64, reason: String },

    #[error("backend error: {0}")]
    Backend(String),
}
