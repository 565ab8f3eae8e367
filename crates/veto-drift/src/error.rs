use thiserror::Error;

/// Result type for drift monitor construction.
pub type DriftResult<T> = Result<T, DriftError>;

/// Errors from the drift monitor. Analysis itself is infallible; only
/// configuration can fail.
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("invalid {list} pattern '{pattern}': {source}")]
    InvalidPattern {
        list: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid drift configuration: {0}")]
    InvalidConfig(String),
}
