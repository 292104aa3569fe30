use thiserror::Error;

/// Errors from counter store operations.
///
/// Callers in the admission path treat every variant as a degradation
/// signal, not a request failure: on error they fall back to the
/// process-local tier and keep serving.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no remote store configured")]
    Unavailable,
}
