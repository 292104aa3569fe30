use thiserror::Error;

/// Errors that can occur inside the admission pipeline.
///
/// These never escape the public entry points: store failures degrade to
/// local-only operation and the only outcome the caller sees is the
/// decision itself.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// An error occurred in the counter store.
    #[error("counter store error: {0}")]
    Store(#[from] tollbooth_state::CounterError),

    /// The limiter was misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),
}
