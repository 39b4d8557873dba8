use thiserror::Error;

/// Errors raised by broker backends.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not reach the backend (pool exhausted, connection refused).
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed the operation.
    #[error("broker backend error: {0}")]
    Backend(String),

    /// A value read from the backend could not be decoded.
    #[error("broker serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Whether a consumer loop should back off and retry the operation.
    ///
    /// Serialization failures are permanent for a given payload; connection
    /// and backend failures are assumed transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serialization(_))
    }
}
