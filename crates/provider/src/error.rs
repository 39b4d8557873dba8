use thiserror::Error;

/// Errors raised by mailbox provider backends.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The message or attachment does not exist on the provider.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP transport failure (connect, 5xx).
    #[error("provider HTTP error: {0}")]
    Http(String),

    /// The call exceeded its deadline.
    #[error("provider request timed out after {0}s")]
    Timeout(u64),

    /// The provider answered with a 429-equivalent.
    #[error("provider rate limited")]
    RateLimited,

    /// The provider rejected the request (4xx other than 404/409/429).
    #[error("provider API error: {0}")]
    Api(String),

    /// A response body could not be decoded.
    #[error("provider serialization error: {0}")]
    Serialization(String),

    /// Missing or invalid configuration.
    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether the caller should decline to acknowledge and let the broker
    /// redeliver.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(ProviderError::Http("502".into()).is_retryable());
        assert!(ProviderError::Timeout(10).is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(!ProviderError::NotFound("msg".into()).is_retryable());
        assert!(!ProviderError::Api("bad request".into()).is_retryable());
    }
}
