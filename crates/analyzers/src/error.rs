use thiserror::Error;

/// Errors that can occur during an analyzer call.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// HTTP transport failure (connect, 5xx).
    #[error("analyzer HTTP error: {0}")]
    Http(String),

    /// The call exceeded its deadline.
    #[error("analyzer request timed out after {0}s")]
    Timeout(u64),

    /// The service answered with a 429-equivalent.
    #[error("analyzer rate limited")]
    RateLimited,

    /// The analyzer answered with a body that could not be interpreted.
    #[error("failed to parse analyzer response: {0}")]
    Parse(String),

    /// The analyzer rejected the request (4xx other than 429).
    #[error("analyzer API error: {0}")]
    Api(String),

    /// Missing or invalid configuration.
    #[error("analyzer configuration error: {0}")]
    Configuration(String),
}

impl AnalyzerError {
    /// Whether the caller should retry after backing off.
    ///
    /// Transport failures, timeouts and rate limits are transient; parse,
    /// API-rejection and configuration errors will fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::RateLimited)
    }
}
