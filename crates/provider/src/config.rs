use std::time::Duration;

/// Configuration for the Gmail REST backend.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// OAuth2 access token with the `gmail.modify` scope.
    pub access_token: String,
    /// API base URL; overridable for tests.
    pub base_url: String,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl GmailConfig {
    /// Create a config for the production API with a 10 s per-call deadline.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            base_url: "https://gmail.googleapis.com/gmail/v1".into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}
