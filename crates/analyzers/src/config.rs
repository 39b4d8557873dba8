use std::time::Duration;

/// Configuration for the HTTP intent classifier.
#[derive(Debug, Clone)]
pub struct IntentClassifierConfig {
    /// OpenAI-compatible chat-completions endpoint.
    pub endpoint: String,
    /// Model name (e.g. `gpt-4o-mini`).
    pub model: String,
    /// API key for authentication.
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: f64,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
}

impl IntentClassifierConfig {
    /// Create a config with sensible defaults: 30 s timeout, temperature 0,
    /// 512 max tokens.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout_seconds: 30,
            temperature: 0.0,
            max_tokens: 512,
        }
    }

    /// Set the request timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Configuration for the external sandbox client.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Base URL of the sandbox API.
    pub api_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Detonation environment identifier.
    pub environment_id: String,
    /// Timeout for submission requests.
    pub submit_timeout: Duration,
    /// Timeout for each report poll request.
    pub poll_timeout: Duration,
}

impl SandboxConfig {
    /// Create a config with default timeouts (30 s submit, 10 s poll).
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            environment_id: "100".into(),
            submit_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for the LLM URL-reputation analyzer.
#[derive(Debug, Clone)]
pub struct UrlAnalyzerConfig {
    /// OpenAI-compatible chat-completions endpoint.
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// API key for authentication.
    pub api_key: String,
    /// Per-attempt timeout in seconds.
    pub timeout_seconds: u64,
}

impl UrlAnalyzerConfig {
    /// Create a config with a 30 s per-attempt timeout.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout_seconds: 30,
        }
    }
}
