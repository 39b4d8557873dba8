use mailward_pipeline::PipelineConfig;

/// Which dynamic analyzer the analysis worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerProvider {
    /// External sandbox (submit + poll).
    Sandbox,
    /// Single-call LLM URL-reputation analyzer.
    UrlReputation,
}

/// Endpoint + model + key for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct LlmApi {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

impl LlmApi {
    fn from_env(prefix: &str) -> Option<Self> {
        let endpoint = std::env::var(format!("{prefix}_ENDPOINT")).ok()?;
        let model = std::env::var(format!("{prefix}_MODEL")).ok()?;
        let api_key = std::env::var(format!("{prefix}_API_KEY")).ok()?;
        Some(Self {
            endpoint,
            model,
            api_key,
        })
    }
}

/// Full per-process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Health/ingest HTTP port (`PORT`).
    pub port: u16,
    /// Broker URL (`REDIS_URL`).
    pub redis_url: String,
    /// Database URL (`DATABASE_URL`).
    pub database_url: String,
    /// Shared worker tunables.
    pub pipeline: PipelineConfig,
    /// Whether to talk to the real sandbox (`USE_REAL_SANDBOX`); off selects
    /// the deterministic dev-mode simulator.
    pub use_real_sandbox: bool,
    /// Which dynamic analyzer flavor to run (`ANALYZER_PROVIDER`:
    /// `sandbox` | `url-reputation`).
    pub analyzer_provider: AnalyzerProvider,
    /// Intent classifier API (`INTENT_API_{ENDPOINT,MODEL,API_KEY}`).
    pub intent_api: Option<LlmApi>,
    /// Sandbox API (`SANDBOX_API_URL`, `SANDBOX_API_KEY`).
    pub sandbox_api_url: Option<String>,
    pub sandbox_api_key: Option<String>,
    /// URL-reputation API (`URL_ANALYZER_{ENDPOINT,MODEL,API_KEY}`).
    pub url_api: Option<LlmApi>,
    /// Mailbox provider access token (`GMAIL_ACCESS_TOKEN`).
    pub gmail_access_token: Option<String>,
}

impl ServerConfig {
    /// Load the config from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let analyzer_provider = match std::env::var("ANALYZER_PROVIDER").ok().as_deref() {
            Some("url-reputation") => AnalyzerProvider::UrlReputation,
            _ => AnalyzerProvider::Sandbox,
        };

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".into()),
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            pipeline: PipelineConfig::from_env(),
            use_real_sandbox: std::env::var("USE_REAL_SANDBOX")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            analyzer_provider,
            intent_api: LlmApi::from_env("INTENT_API"),
            sandbox_api_url: std::env::var("SANDBOX_API_URL").ok(),
            sandbox_api_key: std::env::var("SANDBOX_API_KEY").ok(),
            url_api: LlmApi::from_env("URL_ANALYZER"),
            gmail_access_token: std::env::var("GMAIL_ACCESS_TOKEN").ok(),
        }
    }

    /// Fail-fast check for roles that need the database.
    pub fn require_database(&self) -> Result<&str, String> {
        if self.database_url.is_empty() {
            Err("DATABASE_URL must be set for this role".into())
        } else {
            Ok(&self.database_url)
        }
    }
}
