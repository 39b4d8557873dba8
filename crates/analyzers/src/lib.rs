//! Pluggable analyzer capabilities for the Mailward pipeline.
//!
//! Two capability traits: [`IntentAnalyzer`] (subject + body → taxonomy tag)
//! and [`DynamicAnalyzer`] (attachment or URLs → normalized sandbox report).
//! Concrete implementations: an OpenAI-compatible HTTP intent classifier, an
//! external-sandbox submit/poll client, an LLM URL-reputation analyzer, and
//! deterministic mocks for tests and development.

pub mod config;
pub mod dynamic;
pub mod error;
pub mod http_intent;
pub mod intent;
pub mod mock;
pub mod sandbox;
pub mod throttle;
pub mod url_reputation;

pub use config::{IntentClassifierConfig, SandboxConfig, UrlAnalyzerConfig};
pub use dynamic::{DynamicAnalyzer, ScanTarget};
pub use error::AnalyzerError;
pub use http_intent::HttpIntentClassifier;
pub use intent::IntentAnalyzer;
pub use mock::{
    FailingDynamicAnalyzer, FailingIntentClassifier, MockDynamicAnalyzer, MockIntentClassifier,
    SimulatedSandbox,
};
pub use sandbox::SandboxAnalyzer;
pub use throttle::{RetryPolicy, ThrottledAnalyzer};
pub use url_reputation::UrlReputationAnalyzer;
