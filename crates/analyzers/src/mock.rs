use async_trait::async_trait;

use mailward_core::{IntentAnalysis, SandboxReport, Verdict};

use crate::dynamic::{DynamicAnalyzer, ScanTarget};
use crate::error::AnalyzerError;
use crate::intent::IntentAnalyzer;

/// A mock intent classifier that returns a configurable analysis.
#[derive(Debug, Clone)]
pub struct MockIntentClassifier {
    analysis: IntentAnalysis,
}

impl MockIntentClassifier {
    /// Create a mock returning the given analysis for every email.
    #[must_use]
    pub fn returning(analysis: IntentAnalysis) -> Self {
        Self { analysis }
    }
}

#[async_trait]
impl IntentAnalyzer for MockIntentClassifier {
    async fn classify(&self, _subject: &str, _body: &str) -> Result<IntentAnalysis, AnalyzerError> {
        Ok(self.analysis.clone())
    }
}

/// A mock intent classifier that always fails.
#[derive(Debug, Clone)]
pub struct FailingIntentClassifier {
    message: String,
}

impl FailingIntentClassifier {
    /// Create a failing classifier with the given error message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl IntentAnalyzer for FailingIntentClassifier {
    async fn classify(&self, _subject: &str, _body: &str) -> Result<IntentAnalysis, AnalyzerError> {
        Err(AnalyzerError::Api(self.message.clone()))
    }
}

/// A mock dynamic analyzer that returns a configurable report.
#[derive(Debug, Clone)]
pub struct MockDynamicAnalyzer {
    report: SandboxReport,
}

impl MockDynamicAnalyzer {
    /// Create a mock returning the given report for every target.
    #[must_use]
    pub fn returning(report: SandboxReport) -> Self {
        Self { report }
    }
}

#[async_trait]
impl DynamicAnalyzer for MockDynamicAnalyzer {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn analyze(
        &self,
        _message_id: &str,
        _target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError> {
        Ok(self.report.clone())
    }
}

/// A mock dynamic analyzer that always fails with a retryable error.
#[derive(Debug, Clone, Default)]
pub struct FailingDynamicAnalyzer;

#[async_trait]
impl DynamicAnalyzer for FailingDynamicAnalyzer {
    fn provider(&self) -> &str {
        "failing"
    }

    async fn analyze(
        &self,
        _message_id: &str,
        _target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError> {
        Err(AnalyzerError::Http("mock analyzer down".into()))
    }
}

/// Deterministic dev-mode sandbox.
///
/// Flags targets whose filename or URL contains "urgent" or "invoice" as
/// malicious; everything else is clean. Selected when `USE_REAL_SANDBOX` is
/// off so the full pipeline can run without external credentials.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSandbox;

impl SimulatedSandbox {
    fn looks_malicious(target: &ScanTarget) -> bool {
        let haystack = match target {
            ScanTarget::Attachment { filename, .. } => filename.to_ascii_lowercase(),
            ScanTarget::Urls(urls) => urls.join(" ").to_ascii_lowercase(),
        };
        haystack.contains("urgent") || haystack.contains("invoice")
    }
}

#[async_trait]
impl DynamicAnalyzer for SimulatedSandbox {
    fn provider(&self) -> &str {
        "mock-sandbox"
    }

    async fn analyze(
        &self,
        _message_id: &str,
        target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError> {
        if Self::looks_malicious(target) {
            Ok(SandboxReport {
                verdict: Verdict::Malicious,
                score: 90,
                details: serde_json::json!({ "family": "MockTrojan", "confidence": 0.99 }),
                provider: "mock-sandbox".into(),
                timed_out: false,
            })
        } else {
            Ok(SandboxReport {
                verdict: Verdict::Clean,
                score: 0,
                details: serde_json::json!({ "confidence": 1.0 }),
                provider: "mock-sandbox".into(),
                timed_out: false,
            })
        }
    }
}
