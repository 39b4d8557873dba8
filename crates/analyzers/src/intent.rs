use async_trait::async_trait;

use mailward_core::IntentAnalysis;

use crate::error::AnalyzerError;

/// Trait for classifying an email's intent from its subject and body.
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    /// Classify the email into the intent taxonomy.
    async fn classify(&self, subject: &str, body: &str) -> Result<IntentAnalysis, AnalyzerError>;
}
