use async_trait::async_trait;

use mailward_core::SandboxReport;

use crate::error::AnalyzerError;

/// What the analysis worker selected for dynamic analysis.
///
/// The worker resolves attachment content before calling the analyzer (the
/// fetch capability belongs to the mailbox provider), so analyzers only ever
/// see bytes or URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// A fetched attachment to detonate.
    Attachment { filename: String, content: Vec<u8> },
    /// URLs to assess; analyzers may cap how many they inspect.
    Urls(Vec<String>),
}

impl ScanTarget {
    /// Short description for log lines.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Attachment { filename, content } => {
                format!("attachment `{filename}` ({} bytes)", content.len())
            }
            Self::Urls(urls) => format!("{} url(s)", urls.len()),
        }
    }
}

/// Trait for dynamic content analysis.
///
/// Implementations normalize whatever their backing service returns into a
/// [`SandboxReport`]; a timed-out analysis is a *report* with
/// `timed_out = true`, not an error. Errors mean the call itself failed and
/// the caller may retry.
#[async_trait]
pub trait DynamicAnalyzer: Send + Sync {
    /// Name used as the report's `provider` field.
    fn provider(&self) -> &str;

    /// Analyze the target and return a normalized report.
    async fn analyze(
        &self,
        message_id: &str,
        target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError>;
}
