pub mod email;
pub mod error;
pub mod event;
pub mod intent;
pub mod job;
pub mod risk;
pub mod stream;
pub mod verdict;

pub use email::{AttachmentMetadata, AuthResult, AuthStatus, StructuredEmail};
pub use error::WireError;
pub use event::{EmailEvent, EmailStatus, NewEmailEvent, RiskTier};
pub use intent::{Intent, IntentAnalysis, blended_risk_score};
pub use job::{JOB_STATE_PREFIX, JobState, job_state_key};
pub use risk::{RiskAssessment, evaluate_static_risk, is_risky_attachment};
pub use stream::{
    ACTION_GROUP, AGGREGATOR_GROUP, ANALYSIS_DONE_STREAM, ANALYSIS_GROUP, ANALYSIS_STREAM,
    AnalysisDone, AnalysisRequest, ControlMessage, FINAL_REPORT_STREAM, FinalReport, INTENT_GROUP,
    INTENT_DONE_STREAM, INTENT_STREAM, IntentDone, IntentRequest, JOB_CONTROL_STREAM,
};
pub use verdict::{SandboxReport, Verdict};

/// Sanitize a URL for logging by defanging every dot (`.` becomes `[.]`).
///
/// Prevents log viewers from turning hostile URLs into clickable links.
#[must_use]
pub fn sanitize_url(url: &str) -> String {
    url.replace('.', "[.]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_defangs_dots() {
        assert_eq!(
            sanitize_url("https://paypa1.com/login"),
            "https://paypa1[.]com/login"
        );
        assert_eq!(sanitize_url("no-dots"), "no-dots");
    }
}
