//! Typed payloads for the broker streams.
//!
//! The wire format is a flat string-keyed map so any stream backend can carry
//! it natively; these types own the encoding. Field names are part of the
//! external contract and must not change.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::email::AttachmentMetadata;
use crate::error::WireError;
use crate::event::RiskTier;
use crate::intent::Intent;
use crate::verdict::Verdict;

/// Control stream: one message per job, first write after commit.
pub const JOB_CONTROL_STREAM: &str = "emails:job";
/// Intent classification requests.
pub const INTENT_STREAM: &str = "emails:intent";
/// Intent classification results.
pub const INTENT_DONE_STREAM: &str = "emails:intent:done";
/// Dynamic analysis requests.
pub const ANALYSIS_STREAM: &str = "emails:analysis";
/// Dynamic analysis results.
pub const ANALYSIS_DONE_STREAM: &str = "emails:analysis:done";
/// Unified final reports.
pub const FINAL_REPORT_STREAM: &str = "job:completed";

/// Consumer group of the intent workers.
pub const INTENT_GROUP: &str = "intent_workers";
/// Consumer group of the analysis workers.
pub const ANALYSIS_GROUP: &str = "analysis_workers";
/// Consumer group of the aggregators.
pub const AGGREGATOR_GROUP: &str = "aggregator_workers";
/// Consumer group of the action workers.
pub const ACTION_GROUP: &str = "action_workers";

type Fields = Vec<(String, String)>;

fn require<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, WireError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(WireError::MissingField(name))
}

fn require_uuid(fields: &HashMap<String, String>, name: &'static str) -> Result<Uuid, WireError> {
    require(fields, name)?
        .parse()
        .map_err(|e| WireError::invalid(name, e))
}

fn require_bool(fields: &HashMap<String, String>, name: &'static str) -> Result<bool, WireError> {
    match require(fields, name)?.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(WireError::invalid(name, format!("expected bool, got `{other}`"))),
    }
}

fn bool_str(value: bool) -> String {
    if value { "true".into() } else { "false".into() }
}

/// Control message: announces a job to the aggregator and states whether the
/// sandbox track is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub job_id: Uuid,
    pub requires_sandbox: bool,
    pub created_at: DateTime<Utc>,
}

impl ControlMessage {
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        vec![
            ("job_id".into(), self.job_id.to_string()),
            ("requiresB".into(), bool_str(self.requires_sandbox)),
            ("created_at".into(), self.created_at.to_rfc3339()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        Ok(Self {
            job_id: require_uuid(fields, "job_id")?,
            requires_sandbox: require_bool(fields, "requiresB")?,
            created_at: require(fields, "created_at")?
                .parse::<DateTime<Utc>>()
                .map_err(|e| WireError::invalid("created_at", e))?,
        })
    }
}

/// Intent classification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub email_id: Uuid,
    pub subject: String,
    pub body: String,
}

impl IntentRequest {
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        vec![
            ("email_id".into(), self.email_id.to_string()),
            ("subject".into(), self.subject.clone()),
            ("body".into(), self.body.clone()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        Ok(Self {
            email_id: require_uuid(fields, "email_id")?,
            subject: require(fields, "subject")?.to_owned(),
            body: require(fields, "body")?.to_owned(),
        })
    }
}

/// Intent classification result, published by the intent worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDone {
    pub job_id: Uuid,
    pub intent: Intent,
    pub risk_score: u8,
    pub risk_tier: RiskTier,
    pub intent_confidence: f64,
    pub intent_indicators: Vec<String>,
}

impl IntentDone {
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        vec![
            ("job_id".into(), self.job_id.to_string()),
            ("intent".into(), self.intent.as_str().to_owned()),
            ("risk_score".into(), self.risk_score.to_string()),
            ("risk_tier".into(), self.risk_tier.as_str().to_owned()),
            ("intent_confidence".into(), self.intent_confidence.to_string()),
            (
                "intent_indicators".into(),
                serde_json::to_string(&self.intent_indicators).unwrap_or_else(|_| "[]".into()),
            ),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        Ok(Self {
            job_id: require_uuid(fields, "job_id")?,
            intent: require(fields, "intent")?
                .parse()
                .map_err(|e| WireError::invalid("intent", e))?,
            risk_score: require(fields, "risk_score")?
                .parse()
                .map_err(|e| WireError::invalid("risk_score", e))?,
            risk_tier: require(fields, "risk_tier")?
                .parse()
                .map_err(|e| WireError::invalid("risk_tier", e))?,
            intent_confidence: require(fields, "intent_confidence")?
                .parse()
                .map_err(|e| WireError::invalid("intent_confidence", e))?,
            intent_indicators: serde_json::from_str(require(fields, "intent_indicators")?)
                .map_err(|e| WireError::invalid("intent_indicators", e))?,
        })
    }
}

/// Dynamic analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub email_id: Uuid,
    pub message_id: String,
    pub extracted_urls: Vec<String>,
    pub attachment_metadata: Vec<AttachmentMetadata>,
}

impl AnalysisRequest {
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        vec![
            ("email_id".into(), self.email_id.to_string()),
            ("message_id".into(), self.message_id.clone()),
            (
                "extracted_urls".into(),
                serde_json::to_string(&self.extracted_urls).unwrap_or_else(|_| "[]".into()),
            ),
            (
                "attachment_metadata".into(),
                serde_json::to_string(&self.attachment_metadata).unwrap_or_else(|_| "[]".into()),
            ),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        Ok(Self {
            email_id: require_uuid(fields, "email_id")?,
            message_id: require(fields, "message_id")?.to_owned(),
            extracted_urls: serde_json::from_str(require(fields, "extracted_urls")?)
                .map_err(|e| WireError::invalid("extracted_urls", e))?,
            attachment_metadata: serde_json::from_str(require(fields, "attachment_metadata")?)
                .map_err(|e| WireError::invalid("attachment_metadata", e))?,
        })
    }
}

/// Dynamic analysis result, published by the analysis worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDone {
    pub job_id: Uuid,
    pub verdict: Verdict,
    pub sandbox_score: u8,
    pub sandbox_result: serde_json::Value,
}

impl AnalysisDone {
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        vec![
            ("job_id".into(), self.job_id.to_string()),
            ("verdict".into(), self.verdict.as_str().to_owned()),
            ("sandbox_score".into(), self.sandbox_score.to_string()),
            (
                "sandbox_result".into(),
                self.sandbox_result.to_string(),
            ),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        Ok(Self {
            job_id: require_uuid(fields, "job_id")?,
            verdict: require(fields, "verdict")?
                .parse()
                .map_err(|e| WireError::invalid("verdict", e))?,
            sandbox_score: require(fields, "sandbox_score")?
                .parse()
                .map_err(|e| WireError::invalid("sandbox_score", e))?,
            sandbox_result: serde_json::from_str(require(fields, "sandbox_result")?)
                .map_err(|e| WireError::invalid("sandbox_result", e))?,
        })
    }
}

/// Unified final report, published by the aggregator exactly once per
/// completed job.
///
/// The `intent` and `sandbox` fields carry the done-payloads re-serialized
/// as JSON; `sandbox` is the serialized JSON `null` when the sandbox track
/// did not run.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalReport {
    pub job_id: Uuid,
    pub message_id: String,
    pub intent: IntentDone,
    pub sandbox: Option<AnalysisDone>,
}

impl FinalReport {
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        vec![
            ("job_id".into(), self.job_id.to_string()),
            ("message_id".into(), self.message_id.clone()),
            (
                "intent".into(),
                serde_json::to_string(&self.intent).unwrap_or_else(|_| "{}".into()),
            ),
            (
                "sandbox".into(),
                self.sandbox
                    .as_ref()
                    .and_then(|s| serde_json::to_string(s).ok())
                    .unwrap_or_else(|| "null".into()),
            ),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        let sandbox: Option<AnalysisDone> = serde_json::from_str(require(fields, "sandbox")?)
            .map_err(|e| WireError::invalid("sandbox", e))?;
        Ok(Self {
            job_id: require_uuid(fields, "job_id")?,
            message_id: require(fields, "message_id")?.to_owned(),
            intent: serde_json::from_str(require(fields, "intent")?)
                .map_err(|e| WireError::invalid("intent", e))?,
            sandbox,
        })
    }
}
