//! Per-job aggregation state.
//!
//! One TTL-bounded hash per in-flight job, keyed `job_state:<job_id>`. The
//! aggregator creates it from the control message, updates it as done
//! messages arrive, and deletes it on finalization; the reaper deletes
//! anything older than the state TTL.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::WireError;
use crate::stream::{AnalysisDone, IntentDone};

/// Key prefix for job state hashes.
pub const JOB_STATE_PREFIX: &str = "job_state:";

/// Render the state key for a job.
#[must_use]
pub fn job_state_key(job_id: Uuid) -> String {
    format!("{JOB_STATE_PREFIX}{job_id}")
}

/// Aggregation state for one in-flight job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    pub job_id: Uuid,
    /// Whether the sandbox track must complete before finalization.
    pub requires_sandbox: bool,
    pub created_at: DateTime<Utc>,
    pub intent_received: bool,
    pub sandbox_received: bool,
    /// Serialized intent done-payload, once received.
    pub intent: Option<String>,
    /// Serialized analysis done-payload, once received.
    pub sandbox: Option<String>,
}

impl JobState {
    /// Fresh state created from a control message.
    #[must_use]
    pub fn new(job_id: Uuid, requires_sandbox: bool, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            requires_sandbox,
            created_at,
            intent_received: false,
            sandbox_received: false,
            intent: None,
            sandbox: None,
        }
    }

    /// Synthetic state for an intent-done that arrived before its control
    /// message. Defaults to not requiring the sandbox track.
    #[must_use]
    pub fn synthetic_for_intent(job_id: Uuid, now: DateTime<Utc>) -> Self {
        Self::new(job_id, false, now)
    }

    /// Synthetic state for an analysis-done that arrived before its control
    /// message. The analyzer ran, so sandboxing was required.
    #[must_use]
    pub fn synthetic_for_sandbox(job_id: Uuid, now: DateTime<Utc>) -> Self {
        Self::new(job_id, true, now)
    }

    /// Record the intent track result.
    pub fn record_intent(&mut self, payload: &IntentDone) {
        self.intent = serde_json::to_string(payload).ok();
        self.intent_received = true;
    }

    /// Record the sandbox track result.
    pub fn record_sandbox(&mut self, payload: &AnalysisDone) {
        self.sandbox = serde_json::to_string(payload).ok();
        self.sandbox_received = true;
    }

    /// Deterministic completion predicate.
    ///
    /// A job completes iff the intent track finished and, when sandboxing
    /// was required, the sandbox track finished too. Depends only on arrival
    /// booleans, never on payload content, so duplicate deliveries are safe.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.intent_received && (!self.requires_sandbox || self.sandbox_received)
    }

    /// Age of this state relative to `now`, in whole seconds.
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Encode as a flat string hash for the broker.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("job_id".into(), self.job_id.to_string()),
            (
                "requiresB".into(),
                if self.requires_sandbox { "true" } else { "false" }.into(),
            ),
            ("created_at".into(), self.created_at.to_rfc3339()),
            (
                "intent_received".into(),
                if self.intent_received { "true" } else { "false" }.into(),
            ),
            (
                "sandbox_received".into(),
                if self.sandbox_received { "true" } else { "false" }.into(),
            ),
        ];
        if let Some(ref intent) = self.intent {
            fields.push(("intent".into(), intent.clone()));
        }
        if let Some(ref sandbox) = self.sandbox {
            fields.push(("sandbox".into(), sandbox.clone()));
        }
        fields
    }

    /// Decode from a flat string hash.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, WireError> {
        let get_bool = |name: &'static str| -> Result<bool, WireError> {
            match fields.get(name).map(String::as_str) {
                Some("true") => Ok(true),
                Some("false") | None => Ok(false),
                Some(other) => Err(WireError::invalid(name, format!("expected bool, got `{other}`"))),
            }
        };

        let job_id: Uuid = fields
            .get("job_id")
            .ok_or(WireError::MissingField("job_id"))?
            .parse()
            .map_err(|e| WireError::invalid("job_id", e))?;
        let created_at: DateTime<Utc> = fields
            .get("created_at")
            .ok_or(WireError::MissingField("created_at"))?
            .parse()
            .map_err(|e| WireError::invalid("created_at", e))?;

        Ok(Self {
            job_id,
            requires_sandbox: get_bool("requiresB")?,
            created_at,
            intent_received: get_bool("intent_received")?,
            sandbox_received: get_bool("sandbox_received")?,
            intent: fields.get("intent").cloned(),
            sandbox: fields.get("sandbox").cloned(),
        })
    }

    /// Parse the stored intent done-payload.
    pub fn parsed_intent(&self) -> Result<Option<IntentDone>, WireError> {
        self.intent
            .as_deref()
            .map(|raw| serde_json::from_str(raw).map_err(|e| WireError::invalid("intent", e)))
            .transpose()
    }

    /// Parse the stored analysis done-payload.
    pub fn parsed_sandbox(&self) -> Result<Option<AnalysisDone>, WireError> {
        self.sandbox
            .as_deref()
            .map(|raw| serde_json::from_str(raw).map_err(|e| WireError::invalid("sandbox", e)))
            .transpose()
    }
}
