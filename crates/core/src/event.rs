use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::email::{AuthStatus, StructuredEmail};
use crate::intent::Intent;

/// Processing status of an email event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    /// Persisted but not yet handed to the pipeline (seed/backfill tooling).
    Pending,
    /// In flight through the pipeline.
    Processing,
    /// Both analysis tracks finished and the verdict was finalized.
    Completed,
    /// A worker hit a fatal per-job failure.
    Failed,
    /// The provider already classified the message as spam.
    Spam,
}

impl EmailStatus {
    /// Canonical uppercase string form (matches the database enum labels).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Spam => "SPAM",
        }
    }
}

/// Coarse public risk classification derived from the numeric risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Safe,
    Cautious,
    Threat,
}

impl RiskTier {
    /// Classify a risk score: SAFE below 30, CAUTIOUS below 80, THREAT above.
    #[must_use]
    pub fn for_score(score: u8) -> Self {
        if score < 30 {
            Self::Safe
        } else if score < 80 {
            Self::Cautious
        } else {
            Self::Threat
        }
    }

    /// Canonical uppercase string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Cautious => "CAUTIOUS",
            Self::Threat => "THREAT",
        }
    }
}

impl std::str::FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAFE" => Ok(Self::Safe),
            "CAUTIOUS" => Ok(Self::Cautious),
            "THREAT" => Ok(Self::Threat),
            other => Err(format!("unknown risk tier `{other}`")),
        }
    }
}

/// A fully materialized email event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEvent {
    /// Job identifier; primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,

    // Envelope
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Provider-assigned message id; uniquely indexed for dedup.
    pub message_id: String,
    pub body_preview: String,
    pub received_at: Option<DateTime<Utc>>,

    // Sender authentication
    pub auth_status: AuthStatus,
    pub sender_ip: Option<String>,

    // Processing
    pub status: EmailStatus,
    pub risk_score: Option<u8>,
    pub risk_tier: Option<RiskTier>,

    // Intent classification
    pub intent: Option<Intent>,
    pub intent_confidence: Option<f64>,
    pub intent_indicators: Option<Vec<String>>,
    pub intent_processed_at: Option<DateTime<Utc>>,

    // Dynamic analysis
    pub sandboxed: bool,
    pub sandbox_result: Option<serde_json::Value>,

    // Timestamps, server-maintained on write.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to insert a fresh email event.
///
/// The row is created in `PROCESSING` with all analysis fields unset; the
/// workers fill them in as the tracks complete.
#[derive(Debug, Clone)]
pub struct NewEmailEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub message_id: String,
    pub body_preview: String,
    pub received_at: Option<DateTime<Utc>>,
    pub auth_status: AuthStatus,
    pub sender_ip: Option<String>,
    /// Whether the static risk gate requested sandboxing.
    pub sandboxed: bool,
}

impl NewEmailEvent {
    /// Build an insertable row from a parsed email, a fresh job id, and the
    /// risk-gate decision.
    #[must_use]
    pub fn from_email(id: Uuid, user_id: Uuid, email: &StructuredEmail, sandboxed: bool) -> Self {
        Self {
            id,
            user_id,
            sender: email.sender.clone(),
            recipient: email.recipient.clone(),
            subject: email.subject.clone(),
            message_id: email.message_id.clone(),
            body_preview: email.body_preview.clone(),
            received_at: email.received_at,
            auth_status: email.auth_status,
            sender_ip: email.sender_ip.clone(),
            sandboxed,
        }
    }
}
