use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use mailward_core::{EmailEvent, EmailStatus, Intent, NewEmailEvent, RiskTier, SandboxReport};

use crate::error::StoreError;

/// Intent-track fields written by the intent worker.
///
/// Applying this never touches the row status; status transitions belong to
/// the aggregator and the failure paths.
#[derive(Debug, Clone)]
pub struct IntentUpdate {
    pub intent: Intent,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub risk_score: u8,
    pub risk_tier: RiskTier,
    pub processed_at: DateTime<Utc>,
}

/// Trait for persisting email events.
///
/// Implementations must be `Send + Sync`. Mutators return whether the row
/// existed so workers can distinguish "nothing to do" from success.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a fresh event row in `PROCESSING` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateMessageId`] when a row with the same
    /// provider message id already exists.
    async fn insert(&self, event: NewEmailEvent) -> Result<(), StoreError>;

    /// Look up the job id for a provider message id, if any. Dedup check.
    async fn find_by_provider_id(&self, message_id: &str) -> Result<Option<Uuid>, StoreError>;

    /// Load a full event row.
    async fn fetch(&self, id: Uuid) -> Result<Option<EmailEvent>, StoreError>;

    /// Persist the intent-track results. Returns `false` when the row is
    /// missing.
    async fn record_intent(&self, id: Uuid, update: &IntentUpdate) -> Result<bool, StoreError>;

    /// Persist the sandbox report. Returns `false` when the row is missing.
    async fn record_sandbox(&self, id: Uuid, report: &SandboxReport) -> Result<bool, StoreError>;

    /// Set the row status. Returns `false` when the row is missing.
    async fn set_status(&self, id: Uuid, status: EmailStatus) -> Result<bool, StoreError>;

    /// Finalize the row: set status `COMPLETED`, bump `updated_at`, and
    /// return the provider message id. Returns `None` when the row is
    /// missing, in which case nothing was written.
    async fn complete(&self, id: Uuid) -> Result<Option<String>, StoreError>;
}
