use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use mailward_core::{EmailEvent, EmailStatus, NewEmailEvent, SandboxReport};

use crate::error::StoreError;
use crate::store::{EventStore, IntentUpdate};

/// In-memory [`EventStore`] backed by [`DashMap`]s.
///
/// A secondary index maps provider message ids to job ids so dedup lookups
/// stay O(1). Used by tests and single-process development.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    rows: DashMap<Uuid, EmailEvent>,
    by_provider_id: DashMap<String, Uuid>,
}

impl MemoryEventStore {
    /// Create a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows. Test helper.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the store holds no rows. Test helper.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: NewEmailEvent) -> Result<(), StoreError> {
        // Claim the provider id first; the entry API makes the uniqueness
        // check atomic with the claim.
        match self.by_provider_id.entry(event.message_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::DuplicateMessageId(event.message_id));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(event.id);
            }
        }

        let now = Utc::now();
        let row = EmailEvent {
            id: event.id,
            user_id: event.user_id,
            sender: event.sender,
            recipient: event.recipient,
            subject: event.subject,
            message_id: event.message_id,
            body_preview: event.body_preview,
            received_at: event.received_at,
            auth_status: event.auth_status,
            sender_ip: event.sender_ip,
            status: EmailStatus::Processing,
            risk_score: None,
            risk_tier: None,
            intent: None,
            intent_confidence: None,
            intent_indicators: None,
            intent_processed_at: None,
            sandboxed: event.sandboxed,
            sandbox_result: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(row.id, row);
        Ok(())
    }

    async fn find_by_provider_id(&self, message_id: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.by_provider_id.get(message_id).map(|entry| *entry.value()))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<EmailEvent>, StoreError> {
        Ok(self.rows.get(&id).map(|entry| entry.value().clone()))
    }

    async fn record_intent(&self, id: Uuid, update: &IntentUpdate) -> Result<bool, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        row.intent = Some(update.intent);
        row.intent_confidence = Some(update.confidence);
        row.intent_indicators = Some(update.indicators.clone());
        row.intent_processed_at = Some(update.processed_at);
        row.risk_score = Some(update.risk_score);
        row.risk_tier = Some(update.risk_tier);
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_sandbox(&self, id: Uuid, report: &SandboxReport) -> Result<bool, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        row.sandbox_result = Some(
            serde_json::to_value(report).map_err(|e| StoreError::Serialization(e.to_string()))?,
        );
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_status(&self, id: Uuid, status: EmailStatus) -> Result<bool, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        row.status = status;
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(None);
        };
        row.status = EmailStatus::Completed;
        row.updated_at = Utc::now();
        Ok(Some(row.message_id.clone()))
    }
}
