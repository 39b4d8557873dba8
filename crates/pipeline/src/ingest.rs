use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use mailward_broker::MessageBroker;
use mailward_core::{
    ANALYSIS_STREAM, AnalysisRequest, ControlMessage, INTENT_STREAM, IntentRequest,
    JOB_CONTROL_STREAM, NewEmailEvent, StructuredEmail, evaluate_static_risk,
};
use mailward_store::{EventStore, StoreError};

use crate::error::PipelineError;

/// Attempts for each post-commit publish before giving up.
const PUBLISH_ATTEMPTS: u32 = 3;

/// Result of offering one email to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A job was created and fanned out.
    Accepted {
        job_id: Uuid,
        requires_sandbox: bool,
    },
    /// An event with the same provider message id already exists.
    Duplicate { existing_id: Option<Uuid> },
}

/// Entry point of the pipeline: dedup, risk gate, persist, fan out.
pub struct IngestProducer {
    store: Arc<dyn EventStore>,
    broker: Arc<dyn MessageBroker>,
}

impl IngestProducer {
    /// Create a producer over the given store and broker.
    pub fn new(store: Arc<dyn EventStore>, broker: Arc<dyn MessageBroker>) -> Self {
        Self { store, broker }
    }

    /// Ingest one parsed email for a user.
    ///
    /// Persists the event row first, then publishes in fixed order: control,
    /// intent-request, and (when the risk gate fired) analysis-request.
    /// Publishing control first guarantees the aggregator can observe it
    /// before any done-message for the same job; the aggregator's synthetic
    /// state covers the remaining reorderings.
    pub async fn ingest(
        &self,
        user_id: Uuid,
        email: &StructuredEmail,
    ) -> Result<IngestOutcome, PipelineError> {
        // Dedup by provider message id.
        if let Some(existing_id) = self.store.find_by_provider_id(&email.message_id).await? {
            info!(
                message_id = %email.message_id,
                %existing_id,
                "skipping duplicate message"
            );
            return Ok(IngestOutcome::Duplicate {
                existing_id: Some(existing_id),
            });
        }

        let job_id = Uuid::new_v4();
        let assessment = evaluate_static_risk(email);
        info!(
            %job_id,
            requires_sandbox = assessment.requires_sandbox,
            static_score = assessment.static_score,
            reason = %assessment.reason,
            "risk gate evaluated"
        );

        let row = NewEmailEvent::from_email(job_id, user_id, email, assessment.requires_sandbox);
        match self.store.insert(row).await {
            Ok(()) => {}
            // Lost an insert race on the unique index; same as the lookup
            // finding a row.
            Err(StoreError::DuplicateMessageId(_)) => {
                let existing_id = self.store.find_by_provider_id(&email.message_id).await?;
                return Ok(IngestOutcome::Duplicate { existing_id });
            }
            Err(e) => return Err(e.into()),
        }

        let created_at = Utc::now();
        let control = ControlMessage {
            job_id,
            requires_sandbox: assessment.requires_sandbox,
            created_at,
        };
        self.publish_with_retry(JOB_CONTROL_STREAM, control.to_fields())
            .await?;

        let intent_request = IntentRequest {
            email_id: job_id,
            subject: email.subject.clone(),
            body: email.classification_body().to_owned(),
        };
        self.publish_with_retry(INTENT_STREAM, intent_request.to_fields())
            .await?;

        if assessment.requires_sandbox {
            let analysis_request = AnalysisRequest {
                email_id: job_id,
                message_id: email.message_id.clone(),
                extracted_urls: email.extracted_urls.clone(),
                attachment_metadata: email.attachments.clone(),
            };
            self.publish_with_retry(ANALYSIS_STREAM, analysis_request.to_fields())
                .await?;
        }

        Ok(IngestOutcome::Accepted {
            job_id,
            requires_sandbox: assessment.requires_sandbox,
        })
    }

    /// Publish with a short retry. The event row is already committed, so
    /// dropping the message would orphan the job until the reaper; retrying
    /// here is the cheap path, the aggregator's synthetic state is the
    /// backstop.
    async fn publish_with_retry(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<(), PipelineError> {
        let mut last_error = None;
        for attempt in 0..PUBLISH_ATTEMPTS {
            match self.broker.append(stream, fields.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(stream, attempt, error = %e, "publish failed");
                    if attempt + 1 < PUBLISH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .map(PipelineError::from)
            .unwrap_or_else(|| PipelineError::Other("publish retry loop exhausted".into())))
    }
}
