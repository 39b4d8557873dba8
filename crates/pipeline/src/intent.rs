use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use mailward_analyzers::IntentAnalyzer;
use mailward_broker::{MessageBroker, StreamMessage};
use mailward_core::{
    EmailStatus, INTENT_DONE_STREAM, IntentDone, IntentRequest, RiskTier, blended_risk_score,
};
use mailward_store::{EventStore, IntentUpdate};

use crate::consumer::StreamHandler;
use crate::error::PipelineError;

/// Consumer-group processor for the intent stream.
///
/// Classifies subject + body into the taxonomy, blends the base risk with
/// the classifier confidence, persists the track fields, and publishes
/// `intent-done`. Analyzer failure marks the row `FAILED` and leaves the
/// message pending so the broker redelivers it until the reaper frees the
/// job.
pub struct IntentWorker {
    store: Arc<dyn EventStore>,
    broker: Arc<dyn MessageBroker>,
    analyzer: Arc<dyn IntentAnalyzer>,
}

impl IntentWorker {
    /// Create an intent worker.
    pub fn new(
        store: Arc<dyn EventStore>,
        broker: Arc<dyn MessageBroker>,
        analyzer: Arc<dyn IntentAnalyzer>,
    ) -> Self {
        Self {
            store,
            broker,
            analyzer,
        }
    }
}

#[async_trait]
impl StreamHandler for IntentWorker {
    async fn handle(&self, _stream: &str, message: &StreamMessage) -> Result<(), PipelineError> {
        // Poison payloads are acked and dropped.
        let request = match IntentRequest::from_fields(&message.fields) {
            Ok(request) => request,
            Err(e) => {
                error!(id = %message.id, error = %e, "dropping malformed intent request");
                return Ok(());
            }
        };
        let job_id = request.email_id;

        // Nothing to do for rows that no longer exist.
        if self.store.fetch(job_id).await?.is_none() {
            warn!(%job_id, "intent request for unknown email event, dropping");
            return Ok(());
        }

        let analysis = match self.analyzer.classify(&request.subject, &request.body).await {
            Ok(analysis) => analysis,
            Err(e) => {
                error!(%job_id, error = %e, "intent analyzer failed, marking job failed");
                if let Err(store_err) = self.store.set_status(job_id, EmailStatus::Failed).await {
                    error!(%job_id, error = %store_err, "could not mark job failed");
                }
                // No intent-done, no ack: the broker redelivers until the
                // reaper cleans the job up.
                return Err(e.into());
            }
        };

        let risk_score = blended_risk_score(analysis.intent, analysis.confidence);
        let risk_tier = RiskTier::for_score(risk_score);
        let processed_at = Utc::now();

        let updated = self
            .store
            .record_intent(
                job_id,
                &IntentUpdate {
                    intent: analysis.intent,
                    confidence: analysis.confidence,
                    indicators: analysis.indicators.clone(),
                    risk_score,
                    risk_tier,
                    processed_at,
                },
            )
            .await?;
        if !updated {
            warn!(%job_id, "email event disappeared before intent update, dropping");
            return Ok(());
        }

        let done = IntentDone {
            job_id,
            intent: analysis.intent,
            risk_score,
            risk_tier,
            intent_confidence: analysis.confidence,
            intent_indicators: analysis.indicators,
        };
        self.broker
            .append(INTENT_DONE_STREAM, done.to_fields())
            .await?;

        info!(
            %job_id,
            intent = %done.intent,
            risk_score,
            risk_tier = risk_tier.as_str(),
            "intent classified"
        );
        Ok(())
    }
}
