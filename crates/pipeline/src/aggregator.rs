use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mailward_broker::{MessageBroker, StreamMessage};
use mailward_core::{
    ANALYSIS_DONE_STREAM, AnalysisDone, ControlMessage, FINAL_REPORT_STREAM, FinalReport,
    INTENT_DONE_STREAM, IntentDone, JOB_CONTROL_STREAM, JOB_STATE_PREFIX, JobState, job_state_key,
};
use mailward_store::EventStore;

use crate::consumer::StreamHandler;
use crate::error::PipelineError;

/// Joins the intent and sandbox tracks into one final report per job.
///
/// Consumes three streams under one consumer group and keeps per-job state
/// in a TTL-bounded broker hash. Completion depends only on which tracks
/// have arrived, never on payload content, so duplicate deliveries are
/// harmless: they either re-set a boolean that is already true or trigger a
/// second finalization that the action layer's idempotency absorbs.
pub struct Aggregator {
    store: Arc<dyn EventStore>,
    broker: Arc<dyn MessageBroker>,
    state_ttl: Duration,
}

impl Aggregator {
    /// Create an aggregator whose job state lives for `state_ttl`.
    pub fn new(
        store: Arc<dyn EventStore>,
        broker: Arc<dyn MessageBroker>,
        state_ttl: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            state_ttl,
        }
    }

    async fn save_state(&self, state: &JobState) -> Result<(), PipelineError> {
        // Every write refreshes the TTL.
        self.broker
            .hash_set(&job_state_key(state.job_id), state.to_fields(), self.state_ttl)
            .await?;
        Ok(())
    }

    async fn load_state(&self, job_id: uuid::Uuid) -> Result<Option<JobState>, PipelineError> {
        let Some(fields) = self.broker.hash_get(&job_state_key(job_id)).await? else {
            return Ok(None);
        };
        match JobState::from_fields(&fields) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // Undecodable state cannot make progress; drop it so the job
                // does not wedge the stream. The reaper would get it anyway.
                error!(%job_id, error = %e, "job state corrupt, deleting");
                self.broker.delete(&job_state_key(job_id)).await?;
                Ok(None)
            }
        }
    }

    /// Handle a control message: create state if absent. Receiving control
    /// twice (or after finalization already deleted the state the control
    /// belonged to) is a no-op beyond the TTL refresh.
    async fn handle_control(&self, control: &ControlMessage) -> Result<(), PipelineError> {
        info!(
            job_id = %control.job_id,
            requires_sandbox = control.requires_sandbox,
            "control message received"
        );

        if let Some(state) = self.load_state(control.job_id).await? {
            debug!(job_id = %control.job_id, "state already initialized, refreshing TTL");
            self.save_state(&state).await?;
            return Ok(());
        }

        let state = JobState::new(control.job_id, control.requires_sandbox, control.created_at);
        self.save_state(&state).await?;
        Ok(())
    }

    /// Handle an intent done-message. Out-of-order arrival synthesizes state
    /// assuming no sandbox requirement, which makes the job finalize on
    /// intent alone; a control message arriving later finds the state gone
    /// and re-creates an empty one that the reaper will collect.
    async fn handle_intent_done(&self, done: &IntentDone) -> Result<(), PipelineError> {
        info!(
            job_id = %done.job_id,
            intent = %done.intent,
            risk_score = done.risk_score,
            "intent done received"
        );

        let mut state = match self.load_state(done.job_id).await? {
            Some(state) => state,
            None => {
                warn!(
                    job_id = %done.job_id,
                    "intent done arrived before control, synthesizing state"
                );
                JobState::synthetic_for_intent(done.job_id, Utc::now())
            }
        };

        state.record_intent(done);
        self.save_state(&state).await?;

        if state.is_complete() {
            self.finalize(&state).await?;
        }
        Ok(())
    }

    /// Handle an analysis done-message. Symmetric to intent, but a
    /// synthesized state requires the sandbox track: the analyzer ran, so
    /// sandboxing was requested.
    async fn handle_analysis_done(&self, done: &AnalysisDone) -> Result<(), PipelineError> {
        info!(
            job_id = %done.job_id,
            verdict = %done.verdict,
            sandbox_score = done.sandbox_score,
            "analysis done received"
        );

        let mut state = match self.load_state(done.job_id).await? {
            Some(state) => state,
            None => {
                warn!(
                    job_id = %done.job_id,
                    "analysis done arrived before control, synthesizing state"
                );
                JobState::synthetic_for_sandbox(done.job_id, Utc::now())
            }
        };

        state.record_sandbox(done);
        self.save_state(&state).await?;

        if state.is_complete() {
            self.finalize(&state).await?;
        }
        Ok(())
    }

    /// Finalize a complete job: mark the row `COMPLETED`, publish exactly
    /// one final report, delete the state.
    async fn finalize(&self, state: &JobState) -> Result<(), PipelineError> {
        let job_id = state.job_id;
        info!(%job_id, "finalizing job");

        // The completion predicate says intent arrived; a missing or
        // unparseable payload here is a programming invariant violation.
        // Fail closed: no report, keep the state for investigation.
        let intent = match state.parsed_intent() {
            Ok(Some(intent)) => intent,
            Ok(None) | Err(_) => {
                error!(%job_id, "complete job has no usable intent payload, refusing to finalize");
                return Ok(());
            }
        };
        let sandbox = match state.parsed_sandbox() {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!(%job_id, error = %e, "sandbox payload corrupt, refusing to finalize");
                return Ok(());
            }
        };

        // Set the final status and capture the provider message id for the
        // action worker. A missing row aborts finalization but keeps the
        // state so an operator can investigate.
        let Some(message_id) = self.store.complete(job_id).await? else {
            error!(%job_id, "email event not found at finalization, keeping state");
            return Ok(());
        };

        // The sandbox section rides along only when the gate required it and
        // the payload exists; otherwise the wire carries JSON null.
        let report = FinalReport {
            job_id,
            message_id,
            intent,
            sandbox: if state.requires_sandbox { sandbox } else { None },
        };
        self.broker
            .append(FINAL_REPORT_STREAM, report.to_fields())
            .await?;

        self.broker.delete(&job_state_key(job_id)).await?;
        info!(%job_id, "finalization complete");
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for Aggregator {
    async fn handle(&self, stream: &str, message: &StreamMessage) -> Result<(), PipelineError> {
        match stream {
            JOB_CONTROL_STREAM => match ControlMessage::from_fields(&message.fields) {
                Ok(control) => self.handle_control(&control).await,
                Err(e) => {
                    error!(id = %message.id, error = %e, "dropping malformed control message");
                    Ok(())
                }
            },
            INTENT_DONE_STREAM => match IntentDone::from_fields(&message.fields) {
                Ok(done) => self.handle_intent_done(&done).await,
                Err(e) => {
                    error!(id = %message.id, error = %e, "dropping malformed intent done");
                    Ok(())
                }
            },
            ANALYSIS_DONE_STREAM => match AnalysisDone::from_fields(&message.fields) {
                Ok(done) => self.handle_analysis_done(&done).await,
                Err(e) => {
                    error!(id = %message.id, error = %e, "dropping malformed analysis done");
                    Ok(())
                }
            },
            other => {
                warn!(stream = other, "message from unexpected stream, dropping");
                Ok(())
            }
        }
    }
}

/// Periodic task deleting job state older than the TTL.
///
/// Expired jobs are logged and freed; their rows stay `PROCESSING`. Routing
/// them to a dead-letter record is a possible extension.
pub struct Reaper {
    broker: Arc<dyn MessageBroker>,
    state_ttl: Duration,
    interval: Duration,
}

impl Reaper {
    /// Create a reaper scanning every `interval` for state older than
    /// `state_ttl`.
    pub fn new(broker: Arc<dyn MessageBroker>, state_ttl: Duration, interval: Duration) -> Self {
        Self {
            broker,
            state_ttl,
            interval,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.state_ttl.as_secs(),
            "reaper starting"
        );
        let mut timer = tokio::time::interval(self.interval);
        // The first tick completes immediately; skip it so we don't scan at
        // startup.
        timer.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "reaper sweep failed");
                    }
                }
            }
        }
        info!("reaper stopped");
    }

    /// One scan over all job state keys.
    pub async fn sweep(&self) -> Result<usize, PipelineError> {
        let now = Utc::now();
        let mut reaped = 0usize;

        for key in self.broker.scan_keys(JOB_STATE_PREFIX).await? {
            let Some(fields) = self.broker.hash_get(&key).await? else {
                continue;
            };
            let state = match JobState::from_fields(&fields) {
                Ok(state) => state,
                Err(e) => {
                    error!(key = %key, error = %e, "unparseable job state, deleting");
                    self.broker.delete(&key).await?;
                    reaped += 1;
                    continue;
                }
            };

            let age = state.age_seconds(now);
            if age > i64::try_from(self.state_ttl.as_secs()).unwrap_or(i64::MAX) {
                warn!(
                    job_id = %state.job_id,
                    age_seconds = age,
                    ttl_secs = self.state_ttl.as_secs(),
                    "job state expired, reaping"
                );
                self.broker.delete(&key).await?;
                reaped += 1;
            }
        }

        if reaped > 0 {
            info!(reaped, "reaper sweep removed expired job state");
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use uuid::Uuid;

    use mailward_broker::MemoryBroker;
    use mailward_core::{AuthStatus, EmailStatus, Intent, NewEmailEvent, RiskTier, Verdict};
    use mailward_store::MemoryEventStore;

    const TTL: Duration = Duration::from_secs(600);

    fn new_event(message_id: &str, sandboxed: bool) -> NewEmailEvent {
        NewEmailEvent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            sender: "sender@example.com".into(),
            recipient: "rcpt@example.com".into(),
            subject: "subject".into(),
            message_id: message_id.into(),
            body_preview: "preview".into(),
            received_at: None,
            auth_status: AuthStatus::default(),
            sender_ip: None,
            sandboxed,
        }
    }

    fn control(job_id: Uuid, requires_sandbox: bool) -> ControlMessage {
        ControlMessage {
            job_id,
            requires_sandbox,
            created_at: Utc::now(),
        }
    }

    fn intent_done(job_id: Uuid) -> IntentDone {
        IntentDone {
            job_id,
            intent: Intent::Newsletter,
            risk_score: 28,
            risk_tier: RiskTier::Safe,
            intent_confidence: 0.9,
            intent_indicators: vec!["marketing_copy".into()],
        }
    }

    fn analysis_done(job_id: Uuid) -> AnalysisDone {
        AnalysisDone {
            job_id,
            verdict: Verdict::Malicious,
            sandbox_score: 90,
            sandbox_result: serde_json::json!({ "verdict": "malicious", "provider": "sandbox" }),
        }
    }

    async fn drain_reports(broker: &MemoryBroker) -> Vec<HashMap<String, String>> {
        broker.ensure_group(FINAL_REPORT_STREAM, "drain").await.unwrap();
        broker
            .read_group(&[FINAL_REPORT_STREAM], "drain", "c", 100, Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .flat_map(|b| b.messages)
            .map(|m| m.fields)
            .collect()
    }

    fn setup() -> (Arc<MemoryEventStore>, Arc<MemoryBroker>, Aggregator) {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let aggregator = Aggregator::new(
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::clone(&broker) as Arc<dyn MessageBroker>,
            TTL,
        );
        (store, broker, aggregator)
    }

    #[tokio::test]
    async fn intent_alone_completes_when_sandbox_not_required() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-1", false);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        aggregator.handle_control(&control(job_id, false)).await.unwrap();
        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();

        let row = store.fetch(job_id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Completed);

        let reports = drain_reports(&broker).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].get("message_id").map(String::as_str), Some("gm-1"));
        assert_eq!(reports[0].get("sandbox").map(String::as_str), Some("null"));

        // State is gone after finalization.
        assert!(broker.hash_get(&job_state_key(job_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sandboxed_job_waits_for_both_tracks() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-2", true);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        aggregator.handle_control(&control(job_id, true)).await.unwrap();
        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();

        assert!(drain_reports(&broker).await.is_empty(), "intent alone must not finalize");
        let row = store.fetch(job_id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Processing);

        aggregator.handle_analysis_done(&analysis_done(job_id)).await.unwrap();

        let reports = drain_reports(&broker).await;
        assert_eq!(reports.len(), 1);
        let sandbox = reports[0].get("sandbox").unwrap();
        assert!(sandbox.contains("malicious"), "sandbox payload rides along: {sandbox}");
    }

    #[tokio::test]
    async fn arrival_order_does_not_matter() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-3", true);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        aggregator.handle_control(&control(job_id, true)).await.unwrap();
        aggregator.handle_analysis_done(&analysis_done(job_id)).await.unwrap();
        assert!(drain_reports(&broker).await.is_empty(), "sandbox alone must not finalize");

        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();
        assert_eq!(drain_reports(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn intent_before_control_synthesizes_and_finalizes() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-4", false);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        // Done arrives first: synthetic state defaults to requiresB=false
        // and finalizes immediately.
        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();
        assert_eq!(drain_reports(&broker).await.len(), 1);

        // Control arrives later; state is gone so it creates a fresh empty
        // hash that only the reaper will touch. No second report.
        aggregator.handle_control(&control(job_id, false)).await.unwrap();
        assert!(drain_reports(&broker).await.is_empty());

        let row = store.fetch(job_id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Completed);
    }

    #[tokio::test]
    async fn analysis_before_control_waits_for_intent() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-5", true);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        aggregator.handle_analysis_done(&analysis_done(job_id)).await.unwrap();
        assert!(
            drain_reports(&broker).await.is_empty(),
            "synthetic sandbox-first state requires intent"
        );

        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();
        assert_eq!(drain_reports(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_control_is_idempotent() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-6", true);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        aggregator.handle_control(&control(job_id, true)).await.unwrap();
        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();
        // Duplicate control after intent must not reset the received flag.
        aggregator.handle_control(&control(job_id, true)).await.unwrap();

        aggregator.handle_analysis_done(&analysis_done(job_id)).await.unwrap();
        assert_eq!(drain_reports(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn missing_row_keeps_state_for_investigation() {
        let (_store, broker, aggregator) = setup();
        let job_id = Uuid::new_v4();

        aggregator.handle_control(&control(job_id, false)).await.unwrap();
        aggregator.handle_intent_done(&intent_done(job_id)).await.unwrap();

        assert!(drain_reports(&broker).await.is_empty(), "no report without a row");
        assert!(
            broker.hash_get(&job_state_key(job_id)).await.unwrap().is_some(),
            "state must survive for investigation"
        );
    }

    #[tokio::test]
    async fn routes_messages_by_stream() {
        let (store, broker, aggregator) = setup();
        let event = new_event("gm-7", false);
        let job_id = event.id;
        store.insert(event).await.unwrap();

        let control_msg = StreamMessage {
            id: "1-0".into(),
            fields: control(job_id, false).to_fields().into_iter().collect(),
        };
        let done_msg = StreamMessage {
            id: "2-0".into(),
            fields: intent_done(job_id).to_fields().into_iter().collect(),
        };

        aggregator.handle(JOB_CONTROL_STREAM, &control_msg).await.unwrap();
        aggregator.handle(INTENT_DONE_STREAM, &done_msg).await.unwrap();
        assert_eq!(drain_reports(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped() {
        let (_store, _broker, aggregator) = setup();
        let message = StreamMessage {
            id: "1-0".into(),
            fields: HashMap::from([("job_id".to_owned(), "not-a-uuid".to_owned())]),
        };
        aggregator.handle(JOB_CONTROL_STREAM, &message).await.unwrap();
        aggregator.handle(INTENT_DONE_STREAM, &message).await.unwrap();
        aggregator.handle(ANALYSIS_DONE_STREAM, &message).await.unwrap();
    }

    #[tokio::test]
    async fn reaper_deletes_only_expired_state() {
        let (_store, broker, aggregator) = setup();
        let fresh = Uuid::new_v4();
        let stale = Uuid::new_v4();

        aggregator.handle_control(&control(fresh, false)).await.unwrap();

        let old_state = JobState::new(stale, true, Utc::now() - chrono::Duration::seconds(700));
        broker
            .hash_set(&job_state_key(stale), old_state.to_fields(), TTL)
            .await
            .unwrap();

        let reaper = Reaper::new(
            Arc::clone(&broker) as Arc<dyn MessageBroker>,
            TTL,
            Duration::from_secs(60),
        );
        let reaped = reaper.sweep().await.unwrap();

        assert_eq!(reaped, 1);
        assert!(broker.hash_get(&job_state_key(stale)).await.unwrap().is_none());
        assert!(broker.hash_get(&job_state_key(fresh)).await.unwrap().is_some());
    }
}
