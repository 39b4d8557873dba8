use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use mailward_analyzers::{AnalyzerError, DynamicAnalyzer, ScanTarget};
use mailward_broker::{MessageBroker, StreamMessage};
use mailward_core::{
    ANALYSIS_DONE_STREAM, AnalysisDone, AnalysisRequest, SandboxReport, is_risky_attachment,
};
use mailward_provider::MailboxProvider;
use mailward_store::EventStore;

use crate::consumer::StreamHandler;
use crate::error::PipelineError;

/// URL cap for the fallback analysis target.
const URL_FALLBACK_LIMIT: usize = 10;

/// Consumer-group processor for the analysis stream.
///
/// Runs the dynamic analyzer over whatever the request offers: preferably a
/// fetched risky attachment, otherwise the first few URLs. Analyzer failure
/// never stalls the pipeline; the worker publishes a conservative report
/// instead.
pub struct AnalysisWorker {
    store: Arc<dyn EventStore>,
    broker: Arc<dyn MessageBroker>,
    analyzer: Arc<dyn DynamicAnalyzer>,
    mailbox: Arc<dyn MailboxProvider>,
}

impl AnalysisWorker {
    /// Create an analysis worker. Pass the analyzer already wrapped in a
    /// [`ThrottledAnalyzer`](mailward_analyzers::ThrottledAnalyzer) so
    /// external concurrency limits hold.
    pub fn new(
        store: Arc<dyn EventStore>,
        broker: Arc<dyn MessageBroker>,
        analyzer: Arc<dyn DynamicAnalyzer>,
        mailbox: Arc<dyn MailboxProvider>,
    ) -> Self {
        Self {
            store,
            broker,
            analyzer,
            mailbox,
        }
    }

    /// Pick what to analyze: the first fetchable risky attachment when the
    /// provider serves content, else the leading URLs.
    async fn select_target(&self, request: &AnalysisRequest) -> Option<ScanTarget> {
        if self.mailbox.supports_content_fetch() {
            for att in &request.attachment_metadata {
                if !is_risky_attachment(att) {
                    continue;
                }
                let Some(attachment_id) = att.attachment_id.as_deref() else {
                    continue;
                };
                match self
                    .mailbox
                    .fetch_attachment(&request.message_id, attachment_id)
                    .await
                {
                    Ok(content) => {
                        return Some(ScanTarget::Attachment {
                            filename: att.filename.clone(),
                            content,
                        });
                    }
                    Err(e) => {
                        warn!(
                            message_id = %request.message_id,
                            filename = %att.filename,
                            error = %e,
                            "failed to fetch risky attachment, falling back"
                        );
                    }
                }
            }
        }

        if request.extracted_urls.is_empty() {
            None
        } else {
            Some(ScanTarget::Urls(
                request
                    .extracted_urls
                    .iter()
                    .take(URL_FALLBACK_LIMIT)
                    .cloned()
                    .collect(),
            ))
        }
    }

    async fn run_analyzer(&self, message_id: &str, target: &ScanTarget) -> SandboxReport {
        match self.analyzer.analyze(message_id, target).await {
            Ok(report) => report,
            Err(e) => {
                // Fail conservative: the verdict becomes unknown (promoted
                // to suspicious at action time) rather than blocking the job.
                error!(message_id, error = %e, "dynamic analyzer failed, emitting conservative report");
                let timed_out = matches!(e, AnalyzerError::Timeout(_));
                SandboxReport::inconclusive(self.analyzer.provider(), e.to_string(), timed_out)
            }
        }
    }
}

#[async_trait]
impl StreamHandler for AnalysisWorker {
    async fn handle(&self, _stream: &str, message: &StreamMessage) -> Result<(), PipelineError> {
        let request = match AnalysisRequest::from_fields(&message.fields) {
            Ok(request) => request,
            Err(e) => {
                error!(id = %message.id, error = %e, "dropping malformed analysis request");
                return Ok(());
            }
        };
        let job_id = request.email_id;

        let report = match self.select_target(&request).await {
            Some(target) => {
                info!(%job_id, target = %target.describe(), "running dynamic analysis");
                self.run_analyzer(&request.message_id, &target).await
            }
            None => {
                info!(%job_id, "nothing scannable, emitting clean report");
                SandboxReport::no_scannable_content(self.analyzer.provider())
            }
        };

        let updated = self.store.record_sandbox(job_id, &report).await?;
        if !updated {
            warn!(%job_id, "analysis result for unknown email event, dropping");
            return Ok(());
        }

        let done = AnalysisDone {
            job_id,
            verdict: report.verdict,
            sandbox_score: report.score,
            sandbox_result: serde_json::to_value(&report)
                .unwrap_or_else(|_| serde_json::json!({})),
        };
        self.broker
            .append(ANALYSIS_DONE_STREAM, done.to_fields())
            .await?;

        info!(
            %job_id,
            verdict = %report.verdict,
            score = report.score,
            provider = %report.provider,
            timed_out = report.timed_out,
            "dynamic analysis published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use uuid::Uuid;

    use mailward_analyzers::{FailingDynamicAnalyzer, MockDynamicAnalyzer, SimulatedSandbox};
    use mailward_broker::MemoryBroker;
    use mailward_core::{AttachmentMetadata, AuthStatus, NewEmailEvent};
    use mailward_provider::MockMailbox;
    use mailward_store::MemoryEventStore;

    fn new_event(message_id: &str) -> NewEmailEvent {
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
            sandboxed: true,
        }
    }

    fn request(job_id: Uuid, message_id: &str, urls: Vec<&str>, attachments: Vec<AttachmentMetadata>) -> StreamMessage {
        let request = AnalysisRequest {
            email_id: job_id,
            message_id: message_id.into(),
            extracted_urls: urls.into_iter().map(String::from).collect(),
            attachment_metadata: attachments,
        };
        StreamMessage {
            id: "1-0".into(),
            fields: request.to_fields().into_iter().collect(),
        }
    }

    fn exe_attachment(attachment_id: Option<&str>) -> AttachmentMetadata {
        AttachmentMetadata {
            filename: "invoice.exe".into(),
            mime_type: "application/octet-stream".into(),
            size: 4096,
            attachment_id: attachment_id.map(String::from),
        }
    }

    async fn drain_done(broker: &MemoryBroker) -> Vec<HashMap<String, String>> {
        broker.ensure_group(ANALYSIS_DONE_STREAM, "drain").await.unwrap();
        broker
            .read_group(&[ANALYSIS_DONE_STREAM], "drain", "c", 100, Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .flat_map(|b| b.messages)
            .map(|m| m.fields)
            .collect()
    }

    fn worker(
        store: &Arc<MemoryEventStore>,
        broker: &Arc<MemoryBroker>,
        analyzer: Arc<dyn DynamicAnalyzer>,
        mailbox: Arc<MockMailbox>,
    ) -> AnalysisWorker {
        AnalysisWorker::new(
            Arc::clone(store) as Arc<dyn EventStore>,
            Arc::clone(broker) as Arc<dyn MessageBroker>,
            analyzer,
            mailbox as Arc<dyn MailboxProvider>,
        )
    }

    #[tokio::test]
    async fn prefers_fetched_attachment_over_urls() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let event = new_event("gm-1");
        let job_id = event.id;
        store.insert(event).await.unwrap();

        let mailbox = Arc::new(MockMailbox::new());
        mailbox.add_attachment("gm-1", "att-1", b"MZ".to_vec());

        let w = worker(&store, &broker, Arc::new(SimulatedSandbox), mailbox);
        w.handle(
            mailward_core::ANALYSIS_STREAM,
            &request(job_id, "gm-1", vec!["https://example.com"], vec![exe_attachment(Some("att-1"))]),
        )
        .await
        .unwrap();

        // SimulatedSandbox flags "invoice" in the filename.
        let done = drain_done(&broker).await;
        assert_eq!(done[0].get("verdict").map(String::as_str), Some("malicious"));
        assert_eq!(done[0].get("sandbox_score").map(String::as_str), Some("90"));

        let row = store.fetch(job_id).await.unwrap().unwrap();
        let stored = row.sandbox_result.unwrap();
        assert_eq!(stored["provider"], "mock-sandbox");
    }

    #[tokio::test]
    async fn falls_back_to_urls_when_fetch_unavailable() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let event = new_event("gm-2");
        let job_id = event.id;
        store.insert(event).await.unwrap();

        let mailbox = Arc::new(MockMailbox::new().without_content_fetch());
        let w = worker(&store, &broker, Arc::new(SimulatedSandbox), mailbox);
        w.handle(
            mailward_core::ANALYSIS_STREAM,
            &request(job_id, "gm-2", vec!["https://example.com"], vec![exe_attachment(Some("att-1"))]),
        )
        .await
        .unwrap();

        let done = drain_done(&broker).await;
        assert_eq!(done[0].get("verdict").map(String::as_str), Some("clean"));
    }

    #[tokio::test]
    async fn no_scannable_content_emits_clean_zero() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let event = new_event("gm-3");
        let job_id = event.id;
        store.insert(event).await.unwrap();

        let w = worker(
            &store,
            &broker,
            Arc::new(SimulatedSandbox),
            Arc::new(MockMailbox::new()),
        );
        w.handle(
            mailward_core::ANALYSIS_STREAM,
            &request(job_id, "gm-3", vec![], vec![]),
        )
        .await
        .unwrap();

        let done = drain_done(&broker).await;
        assert_eq!(done[0].get("verdict").map(String::as_str), Some("clean"));
        assert_eq!(done[0].get("sandbox_score").map(String::as_str), Some("0"));

        let row = store.fetch(job_id).await.unwrap().unwrap();
        let stored = row.sandbox_result.unwrap();
        assert_eq!(stored["details"]["reason"], "No scannable content");
    }

    #[tokio::test]
    async fn analyzer_failure_emits_conservative_report() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let event = new_event("gm-4");
        let job_id = event.id;
        store.insert(event).await.unwrap();

        let w = worker(
            &store,
            &broker,
            Arc::new(FailingDynamicAnalyzer),
            Arc::new(MockMailbox::new()),
        );
        w.handle(
            mailward_core::ANALYSIS_STREAM,
            &request(job_id, "gm-4", vec!["https://example.com"], vec![]),
        )
        .await
        .unwrap();

        let done = drain_done(&broker).await;
        assert_eq!(done[0].get("verdict").map(String::as_str), Some("unknown"));
        assert_eq!(done[0].get("sandbox_score").map(String::as_str), Some("50"));
    }

    #[tokio::test]
    async fn timed_out_report_passes_through() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let event = new_event("gm-5");
        let job_id = event.id;
        store.insert(event).await.unwrap();

        let w = worker(
            &store,
            &broker,
            Arc::new(MockDynamicAnalyzer::returning(SandboxReport::inconclusive(
                "sandbox",
                "report polling deadline exceeded",
                true,
            ))),
            Arc::new(MockMailbox::new()),
        );
        w.handle(
            mailward_core::ANALYSIS_STREAM,
            &request(job_id, "gm-5", vec!["https://example.com"], vec![]),
        )
        .await
        .unwrap();

        let row = store.fetch(job_id).await.unwrap().unwrap();
        let stored = row.sandbox_result.unwrap();
        assert_eq!(stored["timed_out"], true);
        assert_eq!(stored["verdict"], "unknown");
    }

    #[tokio::test]
    async fn unknown_job_is_dropped() {
        let store = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let w = worker(
            &store,
            &broker,
            Arc::new(SimulatedSandbox),
            Arc::new(MockMailbox::new()),
        );
        w.handle(
            mailward_core::ANALYSIS_STREAM,
            &request(Uuid::new_v4(), "gm-6", vec!["https://example.com"], vec![]),
        )
        .await
        .unwrap();
        assert!(drain_done(&broker).await.is_empty());
    }
}
