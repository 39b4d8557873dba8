use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use mailward_broker::StreamMessage;
use mailward_core::{FinalReport, Verdict};
use mailward_provider::{
    INBOX_LABEL_ID, MailboxProvider, SPAM_LABEL_ID, brand_labels, label_for_verdict,
};

use crate::consumer::StreamHandler;
use crate::error::PipelineError;
use crate::idempotency::IdempotencyGuard;

/// Consumer of final reports: applies the verdict label on the mailbox
/// provider and optionally quarantines malicious mail.
///
/// Idempotence is layered: the guard filters reports this process (or, with
/// the broker-backed guard, this deployment) already acted on, and label
/// application itself is a provider-side no-op when the label is already
/// present.
pub struct ActionWorker {
    mailbox: Arc<dyn MailboxProvider>,
    guard: Arc<dyn IdempotencyGuard>,
    semaphore: Arc<Semaphore>,
    move_malicious_to_quarantine: bool,
}

impl ActionWorker {
    /// Create an action worker with the given provider-call concurrency.
    pub fn new(
        mailbox: Arc<dyn MailboxProvider>,
        guard: Arc<dyn IdempotencyGuard>,
        label_semaphore: usize,
        move_malicious_to_quarantine: bool,
    ) -> Self {
        Self {
            mailbox,
            guard,
            semaphore: Arc::new(Semaphore::new(label_semaphore)),
            move_malicious_to_quarantine,
        }
    }

    /// Pre-create the brand labels so concurrent first applications don't
    /// race label creation. Failures are soft: labels are also ensured
    /// per-application.
    pub async fn ensure_brand_labels(&self) {
        for spec in brand_labels() {
            match self.mailbox.ensure_label(spec.name).await {
                Ok(_) => {}
                Err(e) => warn!(label = spec.name, error = %e, "could not pre-create label"),
            }
        }
    }

    /// Derive the actionable verdict from a final report.
    ///
    /// No sandbox section means the risk gate never asked for analysis:
    /// clean. An `unknown` analyzer verdict promotes to `suspicious` so the
    /// pipeline fails conservative.
    fn derive_verdict(report: &FinalReport) -> Verdict {
        report
            .sandbox
            .as_ref()
            .map_or(Verdict::Clean, |sandbox| sandbox.verdict.promoted())
    }

    async fn apply(&self, report: &FinalReport, verdict: Verdict) -> Result<(), PipelineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("label semaphore should never be closed");

        let label_name = label_for_verdict(verdict);
        let label_id = self.mailbox.ensure_label(label_name).await?;

        let mut add = vec![label_id];
        let mut remove = Vec::new();
        let quarantine = self.move_malicious_to_quarantine && verdict == Verdict::Malicious;
        if quarantine {
            add.push(SPAM_LABEL_ID.to_owned());
            remove.push(INBOX_LABEL_ID.to_owned());
        }

        self.mailbox
            .modify_message(&report.message_id, &add, &remove)
            .await?;

        info!(
            job_id = %report.job_id,
            message_id = %report.message_id,
            verdict = %verdict,
            label = label_name,
            quarantined = quarantine,
            "action applied"
        );
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for ActionWorker {
    async fn handle(&self, _stream: &str, message: &StreamMessage) -> Result<(), PipelineError> {
        let report = match FinalReport::from_fields(&message.fields) {
            Ok(report) => report,
            Err(e) => {
                error!(id = %message.id, error = %e, "dropping malformed final report");
                return Ok(());
            }
        };

        let key = report.job_id.to_string();
        if self.guard.is_processed(&key).await? {
            info!(job_id = %report.job_id, "final report already processed, skipping");
            return Ok(());
        }

        let verdict = Self::derive_verdict(&report);
        // Apply before marking: a failed application must stay retryable,
        // and re-applying a label is harmless.
        self.apply(&report, verdict).await?;
        self.guard.mark_processed(&key).await?;
        Ok(())
    }
}
