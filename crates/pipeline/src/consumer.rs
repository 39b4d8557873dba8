use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mailward_broker::{MessageBroker, StreamMessage};

use crate::error::PipelineError;

/// Cap on the error backoff applied by the consumer loop.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What one consumer loop reads and under which identity.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Streams this consumer reads, joined under one group.
    pub streams: Vec<String>,
    /// Consumer group name.
    pub group: String,
    /// Unique consumer name within the group.
    pub consumer: String,
    /// Entries requested per read.
    pub read_count: usize,
    /// Blocking-read bound.
    pub read_block: Duration,
}

impl ConsumerConfig {
    /// Build a config with a freshly generated consumer name
    /// (`<role>-<uuid>`).
    pub fn new(streams: Vec<String>, group: impl Into<String>, role: &str) -> Self {
        Self {
            streams,
            group: group.into(),
            consumer: format!("{role}-{}", uuid::Uuid::new_v4()),
            read_count: 10,
            read_block: Duration::from_secs(5),
        }
    }

    /// Override read sizing (tests use small blocks).
    #[must_use]
    pub fn with_read(mut self, count: usize, block: Duration) -> Self {
        self.read_count = count;
        self.read_block = block;
        self
    }
}

/// Per-message processing logic of one worker.
///
/// Returning `Ok` acknowledges the message; returning `Err` leaves it
/// pending so the broker redelivers it. Handlers must treat poison payloads
/// (undecodable fields) as `Ok` after logging, or the message will wedge the
/// group.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: &str, message: &StreamMessage) -> Result<(), PipelineError>;
}

/// Run a consumer loop until `shutdown` flips to `true`.
///
/// Ensures the consumer groups exist, resumes this consumer's own pending
/// entries, then reads new entries with a bounded block. Transport errors
/// back off exponentially (capped at 30 s); a deleted consumer group is
/// recreated in place.
pub async fn run_consumer(
    broker: Arc<dyn MessageBroker>,
    config: ConsumerConfig,
    handler: Arc<dyn StreamHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        consumer = %config.consumer,
        group = %config.group,
        streams = ?config.streams,
        "consumer starting"
    );

    if let Err(e) = ensure_groups(broker.as_ref(), &config).await {
        error!(error = %e, "failed to create consumer groups at startup");
    }

    // Resume work that was delivered to this consumer name but never acked.
    // Fresh names see nothing here; it matters when a consumer identity is
    // pinned across restarts.
    for stream in &config.streams {
        match broker
            .read_own_pending(stream, &config.group, &config.consumer, config.read_count)
            .await
        {
            Ok(pending) if !pending.is_empty() => {
                debug!(stream, count = pending.len(), "resuming pending entries");
                for message in pending {
                    dispatch(broker.as_ref(), &config, handler.as_ref(), stream, &message).await;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(stream, error = %e, "failed to read pending entries"),
        }
    }

    let mut consecutive_errors: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let streams: Vec<&str> = config.streams.iter().map(String::as_str).collect();
        let read = tokio::select! {
            () = wait_for_shutdown(&mut shutdown) => break,
            read = broker.read_group(
                &streams,
                &config.group,
                &config.consumer,
                config.read_count,
                config.read_block,
            ) => read,
        };

        match read {
            Ok(batches) => {
                consecutive_errors = 0;
                for batch in batches {
                    for message in batch.messages {
                        dispatch(
                            broker.as_ref(),
                            &config,
                            handler.as_ref(),
                            &batch.stream,
                            &message,
                        )
                        .await;
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if e.to_string().contains("NOGROUP") {
                    warn!(error = %e, "consumer group missing, recreating");
                    if let Err(create_err) = ensure_groups(broker.as_ref(), &config).await {
                        error!(error = %create_err, "failed to recreate consumer groups");
                    }
                } else {
                    let backoff = Duration::from_secs(
                        2u64.saturating_pow(consecutive_errors.min(5)),
                    )
                    .min(MAX_BACKOFF);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        "broker read failed, backing off"
                    );
                    tokio::select! {
                        () = wait_for_shutdown(&mut shutdown) => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    info!(consumer = %config.consumer, "consumer stopped");
}

async fn ensure_groups(
    broker: &dyn MessageBroker,
    config: &ConsumerConfig,
) -> Result<(), PipelineError> {
    for stream in &config.streams {
        broker.ensure_group(stream, &config.group).await?;
    }
    Ok(())
}

async fn dispatch(
    broker: &dyn MessageBroker,
    config: &ConsumerConfig,
    handler: &dyn StreamHandler,
    stream: &str,
    message: &StreamMessage,
) {
    match handler.handle(stream, message).await {
        Ok(()) => {
            if let Err(e) = broker.ack(stream, &config.group, &message.id).await {
                error!(stream, id = %message.id, error = %e, "failed to ack message");
            }
        }
        Err(e) => {
            // No ack: the broker will redeliver this entry.
            warn!(stream, id = %message.id, error = %e, "handler failed, leaving message pending");
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender dropped; treat as shutdown.
            return;
        }
    }
}
