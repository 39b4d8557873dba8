use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mailward_broker::MessageBroker;

use crate::error::PipelineError;

/// Tracks which final reports have already been acted upon.
///
/// Checked before applying provider side effects, marked only after they
/// succeed, so a failed application stays retryable. Across processes the
/// guard may miss (each process has its own view with the in-memory
/// implementation); the provider's naturally idempotent label application
/// covers that gap.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Whether this key was already processed.
    async fn is_processed(&self, key: &str) -> Result<bool, PipelineError>;

    /// Record that this key has been processed.
    async fn mark_processed(&self, key: &str) -> Result<(), PipelineError>;
}

/// Bounded in-memory guard; the default.
///
/// Backed by a size-limited cache so the set cannot grow without bound in a
/// long-lived process.
pub struct MemoryIdempotencyGuard {
    cache: moka::future::Cache<String, ()>,
}

impl MemoryIdempotencyGuard {
    /// Create a guard remembering up to `capacity` keys.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: moka::future::Cache::new(capacity),
        }
    }
}

impl Default for MemoryIdempotencyGuard {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryIdempotencyGuard {
    async fn is_processed(&self, key: &str) -> Result<bool, PipelineError> {
        Ok(self.cache.get(key).await.is_some())
    }

    async fn mark_processed(&self, key: &str) -> Result<(), PipelineError> {
        self.cache.insert(key.to_owned(), ()).await;
        Ok(())
    }
}

/// Durable guard backed by a TTL key in the broker's key-value store.
///
/// Shared across processes and replicas; entries expire after the TTL so the
/// keyspace stays bounded.
pub struct BrokerIdempotencyGuard {
    broker: Arc<dyn MessageBroker>,
    ttl: Duration,
    prefix: String,
}

impl BrokerIdempotencyGuard {
    /// Create a guard with the given entry TTL.
    pub fn new(broker: Arc<dyn MessageBroker>, ttl: Duration) -> Self {
        Self {
            broker,
            ttl,
            prefix: "processed:".into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl IdempotencyGuard for BrokerIdempotencyGuard {
    async fn is_processed(&self, key: &str) -> Result<bool, PipelineError> {
        Ok(self.broker.get(&self.key(key)).await?.is_some())
    }

    async fn mark_processed(&self, key: &str) -> Result<(), PipelineError> {
        let _ = self
            .broker
            .set_if_absent(&self.key(key), "1", self.ttl)
            .await?;
        Ok(())
    }
}
