use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;

/// A stream entry as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Broker-assigned ordered entry id, used for acknowledgement.
    pub id: String,
    /// Flat string payload.
    pub fields: HashMap<String, String>,
}

/// Entries delivered from one stream in a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBatch {
    pub stream: String,
    pub messages: Vec<StreamMessage>,
}

/// Trait for the durable message broker backing the pipeline.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Delivery is at-least-once: an entry delivered to a consumer stays pending
/// for its group until acknowledged, and unacknowledged entries are
/// re-deliverable via [`read_own_pending`](Self::read_own_pending).
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Create the stream and consumer group if either is missing.
    /// An already existing group is not an error.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    /// Append an entry to a stream. Returns the broker-assigned entry id.
    async fn append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, BrokerError>;

    /// Read up to `count` new entries per stream for this consumer,
    /// blocking up to `block` when nothing is available.
    ///
    /// Every returned entry becomes pending for `(group, consumer)` until
    /// acknowledged.
    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamBatch>, BrokerError>;

    /// Re-read this consumer's own pending (delivered but unacknowledged)
    /// entries, oldest first. Used on startup to resume interrupted work.
    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, BrokerError>;

    /// Acknowledge a pending entry for the group.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError>;

    /// Merge fields into a string hash and reset its TTL.
    async fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), BrokerError>;

    /// Read a string hash. Returns `None` when missing or expired.
    async fn hash_get(&self, key: &str) -> Result<Option<HashMap<String, String>>, BrokerError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, BrokerError>;

    /// List live keys starting with `prefix`. May be expensive; only the
    /// reaper uses it, on its own cadence.
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, BrokerError>;

    /// Read a plain string value. Returns `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Set a plain string value only if the key is absent, with a TTL.
    /// Returns `true` when the key was newly set.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BrokerError>;
}
