use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{MessageBroker, StreamBatch, StreamMessage};
use crate::error::BrokerError;

/// One appended stream entry.
#[derive(Debug, Clone)]
struct StreamEntry {
    seq: u64,
    id: String,
    fields: HashMap<String, String>,
}

/// Per-group delivery bookkeeping: how far the group has read, and which
/// delivered entries are still unacknowledged (keyed by sequence so pending
/// reads come back oldest first).
#[derive(Debug, Default)]
struct GroupState {
    cursor: u64,
    pending: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Clone)]
enum KvValue {
    Hash(HashMap<String, String>),
    Plain(String),
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: KvValue,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory [`MessageBroker`] for tests and single-process development.
///
/// Streams live behind a single [`Mutex`]; operations hold it only for the
/// duration of a map update, never across `.await` points. Key-value entries
/// are lazily evicted on read when their TTL has elapsed, mirroring how the
/// Redis backend behaves.
pub struct MemoryBroker {
    streams: Mutex<HashMap<String, StreamState>>,
    kv: DashMap<String, KvEntry>,
    appended: Notify,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            kv: DashMap::new(),
            appended: Notify::new(),
        }
    }
}

impl MemoryBroker {
    /// Create a new, empty in-memory broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries ever appended to a stream. Test helper.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .expect("stream mutex poisoned")
            .get(stream)
            .map_or(0, |s| s.entries.len())
    }

    /// Number of unacknowledged entries for a group. Test helper.
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .expect("stream mutex poisoned")
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    fn expiry_from_ttl(ttl: Duration) -> Option<Instant> {
        Some(Instant::now() + ttl)
    }

    /// Drain new entries for the given streams without blocking. Returns an
    /// empty vec when no stream had anything new.
    fn try_read(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamBatch>, BrokerError> {
        let mut map = self.streams.lock().expect("stream mutex poisoned");
        let mut batches = Vec::new();

        for &name in streams {
            let state = map.get_mut(name).ok_or_else(|| {
                BrokerError::Backend(format!("NOGROUP no stream `{name}`"))
            })?;
            let Some(group_state) = state.groups.get_mut(group) else {
                return Err(BrokerError::Backend(format!(
                    "NOGROUP no consumer group `{group}` for stream `{name}`"
                )));
            };

            let mut messages = Vec::new();
            for entry in &state.entries {
                if entry.seq <= group_state.cursor {
                    continue;
                }
                if messages.len() >= count {
                    break;
                }
                group_state.cursor = entry.seq;
                group_state.pending.insert(entry.seq, consumer.to_owned());
                messages.push(StreamMessage {
                    id: entry.id.clone(),
                    fields: entry.fields.clone(),
                });
            }

            if !messages.is_empty() {
                batches.push(StreamBatch {
                    stream: name.to_owned(),
                    messages,
                });
            }
        }

        Ok(batches)
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut map = self.streams.lock().expect("stream mutex poisoned");
        map.entry(stream.to_owned())
            .or_default()
            .groups
            .entry(group.to_owned())
            .or_default();
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, BrokerError> {
        let id = {
            let mut map = self.streams.lock().expect("stream mutex poisoned");
            let state = map.entry(stream.to_owned()).or_default();
            state.next_seq += 1;
            let seq = state.next_seq;
            let id = format!("{seq}-0");
            state.entries.push(StreamEntry {
                seq,
                id: id.clone(),
                fields: fields.into_iter().collect(),
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamBatch>, BrokerError> {
        let deadline = Instant::now() + block;
        loop {
            let batches = self.try_read(streams, group, consumer, count)?;
            if !batches.is_empty() {
                return Ok(batches);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Wake on append or give up at the block deadline. A missed
            // wakeup only costs one extra loop iteration for the caller.
            let _ = tokio::time::timeout_at(deadline, self.appended.notified()).await;
            if Instant::now() >= deadline {
                return Ok(self.try_read(streams, group, consumer, count)?);
            }
        }
    }

    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, BrokerError> {
        let map = self.streams.lock().expect("stream mutex poisoned");
        let Some(state) = map.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get(group) else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::new();
        for (&seq, owner) in &group_state.pending {
            if owner != consumer {
                continue;
            }
            if messages.len() >= count {
                break;
            }
            if let Some(entry) = state.entries.iter().find(|e| e.seq == seq) {
                messages.push(StreamMessage {
                    id: entry.id.clone(),
                    fields: entry.fields.clone(),
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError> {
        let Some(seq) = entry_id.split('-').next().and_then(|s| s.parse::<u64>().ok()) else {
            return Err(BrokerError::Backend(format!("malformed entry id `{entry_id}`")));
        };
        let mut map = self.streams.lock().expect("stream mutex poisoned");
        if let Some(state) = map.get_mut(stream)
            && let Some(group_state) = state.groups.get_mut(group)
        {
            group_state.pending.remove(&seq);
        }
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        let expires_at = Self::expiry_from_ttl(ttl);
        let mut entry = self.kv.entry(key.to_owned()).or_insert_with(|| KvEntry {
            value: KvValue::Hash(HashMap::new()),
            expires_at,
        });

        if entry.is_expired() {
            entry.value = KvValue::Hash(HashMap::new());
        }
        match &mut entry.value {
            KvValue::Hash(map) => map.extend(fields),
            KvValue::Plain(_) => {
                return Err(BrokerError::Backend(format!(
                    "key `{key}` holds a plain value, not a hash"
                )));
            }
        }
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn hash_get(&self, key: &str) -> Result<Option<HashMap<String, String>>, BrokerError> {
        if let Some(entry) = self.kv.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.kv.remove(key);
                return Ok(None);
            }
            return match &entry.value {
                KvValue::Hash(map) => Ok(Some(map.clone())),
                KvValue::Plain(_) => Err(BrokerError::Backend(format!(
                    "key `{key}` holds a plain value, not a hash"
                ))),
            };
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool, BrokerError> {
        match self.kv.remove(key) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, BrokerError> {
        let mut keys = Vec::new();
        for entry in &self.kv {
            if entry.key().starts_with(prefix) && !entry.value().is_expired() {
                keys.push(entry.key().clone());
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        if let Some(entry) = self.kv.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.kv.remove(key);
                return Ok(None);
            }
            return match &entry.value {
                KvValue::Plain(value) => Ok(Some(value.clone())),
                KvValue::Hash(_) => Err(BrokerError::Backend(format!(
                    "key `{key}` holds a hash, not a plain value"
                ))),
            };
        }
        Ok(None)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BrokerError> {
        self.kv.remove_if(key, |_, entry| entry.is_expired());

        let was_inserted = match self.kv.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(KvEntry {
                    value: KvValue::Plain(value.to_owned()),
                    expires_at: Self::expiry_from_ttl(ttl),
                });
                true
            }
        };
        Ok(was_inserted)
    }
}
