use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use redis::streams::{StreamReadOptions, StreamReadReply};

use crate::broker::{MessageBroker, StreamBatch, StreamMessage};
use crate::config::RedisBrokerConfig;
use crate::error::BrokerError;

/// Redis-backed implementation of [`MessageBroker`].
///
/// Streams map onto Redis streams (XADD/XREADGROUP/XACK, groups created with
/// XGROUP CREATE MKSTREAM from id `0`), job-state hashes onto Redis hashes
/// with PEXPIRE, and the idempotency set onto `SET NX PX`.
pub struct RedisBroker {
    pool: Pool,
}

impl RedisBroker {
    /// Create a new `RedisBroker` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisBrokerConfig) -> Result<Self, BrokerError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, BrokerError> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    fn decode_fields(
        map: &HashMap<String, redis::Value>,
    ) -> Result<HashMap<String, String>, BrokerError> {
        map.iter()
            .map(|(k, v)| {
                redis::from_redis_value::<String>(v)
                    .map(|s| (k.clone(), s))
                    .map_err(|e| {
                        BrokerError::Serialization(format!("field `{k}` is not a string: {e}"))
                    })
            })
            .collect()
    }

    fn decode_reply(reply: StreamReadReply) -> Result<Vec<StreamBatch>, BrokerError> {
        let mut batches = Vec::new();
        for key in reply.keys {
            let mut messages = Vec::new();
            for entry in key.ids {
                messages.push(StreamMessage {
                    id: entry.id.clone(),
                    fields: Self::decode_fields(&entry.map)?,
                });
            }
            if !messages.is_empty() {
                batches.push(StreamBatch {
                    stream: key.key,
                    messages,
                });
            }
        }
        Ok(batches)
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let result: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(stream, group, "0")
            .await;

        match result {
            Ok(()) => Ok(()),
            // Group already exists; not an error.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BrokerError::Backend(e.to_string())),
        }
    }

    async fn append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, BrokerError> {
        let mut conn = self.conn().await?;
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let id: String = conn
            .xadd(stream, "*", &items)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
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
        let mut conn = self.conn().await?;
        let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX);
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();

        let reply: StreamReadReply = conn
            .xread_options(streams, &ids, &opts)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;

        Self::decode_reply(reply)
    }

    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, BrokerError> {
        let mut conn = self.conn().await?;
        // Reading from id 0 returns this consumer's pending entries.
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);

        let reply: StreamReadReply = conn
            .xread_options(&[stream], &["0"], &opts)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;

        Ok(Self::decode_reply(reply)?
            .into_iter()
            .flat_map(|batch| batch.messages)
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(stream, group, &[entry_id])
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        redis::pipe()
            .hset_multiple(key, &items)
            .ignore()
            .pexpire(key, ttl_ms)
            .ignore()
            .exec_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn hash_get(&self, key: &str) -> Result<Option<HashMap<String, String>>, BrokerError> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        if map.is_empty() { Ok(None) } else { Ok(Some(map)) }
    }

    async fn delete(&self, key: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<'_, String> = conn
                .scan_match(&pattern)
                .await
                .map_err(|e| BrokerError::Backend(e.to_string()))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, BrokerError> {
        let mut conn = self.conn().await?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fields_maps_bulk_strings() {
        let mut map = HashMap::new();
        map.insert(
            "job_id".to_owned(),
            redis::Value::BulkString(b"abc".to_vec()),
        );
        let decoded = RedisBroker::decode_fields(&map).unwrap();
        assert_eq!(decoded.get("job_id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn decode_fields_rejects_non_strings() {
        let mut map = HashMap::new();
        map.insert("n".to_owned(), redis::Value::Nil);
        let err = RedisBroker::decode_fields(&map).unwrap_err();
        assert!(matches!(err, BrokerError::Serialization(_)));
    }
}
