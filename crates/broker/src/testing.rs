//! Conformance test suite shared by broker backends.
//!
//! Call [`run_broker_conformance_tests`] from a backend's test module with a
//! fresh broker instance.

use std::time::Duration;

use crate::broker::MessageBroker;
use crate::error::BrokerError;

fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

/// Run the full broker conformance test suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_broker_conformance_tests(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    test_ensure_group_idempotent(broker).await?;
    test_append_read_ack(broker).await?;
    test_read_empty_stream(broker).await?;
    test_pending_until_acked(broker).await?;
    test_hash_set_get_delete(broker).await?;
    test_hash_merge(broker).await?;
    test_scan_prefix(broker).await?;
    test_set_if_absent(broker).await?;
    Ok(())
}

async fn test_ensure_group_idempotent(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    broker.ensure_group("conf:stream", "conf_group").await?;
    broker.ensure_group("conf:stream", "conf_group").await?;
    Ok(())
}

async fn test_append_read_ack(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    broker.ensure_group("conf:ara", "g").await?;
    let id = broker
        .append("conf:ara", fields(&[("job_id", "j-1"), ("requiresB", "false")]))
        .await?;
    assert!(!id.is_empty(), "append should return an entry id");

    let batches = broker
        .read_group(&["conf:ara"], "g", "c-1", 10, Duration::ZERO)
        .await?;
    assert_eq!(batches.len(), 1, "one stream should have entries");
    let msg = &batches[0].messages[0];
    assert_eq!(msg.id, id);
    assert_eq!(msg.fields.get("job_id").map(String::as_str), Some("j-1"));

    broker.ack("conf:ara", "g", &msg.id).await?;

    // The entry was delivered and acked; a fresh read returns nothing.
    let batches = broker
        .read_group(&["conf:ara"], "g", "c-1", 10, Duration::ZERO)
        .await?;
    assert!(batches.is_empty(), "acked entries must not be redelivered as new");
    Ok(())
}

async fn test_read_empty_stream(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    broker.ensure_group("conf:empty", "g").await?;
    let batches = broker
        .read_group(&["conf:empty"], "g", "c", 10, Duration::from_millis(10))
        .await?;
    assert!(batches.is_empty(), "empty stream should time out with no batches");
    Ok(())
}

async fn test_pending_until_acked(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    broker.ensure_group("conf:pend", "g").await?;
    broker.append("conf:pend", fields(&[("n", "1")])).await?;

    let batches = broker
        .read_group(&["conf:pend"], "g", "c", 10, Duration::ZERO)
        .await?;
    let delivered_id = batches[0].messages[0].id.clone();

    let pending = broker.read_own_pending("conf:pend", "g", "c", 10).await?;
    assert_eq!(pending.len(), 1, "unacked entry should be pending");
    assert_eq!(pending[0].id, delivered_id);

    broker.ack("conf:pend", "g", &delivered_id).await?;
    let pending = broker.read_own_pending("conf:pend", "g", "c", 10).await?;
    assert!(pending.is_empty(), "ack should clear pending");
    Ok(())
}

async fn test_hash_set_get_delete(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    let missing = broker.hash_get("conf:hash:missing").await?;
    assert!(missing.is_none(), "missing hash should read as None");

    broker
        .hash_set(
            "conf:hash:a",
            fields(&[("job_id", "j"), ("intent_received", "false")]),
            Duration::from_secs(60),
        )
        .await?;
    let map = broker.hash_get("conf:hash:a").await?.expect("hash should exist");
    assert_eq!(map.get("intent_received").map(String::as_str), Some("false"));

    assert!(broker.delete("conf:hash:a").await?);
    assert!(!broker.delete("conf:hash:a").await?, "second delete finds nothing");
    assert!(broker.hash_get("conf:hash:a").await?.is_none());
    Ok(())
}

async fn test_hash_merge(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    broker
        .hash_set("conf:hash:m", fields(&[("a", "1")]), Duration::from_secs(60))
        .await?;
    broker
        .hash_set("conf:hash:m", fields(&[("b", "2")]), Duration::from_secs(60))
        .await?;
    let map = broker.hash_get("conf:hash:m").await?.expect("hash should exist");
    assert_eq!(map.get("a").map(String::as_str), Some("1"), "fields merge");
    assert_eq!(map.get("b").map(String::as_str), Some("2"));
    broker.delete("conf:hash:m").await?;
    Ok(())
}

async fn test_scan_prefix(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    broker
        .hash_set("conf:scan:one", fields(&[("x", "1")]), Duration::from_secs(60))
        .await?;
    broker
        .hash_set("conf:scan:two", fields(&[("x", "2")]), Duration::from_secs(60))
        .await?;
    broker
        .hash_set("conf:other", fields(&[("x", "3")]), Duration::from_secs(60))
        .await?;

    let mut keys = broker.scan_keys("conf:scan:").await?;
    keys.sort();
    assert_eq!(keys, vec!["conf:scan:one", "conf:scan:two"]);

    broker.delete("conf:scan:one").await?;
    broker.delete("conf:scan:two").await?;
    broker.delete("conf:other").await?;
    Ok(())
}

async fn test_set_if_absent(broker: &dyn MessageBroker) -> Result<(), BrokerError> {
    assert!(broker.get("conf:nx").await?.is_none(), "missing key reads as None");

    let created = broker
        .set_if_absent("conf:nx", "first", Duration::from_secs(60))
        .await?;
    assert!(created, "first set_if_absent should succeed");
    assert_eq!(broker.get("conf:nx").await?.as_deref(), Some("first"));

    let created = broker
        .set_if_absent("conf:nx", "second", Duration::from_secs(60))
        .await?;
    assert!(!created, "second set_if_absent should be rejected");
    assert_eq!(
        broker.get("conf:nx").await?.as_deref(),
        Some("first"),
        "original value should remain"
    );

    broker.delete("conf:nx").await?;
    Ok(())
}
