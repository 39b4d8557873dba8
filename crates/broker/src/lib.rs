//! Broker abstraction for the Mailward pipeline.
//!
//! The pipeline needs two things from its broker: append-only streams with
//! consumer groups and per-message acknowledgement, and TTL-bounded string
//! hashes for per-job aggregation state. One Redis instance provides both in
//! production; [`MemoryBroker`] provides both for tests and development.

pub mod broker;
pub mod config;
pub mod error;
pub mod memory;
pub mod redis;
pub mod testing;

pub use broker::{MessageBroker, StreamBatch, StreamMessage};
pub use config::RedisBrokerConfig;
pub use error::BrokerError;
pub use memory::MemoryBroker;
pub use redis::RedisBroker;
