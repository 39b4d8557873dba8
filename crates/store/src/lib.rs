//! Persistence layer for `email_events`.
//!
//! Workers talk to [`EventStore`]; production uses the PostgreSQL backend,
//! tests the in-memory one. Each call runs in its own session, never across
//! messages.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::PostgresConfig;
pub use error::StoreError;
pub use memory::MemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{EventStore, IntentUpdate};
