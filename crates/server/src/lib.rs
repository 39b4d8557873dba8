//! Process wiring for the Mailward workers.
//!
//! The `mailward` binary runs one worker role per process; this library
//! holds the environment configuration and the HTTP surface (health, and
//! the ingest endpoint for the producer role) so they can be tested.

pub mod api;
pub mod config;

pub use api::{health_router, ingest_router};
pub use config::{AnalyzerProvider, LlmApi, ServerConfig};
