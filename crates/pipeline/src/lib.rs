//! The five stream processors of the Mailward threat-analysis pipeline.
//!
//! Ingest fans a job out onto the intent track and (risk-gated) the sandbox
//! track; the aggregator joins the two deterministically and emits exactly
//! one final report per job; the action worker turns the report into a
//! mailbox label. Correctness under at-least-once delivery rests on the
//! consumer-group semantics of the broker, the arrival-boolean completion
//! predicate, and idempotent side effects.

pub mod action;
pub mod aggregator;
pub mod analysis;
pub mod config;
pub mod consumer;
pub mod error;
pub mod idempotency;
pub mod ingest;
pub mod intent;

pub use action::ActionWorker;
pub use aggregator::{Aggregator, Reaper};
pub use analysis::AnalysisWorker;
pub use config::PipelineConfig;
pub use consumer::{ConsumerConfig, StreamHandler, run_consumer};
pub use error::PipelineError;
pub use idempotency::{BrokerIdempotencyGuard, IdempotencyGuard, MemoryIdempotencyGuard};
pub use ingest::{IngestOutcome, IngestProducer};
pub use intent::IntentWorker;
