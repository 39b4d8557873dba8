use thiserror::Error;

use mailward_analyzers::AnalyzerError;
use mailward_broker::BrokerError;
use mailward_core::WireError;
use mailward_provider::ProviderError;
use mailward_store::StoreError;

/// Errors surfaced by pipeline workers.
///
/// A handler returning an error declines to acknowledge its message, so the
/// broker redelivers it. Poison payloads are therefore *not* errors at this
/// level: handlers log and swallow [`WireError`]s so the message gets acked
/// and dropped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{0}")]
    Other(String),
}
