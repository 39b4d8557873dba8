use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use mailward_core::SandboxReport;

use crate::dynamic::{DynamicAnalyzer, ScanTarget};
use crate::error::AnalyzerError;

/// How long to hold a permit after the service rate-limits us before the
/// next attempt.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Retry timing for analyzer calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Wraps a [`DynamicAnalyzer`] with bounded concurrency and retry.
///
/// A permit is held for the entire call, including retry sleeps, so the
/// external service never sees more than the permitted number of in-flight
/// analyses from this process. Rate-limit responses back off for a full
/// minute before the permit is released into another attempt.
pub struct ThrottledAnalyzer {
    inner: Arc<dyn DynamicAnalyzer>,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl ThrottledAnalyzer {
    /// Wrap `inner` with a semaphore of the given size and the default retry
    /// policy (3 attempts at 1 s / 2 s / 4 s).
    pub fn new(inner: Arc<dyn DynamicAnalyzer>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl DynamicAnalyzer for ThrottledAnalyzer {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn analyze(
        &self,
        message_id: &str,
        target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("analyzer semaphore should never be closed");

        let mut last_error = None;
        for attempt in 0..self.policy.max_attempts {
            match self.inner.analyze(message_id, target).await {
                Ok(report) => return Ok(report),
                Err(AnalyzerError::RateLimited) => {
                    warn!(
                        message_id,
                        attempt,
                        backoff_secs = RATE_LIMIT_BACKOFF.as_secs(),
                        "analyzer rate limited, backing off"
                    );
                    if attempt + 1 < self.policy.max_attempts {
                        tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                    }
                    last_error = Some(AnalyzerError::RateLimited);
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        message_id,
                        attempt,
                        error = %err,
                        delay_ms = %delay.as_millis(),
                        "retryable analyzer error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| AnalyzerError::Api("retry loop exhausted".into())))
    }
}
