use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use mailward_core::{SandboxReport, Verdict};

use crate::config::SandboxConfig;
use crate::dynamic::{DynamicAnalyzer, ScanTarget};
use crate::error::AnalyzerError;

/// Provider tag carried on reports from this analyzer.
const PROVIDER: &str = "sandbox";

/// Poll schedule: 30 s, then nine 60 s waits (~10 minutes total).
const POLL_DELAYS_SECS: [u64; 10] = [30, 60, 60, 60, 60, 60, 60, 60, 60, 60];

/// External sandbox analyzer: submit a file or URL for detonation, then poll
/// for the report.
///
/// A missing report after the full poll schedule is a *timed-out report*
/// (`unknown`, score 50), not an error; only submission and transport
/// failures surface as [`AnalyzerError`].
#[derive(Debug)]
pub struct SandboxAnalyzer {
    client: reqwest::Client,
    config: SandboxConfig,
}

impl SandboxAnalyzer {
    /// Create a new sandbox analyzer with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self, AnalyzerError> {
        if config.api_key.is_empty() {
            return Err(AnalyzerError::Configuration(
                "sandbox API key is empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent("Mailward/0.1")
            .build()
            .map_err(|e| AnalyzerError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn submit(&self, target: &ScanTarget) -> Result<String, AnalyzerError> {
        let request = match target {
            ScanTarget::Attachment { filename, content } => {
                let part = reqwest::multipart::Part::bytes(content.clone())
                    .file_name(filename.clone());
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("environment_id", self.config.environment_id.clone())
                    .text("allow_community_access", "true");
                info!(filename = %filename, "submitting file to sandbox");
                self.client
                    .post(format!("{}/submit/file", self.config.api_url))
                    .multipart(form)
            }
            ScanTarget::Urls(urls) => {
                let url = urls.first().ok_or_else(|| {
                    AnalyzerError::Api("no URL available for sandbox submission".into())
                })?;
                info!(url = %mailward_core::sanitize_url(url), "submitting URL to sandbox");
                self.client
                    .post(format!("{}/submit/url", self.config.api_url))
                    .form(&[
                        ("url", url.as_str()),
                        ("environment_id", self.config.environment_id.as_str()),
                        ("allow_community_access", "true"),
                    ])
            }
        };

        let response = request
            .header("api-key", &self.config.api_key)
            .timeout(self.config.submit_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalyzerError::Timeout(self.config.submit_timeout.as_secs())
                } else {
                    AnalyzerError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AnalyzerError::RateLimited);
        }
        if status.is_server_error() {
            return Err(AnalyzerError::Http(format!("server error: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Api(format!("{status}: {body}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Parse(e.to_string()))?;
        payload["job_id"]
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| AnalyzerError::Parse(format!("no job_id in response: {payload}")))
    }

    /// Poll the report endpoint until a verdict appears or the schedule is
    /// exhausted. Returns `None` on exhaustion.
    async fn poll_report(&self, job_id: &str) -> Option<Value> {
        let url = format!("{}/report/{job_id}", self.config.api_url);

        for delay in POLL_DELAYS_SECS {
            tokio::time::sleep(Duration::from_secs(delay)).await;

            let response = match self
                .client
                .get(&url)
                .header("api-key", &self.config.api_key)
                .timeout(self.config.poll_timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(job_id, error = %e, "sandbox poll failed, continuing");
                    continue;
                }
            };

            // 404 means the report is not ready yet.
            if response.status().as_u16() == 404 {
                continue;
            }
            if !response.status().is_success() {
                warn!(job_id, status = %response.status(), "sandbox poll rejected, continuing");
                continue;
            }

            match response.json::<Value>().await {
                Ok(report) if !report["verdict"].is_null() => return Some(report),
                Ok(_) => {}
                Err(e) => warn!(job_id, error = %e, "sandbox report unreadable, continuing"),
            }
        }

        warn!(job_id, "sandbox report never arrived within the poll schedule");
        None
    }

    /// Map a raw sandbox report into the normalized verdict space.
    fn normalize(report: &Value) -> SandboxReport {
        let verdict = match report["verdict"].as_str() {
            Some("malicious") => Verdict::Malicious,
            Some("suspicious") => Verdict::Suspicious,
            Some("no_specific_threat" | "whitelisted") => Verdict::Clean,
            _ => Verdict::Unknown,
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let score = report["threat_score"].as_u64().unwrap_or(0).min(100) as u8;
        let family = report["tags"]
            .as_array()
            .and_then(|tags| tags.first())
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let confidence = report["threat_level"].as_f64().unwrap_or(0.0) / 2.0;

        SandboxReport {
            verdict,
            score,
            details: serde_json::json!({
                "family": family,
                "confidence": confidence,
                "raw_verdict": report["verdict"],
            }),
            provider: PROVIDER.into(),
            timed_out: false,
        }
    }
}

#[async_trait]
impl DynamicAnalyzer for SandboxAnalyzer {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn analyze(
        &self,
        message_id: &str,
        target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError> {
        let job_id = self.submit(target).await?;
        info!(message_id, job_id, "sandbox job submitted");

        match self.poll_report(&job_id).await {
            Some(report) => Ok(Self::normalize(&report)),
            None => Ok(SandboxReport::inconclusive(
                PROVIDER,
                "report polling deadline exceeded",
                true,
            )),
        }
    }
}
