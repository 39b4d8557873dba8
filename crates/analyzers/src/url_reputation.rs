use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use mailward_core::{SandboxReport, Verdict, sanitize_url};

use crate::config::UrlAnalyzerConfig;
use crate::dynamic::{DynamicAnalyzer, ScanTarget};
use crate::error::AnalyzerError;

/// Provider tag carried on reports from this analyzer.
const PROVIDER: &str = "url-reputation";

/// At most this many URLs go into one assessment.
const URL_LIMIT: usize = 10;

const SYSTEM_PROMPT: &str = "You are a Cyber Threat Analyst specializing in phishing detection.
Analyze the provided URLs for security threats.

Look for these patterns:
1. TYPOSQUATTING: Misspelled brand names (paypa1.com, amaz0n.com, g00gle.com)
2. SUSPICIOUS TLDs: Unusual domains (.xyz, .top, .click, .info, .work)
3. DECEPTIVE SUBDOMAINS: Legitimate-looking subdomains on malicious domains (login-paypal.evil.com)
4. URL SHORTENERS: Links hiding destinations (bit.ly, tinyurl, t.co)
5. IP-BASED URLS: Direct IP addresses instead of domain names
6. EXCESSIVE SUBDOMAINS: Many subdomain levels (secure.login.verify.account.example.com)
7. SUSPICIOUS PATHS: Paths containing words like \"login\", \"verify\", \"update\", \"secure\" combined with brand names

Be conservative - if in doubt, mark as malicious. User safety is paramount.
Respond with JSON: {\"verdict\": \"malicious\" | \"safe\", \"reason\": <explanation>}";

/// LLM-backed URL-reputation analyzer.
///
/// One chat-completions call per assessment; the model speaks
/// {malicious, safe} and `safe` normalizes to `clean`. Retry and concurrency
/// limits are applied by [`ThrottledAnalyzer`](crate::ThrottledAnalyzer),
/// not here.
#[derive(Debug)]
pub struct UrlReputationAnalyzer {
    client: reqwest::Client,
    config: UrlAnalyzerConfig,
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    verdict: String,
    #[serde(default)]
    reason: String,
}

impl UrlReputationAnalyzer {
    /// Create a new analyzer with the given configuration.
    pub fn new(config: UrlAnalyzerConfig) -> Result<Self, AnalyzerError> {
        if config.api_key.is_empty() {
            return Err(AnalyzerError::Configuration(
                "URL analyzer API key is empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AnalyzerError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn build_user_message(urls: &[String]) -> String {
        let mut message = String::from("Analyze these URLs for phishing or malicious content:\n\n");
        for url in urls.iter().take(URL_LIMIT) {
            let _ = writeln!(message, "- {url}");
        }
        message
    }

    fn parse_response(content: &str) -> Result<SandboxReport, AnalyzerError> {
        let trimmed = content.trim();
        let json_str = if trimmed.starts_with("```") {
            let without_opening = if let Some(rest) = trimmed.strip_prefix("```json") {
                rest
            } else {
                trimmed.strip_prefix("```").unwrap_or(trimmed)
            };
            without_opening
                .strip_suffix("```")
                .unwrap_or(without_opening)
                .trim()
        } else {
            trimmed
        };

        let raw: RawAssessment = serde_json::from_str(json_str).map_err(|e| {
            AnalyzerError::Parse(format!(
                "URL assessment is not valid JSON: {e}. Raw content: {content}"
            ))
        })?;

        let verdict: Verdict = raw
            .verdict
            .parse()
            .unwrap_or(Verdict::Unknown);
        let score = match verdict {
            Verdict::Malicious => 90,
            Verdict::Suspicious => 60,
            Verdict::Unknown => 50,
            Verdict::Clean => 0,
        };

        Ok(SandboxReport {
            verdict,
            score,
            details: json!({ "reason": raw.reason }),
            provider: PROVIDER.into(),
            timed_out: false,
        })
    }
}

#[async_trait]
impl DynamicAnalyzer for UrlReputationAnalyzer {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn analyze(
        &self,
        message_id: &str,
        target: &ScanTarget,
    ) -> Result<SandboxReport, AnalyzerError> {
        let ScanTarget::Urls(urls) = target else {
            return Err(AnalyzerError::Api(
                "URL-reputation analyzer cannot detonate attachments".into(),
            ));
        };
        if urls.is_empty() {
            return Ok(SandboxReport {
                verdict: Verdict::Clean,
                score: 0,
                details: json!({ "reason": "No URLs to analyze" }),
                provider: PROVIDER.into(),
                timed_out: false,
            });
        }

        debug!(
            message_id,
            count = urls.len(),
            first = %sanitize_url(&urls[0]),
            "assessing URL reputation"
        );

        let request_body = json!({
            "model": self.config.model,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::build_user_message(urls) },
            ]
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalyzerError::Timeout(self.config.timeout_seconds)
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

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Parse(e.to_string()))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                AnalyzerError::Parse(format!("no message content in response: {payload}"))
            })?;

        let report = Self::parse_response(content)?;
        info!(message_id, verdict = %report.verdict, "URL reputation assessed");
        Ok(report)
    }
}
