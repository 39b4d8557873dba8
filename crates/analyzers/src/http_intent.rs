use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use mailward_core::{Intent, IntentAnalysis};

use crate::config::IntentClassifierConfig;
use crate::error::AnalyzerError;
use crate::intent::IntentAnalyzer;

/// Longest body slice sent to the classifier.
const BODY_LIMIT: usize = 2000;

const SYSTEM_PROMPT: &str = "You are an email security analyst. Classify the \
intent of the email into exactly one tag from the provided taxonomy. Respond \
with JSON: {\"intent\": <tag>, \"confidence\": <0..1>, \"indicators\": \
[<short snake_case tags>]}. Be conservative: when a message mixes business \
content with manipulation patterns, prefer the security-specific tag.";

/// HTTP-based intent classifier using an OpenAI-compatible chat completions
/// API.
#[derive(Debug)]
pub struct HttpIntentClassifier {
    client: reqwest::Client,
    config: IntentClassifierConfig,
}

/// Shape of the JSON object the model is instructed to return.
#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    confidence: f64,
    #[serde(default)]
    indicators: Vec<String>,
}

impl HttpIntentClassifier {
    /// Create a new classifier with the given configuration.
    pub fn new(config: IntentClassifierConfig) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AnalyzerError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Build the user message: the taxonomy, then the email content.
    fn build_user_message(subject: &str, body: &str) -> String {
        let mut message = String::from("Taxonomy:\n");
        for intent in Intent::all() {
            let _ = writeln!(message, "- {}", intent.as_str());
        }
        let body = if body.len() > BODY_LIMIT {
            // Back off to a char boundary so the slice cannot panic.
            let mut end = BODY_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            &body[..end]
        } else {
            body
        };
        let _ = write!(message, "\nSubject: {subject}\n\nBody:\n{body}");
        message
    }

    /// Parse the model output, stripping markdown code fences if present.
    fn parse_response(content: &str) -> Result<IntentAnalysis, AnalyzerError> {
        let trimmed = content.trim();

        // Strip markdown code fences (```json ... ``` or ``` ... ```)
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

        let raw: RawClassification = serde_json::from_str(json_str).map_err(|e| {
            AnalyzerError::Parse(format!(
                "classifier response is not valid JSON: {e}. Raw content: {content}"
            ))
        })?;

        // A tag outside the taxonomy is treated as unknown rather than
        // failing the message.
        let intent = raw.intent.parse().unwrap_or(Intent::Unknown);

        Ok(IntentAnalysis {
            intent,
            confidence: raw.confidence.clamp(0.0, 1.0),
            indicators: raw.indicators,
        })
    }
}

#[async_trait]
impl IntentAnalyzer for HttpIntentClassifier {
    async fn classify(&self, subject: &str, body: &str) -> Result<IntentAnalysis, AnalyzerError> {
        let request_body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::build_user_message(subject, body) },
            ]
        });

        debug!(endpoint = %self.config.endpoint, model = %self.config.model, "sending intent classification request");

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

        Self::parse_response(content)
    }
}
