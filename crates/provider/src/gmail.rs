use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::GmailConfig;
use crate::error::ProviderError;
use crate::labels::brand_labels;
use crate::provider::MailboxProvider;

/// Gmail REST backend for [`MailboxProvider`].
///
/// Label ids are cached in-process once resolved; the cache diverges across
/// processes but label creation handles the resulting races (a 409 conflict
/// re-fetches the id by name).
#[derive(Debug)]
pub struct GmailMailbox {
    client: reqwest::Client,
    config: GmailConfig,
    label_cache: DashMap<String, String>,
}

impl GmailMailbox {
    /// Create a new Gmail backend with the given configuration.
    pub fn new(config: GmailConfig) -> Result<Self, ProviderError> {
        if config.access_token.is_empty() {
            return Err(ProviderError::Configuration(
                "gmail access token is empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            config,
            label_cache: DashMap::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{path}", self.config.base_url)
    }

    fn map_send_error(&self, e: &reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.config.timeout.as_secs())
        } else {
            ProviderError::Http(e.to_string())
        }
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        match status.as_u16() {
            200..=299 => Ok(response),
            404 => Err(ProviderError::NotFound(context.to_owned())),
            429 => Err(ProviderError::RateLimited),
            500..=599 => Err(ProviderError::Http(format!("{context}: {status}"))),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Api(format!("{context}: {status} {body}")))
            }
        }
    }

    /// Find a label id by listing all labels. Used both for lookup and for
    /// recovering from a creation conflict.
    async fn find_label(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .get(self.url("labels"))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        let response = self.check_status(response, "list labels").await?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let id = payload["labels"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|label| label["name"].as_str() == Some(name))
            .and_then(|label| label["id"].as_str())
            .map(ToOwned::to_owned);
        Ok(id)
    }

    async fn create_label(&self, name: &str) -> Result<String, ProviderError> {
        let spec = brand_labels().into_iter().find(|spec| spec.name == name);
        let mut body = json!({
            "name": name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
        });
        if let Some(spec) = spec {
            body["color"] = json!({
                "backgroundColor": spec.background_color,
                "textColor": spec.text_color,
            });
        }

        let response = self
            .client
            .post(self.url("labels"))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        // 409: another process created the label first; fetch its id.
        if response.status().as_u16() == 409 {
            warn!(label = name, "label already exists, re-fetching id");
            return self
                .find_label(name)
                .await?
                .ok_or_else(|| ProviderError::Api(format!("label `{name}` conflicted but is not listed")));
        }

        let response = self.check_status(response, "create label").await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let id = payload["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Serialization(format!("no id in label response: {payload}")))?;
        info!(label = name, id, "created label");
        Ok(id.to_owned())
    }
}

#[async_trait]
impl MailboxProvider for GmailMailbox {
    async fn ensure_label(&self, name: &str) -> Result<String, ProviderError> {
        if let Some(id) = self.label_cache.get(name) {
            return Ok(id.clone());
        }

        let id = match self.find_label(name).await? {
            Some(id) => id,
            None => self.create_label(name).await?,
        };
        self.label_cache.insert(name.to_owned(), id.clone());
        Ok(id)
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), ProviderError> {
        let mut body = json!({ "addLabelIds": add_label_ids });
        if !remove_label_ids.is_empty() {
            body["removeLabelIds"] = json!(remove_label_ids);
        }

        let response = self
            .client
            .post(self.url(&format!("messages/{message_id}/modify")))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        self.check_status(response, &format!("modify message {message_id}"))
            .await?;
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!(
                "messages/{message_id}/attachments/{attachment_id}"
            )))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;
        let response = self
            .check_status(response, &format!("fetch attachment {attachment_id}"))
            .await?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let data = payload["data"].as_str().ok_or_else(|| {
            ProviderError::Serialization("no data in attachment response".into())
        })?;

        // The API serves base64url with or without padding depending on the
        // payload; accept both.
        URL_SAFE.decode(data).or_else(|_| {
            URL_SAFE_NO_PAD.decode(data).map_err(|e| {
                ProviderError::Serialization(format!("attachment is not base64url: {e}"))
            })
        })
    }

    fn supports_content_fetch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        let err = GmailMailbox::new(GmailConfig::new("")).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn urls_are_rooted_at_users_me() {
        let mailbox = GmailMailbox::new(GmailConfig::new("token")).unwrap();
        assert_eq!(
            mailbox.url("labels"),
            "https://gmail.googleapis.com/gmail/v1/users/me/labels"
        );
        assert!(mailbox.url("messages/m1/modify").ends_with("/users/me/messages/m1/modify"));
    }
}
