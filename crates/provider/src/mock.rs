use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::MailboxProvider;

/// One recorded `modify_message` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub message_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Recording mock for [`MailboxProvider`].
///
/// Label ids are derived deterministically from names (`label:<name>`).
/// Attachment content is served from a preloaded map; fetching anything else
/// returns `NotFound`, and content fetch support can be switched off to
/// exercise the URL-analysis fallback.
pub struct MockMailbox {
    modifications: Mutex<Vec<Modification>>,
    ensured: Mutex<Vec<String>>,
    attachments: Mutex<HashMap<(String, String), Vec<u8>>>,
    content_fetch: bool,
    fail_modifications: bool,
}

impl Default for MockMailbox {
    fn default() -> Self {
        Self {
            modifications: Mutex::new(Vec::new()),
            ensured: Mutex::new(Vec::new()),
            attachments: Mutex::new(HashMap::new()),
            content_fetch: true,
            fail_modifications: false,
        }
    }
}

impl MockMailbox {
    /// Create a mock with content fetch enabled and no attachments loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable content fetch so callers fall back to URL analysis.
    #[must_use]
    pub fn without_content_fetch(mut self) -> Self {
        self.content_fetch = false;
        self
    }

    /// Make every `modify_message` call fail with a retryable error.
    #[must_use]
    pub fn failing_modifications(mut self) -> Self {
        self.fail_modifications = true;
        self
    }

    /// Preload attachment content for `fetch_attachment`.
    pub fn add_attachment(&self, message_id: &str, attachment_id: &str, content: Vec<u8>) {
        self.attachments
            .lock()
            .expect("attachment mutex poisoned")
            .insert((message_id.to_owned(), attachment_id.to_owned()), content);
    }

    /// All recorded modifications, in call order.
    pub fn modifications(&self) -> Vec<Modification> {
        self.modifications
            .lock()
            .expect("modification mutex poisoned")
            .clone()
    }

    /// Names passed to `ensure_label`, in call order.
    pub fn ensured_labels(&self) -> Vec<String> {
        self.ensured.lock().expect("ensured mutex poisoned").clone()
    }
}

#[async_trait]
impl MailboxProvider for MockMailbox {
    async fn ensure_label(&self, name: &str) -> Result<String, ProviderError> {
        self.ensured
            .lock()
            .expect("ensured mutex poisoned")
            .push(name.to_owned());
        Ok(format!("label:{name}"))
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), ProviderError> {
        if self.fail_modifications {
            return Err(ProviderError::Http("mock provider down".into()));
        }
        self.modifications
            .lock()
            .expect("modification mutex poisoned")
            .push(Modification {
                message_id: message_id.to_owned(),
                added: add_label_ids.to_vec(),
                removed: remove_label_ids.to_vec(),
            });
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        self.attachments
            .lock()
            .expect("attachment mutex poisoned")
            .get(&(message_id.to_owned(), attachment_id.to_owned()))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("attachment {attachment_id}")))
    }

    fn supports_content_fetch(&self) -> bool {
        self.content_fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_modifications() {
        let mailbox = MockMailbox::new();
        mailbox
            .modify_message("m-1", &["label:Mailward/SAFE".into()], &[])
            .await
            .unwrap();

        let mods = mailbox.modifications();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].message_id, "m-1");
        assert_eq!(mods[0].added, vec!["label:Mailward/SAFE"]);
        assert!(mods[0].removed.is_empty());
    }

    #[tokio::test]
    async fn serves_preloaded_attachments() {
        let mailbox = MockMailbox::new();
        mailbox.add_attachment("m-1", "att-1", b"MZ\x90\x00".to_vec());

        let content = mailbox.fetch_attachment("m-1", "att-1").await.unwrap();
        assert_eq!(content, b"MZ\x90\x00");

        let err = mailbox.fetch_attachment("m-1", "att-2").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn content_fetch_can_be_disabled() {
        let mailbox = MockMailbox::new().without_content_fetch();
        assert!(!mailbox.supports_content_fetch());
    }
}
