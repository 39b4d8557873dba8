use async_trait::async_trait;

use crate::error::ProviderError;

/// Object-safe capability trait for the mailbox provider.
///
/// Label application must be idempotent on the provider side: adding a label
/// a message already carries is a no-op. The pipeline leans on that for its
/// at-least-once delivery guarantees.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Look up a label id by name, creating the label if it does not exist.
    async fn ensure_label(&self, name: &str) -> Result<String, ProviderError>;

    /// Add and remove labels on a message in one call.
    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<(), ProviderError>;

    /// Fetch raw attachment content. Only meaningful when
    /// [`supports_content_fetch`](Self::supports_content_fetch) is `true`.
    async fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Whether this provider can serve attachment content.
    ///
    /// Defaults to `false`; the analysis worker falls back to URL analysis
    /// when content fetch is unavailable.
    fn supports_content_fetch(&self) -> bool {
        false
    }
}
