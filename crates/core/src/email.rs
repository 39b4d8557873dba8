use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for an email attachment.
///
/// Attachment content is never carried through the pipeline; only metadata
/// travels on the wire. Content is fetched lazily by the analysis worker when
/// the mailbox provider supports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    /// Original filename of the attachment.
    pub filename: String,
    /// Declared MIME type (e.g. `application/pdf`).
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Provider-internal attachment id, for later content retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

impl AttachmentMetadata {
    /// Return the lowercased filename extension including the leading dot,
    /// or `None` when the filename has no extension.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let idx = self.filename.rfind('.')?;
        if idx == 0 || idx + 1 == self.filename.len() {
            return None;
        }
        Some(self.filename[idx..].to_ascii_lowercase())
    }
}

/// Result of a single sender-authentication check (SPF, DKIM or DMARC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthResult {
    Pass,
    Fail,
    Neutral,
    None,
}

impl AuthResult {
    /// Canonical uppercase string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Neutral => "NEUTRAL",
            Self::None => "NONE",
        }
    }
}

/// Sender authentication results extracted from the message headers.
///
/// `None` on a field means the header was absent entirely, which is distinct
/// from an explicit `NONE` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub spf: Option<AuthResult>,
    pub dkim: Option<AuthResult>,
    pub dmarc: Option<AuthResult>,
}

/// A parsed email as handed to the pipeline by the mailbox integration.
///
/// This is the ingest producer's input contract: MIME extraction, header
/// parsing and URL extraction have already happened upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEmail {
    /// Provider-assigned message id; unique per mailbox message.
    pub message_id: String,
    /// `From` header value.
    pub sender: String,
    /// `To` header value.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Short snippet of the body for display and classification.
    pub body_preview: String,
    /// Full text body when available.
    #[serde(default)]
    pub body_text: Option<String>,
    /// Full HTML body when available.
    #[serde(default)]
    pub body_html: Option<String>,
    /// Parsed `Date` header.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    /// SPF/DKIM/DMARC results.
    #[serde(default)]
    pub auth_status: AuthStatus,
    /// Originating IP from the `Received` chain.
    #[serde(default)]
    pub sender_ip: Option<String>,
    /// URLs found in the body.
    #[serde(default)]
    pub extracted_urls: Vec<String>,
    /// Attachment metadata (content not included).
    #[serde(default)]
    pub attachments: Vec<AttachmentMetadata>,
}

impl StructuredEmail {
    /// The body text used for intent classification: the full text body when
    /// present, otherwise the preview snippet.
    #[must_use]
    pub fn classification_body(&self) -> &str {
        self.body_text.as_deref().unwrap_or(&self.body_preview)
    }
}
