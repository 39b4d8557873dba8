//! Mailbox provider capability for the action worker.
//!
//! The pipeline's only outward side effect is label application on the
//! user's mailbox: ensure the brand labels exist, apply the verdict label,
//! and optionally quarantine. The analysis worker also uses the provider to
//! lazily fetch attachment content for sandboxing.

pub mod config;
pub mod error;
pub mod gmail;
pub mod labels;
pub mod mock;
pub mod provider;

pub use config::GmailConfig;
pub use error::ProviderError;
pub use gmail::GmailMailbox;
pub use labels::{
    INBOX_LABEL_ID, LABEL_CAUTIOUS, LABEL_MALICIOUS, LABEL_SAFE, SPAM_LABEL_ID, brand_labels,
    label_for_verdict,
};
pub use mock::{Modification, MockMailbox};
pub use provider::MailboxProvider;
