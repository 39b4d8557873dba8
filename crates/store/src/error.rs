use thiserror::Error;

/// Errors raised by event store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the database.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// An insert collided with the unique provider message-id index.
    #[error("duplicate provider message id `{0}`")]
    DuplicateMessageId(String),

    /// A stored value could not be decoded into its domain type.
    #[error("store serialization error: {0}")]
    Serialization(String),
}
