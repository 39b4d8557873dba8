use thiserror::Error;

/// Errors produced while decoding a flat stream payload into a typed message.
///
/// The broker delivers messages as flat string-keyed maps; these errors let a
/// consumer distinguish a poison payload (acknowledge and drop) from a
/// transport failure (decline to acknowledge so the broker redelivers).
#[derive(Debug, Error)]
pub enum WireError {
    /// A required field is absent from the payload.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but its value cannot be parsed.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// The offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl WireError {
    /// Build an [`WireError::InvalidField`] from any displayable cause.
    pub fn invalid(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}
