//! Stream configuration validation errors

use thiserror::Error;

/// A stream configuration that cannot be turned into a running stream.
///
/// Raised before any process side effect is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A topology field the pipeline cannot be built without
    #[error("stream is missing required field '{0}'")]
    MissingField(&'static str),

    /// `kind` was something other than sender or receiver
    #[error("unknown stream kind '{0}' (expected 'sender' or 'receiver')")]
    UnknownKind(String),

    /// A field is present but its value is unusable
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name as it appears in the stream document
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The document could not be decoded at all
    #[error("malformed stream configuration: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::Malformed(err.to_string())
    }
}
