//! Registry error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::stream::ValidationError;

/// Error type for registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No stream with this ID
    #[error("stream not found: {0}")]
    NotFound(String),

    /// Provider name that cannot name a document
    #[error("invalid provider name '{0}'")]
    InvalidProvider(String),

    /// Rejected stream configuration
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// A stored entry that does not decode as a stream
    #[error("stored stream {id} is unreadable: {source}")]
    Unreadable {
        id: String,
        #[source]
        source: ValidationError,
    },

    /// Reading or writing the document failed
    #[error("registry i/o on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The document exists but is not a stream document
    #[error("registry document {} is corrupt: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
