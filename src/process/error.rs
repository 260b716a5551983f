//! Stream process errors

use thiserror::Error;

use crate::registry::RegistryError;
use crate::stream::ValidationError;
use crate::supervisor::SupervisorError;

/// Why a stream could not be brought to its desired state
#[derive(Debug, Error)]
pub enum StreamError {
    /// The configuration cannot produce a pipeline
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The process did not reach RUNNING; `message` is the classified cause
    #[error("stream {id} failed to start: {message}")]
    StartFailed {
        /// Stream ID
        id: String,
        /// Operator-facing diagnostic
        message: String,
    },

    /// The supervisor could not carry out an operation
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The stream's stored configuration could not be read
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
