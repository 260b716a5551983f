//! Supervisor adapter errors

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error type for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The control channel could not be reached
    #[error("supervisor unavailable: {0}")]
    Unavailable(String),

    /// A control call exceeded its timeout
    #[error("supervisor '{op}' timed out after {after:?}")]
    Timeout {
        /// Operation that was attempted
        op: &'static str,
        /// Configured timeout
        after: Duration,
    },

    /// The supervisor rejected an operation
    #[error("supervisor '{op}' failed for {unit}: {output}")]
    CommandFailed {
        /// Operation that was attempted
        op: &'static str,
        /// Unit the operation targeted
        unit: String,
        /// Supervisor response
        output: String,
    },

    /// A unit definition could not be written or removed
    #[error("unit definition '{}': {source}", .path.display())]
    Definition {
        /// Definition file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// The process could not be spawned
    #[error("failed to spawn {unit}: {source}")]
    Spawn {
        /// Unit being spawned
        unit: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Operation on a unit with no definition
    #[error("no definition for unit {0}")]
    UnknownUnit(String),
}

impl SupervisorError {
    /// Whether the control channel itself failed (as opposed to one unit)
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SupervisorError::Unavailable(_) | SupervisorError::Timeout { .. }
        )
    }
}
