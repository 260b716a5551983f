//! Request-level errors
//!
//! Collapses the component errors into the outcomes a request handler needs
//! to tell apart, each with its HTTP-style status code.

use thiserror::Error;

use crate::process::StreamError;
use crate::registry::RegistryError;
use crate::stream::ValidationError;
use crate::supervisor::SupervisorError;

/// Outcome of a failed service call
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request carried an unusable stream configuration
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No stream with this ID
    #[error("stream not found: {0}")]
    NotFound(String),

    /// The configuration was accepted but the stream did not start
    #[error("stream {id} failed to start: {message}")]
    StartFailed { id: String, message: String },

    /// The process supervisor could not carry out the operation
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Storage or other internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::StartFailed { .. } => 500,
            ApiError::Supervisor(e) if e.is_unavailable() => 503,
            ApiError::Supervisor(_) => 500,
            ApiError::Internal(_) => 500,
        }
    }

    /// Whether the caller can fix the request and retry
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::NotFound(id),
            RegistryError::Invalid(e) => ApiError::Validation(e),
            RegistryError::InvalidProvider(provider) => {
                ApiError::Validation(ValidationError::InvalidValue {
                    field: "provider",
                    reason: format!("'{}' is not a valid provider name", provider),
                })
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Validation(e) => ApiError::Validation(e),
            StreamError::StartFailed { id, message } => ApiError::StartFailed { id, message },
            StreamError::Supervisor(e) => ApiError::Supervisor(e),
            StreamError::Registry(e) => ApiError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::from(ValidationError::MissingField("port")), 400),
            (ApiError::from(RegistryError::NotFound("s-1".into())), 404),
            (
                ApiError::from(StreamError::StartFailed {
                    id: "s-1".into(),
                    message: "device busy".into(),
                }),
                500,
            ),
            (
                ApiError::from(SupervisorError::Unavailable("refused".into())),
                503,
            ),
            (
                ApiError::from(SupervisorError::Timeout {
                    op: "status",
                    after: Duration::from_secs(5),
                }),
                500,
            ),
            (ApiError::from(RegistryError::InvalidProvider("..".into())), 400),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{}", error);
        }
    }

    #[test]
    fn test_start_failure_message_is_kept() {
        let err = ApiError::from(StreamError::StartFailed {
            id: "s-1".into(),
            message: "audio device 'hw:0' is busy".into(),
        });

        assert!(!err.is_client_error());
        assert!(err.to_string().contains("is busy"));
    }
}
