//! Crate-level error type

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::process::StreamError;
use crate::registry::RegistryError;
use crate::stream::ValidationError;
use crate::supervisor::SupervisorError;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Any error this crate produces
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
