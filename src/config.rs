//! Application configuration
//!
//! One TOML file with a section per component. Every section and field is
//! optional; missing values take the component defaults.
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [registry]
//! dir = "/usr/local/stagepi/etc"
//! default_provider = "aes67"
//!
//! [supervisor]
//! backend = "supervisor"
//! conf_dir = "/etc/supervisor/conf.d"
//! command_timeout = "5s"
//!
//! [engine]
//! poll_interval = "250ms"
//! start_timeout = "5s"
//! max_concurrent = 4
//! ```

use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::logging::LogConfig;
use crate::registry::RegistryConfig;
use crate::supervisor::SupervisorConfig;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used
    #[error("invalid config value for '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Full application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `[log]`
    pub log: LogConfig,
    /// `[registry]`
    pub registry: RegistryConfig,
    /// `[supervisor]`
    pub supervisor: SupervisorConfig,
    /// `[engine]`
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        contents.parse()
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.max_concurrent",
                reason: "must be at least 1".into(),
            });
        }
        if self.engine.start_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "engine.start_timeout",
                reason: "must be non-zero".into(),
            });
        }
        if self.supervisor.command_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "supervisor.command_timeout",
                reason: "must be non-zero".into(),
            });
        }
        if self.registry.default_provider.is_empty() {
            return Err(ConfigError::Invalid {
                field: "registry.default_provider",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

impl FromStr for AppConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
