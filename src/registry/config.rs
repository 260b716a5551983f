//! Registry configuration

use std::path::PathBuf;

use serde::Deserialize;

/// Provider used when a request names none
pub const DEFAULT_PROVIDER: &str = "aes67";

/// Where stream documents live
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding one `<provider>.json` document per provider
    pub dir: PathBuf,

    /// Provider used by the engine and CLI unless told otherwise
    pub default_provider: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/usr/local/stagepi/etc"),
            default_provider: DEFAULT_PROVIDER.to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the default provider
    pub fn default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = provider.into();
        self
    }
}
