//! Supervisor adapter configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which process strategy runs the transport pipelines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One supervisord program per stream (default)
    #[default]
    Supervisor,
    /// Child processes of this service
    Direct,
}

/// Supervisor adapter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Process strategy
    pub backend: BackendKind,

    /// Directory holding one `<unit>.conf` per stream
    pub conf_dir: PathBuf,

    /// Directory for per-stream stdout/stderr logs
    pub log_dir: PathBuf,

    /// Transport launcher binary
    pub launcher: PathBuf,

    /// `supervisorctl` binary
    pub supervisorctl: PathBuf,

    /// Optional supervisord config passed as `supervisorctl -c`
    pub supervisor_config: Option<PathBuf>,

    /// Identity the transport processes run as
    pub run_as_user: Option<String>,

    /// User database consulted for HOME and uid
    pub passwd_path: PathBuf,

    /// `getent` used for users missing from `passwd_path` (`None` disables NSS)
    pub getent: Option<PathBuf>,

    /// Prefix of every unit name
    pub unit_prefix: String,

    /// Timeout applied to every control-channel call
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Uptime before supervisord considers a program started
    #[serde(with = "humantime_serde")]
    pub min_uptime: Duration,

    /// Restart attempts before supervisord gives up (FATAL)
    pub start_retries: u32,

    /// Bytes read from the end of a stderr log for diagnostics
    pub error_tail_bytes: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Supervisor,
            conf_dir: PathBuf::from("/etc/supervisor/conf.d"),
            log_dir: PathBuf::from("/var/log/stagepi"),
            launcher: PathBuf::from("/usr/bin/gst-launch-1.0"),
            supervisorctl: PathBuf::from("/usr/bin/supervisorctl"),
            supervisor_config: None,
            run_as_user: Some("pi".to_string()),
            passwd_path: PathBuf::from("/etc/passwd"),
            getent: Some(PathBuf::from("/usr/bin/getent")),
            unit_prefix: "stream-".to_string(),
            command_timeout: Duration::from_secs(5),
            min_uptime: Duration::from_secs(2),
            start_retries: 3,
            error_tail_bytes: 4096,
        }
    }
}

impl SupervisorConfig {
    /// Select the process strategy
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the unit definition directory
    pub fn conf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conf_dir = dir.into();
        self
    }

    /// Set the log directory
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Set the transport launcher
    pub fn launcher(mut self, path: impl Into<PathBuf>) -> Self {
        self.launcher = path.into();
        self
    }

    /// Set the `supervisorctl` binary
    pub fn supervisorctl(mut self, path: impl Into<PathBuf>) -> Self {
        self.supervisorctl = path.into();
        self
    }

    /// Set the run-as user (`None` omits `user=` and the environment lookup)
    pub fn run_as_user(mut self, user: Option<String>) -> Self {
        self.run_as_user = user;
        self
    }

    /// Set the user database path
    pub fn passwd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.passwd_path = path.into();
        self
    }

    /// Set the NSS lookup command
    pub fn getent(mut self, path: Option<PathBuf>) -> Self {
        self.getent = path;
        self
    }

    /// Set the control-channel timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the minimum uptime
    pub fn min_uptime(mut self, uptime: Duration) -> Self {
        self.min_uptime = uptime;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();

        assert_eq!(config.backend, BackendKind::Supervisor);
        assert_eq!(config.unit_prefix, "stream-");
        assert_eq!(config.launcher, PathBuf::from("/usr/bin/gst-launch-1.0"));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.run_as_user.as_deref(), Some("pi"));
    }

    #[test]
    fn test_builder_chaining() {
        let config = SupervisorConfig::default()
            .backend(BackendKind::Direct)
            .conf_dir("/tmp/conf")
            .log_dir("/tmp/log")
            .run_as_user(None)
            .command_timeout(Duration::from_millis(250));

        assert_eq!(config.backend, BackendKind::Direct);
        assert_eq!(config.conf_dir, PathBuf::from("/tmp/conf"));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/log"));
        assert!(config.run_as_user.is_none());
        assert_eq!(config.command_timeout, Duration::from_millis(250));
    }
}
