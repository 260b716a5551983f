//! Unit definitions
//!
//! A unit is one supervised transport process. Its definition is derived
//! deterministically from the stream ID and configuration, so rewriting it
//! for the same input produces the same file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::pipeline::builder::LAUNCHER_FLAGS;
use crate::pipeline::PipelineDescription;
use crate::stream::StreamConfig;

use super::config::SupervisorConfig;
use super::environment::resolve_environment;
use super::error::SupervisorError;

/// Seconds supervisord waits after SIGINT before SIGKILL
const STOP_WAIT_SECS: u64 = 5;

/// A fully resolved unit definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDefinition {
    /// Unit (program) name
    pub name: String,
    /// Stream the unit runs
    pub stream_id: String,
    /// Launcher path, flags and pipeline arguments
    pub argv: Vec<String>,
    /// Shell-quoted command line
    pub command: String,
    /// Start with the supervisor
    pub autostart: bool,
    /// Restart after unexpected exit
    pub autorestart: bool,
    /// Seconds of uptime before the process counts as started
    pub start_secs: u64,
    /// Restart attempts before giving up
    pub start_retries: u32,
    /// Captured stdout
    pub stdout_log: PathBuf,
    /// Captured stderr
    pub stderr_log: PathBuf,
    /// Identity the process runs as
    pub user: Option<String>,
    /// Injected environment
    pub environment: Vec<(String, String)>,
}

impl UnitDefinition {
    /// Render as a supervisord `[program:x]` section
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("[program:{}]\n", self.name));
        out.push_str(&format!("command={}\n", escape_percent(&self.command)));
        out.push_str(&format!("autostart={}\n", self.autostart));
        out.push_str(&format!("autorestart={}\n", self.autorestart));
        out.push_str(&format!("startsecs={}\n", self.start_secs));
        out.push_str(&format!("startretries={}\n", self.start_retries));
        out.push_str("stopsignal=INT\n");
        out.push_str(&format!("stopwaitsecs={}\n", STOP_WAIT_SECS));
        out.push_str(&format!(
            "stdout_logfile={}\n",
            escape_percent(&self.stdout_log.display().to_string())
        ));
        out.push_str(&format!(
            "stderr_logfile={}\n",
            escape_percent(&self.stderr_log.display().to_string())
        ));
        if let Some(ref user) = self.user {
            out.push_str(&format!("user={}\n", user));
        }
        if !self.environment.is_empty() {
            let pairs: Vec<String> = self
                .environment
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_percent(&v.replace('"', "\\\""))))
                .collect();
            out.push_str(&format!("environment={}\n", pairs.join(",")));
        }
        out
    }
}

/// Builds unit definitions for one backend
#[derive(Debug, Clone)]
pub struct UnitTemplate {
    prefix: String,
    launcher: String,
    log_dir: PathBuf,
    user: Option<String>,
    environment: Vec<(String, String)>,
    start_secs: u64,
    start_retries: u32,
}

impl UnitTemplate {
    /// Create a template, resolving the run-as environment once
    pub fn new(config: &SupervisorConfig) -> Self {
        let environment = match config.run_as_user {
            Some(ref user) => {
                resolve_environment(user, &config.passwd_path, config.getent.as_deref())
            }
            None => Vec::new(),
        };

        Self {
            prefix: config.unit_prefix.clone(),
            launcher: config.launcher.display().to_string(),
            log_dir: config.log_dir.clone(),
            user: config.run_as_user.clone(),
            environment,
            start_secs: config.min_uptime.as_secs().max(1),
            start_retries: config.start_retries,
        }
    }

    /// Unit name for a stream
    ///
    /// Characters outside `[A-Za-z0-9_-]` become `_`, so the name is always
    /// a single path component.
    pub fn unit_name(&self, stream_id: &str) -> String {
        let sanitized: String = stream_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, sanitized)
    }

    /// Stream ID from a unit name, if the unit belongs to this template
    pub fn stream_id<'a>(&self, unit: &'a str) -> Option<&'a str> {
        unit.strip_prefix(self.prefix.as_str())
            .filter(|id| !id.is_empty())
    }

    /// stdout log of a stream's unit
    pub fn stdout_log(&self, stream_id: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}.out.log", self.unit_name(stream_id)))
    }

    /// stderr log of a stream's unit
    pub fn stderr_log(&self, stream_id: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}.err.log", self.unit_name(stream_id)))
    }

    /// Log directory
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Injected environment
    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    /// Build the definition for a stream
    pub fn definition(
        &self,
        config: &StreamConfig,
        pipeline: &PipelineDescription,
        autostart: bool,
    ) -> UnitDefinition {
        let mut argv = vec![self.launcher.clone()];
        argv.extend(LAUNCHER_FLAGS.iter().map(|f| f.to_string()));
        argv.extend(pipeline.args().iter().cloned());

        UnitDefinition {
            name: self.unit_name(&config.id),
            stream_id: config.id.clone(),
            argv,
            command: pipeline.command_line(&self.launcher),
            autostart,
            autorestart: true,
            start_secs: self.start_secs,
            start_retries: self.start_retries,
            stdout_log: self.stdout_log(&config.id),
            stderr_log: self.stderr_log(&config.id),
            user: self.user.clone(),
            environment: self.environment.clone(),
        }
    }
}

fn escape_percent(value: &str) -> String {
    value.replace('%', "%%")
}

/// Write `contents` to `path` via a temporary file and rename
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), SupervisorError> {
    let to_err = |source| SupervisorError::Definition {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }

    let temp_path = path.with_extension("conf.tmp");
    tokio::fs::write(&temp_path, contents).await.map_err(to_err)?;
    tokio::fs::rename(&temp_path, path).await.map_err(to_err)?;

    Ok(())
}

/// Read at most `max_bytes` from the end of a log file
///
/// Returns `None` for a missing or empty log.
pub(crate) async fn read_log_tail(path: &Path, max_bytes: usize) -> Option<String> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let start = len.saturating_sub(max_bytes as u64);
    file.seek(SeekFrom::Start(start)).await.ok()?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await.ok()?;

    let text = String::from_utf8_lossy(&buf).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamKind;

    fn template(log_dir: &Path) -> UnitTemplate {
        let config = SupervisorConfig::default()
            .log_dir(log_dir)
            .run_as_user(None);
        let mut template = UnitTemplate::new(&config);
        template.user = Some("pi".into());
        template.environment = vec![
            ("HOME".into(), "/home/pi".into()),
            ("USER".into(), "pi".into()),
            ("XDG_RUNTIME_DIR".into(), "/run/user/1000".into()),
        ];
        template
    }

    fn receiver() -> StreamConfig {
        StreamConfig::new(StreamKind::Receiver, "239.1.1.1", 5004)
            .with_id("test_sup")
            .device("default")
            .interface("eth0")
    }

    #[test]
    fn test_unit_naming() {
        let template = template(Path::new("/var/log/stagepi"));

        assert_eq!(template.unit_name("test_sup"), "stream-test_sup");
        assert_eq!(template.stream_id("stream-test_sup"), Some("test_sup"));
        assert_eq!(template.stream_id("other-program"), None);
        assert_eq!(template.stream_id("stream-"), None);
        assert_eq!(template.unit_name("../../etc/x"), "stream-______etc_x");
        assert_eq!(template.unit_name("a b.c"), "stream-a_b_c");
        assert_eq!(
            template.stderr_log("a"),
            PathBuf::from("/var/log/stagepi/stream-a.err.log")
        );
    }

    #[test]
    fn test_render_definition() {
        let template = template(Path::new("/var/log/stagepi"));
        let config = receiver();
        let pipeline = PipelineDescription::build(&config).unwrap();

        let text = template.definition(&config, &pipeline, true).render();

        assert!(text.starts_with("[program:stream-test_sup]\n"));
        assert!(text.contains("command=/usr/bin/gst-launch-1.0 -e udpsrc"));
        assert!(text.contains("autostart=true\n"));
        assert!(text.contains("autorestart=true\n"));
        assert!(text.contains("startsecs=2\n"));
        assert!(text.contains("startretries=3\n"));
        assert!(text.contains("stderr_logfile=/var/log/stagepi/stream-test_sup.err.log\n"));
        assert!(text.contains("user=pi\n"));
        assert!(text.contains(
            "environment=HOME=\"/home/pi\",USER=\"pi\",XDG_RUNTIME_DIR=\"/run/user/1000\"\n"
        ));
    }

    #[test]
    fn test_render_is_deterministic() {
        let template = template(Path::new("/tmp"));
        let config = receiver();
        let pipeline = PipelineDescription::build(&config).unwrap();

        let a = template.definition(&config, &pipeline, false).render();
        let b = template.definition(&config, &pipeline, false).render();

        assert_eq!(a, b);
        assert!(a.contains("autostart=false\n"));
    }

    #[tokio::test]
    async fn test_atomic_write_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("unit.conf");

        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "second");
        assert!(!path.with_extension("conf.tmp").exists());

        let log = dir.path().join("err.log");
        tokio::fs::write(&log, "0123456789\n").await.unwrap();
        assert_eq!(read_log_tail(&log, 4).await.as_deref(), Some("789"));
        assert_eq!(read_log_tail(&dir.path().join("none"), 4).await, None);
    }
}
