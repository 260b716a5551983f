//! supervisord backend
//!
//! Writes one `[program:stream-<id>]` file per stream into the supervisor's
//! include directory and drives it through `supervisorctl`. Every control call
//! is bounded by the configured command timeout; a timeout is reported the
//! same way as an explicit failure.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::pipeline::PipelineDescription;
use crate::stream::StreamConfig;

use super::backend::{ProcessBackend, Result, UnitState, UnitStatus};
use super::config::SupervisorConfig;
use super::error::SupervisorError;
use super::unit::{read_log_tail, write_atomic, UnitTemplate};

/// Responses that mean the control socket itself is unreachable
const UNREACHABLE_MARKERS: &[&str] = &[
    "refused connection",
    ".sock no such file",
    "SHUTDOWN_STATE",
    "Connection refused",
];

/// Supervisor adapter backed by `supervisorctl`
pub struct SupervisorAdapter {
    config: SupervisorConfig,
    template: UnitTemplate,
}

impl SupervisorAdapter {
    /// Create an adapter
    pub fn new(config: SupervisorConfig) -> Self {
        let template = UnitTemplate::new(&config);
        Self { config, template }
    }

    /// Unit template in use
    pub fn template(&self) -> &UnitTemplate {
        &self.template
    }

    /// Definition file of a stream
    pub fn definition_path(&self, stream_id: &str) -> PathBuf {
        self.config
            .conf_dir
            .join(format!("{}.conf", self.template.unit_name(stream_id)))
    }

    async fn run(&self, op: &'static str, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.config.supervisorctl);
        if let Some(ref conf) = self.config.supervisor_config {
            cmd.arg("-c").arg(conf);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.command_timeout, cmd.output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SupervisorError::Unavailable(format!(
                    "cannot run {}: {}",
                    self.config.supervisorctl.display(),
                    e
                )))
            }
            Err(_) => {
                tracing::warn!(
                    op = op,
                    timeout_ms = self.config.command_timeout.as_millis() as u64,
                    "supervisorctl timed out"
                );
                return Err(SupervisorError::Timeout {
                    op,
                    after: self.config.command_timeout,
                });
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if UNREACHABLE_MARKERS.iter().any(|m| text.contains(m)) {
            return Err(SupervisorError::Unavailable(text.trim().to_string()));
        }

        tracing::trace!(op = op, args = ?args, output = %text.trim(), "supervisorctl");
        Ok(text)
    }

    /// Run a unit operation, treating the listed responses as success
    async fn unit_op(
        &self,
        op: &'static str,
        stream_id: &str,
        benign: &[&str],
    ) -> Result<()> {
        let unit = self.template.unit_name(stream_id);
        let output = self.run(op, &[op, &unit]).await?;
        check_response(op, &unit, &output, benign)
    }
}

/// Map a `supervisorctl` response to success or failure
fn check_response(op: &'static str, unit: &str, output: &str, benign: &[&str]) -> Result<()> {
    let failed = output.contains("ERROR") || output.contains("error:");
    if !failed || benign.iter().any(|b| output.contains(b)) {
        return Ok(());
    }
    Err(SupervisorError::CommandFailed {
        op,
        unit: unit.to_string(),
        output: output.trim().to_string(),
    })
}

/// Parse one `supervisorctl status` line
///
/// `stream-a   RUNNING   pid 12, uptime 0:00:04` or
/// `stream-a: ERROR (no such process)`.
pub fn parse_status_line(line: &str) -> Option<(String, UnitStatus)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some((name, rest)) = line.split_once(": ERROR") {
        let name = name.trim().to_string();
        if rest.contains("no such process") || rest.contains("no such group") {
            return Some((name, UnitStatus::absent()));
        }
        return Some((name, UnitStatus::new(UnitState::Unknown, rest.trim())));
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let name = parts.next()?.to_string();
    let rest = parts.next().unwrap_or("").trim_start();
    let mut parts = rest.splitn(2, char::is_whitespace);
    let state = UnitState::parse(parts.next()?);
    let description = parts.next().unwrap_or("").trim().to_string();

    Some((name, UnitStatus::new(state, description)))
}

#[async_trait]
impl ProcessBackend for SupervisorAdapter {
    fn name(&self) -> &'static str {
        "supervisor"
    }

    async fn write_definition(
        &self,
        config: &StreamConfig,
        pipeline: &PipelineDescription,
        autostart: bool,
    ) -> Result<()> {
        let definition = self.template.definition(config, pipeline, autostart);
        let path = self.definition_path(&config.id);
        write_atomic(&path, &definition.render()).await?;

        tracing::debug!(
            stream = %config.id,
            path = %path.display(),
            autostart = autostart,
            "Unit definition written"
        );
        Ok(())
    }

    async fn apply(&self, stream_id: &str) -> Result<()> {
        let unit = self.template.unit_name(stream_id);
        let output = self.run("reread", &["reread"]).await?;
        check_response("reread", &unit, &output, &[])?;

        let output = self.run("update", &["update", &unit]).await?;
        check_response("update", &unit, &output, &[])
    }

    async fn start(&self, stream_id: &str) -> Result<()> {
        self.unit_op("start", stream_id, &["already started"]).await
    }

    async fn stop(&self, stream_id: &str) -> Result<()> {
        self.unit_op(
            "stop",
            stream_id,
            &["not running", "no such process", "no such group"],
        )
        .await
    }

    async fn remove(&self, stream_id: &str) -> Result<()> {
        self.unit_op("remove", stream_id, &["no such group", "no such process"])
            .await
    }

    async fn delete_definition(&self, stream_id: &str) -> Result<()> {
        let path = self.definition_path(stream_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(stream = stream_id, path = %path.display(), "Unit definition deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SupervisorError::Definition { path, source }),
        }
    }

    async fn status(&self, stream_id: &str) -> Result<UnitStatus> {
        let unit = self.template.unit_name(stream_id);
        let output = self.run("status", &["status", &unit]).await?;

        Ok(output
            .lines()
            .filter_map(parse_status_line)
            .find(|(name, _)| *name == unit)
            .map(|(_, status)| status)
            .unwrap_or_else(UnitStatus::absent))
    }

    async fn error_tail(&self, stream_id: &str) -> Option<String> {
        read_log_tail(
            &self.template.stderr_log(stream_id),
            self.config.error_tail_bytes,
        )
        .await
    }

    async fn supervised_ids(&self) -> Result<Vec<String>> {
        let output = self.run("status", &["status"]).await?;

        Ok(output
            .lines()
            .filter_map(parse_status_line)
            .filter(|(_, status)| status.state != UnitState::Absent)
            .filter_map(|(name, _)| self.template.stream_id(&name).map(str::to_string))
            .collect())
    }
}
