//! Direct child-process backend
//!
//! Runs each transport pipeline as a child of this service instead of handing
//! it to supervisord. Definitions live in memory; captured output goes to the
//! same per-unit log files the supervisor backend uses. There is no automatic
//! restart: an exited child stays EXITED until the next start.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::pipeline::PipelineDescription;
use crate::stream::StreamConfig;

use super::backend::{ProcessBackend, Result, UnitState, UnitStatus};
use super::config::SupervisorConfig;
use super::error::SupervisorError;
use super::unit::{read_log_tail, UnitDefinition, UnitTemplate};

/// Grace period for a killed child to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

struct DirectUnit {
    definition: UnitDefinition,
    child: Option<Child>,
    started_at: Option<Instant>,
    last_exit: Option<String>,
    active: bool,
}

impl DirectUnit {
    fn new(definition: UnitDefinition) -> Self {
        Self {
            definition,
            child: None,
            started_at: None,
            last_exit: None,
            active: false,
        }
    }

    fn spawn(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let def = &self.definition;
        let spawn_err = |source| SupervisorError::Spawn {
            unit: def.name.clone(),
            source,
        };

        if let Some(dir) = def.stderr_log.parent() {
            std::fs::create_dir_all(dir).map_err(spawn_err)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&def.stdout_log)
            .map_err(spawn_err)?;
        let stderr = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&def.stderr_log)
            .map_err(spawn_err)?;

        let (program, args) = def
            .argv
            .split_first()
            .ok_or_else(|| SupervisorError::UnknownUnit(def.name.clone()))?;

        let child = Command::new(program)
            .args(args)
            .envs(def.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        tracing::debug!(unit = %def.name, pid = ?child.id(), "Child spawned");
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        self.last_exit = None;
        Ok(())
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                tracing::warn!(unit = %self.definition.name, "Child not reaped after kill");
            }
        }
        self.started_at = None;
    }

    fn status(&mut self, min_uptime: Duration) -> UnitStatus {
        let Some(child) = self.child.as_mut() else {
            return match self.last_exit {
                Some(ref reason) => UnitStatus::new(UnitState::Exited, reason.clone()),
                None => UnitStatus::new(UnitState::Stopped, "Not started"),
            };
        };

        match child.try_wait() {
            Ok(None) => {
                let pid = child.id().unwrap_or_default();
                let uptime = self
                    .started_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                let state = if uptime >= min_uptime {
                    UnitState::Running
                } else {
                    UnitState::Starting
                };
                UnitStatus::new(state, format!("pid {}, uptime {}s", pid, uptime.as_secs()))
            }
            Ok(Some(exit)) => {
                let reason = format!("exited: {}", exit);
                self.child = None;
                self.started_at = None;
                self.last_exit = Some(reason.clone());
                UnitStatus::new(UnitState::Exited, reason)
            }
            Err(e) => UnitStatus::new(UnitState::Unknown, e.to_string()),
        }
    }
}

/// Backend that runs transport processes as children of this service
pub struct DirectBackend {
    template: UnitTemplate,
    min_uptime: Duration,
    error_tail_bytes: usize,
    units: Mutex<HashMap<String, DirectUnit>>,
}

impl DirectBackend {
    /// Create a direct backend
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            template: UnitTemplate::new(config),
            min_uptime: config.min_uptime,
            error_tail_bytes: config.error_tail_bytes,
            units: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProcessBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn write_definition(
        &self,
        config: &StreamConfig,
        pipeline: &PipelineDescription,
        autostart: bool,
    ) -> Result<()> {
        let definition = self.template.definition(config, pipeline, autostart);
        let mut units = self.units.lock().await;

        match units.get_mut(&config.id) {
            Some(unit) => unit.definition = definition,
            None => {
                units.insert(config.id.clone(), DirectUnit::new(definition));
            }
        }
        Ok(())
    }

    async fn apply(&self, stream_id: &str) -> Result<()> {
        let mut units = self.units.lock().await;
        let unit = units
            .get_mut(stream_id)
            .ok_or_else(|| SupervisorError::UnknownUnit(self.template.unit_name(stream_id)))?;

        unit.active = true;
        if unit.definition.autostart {
            unit.spawn()?;
        }
        Ok(())
    }

    async fn start(&self, stream_id: &str) -> Result<()> {
        let mut units = self.units.lock().await;
        let unit = units
            .get_mut(stream_id)
            .ok_or_else(|| SupervisorError::UnknownUnit(self.template.unit_name(stream_id)))?;

        unit.active = true;
        unit.spawn()
    }

    async fn stop(&self, stream_id: &str) -> Result<()> {
        let mut units = self.units.lock().await;
        if let Some(unit) = units.get_mut(stream_id) {
            unit.kill().await;
            unit.last_exit = None;
        }
        Ok(())
    }

    async fn remove(&self, stream_id: &str) -> Result<()> {
        let mut units = self.units.lock().await;
        if let Some(unit) = units.get_mut(stream_id) {
            unit.kill().await;
            unit.active = false;
        }
        Ok(())
    }

    async fn delete_definition(&self, stream_id: &str) -> Result<()> {
        let mut units = self.units.lock().await;
        if let Some(mut unit) = units.remove(stream_id) {
            unit.kill().await;
        }
        Ok(())
    }

    async fn status(&self, stream_id: &str) -> Result<UnitStatus> {
        let mut units = self.units.lock().await;
        Ok(match units.get_mut(stream_id) {
            Some(unit) if unit.active => unit.status(self.min_uptime),
            _ => UnitStatus::absent(),
        })
    }

    async fn error_tail(&self, stream_id: &str) -> Option<String> {
        read_log_tail(&self.template.stderr_log(stream_id), self.error_tail_bytes).await
    }

    async fn supervised_ids(&self) -> Result<Vec<String>> {
        let units = self.units.lock().await;
        Ok(units
            .iter()
            .filter(|(_, unit)| unit.active)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
