//! Runtime wrapper around one supervised transport process

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::pipeline::PipelineDescription;
use crate::stream::{StreamConfig, StreamKind, ValidationError};
use crate::supervisor::{ProcessBackend, SupervisorError, UnitState};

use super::diagnose::classify_failure;
use super::error::StreamError;
use super::state::StreamPhase;

/// Start verification timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTiming {
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Time allowed to reach RUNNING
    pub start_timeout: Duration,
}

impl Default for StartTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            start_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of a stream, computed from the backend on request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    /// Stream ID
    pub id: String,
    /// Stream direction
    pub kind: Option<StreamKind>,
    /// Desired run state
    pub enabled: bool,
    /// Lifecycle state
    pub state: StreamPhase,
    /// Whether the process is up
    pub running: bool,
    /// Raw supervisor state name
    pub supervisor_state: String,
    /// Supervisor description (pid, uptime, exit reason)
    pub description: String,
    /// Pipeline description
    pub pipeline: String,
    /// Last diagnostic, if any
    pub message: Option<String>,
}

/// One stream's process
///
/// Owned exclusively by the reconciliation engine; every method takes the
/// process through the supervisor backend.
pub struct StreamProcess {
    config: StreamConfig,
    pipeline: PipelineDescription,
    backend: Arc<dyn ProcessBackend>,
    timing: StartTiming,
    phase: StreamPhase,
    last_error: Option<String>,
}

impl StreamProcess {
    /// Build the pipeline for `config`; no backend call is made
    pub fn new(
        config: StreamConfig,
        backend: Arc<dyn ProcessBackend>,
        timing: StartTiming,
    ) -> Result<Self, ValidationError> {
        let pipeline = PipelineDescription::build(&config)?;

        Ok(Self {
            config,
            pipeline,
            backend,
            timing,
            phase: StreamPhase::Stopped,
            last_error: None,
        })
    }

    /// Stream ID
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Configuration this process was built from
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Constructed pipeline
    pub fn pipeline(&self) -> &PipelineDescription {
        &self.pipeline
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Diagnostic from the last failed start
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn transition(&mut self, to: StreamPhase) {
        debug_assert!(
            self.phase.can_transition(to),
            "illegal transition {} -> {}",
            self.phase,
            to
        );
        tracing::trace!(stream = %self.config.id, from = %self.phase, to = %to, "Phase change");
        self.phase = to;
    }

    /// Start the stream and wait for it to come up
    ///
    /// Writes the unit with autostart on, applies it, then polls until RUNNING
    /// or the start timeout. On failure the unit is torn down before the
    /// error is returned and the process is left in ERROR.
    pub async fn start(&mut self) -> Result<(), StreamError> {
        if self.phase == StreamPhase::Running {
            tracing::debug!(stream = %self.config.id, "Start requested for running stream");
            return Ok(());
        }

        self.transition(StreamPhase::Starting);
        self.last_error = None;

        tracing::info!(
            stream = %self.config.id,
            backend = self.backend.name(),
            pipeline = %self.pipeline,
            "Starting stream"
        );

        match self.launch().await {
            Ok(()) => {
                self.transition(StreamPhase::Running);
                tracing::info!(stream = %self.config.id, "Stream running");
                Ok(())
            }
            Err(err) => {
                if let Err(e) = self.teardown().await {
                    tracing::warn!(
                        stream = %self.config.id,
                        error = %e,
                        "Cleanup after failed start did not complete"
                    );
                }
                self.last_error = Some(match err {
                    StreamError::StartFailed { ref message, .. } => message.clone(),
                    ref other => other.to_string(),
                });
                self.transition(StreamPhase::Error);

                tracing::error!(stream = %self.config.id, error = %err, "Stream failed to start");
                Err(err)
            }
        }
    }

    async fn launch(&self) -> Result<(), StreamError> {
        let id = self.config.id.as_str();

        self.backend
            .write_definition(&self.config, &self.pipeline, true)
            .await?;
        self.backend.apply(id).await?;

        let deadline = Instant::now() + self.timing.start_timeout;
        let mut kicked = false;

        let last = loop {
            let status = self.backend.status(id).await?;

            if status.is_running() {
                return Ok(());
            }
            if status.state.is_terminal_failure() || Instant::now() >= deadline {
                break status;
            }
            if status.state == UnitState::Stopped && !kicked {
                kicked = true;
                self.backend.start(id).await?;
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        };

        let tail = self.backend.error_tail(id).await;
        Err(StreamError::StartFailed {
            id: id.to_string(),
            message: classify_failure(tail.as_deref(), &self.config, last.state_name()),
        })
    }

    /// Stop, drop from the active set, and rewrite the unit with autostart off
    ///
    /// Every step is attempted even if an earlier one fails; the first error
    /// is returned.
    async fn teardown(&self) -> Result<(), SupervisorError> {
        let id = self.config.id.as_str();

        let stopped = self.backend.stop(id).await;
        let removed = self.backend.remove(id).await;
        let rewritten = self
            .backend
            .write_definition(&self.config, &self.pipeline, false)
            .await;

        stopped.and(removed).and(rewritten)
    }

    /// Stop the stream, keeping its definition with autostart off
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        self.teardown().await?;
        self.transition(StreamPhase::Stopped);

        tracing::info!(stream = %self.config.id, "Stream stopped");
        Ok(())
    }

    /// Make sure a disabled stream has an autostart-off definition on disk
    pub async fn park(&mut self) -> Result<(), SupervisorError> {
        self.backend
            .write_definition(&self.config, &self.pipeline, false)
            .await?;
        self.transition(StreamPhase::Stopped);

        tracing::debug!(stream = %self.config.id, "Stream parked (disabled)");
        Ok(())
    }

    /// Stop the stream and delete its definition
    pub async fn destroy(&mut self) -> Result<(), SupervisorError> {
        let id = self.config.id.as_str();

        let stopped = self.backend.stop(id).await;
        let removed = self.backend.remove(id).await;
        let deleted = self.backend.delete_definition(id).await;
        stopped.and(removed).and(deleted)?;

        self.transition(StreamPhase::Stopped);
        tracing::info!(stream = %self.config.id, "Stream removed");
        Ok(())
    }

    /// Query the backend for the stream's current condition
    pub async fn status(&self) -> StreamStatus {
        let mut status = StreamStatus {
            id: self.config.id.clone(),
            kind: self.config.kind,
            enabled: self.config.enabled,
            state: self.phase,
            running: false,
            supervisor_state: UnitState::Unknown.name().to_string(),
            description: String::new(),
            pipeline: self.pipeline.to_string(),
            message: self.last_error.clone(),
        };

        match self.backend.status(&self.config.id).await {
            Ok(unit) => {
                status.running = unit.is_running();
                status.state = match self.phase {
                    // A failed start stays ERROR until the next attempt
                    StreamPhase::Error if !status.running => StreamPhase::Error,
                    _ => StreamPhase::from_unit(unit.state),
                };
                status.supervisor_state = unit.state_name().to_string();
                status.description = unit.description;

                if status.message.is_none() && unit.state.is_terminal_failure() {
                    let tail = self.backend.error_tail(&self.config.id).await;
                    status.message = Some(classify_failure(
                        tail.as_deref(),
                        &self.config,
                        unit.state.name(),
                    ));
                }
            }
            Err(e) => {
                status.state = StreamPhase::Error;
                status.message = Some(e.to_string());
            }
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::supervisor::backend::Result as BackendResult;
    use crate::supervisor::UnitStatus;

    /// Backend whose status answers come from a script
    #[derive(Default)]
    struct ScriptedBackend {
        statuses: Mutex<Vec<UnitState>>,
        calls: Mutex<Vec<String>>,
        definitions: Mutex<HashMap<String, bool>>,
        tail: Option<String>,
    }

    impl ScriptedBackend {
        fn with_states(states: &[UnitState]) -> Self {
            Self {
                statuses: Mutex::new(states.iter().rev().copied().collect()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().push(call.to_string());
        }
    }

    #[async_trait]
    impl ProcessBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn write_definition(
            &self,
            config: &StreamConfig,
            _pipeline: &PipelineDescription,
            autostart: bool,
        ) -> BackendResult<()> {
            self.record(if autostart { "write:on" } else { "write:off" });
            self.definitions.lock().insert(config.id.clone(), autostart);
            Ok(())
        }

        async fn apply(&self, _id: &str) -> BackendResult<()> {
            self.record("apply");
            Ok(())
        }

        async fn start(&self, _id: &str) -> BackendResult<()> {
            self.record("start");
            Ok(())
        }

        async fn stop(&self, _id: &str) -> BackendResult<()> {
            self.record("stop");
            Ok(())
        }

        async fn remove(&self, _id: &str) -> BackendResult<()> {
            self.record("remove");
            Ok(())
        }

        async fn delete_definition(&self, id: &str) -> BackendResult<()> {
            self.record("delete");
            self.definitions.lock().remove(id);
            Ok(())
        }

        async fn status(&self, _id: &str) -> BackendResult<UnitStatus> {
            let mut statuses = self.statuses.lock();
            // The last scripted state repeats forever
            let state = if statuses.len() > 1 {
                statuses.pop().unwrap()
            } else {
                statuses.last().copied().unwrap_or(UnitState::Absent)
            };
            Ok(UnitStatus::new(state, ""))
        }

        async fn error_tail(&self, _id: &str) -> Option<String> {
            self.tail.clone()
        }

        async fn supervised_ids(&self) -> BackendResult<Vec<String>> {
            Ok(self.definitions.lock().keys().cloned().collect())
        }
    }

    fn timing() -> StartTiming {
        StartTiming {
            poll_interval: Duration::from_millis(5),
            start_timeout: Duration::from_millis(100),
        }
    }

    fn config() -> StreamConfig {
        StreamConfig::new(StreamKind::Sender, "239.69.0.1", 5004)
            .with_id("s-1")
            .device("hw:0,0")
    }

    #[tokio::test]
    async fn test_start_reaches_running() {
        let backend = Arc::new(ScriptedBackend::with_states(&[
            UnitState::Starting,
            UnitState::Starting,
            UnitState::Running,
        ]));
        let mut process = StreamProcess::new(config(), backend.clone(), timing()).unwrap();

        tokio_test::assert_ok!(process.start().await);

        assert_eq!(process.phase(), StreamPhase::Running);
        assert_eq!(&backend.calls()[..2], &["write:on", "apply"]);
        assert!(process.last_error().is_none());
    }

    #[tokio::test]
    async fn test_start_timeout_cleans_up() {
        let backend = Arc::new(ScriptedBackend::with_states(&[UnitState::Starting]));
        let mut process = StreamProcess::new(config(), backend.clone(), timing()).unwrap();

        let err = tokio_test::assert_err!(process.start().await);

        assert!(matches!(err, StreamError::StartFailed { .. }));
        assert!(!err.to_string().is_empty());
        assert_eq!(process.phase(), StreamPhase::Error);
        assert!(process.last_error().unwrap().contains("STARTING"));

        let calls = backend.calls();
        assert!(calls.ends_with(&[
            "stop".to_string(),
            "remove".to_string(),
            "write:off".to_string()
        ]));
        assert_eq!(backend.definitions.lock().get("s-1"), Some(&false));
    }

    #[tokio::test]
    async fn test_fatal_is_classified() {
        let backend = Arc::new(ScriptedBackend {
            tail: Some("alsasrc0: Device or resource busy".into()),
            ..ScriptedBackend::with_states(&[UnitState::Starting, UnitState::Fatal])
        });
        let mut process = StreamProcess::new(config(), backend, timing()).unwrap();

        let err = process.start().await.unwrap_err();

        assert!(err.to_string().contains("busy"));
        assert_eq!(process.phase(), StreamPhase::Error);
    }

    #[tokio::test]
    async fn test_stopped_unit_is_kicked_once() {
        let backend = Arc::new(ScriptedBackend::with_states(&[
            UnitState::Stopped,
            UnitState::Stopped,
            UnitState::Running,
        ]));
        let mut process = StreamProcess::new(config(), backend.clone(), timing()).unwrap();

        process.start().await.unwrap();

        let starts = backend.calls().iter().filter(|c| *c == "start").count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_error_then_restart() {
        let backend = Arc::new(ScriptedBackend::with_states(&[UnitState::Fatal]));
        let mut process = StreamProcess::new(config(), backend.clone(), timing()).unwrap();
        assert!(process.start().await.is_err());

        *backend.statuses.lock() = vec![UnitState::Running];
        process.start().await.unwrap();

        assert_eq!(process.phase(), StreamPhase::Running);
        assert!(process.last_error().is_none());
    }

    #[tokio::test]
    async fn test_stop_keeps_definition() {
        let backend = Arc::new(ScriptedBackend::with_states(&[UnitState::Running]));
        let mut process = StreamProcess::new(config(), backend.clone(), timing()).unwrap();
        process.start().await.unwrap();

        process.stop().await.unwrap();

        assert_eq!(process.phase(), StreamPhase::Stopped);
        assert_eq!(backend.definitions.lock().get("s-1"), Some(&false));

        process.destroy().await.unwrap();
        assert!(backend.definitions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_projection() {
        let backend = Arc::new(ScriptedBackend {
            tail: Some("reason not-negotiated".into()),
            ..ScriptedBackend::with_states(&[UnitState::Fatal])
        });
        let process = StreamProcess::new(config(), backend, timing()).unwrap();

        let status = process.status().await;

        assert_eq!(status.state, StreamPhase::Error);
        assert!(!status.running);
        assert_eq!(status.supervisor_state, "FATAL");
        assert!(status.pipeline.starts_with("alsasrc"));
        assert!(status.message.unwrap().contains("does not support"));
    }

    #[tokio::test]
    async fn test_failed_start_reports_error_after_cleanup() {
        let backend = Arc::new(ScriptedBackend::with_states(&[UnitState::Fatal]));
        let mut process = StreamProcess::new(config(), backend.clone(), timing()).unwrap();
        assert!(process.start().await.is_err());

        *backend.statuses.lock() = vec![UnitState::Absent];
        let status = process.status().await;

        assert_eq!(status.state, StreamPhase::Error);
        assert_eq!(status.supervisor_state, "ABSENT");
        assert!(status.message.is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = config();
        config.port = None;

        let result = StreamProcess::new(config, backend, timing());
        assert!(matches!(result, Err(ValidationError::MissingField("port"))));
    }
}
