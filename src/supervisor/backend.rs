//! Process backend capability interface
//!
//! A backend owns the per-stream units: it persists their definitions,
//! starts and stops them, and reports what the process is doing. All
//! operations are idempotent: stopping a stopped unit or removing an absent
//! one succeeds.

use std::fmt;

use async_trait::async_trait;

use crate::pipeline::PipelineDescription;
use crate::stream::StreamConfig;

use super::error::SupervisorError;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Supervisor-reported unit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Defined, not running
    Stopped,
    /// Spawned, not yet past its minimum uptime
    Starting,
    /// Up and past its minimum uptime
    Running,
    /// Exited during startup, retry pending
    Backoff,
    /// Stop in progress
    Stopping,
    /// Exited after having started
    Exited,
    /// Gave up after exhausting restart attempts
    Fatal,
    /// Supervisor could not tell
    Unknown,
    /// No such unit in the supervisor's active set
    Absent,
}

impl UnitState {
    /// Parse a supervisord state name
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "STOPPED" => UnitState::Stopped,
            "STARTING" => UnitState::Starting,
            "RUNNING" => UnitState::Running,
            "BACKOFF" => UnitState::Backoff,
            "STOPPING" => UnitState::Stopping,
            "EXITED" => UnitState::Exited,
            "FATAL" => UnitState::Fatal,
            "ABSENT" => UnitState::Absent,
            _ => UnitState::Unknown,
        }
    }

    /// Supervisord-style state name
    pub fn name(&self) -> &'static str {
        match self {
            UnitState::Stopped => "STOPPED",
            UnitState::Starting => "STARTING",
            UnitState::Running => "RUNNING",
            UnitState::Backoff => "BACKOFF",
            UnitState::Stopping => "STOPPING",
            UnitState::Exited => "EXITED",
            UnitState::Fatal => "FATAL",
            UnitState::Unknown => "UNKNOWN",
            UnitState::Absent => "ABSENT",
        }
    }

    /// The process is up
    pub fn is_running(&self) -> bool {
        *self == UnitState::Running
    }

    /// The process will not reach RUNNING without another start
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            UnitState::Exited | UnitState::Fatal | UnitState::Unknown
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Current state
    pub state: UnitState,
    /// Free-text diagnostic from the supervisor (pid/uptime, exit reason)
    pub description: String,
}

impl UnitStatus {
    /// Create a status
    pub fn new(state: UnitState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }

    /// Status of a unit the supervisor does not know
    pub fn absent() -> Self {
        Self::new(UnitState::Absent, "")
    }

    /// State name
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Whether the process is up
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// Capability interface over a process strategy
///
/// Units are addressed by stream ID; the backend derives the unit name.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Create or refresh the unit definition for a stream
    async fn write_definition(
        &self,
        config: &StreamConfig,
        pipeline: &PipelineDescription,
        autostart: bool,
    ) -> Result<()>;

    /// Make the supervisor pick up the current definition
    async fn apply(&self, stream_id: &str) -> Result<()>;

    /// Start the unit
    async fn start(&self, stream_id: &str) -> Result<()>;

    /// Stop the unit
    async fn stop(&self, stream_id: &str) -> Result<()>;

    /// Drop the unit from the active set, keeping its definition
    async fn remove(&self, stream_id: &str) -> Result<()>;

    /// Delete the unit definition
    async fn delete_definition(&self, stream_id: &str) -> Result<()>;

    /// Query the unit state
    async fn status(&self, stream_id: &str) -> Result<UnitStatus>;

    /// Tail of the unit's captured error output, if any
    async fn error_tail(&self, stream_id: &str) -> Option<String>;

    /// Stream IDs of every unit currently in the active set
    async fn supervised_ids(&self) -> Result<Vec<String>>;
}
