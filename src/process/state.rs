//! Stream process state machine
//!
//! ```text
//!   STOPPED ──start──► STARTING ──running──► RUNNING
//!      ▲                  │                    │
//!      │                  └──fail──► ERROR     │
//!      │                              │        │
//!      └─────────────stop─────────────┴────────┘
//!                  ERROR ──start──► STARTING
//! ```

use std::fmt;

use serde::Serialize;

use crate::supervisor::UnitState;

/// Runtime condition of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamPhase {
    /// Not running
    Stopped,
    /// Launched, waiting for the process to come up
    Starting,
    /// Process is up
    Running,
    /// Last start attempt failed
    Error,
}

impl StreamPhase {
    /// Whether `self -> to` is a legal transition
    pub fn can_transition(self, to: StreamPhase) -> bool {
        use StreamPhase::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Error, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (_, Stopped)
        )
    }

    /// Project a supervisor state onto the stream lifecycle
    pub fn from_unit(state: UnitState) -> Self {
        match state {
            UnitState::Running => StreamPhase::Running,
            UnitState::Starting | UnitState::Backoff => StreamPhase::Starting,
            UnitState::Exited | UnitState::Fatal | UnitState::Unknown => StreamPhase::Error,
            UnitState::Stopped | UnitState::Stopping | UnitState::Absent => StreamPhase::Stopped,
        }
    }

    /// Upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamPhase::Stopped => "STOPPED",
            StreamPhase::Starting => "STARTING",
            StreamPhase::Running => "RUNNING",
            StreamPhase::Error => "ERROR",
        }
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
