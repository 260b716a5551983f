//! Process supervisor adapter
//!
//! Maps a stream to a supervised unit and controls it. Two strategies sit
//! behind the same [`ProcessBackend`] interface and are chosen when the
//! service is composed:
//!
//! ```text
//!                    Arc<dyn ProcessBackend>
//!                 ┌────────────┴────────────┐
//!                 ▼                         ▼
//!         SupervisorAdapter            DirectBackend
//!   conf.d/stream-<id>.conf          tokio::process::Child
//!   supervisorctl reread/update      per stream
//! ```

pub mod backend;
pub mod config;
pub mod ctl;
pub mod direct;
pub mod environment;
pub mod error;
pub mod unit;

use std::sync::Arc;

pub use backend::{ProcessBackend, UnitState, UnitStatus};
pub use config::{BackendKind, SupervisorConfig};
pub use ctl::SupervisorAdapter;
pub use direct::DirectBackend;
pub use environment::resolve_environment;
pub use error::SupervisorError;
pub use unit::{UnitDefinition, UnitTemplate};

/// Build the backend selected by `config.backend`
pub fn build_backend(config: &SupervisorConfig) -> Arc<dyn ProcessBackend> {
    match config.backend {
        BackendKind::Supervisor => Arc::new(SupervisorAdapter::new(config.clone())),
        BackendKind::Direct => Arc::new(DirectBackend::new(config)),
    }
}
