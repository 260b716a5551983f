//! Declarative AES67 stream management
//!
//! Streams are declared in a per-provider JSON registry. The reconciliation
//! engine turns each declaration into a GStreamer transport pipeline and
//! keeps one supervised process per stream running, stopped or removed to
//! match.
//!
//! ```text
//!   StreamService ──► StreamStore (aes67.json)
//!        │
//!        ▼
//!   ReconcileEngine ──► StreamProcess ──► PipelineDescription
//!                            │
//!                            ▼
//!                  dyn ProcessBackend (supervisord | direct)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stagepi_streams::{AppConfig, StreamConfig, StreamKind, StreamService};
//!
//! # async fn run() -> stagepi_streams::Result<()> {
//! let service = StreamService::from_config(&AppConfig::default())?;
//! service.initialize().await?;
//!
//! let stream = StreamConfig::new(StreamKind::Sender, "239.69.0.1", 5004).device("hw:0,0");
//! let created = service.create(stream).await?;
//! println!("started {}", created.id);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod stream;
pub mod supervisor;

pub use api::{ApiError, StreamService};
pub use config::AppConfig;
pub use engine::{EngineConfig, ReconcileEngine, ReconcileFailure, ReconcileReport, StatusSummary};
pub use error::{Error, Result};
pub use pipeline::PipelineDescription;
pub use process::{StreamPhase, StreamProcess, StreamStatus};
pub use registry::{RegistryConfig, StreamStore};
pub use stream::{StreamConfig, StreamKind, StreamPatch, ValidationError};
pub use supervisor::{build_backend, ProcessBackend, SupervisorConfig};
