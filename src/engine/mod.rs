//! Reconciliation engine
//!
//! ```text
//!                 Arc<ReconcileEngine>
//!            ┌──────────────────────────────┐
//!            │ slots: HashMap<id,           │
//!            │   Mutex<Option<StreamProcess>>│
//!            │ >                            │
//!            │ permits: Semaphore           │
//!            └──────────────┬───────────────┘
//!                           │
//!      StreamStore ──list──►│──sync_one──► ProcessBackend
//!                           │
//!                 startup_failures / status_all
//! ```

pub mod config;
pub mod reconcile;
pub mod report;

pub use config::EngineConfig;
pub use reconcile::ReconcileEngine;
pub use report::{ReconcileFailure, ReconcileReport, StatusSummary};
