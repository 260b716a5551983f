//! Stream processes
//!
//! A [`StreamProcess`] wraps one stream's supervised unit: it builds the
//! pipeline, writes and applies the unit, verifies the start, and turns
//! captured error output into an actionable message when the start fails.

pub mod diagnose;
pub mod error;
pub mod state;
pub mod stream;

pub use diagnose::{classify_failure, FailureKind};
pub use error::StreamError;
pub use state::StreamPhase;
pub use stream::{StartTiming, StreamProcess, StreamStatus};
