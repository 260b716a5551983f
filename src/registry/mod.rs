//! Stream registry
//!
//! The registry is the source of truth for *desired* stream state. It holds
//! one JSON document per provider and serializes every change to it:
//!
//! ```text
//!   API / CLI ──► StreamStore ──► <dir>/aes67.json
//!                     │
//!                     └──list_all──► ReconcileEngine
//! ```
//!
//! Every write path validates its input, fills in defaults and assigns IDs
//! before anything reaches disk.

pub mod config;
pub mod error;
pub mod store;

pub use config::{RegistryConfig, DEFAULT_PROVIDER};
pub use error::RegistryError;
pub use store::{StoredStream, StreamStore, UnreadableStream};
