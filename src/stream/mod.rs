//! Stream configuration model
//!
//! A stream is one directional AES67 audio flow: a sender captures a local
//! device and multicasts RTP, a receiver joins a group and plays it out.

pub mod config;
pub mod error;
pub mod id;

pub use config::{StreamConfig, StreamKind, StreamPatch};
pub use error::ValidationError;
pub use id::{generate_stream_id, generate_unique_id};
