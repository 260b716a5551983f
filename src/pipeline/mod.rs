//! Transport pipeline construction
//!
//! ```text
//! sender:   alsasrc ─► caps ─► audioconvert ─► audioresample ─► rtpL24pay ─► udpsink
//! receiver: udpsrc ─► rtpjitterbuffer ─► rtpL24depay ─► audioconvert ─► alsasink
//! ```

pub mod builder;
pub mod device;

pub use builder::{PayloadEncoding, PipelineDescription};
pub use device::format_device;
