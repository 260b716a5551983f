//! Start failure classification
//!
//! The only place that inspects captured process output. Signatures are
//! checked in table order; the first match wins.

use crate::pipeline::builder::NETWORK_SAMPLE_RATE;
use crate::pipeline::format_device;
use crate::stream::StreamConfig;

/// Longest raw output excerpt surfaced when no signature matches
pub const MAX_RAW_TAIL_CHARS: usize = 512;

/// Known failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Another process holds the device
    DeviceBusy,
    /// The device exists but cannot be opened
    DeviceUnavailable,
    /// No such device
    DeviceMissing,
    /// The hardware rejected the requested format
    FormatUnsupported,
}

/// Output fragments identifying one failure kind (matched case-insensitively)
#[derive(Debug)]
pub struct FailureSignature {
    /// Failure kind
    pub kind: FailureKind,
    /// Lower-case fragments, any of which identifies the kind
    pub patterns: &'static [&'static str],
}

/// Signature table in priority order
pub const SIGNATURES: &[FailureSignature] = &[
    FailureSignature {
        kind: FailureKind::DeviceBusy,
        patterns: &[
            "device or resource busy",
            "being used by another",
            "device is busy",
        ],
    },
    FailureSignature {
        kind: FailureKind::DeviceUnavailable,
        patterns: &["could not open audio device", "could not open resource"],
    },
    FailureSignature {
        kind: FailureKind::DeviceMissing,
        patterns: &["no such file or directory", "no such device", "does not exist"],
    },
    FailureSignature {
        kind: FailureKind::FormatUnsupported,
        patterns: &[
            "not-negotiated",
            "not negotiated",
            "invalid argument",
            "format",
        ],
    },
];

/// Match captured output against the signature table
pub fn match_signature(output: &str) -> Option<FailureKind> {
    let lowered = output.to_lowercase();
    SIGNATURES
        .iter()
        .find(|sig| sig.patterns.iter().any(|p| lowered.contains(p)))
        .map(|sig| sig.kind)
}

/// Produce an operator-facing message for a failed start
pub fn classify_failure(tail: Option<&str>, config: &StreamConfig, last_state: &str) -> String {
    let device = format_device(config.device_or_default());

    let tail = match tail.map(str::trim).filter(|t| !t.is_empty()) {
        Some(tail) => tail,
        None => {
            return format!(
                "stream failed to reach RUNNING state (last state: {})",
                last_state
            )
        }
    };

    match match_signature(tail) {
        Some(FailureKind::DeviceBusy) => format!(
            "audio device '{}' is busy: it is already in use by another process",
            device
        ),
        Some(FailureKind::DeviceUnavailable) => format!(
            "audio device '{}' could not be opened; check that it is connected and enabled",
            device
        ),
        Some(FailureKind::DeviceMissing) => format!(
            "audio device '{}' does not exist; check the device name",
            device
        ),
        Some(FailureKind::FormatUnsupported) => format!(
            "audio device '{}' does not support {} with {} channel(s) at {} Hz",
            device, config.format, config.channels, NETWORK_SAMPLE_RATE
        ),
        None => format!("pipeline error: {}", last_chars(tail, MAX_RAW_TAIL_CHARS)),
    }
}

fn last_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}
