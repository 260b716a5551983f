//! Reconciliation results and status aggregates

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::process::StreamStatus;
use crate::registry::UnreadableStream;
use crate::stream::config::DEFAULT_DEVICE;
use crate::stream::{StreamConfig, StreamKind};

/// One stream that could not be brought to its desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    /// Stream ID
    pub id: String,
    /// Error text
    pub error: String,
    /// Stream direction, if configured
    pub kind: Option<StreamKind>,
    /// Configured device
    pub device: String,
    /// `address:port`
    pub endpoint: String,
    /// Desired run state
    pub enabled: bool,
    /// One-line config summary
    pub summary: String,
}

impl ReconcileFailure {
    /// Record `error` against `config`
    pub fn new(config: &StreamConfig, error: impl ToString) -> Self {
        Self {
            id: config.id.clone(),
            error: error.to_string(),
            kind: config.kind,
            device: config.device_or_default().to_string(),
            endpoint: config.endpoint(),
            enabled: config.enabled,
            summary: config.summary(),
        }
    }

    /// Record a stored entry that could not be decoded
    ///
    /// The descriptive fields are read from the raw entry where present.
    pub fn unreadable(entry: &UnreadableStream) -> Self {
        let raw = entry.raw();
        let text = |key: &str| raw.get(key).and_then(Value::as_str);

        let device = text("device")
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_DEVICE)
            .to_string();
        let endpoint = format!(
            "{}:{}",
            text("multicastAddress").or_else(|| text("ip")).unwrap_or("?"),
            raw.get("port")
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".into())
        );
        let enabled = raw.get("enabled").and_then(Value::as_bool).unwrap_or(true);
        let summary = format!(
            "{} device={} endpoint={} enabled={}",
            text("kind").unwrap_or("?"),
            device,
            endpoint,
            enabled
        );

        Self {
            id: entry.id.clone(),
            error: entry.error.to_string(),
            kind: None,
            device,
            endpoint,
            enabled,
            summary,
        }
    }
}

/// Outcome of a full reconcile pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Streams in the desired set
    pub desired: usize,
    /// Streams that reached their desired state
    pub converged: usize,
    /// Orphaned streams that were removed
    pub removed: Vec<String>,
    /// Streams that did not converge, in registry order
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    /// Whether every desired stream converged
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Aggregate runtime status
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSummary {
    /// Streams whose process is up
    pub running_count: usize,
    /// Streams known to the engine
    pub total_streams: usize,
    /// Per-stream status by ID
    pub streams: BTreeMap<String, StreamStatus>,
}

impl FromIterator<StreamStatus> for StatusSummary {
    fn from_iter<I: IntoIterator<Item = StreamStatus>>(iter: I) -> Self {
        let streams: BTreeMap<_, _> = iter.into_iter().map(|s| (s.id.clone(), s)).collect();

        Self {
            running_count: streams.values().filter(|s| s.running).count(),
            total_streams: streams.len(),
            streams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StreamPhase;

    fn status(id: &str, running: bool) -> StreamStatus {
        StreamStatus {
            id: id.to_string(),
            kind: Some(StreamKind::Sender),
            enabled: true,
            state: if running {
                StreamPhase::Running
            } else {
                StreamPhase::Stopped
            },
            running,
            supervisor_state: String::new(),
            description: String::new(),
            pipeline: String::new(),
            message: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary: StatusSummary =
            vec![status("a", true), status("b", false), status("c", true)]
                .into_iter()
                .collect();

        assert_eq!(summary.running_count, 2);
        assert_eq!(summary.total_streams, 3);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["running_count"], 2);
        assert_eq!(json["streams"]["b"]["state"], "STOPPED");
    }

    #[test]
    fn test_failure_carries_config_summary() {
        let config = StreamConfig::new(StreamKind::Receiver, "239.1.1.1", 5004)
            .with_id("s-1")
            .device("card1");

        let failure = ReconcileFailure::new(&config, "device busy");

        assert_eq!(failure.id, "s-1");
        assert_eq!(failure.device, "card1");
        assert_eq!(failure.endpoint, "239.1.1.1:5004");
        assert!(failure.enabled);
        assert!(failure.summary.starts_with("receiver"));
    }
}
