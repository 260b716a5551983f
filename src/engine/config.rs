//! Reconciliation engine configuration

use std::time::Duration;

use serde::Deserialize;

use crate::process::StartTiming;

/// Reconciliation engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between status polls while verifying a start
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Time a stream has to reach RUNNING
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,

    /// Streams synced in parallel during a full reconcile
    pub max_concurrent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timing = StartTiming::default();
        Self {
            poll_interval: timing.poll_interval,
            start_timeout: timing.start_timeout,
            max_concurrent: 4,
        }
    }
}

impl EngineConfig {
    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the start timeout
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set the batch concurrency limit
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Start verification timing handed to each stream process
    pub fn timing(&self) -> StartTiming {
        StartTiming {
            poll_interval: self.poll_interval,
            start_timeout: self.start_timeout,
        }
    }
}
