//! Producer configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Bound on waiting for one adapter response (default: 2000)
    pub read_timeout_ms: u64,
    /// Pause between connection checks while the link is down
    pub disconnected_backoff_ms: u64,
    /// How long `stop()` lets the in-flight job drain before aborting
    pub stop_timeout_ms: u64,
    /// Event bus capacity per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 2000,
            disconnected_backoff_ms: 250,
            stop_timeout_ms: 5000,
            event_capacity: 256,
        }
    }
}

impl ProducerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn disconnected_backoff(&self) -> Duration {
        Duration::from_millis(self.disconnected_backoff_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
