use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Persistence worker and client tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// How long to wait for the worker's `ready` broadcast.
    pub ready_timeout_ms: u64,
    /// Maximum time a batched save waits before being written.
    pub batch_max_latency_ms: u64,
    /// Batched saves that force an immediate write.
    pub batch_max_states: usize,
    /// Capacity of the request queue.
    pub request_queue_bound: usize,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            ready_timeout_ms: 5_000,
            batch_max_latency_ms: 250,
            batch_max_states: 16,
            request_queue_bound: 256,
        }
    }
}

impl PersistConfig {
    /// [`Self::request_timeout_ms`] as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// [`Self::ready_timeout_ms`] as a duration.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// [`Self::batch_max_latency_ms`] as a duration.
    pub fn batch_latency(&self) -> Duration {
        Duration::from_millis(self.batch_max_latency_ms)
    }
}
