use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::stats::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a [`Hub`](crate::Hub).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Sends allowed in flight at once before `send` starts pausing.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_messages: usize,
    /// Per-agent queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Background loop tick.
    #[serde(default = "default_poll_tick_ms")]
    pub poll_tick_ms: u64,
    /// Pause between concurrency-cap re-checks in `send`.
    #[serde(default = "default_backpressure_ms")]
    pub backpressure_ms: u64,
    /// Delivery history entries retained.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_max_concurrent() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_poll_tick_ms() -> u64 {
    100
}

fn default_backpressure_ms() -> u64 {
    100
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            poll_tick_ms: default_poll_tick_ms(),
            backpressure_ms: default_backpressure_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl HubConfig {
    /// Set the concurrent-send cap.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_messages = max;
        self
    }

    /// Set the per-agent queue bound.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the background loop tick.
    pub fn with_poll_tick(mut self, tick: Duration) -> Self {
        self.poll_tick_ms = tick.as_millis() as u64;
        self
    }

    /// Set the pause taken while the concurrency cap is reached.
    pub fn with_backpressure(mut self, pause: Duration) -> Self {
        self.backpressure_ms = pause.as_millis() as u64;
        self
    }

    /// Background loop tick, at least 1ms.
    pub fn poll_tick(&self) -> Duration {
        Duration::from_millis(self.poll_tick_ms.max(1))
    }

    /// Backpressure pause, at least 1ms.
    pub fn backpressure(&self) -> Duration {
        Duration::from_millis(self.backpressure_ms.max(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.max_concurrent_messages, 100);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.history_capacity, 10_000);
        assert_eq!(config.poll_tick(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: HubConfig =
            serde_json::from_str(r#"{"max_concurrent_messages": 4, "poll_tick_ms": 0}"#).unwrap();
        assert_eq!(config.max_concurrent_messages, 4);
        assert_eq!(config.queue_capacity, 1000);
        // A zero tick would spin the loop.
        assert_eq!(config.poll_tick(), Duration::from_millis(1));
    }
}
