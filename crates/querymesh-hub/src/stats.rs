use chrono::{DateTime, Utc};
use querymesh_core::MessageType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

/// Default number of delivery records kept by the hub.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Delivery counters. Only the hub mutates these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicationStats {
    /// Sends recorded, delivered or not.
    pub total_messages: u64,
    /// Sends that reached their receiver.
    pub successful_deliveries: u64,
    /// Sends that failed or were evicted.
    pub failed_deliveries: u64,
    /// Running mean over successful deliveries, in milliseconds.
    pub average_latency_ms: f64,
    /// Messages dropped because a receiver's queue was full.
    pub evicted: u64,
    /// Sends per message type.
    pub message_types: BTreeMap<MessageType, u64>,
    /// sender → receiver → count.
    pub communication_matrix: BTreeMap<String, BTreeMap<String, u64>>,
}

impl CommunicationStats {
    pub(crate) fn record(
        &mut self,
        success: bool,
        latency: Duration,
        message_type: MessageType,
        sender: &str,
        receiver: &str,
    ) {
        self.total_messages += 1;
        if success {
            self.successful_deliveries += 1;
            let n = self.successful_deliveries as f64;
            let latency_ms = latency.as_secs_f64() * 1000.0;
            self.average_latency_ms = (self.average_latency_ms * (n - 1.0) + latency_ms) / n;
        } else {
            self.failed_deliveries += 1;
        }

        *self.message_types.entry(message_type).or_insert(0) += 1;
        *self
            .communication_matrix
            .entry(sender.to_string())
            .or_default()
            .entry(receiver.to_string())
            .or_insert(0) += 1;
    }

    /// Percentage of sends that were delivered.
    pub fn success_rate(&self) -> f64 {
        if self.total_messages == 0 {
            return 0.0;
        }
        (self.successful_deliveries as f64 / self.total_messages as f64) * 100.0
    }
}

/// One entry in the delivery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Id of the message sent.
    pub message_id: Uuid,
    /// Sending agent.
    pub sender: String,
    /// Receiving agent.
    pub receiver: String,
    /// Kind of message.
    pub message_type: MessageType,
    /// When the send finished.
    pub timestamp: DateTime<Utc>,
    /// Whether it was delivered.
    pub success: bool,
    /// Send latency.
    pub latency_ms: u64,
}

/// Fixed-capacity ring buffer of [`HistoryEntry`]s.
#[derive(Debug)]
pub struct MessageHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl MessageHistory {
    /// Empty history holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, dropping the oldest when full.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Read-only view of the hub's counters, queues, and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// See [`CommunicationStats::total_messages`].
    pub total_messages: u64,
    /// See [`CommunicationStats::successful_deliveries`].
    pub successful_deliveries: u64,
    /// See [`CommunicationStats::failed_deliveries`].
    pub failed_deliveries: u64,
    /// Delivered share of all sends, as a percentage.
    pub success_rate: f64,
    /// See [`CommunicationStats::average_latency_ms`].
    pub average_latency_ms: f64,
    /// See [`CommunicationStats::evicted`].
    pub evicted: u64,
    /// See [`CommunicationStats::message_types`].
    pub message_types: BTreeMap<MessageType, u64>,
    /// See [`CommunicationStats::communication_matrix`].
    pub communication_matrix: BTreeMap<String, BTreeMap<String, u64>>,
    /// Queue length per registered agent.
    pub queue_status: BTreeMap<String, usize>,
    /// Sends in flight.
    pub active_messages: usize,
    /// Highest number of simultaneously active sends observed.
    pub peak_active_messages: usize,
}
