use querymesh_core::Message;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Default per-agent queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// A bounded per-agent message queue with priority buckets.
///
/// Messages are kept twice: in arrival order (for eviction) and in one FIFO
/// bucket per priority (for dequeue). When the queue is full, the oldest
/// message is evicted from both.
#[derive(Debug)]
pub struct PriorityQueue {
    arrivals: VecDeque<(Uuid, u8)>,
    buckets: BTreeMap<u8, VecDeque<Message>>,
    capacity: usize,
}

impl PriorityQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            arrivals: VecDeque::new(),
            buckets: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add a message. Returns the message evicted to make room, if any.
    pub fn enqueue(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.arrivals.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.arrivals.push_back((message.id, message.priority));
        self.buckets
            .entry(message.priority)
            .or_default()
            .push_back(message);
        evicted
    }

    /// Remove the next message: lowest priority number first, FIFO within a priority.
    pub fn dequeue(&mut self) -> Option<Message> {
        let (&priority, bucket) = self.buckets.iter_mut().find(|(_, b)| !b.is_empty())?;
        let message = bucket.pop_front()?;
        if bucket.is_empty() {
            self.buckets.remove(&priority);
        }
        if let Some(pos) = self.arrivals.iter().position(|(id, _)| *id == message.id) {
            self.arrivals.remove(pos);
        }
        Some(message)
    }

    /// Look at the message `dequeue` would return.
    pub fn peek(&self) -> Option<&Message> {
        self.buckets.values().find_map(|b| b.front())
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    /// Maximum number of messages held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued message.
    pub fn clear(&mut self) {
        self.arrivals.clear();
        self.buckets.clear();
    }

    fn evict_oldest(&mut self) -> Option<Message> {
        let (id, priority) = self.arrivals.pop_front()?;
        let bucket = self.buckets.get_mut(&priority)?;
        let pos = bucket.iter().position(|m| m.id == id)?;
        let evicted = bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&priority);
        }
        evicted
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
