use querymesh_core::{Message, MessageType};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Middleware chain used when a rule does not list any.
pub const DEFAULT_MIDDLEWARE: [&str; 2] = ["validation", "logging"];

/// How a matched message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Enqueue for the named receiver.
    #[default]
    Direct,
    /// Copy to every registered agent except the sender.
    Broadcast,
    /// Pick a receiver by hashing the message id.
    RoundRobin,
    /// Pick the receiver with the shortest queue.
    LoadBalanced,
}

/// A routing rule. Rules are matched in registration order; the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// `*` or an exact sender name.
    #[serde(default = "wildcard")]
    pub sender_pattern: String,
    /// `*` or an exact receiver name.
    #[serde(default = "wildcard")]
    pub receiver_pattern: String,
    /// Only match this message type when set.
    #[serde(default)]
    pub message_type: Option<MessageType>,
    /// How matched messages are delivered.
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Middleware names, run in order. Empty means [`DEFAULT_MIDDLEWARE`].
    #[serde(default)]
    pub middleware: Vec<String>,
    /// Budget for the middleware chain plus delivery.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    /// Carried for configuration compatibility. Delivery is attempted once.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn wildcard() -> String {
    "*".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_count() -> u32 {
    3
}

impl Default for RoutingRule {
    fn default() -> Self {
        Self {
            sender_pattern: wildcard(),
            receiver_pattern: wildcard(),
            message_type: None,
            strategy: RoutingStrategy::Direct,
            middleware: Vec::new(),
            timeout: default_timeout(),
            retry_count: default_retry_count(),
        }
    }
}

impl RoutingRule {
    /// A rule matching `sender` → `receiver` (either may be `*`).
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            sender_pattern: sender.into(),
            receiver_pattern: receiver.into(),
            ..Default::default()
        }
    }

    /// Set the delivery strategy.
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Only match messages of `message_type`.
    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    /// Replace the middleware chain.
    pub fn with_middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the delivery budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this rule applies to `message`.
    pub fn matches(&self, message: &Message) -> bool {
        match_pattern(&message.sender, &self.sender_pattern)
            && match_pattern(&message.receiver, &self.receiver_pattern)
            && self.message_type.map_or(true, |t| t == message.message_type)
    }

    /// The middleware names to run, falling back to the default chain.
    pub fn middleware_chain(&self) -> Vec<&str> {
        if self.middleware.is_empty() {
            DEFAULT_MIDDLEWARE.to_vec()
        } else {
            self.middleware.iter().map(String::as_str).collect()
        }
    }
}

fn match_pattern(value: &str, pattern: &str) -> bool {
    pattern == "*" || value == pattern
}

/// Find the rule for `message`, or the implicit match-all default.
pub fn find_rule(rules: &[RoutingRule], message: &Message) -> RoutingRule {
    rules
        .iter()
        .find(|rule| rule.matches(message))
        .cloned()
        .unwrap_or_default()
}

/// Deterministic 64-bit FNV-1a hash of a message id, used for round-robin picks.
pub fn id_hash(id: &Uuid) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    id.as_bytes()
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Whole seconds.
    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    /// From whole seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
