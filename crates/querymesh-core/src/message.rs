use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Message priorities. Lower numbers are dequeued first.
pub struct Priority;

impl Priority {
    /// System errors and other work that must jump the queue.
    pub const URGENT: u8 = 1;
    /// Core workflow steps.
    pub const HIGH: u8 = 2;
    /// Regular traffic.
    pub const NORMAL: u8 = 3;
    /// Logging, monitoring, and other background chatter.
    pub const LOW: u8 = 4;
    /// Priority assigned when the sender does not pick one.
    pub const DEFAULT: u8 = 5;
}

/// Kind of message exchanged between agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Work request.
    Request,
    /// Work result.
    Response,
    /// Status notification.
    Notification,
    /// Error report.
    Error,
    /// Feedback request.
    Feedback,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Request => write!(f, "request"),
            MessageType::Response => write!(f, "response"),
            MessageType::Notification => write!(f, "notification"),
            MessageType::Error => write!(f, "error"),
            MessageType::Feedback => write!(f, "feedback"),
        }
    }
}

/// A single message routed between agents by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// Name of the sending agent.
    pub sender: String,
    /// Name of the receiving agent.
    pub receiver: String,
    /// What kind of message this is.
    pub message_type: MessageType,
    /// Opaque payload.
    pub content: serde_json::Value,
    /// Arbitrary key-value metadata attached by senders and middleware.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Groups a request with every message produced in answer to it.
    /// Defaults to the message's own id.
    pub correlation_id: Uuid,
    /// 1 = highest.
    pub priority: u8,
    /// Optional processing budget for the receiver.
    #[serde(default, with = "duration_ms_opt")]
    pub timeout: Option<Duration>,
}

impl Message {
    /// Creates a new message. The correlation id starts out equal to the message id.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        message_type: MessageType,
        content: serde_json::Value,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            sender: sender.into(),
            receiver: receiver.into(),
            message_type,
            content,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            correlation_id: id,
            priority: Priority::DEFAULT,
            timeout: None,
        }
    }

    /// Creates a new [`MessageType::Request`].
    pub fn request(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(sender, receiver, MessageType::Request, content)
    }

    /// Creates a new [`MessageType::Notification`].
    pub fn notification(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(sender, receiver, MessageType::Notification, content)
    }

    /// Sets the priority (1 = highest).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the processing timeout hint.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the correlation id explicitly.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Builds the response to this message, addressed back to the sender.
    pub fn reply(&self, content: serde_json::Value) -> Self {
        self.answer(MessageType::Response, content)
    }

    /// Builds an error report in answer to this message.
    pub fn error_reply(&self, error: impl Into<String>) -> Self {
        self.answer(
            MessageType::Error,
            serde_json::json!({ "success": false, "error": error.into() }),
        )
    }

    /// Clones this message for a different receiver under a fresh id.
    /// The correlation id is kept.
    pub fn fork_to(&self, receiver: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            receiver: receiver.into(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    fn answer(&self, message_type: MessageType, content: serde_json::Value) -> Self {
        let mut msg = Self::new(self.receiver.clone(), self.sender.clone(), message_type, content);
        msg.correlation_id = self.correlation_id;
        msg.priority = self.priority;
        msg
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Milliseconds, or null.
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    /// From milliseconds or null.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
