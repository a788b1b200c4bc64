use crate::routing::RoutingRule;
use async_trait::async_trait;
use querymesh_core::{Message, QuerymeshError, QuerymeshResult};
use std::sync::Arc;
use tracing::{info, warn};

/// A step in a routing rule's middleware chain.
///
/// Returning an error aborts delivery; the hub turns it into a failed send.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspect or rewrite `message` before delivery.
    async fn process(&self, message: Message, rule: &RoutingRule) -> QuerymeshResult<Message>;
}

/// Rejects messages without a sender or receiver.
pub struct ValidationMiddleware;

#[async_trait]
impl Middleware for ValidationMiddleware {
    async fn process(&self, message: Message, _rule: &RoutingRule) -> QuerymeshResult<Message> {
        if message.sender.trim().is_empty() || message.receiver.trim().is_empty() {
            return Err(QuerymeshError::Middleware {
                name: "validation".to_string(),
                reason: "message must have a sender and a receiver".to_string(),
            });
        }
        if message.content.is_null() {
            warn!(
                sender = %message.sender,
                receiver = %message.receiver,
                "Empty message content"
            );
        }
        Ok(message)
    }
}

/// Logs every routed message.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process(&self, message: Message, rule: &RoutingRule) -> QuerymeshResult<Message> {
        info!(
            id = %message.id,
            sender = %message.sender,
            receiver = %message.receiver,
            message_type = %message.message_type,
            strategy = ?rule.strategy,
            "Routing message"
        );
        Ok(message)
    }
}

/// Marks the message as having passed through the hub.
pub struct TaggingMiddleware;

#[async_trait]
impl Middleware for TaggingMiddleware {
    async fn process(&self, mut message: Message, _rule: &RoutingRule) -> QuerymeshResult<Message> {
        message
            .metadata
            .insert("tagged".to_string(), serde_json::Value::Bool(true));
        Ok(message)
    }
}

/// The middleware every hub starts with, keyed by name.
pub fn builtin_middleware() -> Vec<(&'static str, Arc<dyn Middleware>)> {
    vec![
        ("validation", Arc::new(ValidationMiddleware)),
        ("logging", Arc::new(LoggingMiddleware)),
        ("tagging", Arc::new(TaggingMiddleware)),
    ]
}
