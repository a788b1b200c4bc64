use crate::agent::Agent;
use crate::error::QuerymeshResult;
use crate::message::{Message, MessageType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of work handed to an agent by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    /// What the agent is asked to do, e.g. `generate_sql`.
    pub task_type: String,
    /// Task-specific input.
    #[serde(default)]
    pub input_data: Map<String, Value>,
    /// Everything the workflow has learned so far.
    #[serde(default)]
    pub accumulated_context: Map<String, Value>,
}

impl AgentTask {
    /// Creates a task with empty input and context.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }
}

/// What an agent hands back for an [`AgentTask`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Whether the task completed.
    pub success: bool,
    /// Result payload; empty on failure.
    #[serde(default)]
    pub result_data: Map<String, Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutcome {
    /// A successful outcome carrying `result_data`.
    pub fn ok(result_data: Map<String, Value>) -> Self {
        Self {
            success: true,
            result_data,
            error: None,
        }
    }

    /// A successful outcome built from a JSON value. Non-object values are
    /// wrapped under a `value` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::ok(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self::ok(map)
            }
        }
    }

    /// A failed outcome.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result_data: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Decodes the outcome carried by a reply message. Error replies and
    /// undecodable payloads become failures.
    pub fn from_reply(reply: &Message) -> Self {
        if reply.message_type == MessageType::Error {
            let error = reply
                .content
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("agent reported an error")
                .to_string();
            return Self::failure(error);
        }
        match serde_json::from_value::<AgentOutcome>(reply.content.clone()) {
            Ok(outcome) if !outcome.success && outcome.error.is_none() => {
                Self::failure("agent reported failure without an error message")
            }
            Ok(outcome) => outcome,
            Err(e) => Self::failure(format!("malformed agent reply: {e}")),
        }
    }
}

/// Task-level capability implemented by each concrete agent.
///
/// Implementations must translate every internal fault into
/// [`AgentOutcome::failure`]; nothing crosses this boundary as a panic or error.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run one task.
    async fn execute(&self, task: AgentTask) -> AgentOutcome;
}

/// Adapts a [`Capability`] to the message-level [`Agent`] interface.
pub struct CapabilityAgent<C> {
    name: String,
    capability: C,
}

impl<C: Capability> CapabilityAgent<C> {
    /// Wraps `capability` under the given agent name.
    pub fn new(name: impl Into<String>, capability: C) -> Self {
        Self {
            name: name.into(),
            capability,
        }
    }

    /// The wrapped capability.
    pub fn capability(&self) -> &C {
        &self.capability
    }
}

#[async_trait]
impl<C: Capability> Agent for CapabilityAgent<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: Message) -> QuerymeshResult<Option<Message>> {
        let outcome = match serde_json::from_value::<AgentTask>(message.content.clone()) {
            Ok(task) => self.capability.execute(task).await,
            Err(e) => {
                tracing::warn!(agent = %self.name, error = %e, "Malformed task payload");
                AgentOutcome::failure(format!("malformed task: {e}"))
            }
        };
        Ok(Some(message.reply(serde_json::to_value(&outcome)?)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        async fn execute(&self, task: AgentTask) -> AgentOutcome {
            AgentOutcome::from_value(serde_json::json!({ "task": task.task_type }))
        }
    }

    #[tokio::test]
    async fn test_capability_agent_replies_with_outcome() {
        let agent = CapabilityAgent::new("echo", Echo);
        let task = AgentTask::new("full_analysis");
        let req = Message::request("scheduler", "echo", serde_json::to_value(&task).unwrap());

        let reply = agent.process(req.clone()).await.unwrap().unwrap();
        assert_eq!(reply.correlation_id, req.id);

        let outcome = AgentOutcome::from_reply(&reply);
        assert!(outcome.success);
        assert_eq!(outcome.result_data["task"], "full_analysis");
    }

    #[tokio::test]
    async fn test_malformed_task_becomes_failure() {
        let agent = CapabilityAgent::new("echo", Echo);
        let req = Message::request("scheduler", "echo", serde_json::json!("not a task"));
        let reply = agent.process(req).await.unwrap().unwrap();
        let outcome = AgentOutcome::from_reply(&reply);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("malformed task"));
    }

    #[test]
    fn test_error_reply_decodes_as_failure() {
        let req = Message::request("a", "b", Value::Null);
        let outcome = AgentOutcome::from_reply(&req.error_reply("backend down"));
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("backend down"));
    }

    #[test]
    fn test_from_value_wraps_scalars() {
        let outcome = AgentOutcome::from_value(serde_json::json!(42));
        assert_eq!(outcome.result_data["value"], 42);
    }
}
