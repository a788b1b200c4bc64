use crate::error::{QuerymeshError, QuerymeshResult};
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Trait every agent registered with the hub implements.
///
/// `process` may take arbitrarily long. Returning `Ok(None)` means the agent
/// consumed the message without producing a response.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique name the agent is registered and addressed under.
    fn name(&self) -> &str;

    /// Handle one message.
    async fn process(&self, message: Message) -> QuerymeshResult<Option<Message>>;
}

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for work.
    #[default]
    Idle,
    /// Inside `process`.
    Processing,
    /// Waiting on another agent.
    Waiting,
    /// The last call failed.
    Error,
    /// Finished and will not take more work.
    Completed,
}

/// The well-known agents the dynamic scheduler knows how to plan around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Schema analysis: works out which tables/columns a request touches.
    Analysis,
    /// Data exploration: resolves uncertainties by probing the data.
    Exploration,
    /// Query generation: produces and executes the query.
    Generation,
    /// User communication: explanations and clarification questions.
    Communication,
}

impl AgentKind {
    /// All kinds, in workflow order.
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Analysis,
        AgentKind::Exploration,
        AgentKind::Generation,
        AgentKind::Communication,
    ];

    /// Canonical registration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Analysis => "analysis",
            AgentKind::Exploration => "exploration",
            AgentKind::Generation => "generation",
            AgentKind::Communication => "communication",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = QuerymeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| QuerymeshError::AgentNotFound(format!("unknown agent kind '{s}'")))
    }
}
