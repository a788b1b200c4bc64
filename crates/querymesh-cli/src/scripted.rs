use crate::config::ScriptedAgentConfig;
use async_trait::async_trait;
use querymesh_core::{AgentOutcome, AgentTask, Capability};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Plays back configured outcomes in order, repeating the last one.
pub struct ScriptedCapability {
    outcomes: Vec<AgentOutcome>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(outcomes: Vec<AgentOutcome>, delay: Duration) -> Self {
        Self {
            outcomes,
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

impl From<&ScriptedAgentConfig> for ScriptedCapability {
    fn from(config: &ScriptedAgentConfig) -> Self {
        Self::new(
            config.outcomes.clone(),
            Duration::from_millis(config.delay_ms),
        )
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn execute(&self, task: AgentTask) -> AgentOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        debug!(task = %task.task_type, call, "Scripted agent called");
        let index = call.min(self.outcomes.len().saturating_sub(1));
        self.outcomes
            .get(index)
            .cloned()
            .unwrap_or_else(|| AgentOutcome::failure("no scripted outcome"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_last_outcome_repeats() {
        let agent = ScriptedCapability::new(
            vec![
                AgentOutcome::failure("first"),
                AgentOutcome::from_value(json!({"rows": 1})),
            ],
            Duration::ZERO,
        );
        assert!(!agent.execute(AgentTask::new("a")).await.success);
        assert!(agent.execute(AgentTask::new("b")).await.success);
        assert!(agent.execute(AgentTask::new("c")).await.success);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let agent = ScriptedCapability::new(Vec::new(), Duration::ZERO);
        let outcome = agent.execute(AgentTask::new("a")).await;
        assert_eq!(outcome.error.as_deref(), Some("no scripted outcome"));
    }
}
