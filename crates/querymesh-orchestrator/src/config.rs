use querymesh_core::AgentKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and entry point of the dynamic scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hard cap on loop iterations per workflow.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Stop once this many distinct agents have run.
    #[serde(default = "default_max_executed_agents")]
    pub max_executed_agents: usize,
    /// Distinct agents after which a run with no other signal counts as complete.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: usize,
    /// Per-dispatch timeout hint.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// Agent that receives the bootstrap task.
    #[serde(default = "default_first_agent")]
    pub first_agent: AgentKind,
    /// Task type of the first dispatch.
    #[serde(default = "default_bootstrap_task")]
    pub bootstrap_task: String,
    /// Sender name used on dispatched messages.
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_max_executed_agents() -> usize {
    10
}

fn default_completion_threshold() -> usize {
    3
}

fn default_dispatch_timeout_secs() -> u64 {
    60
}

fn default_first_agent() -> AgentKind {
    AgentKind::Analysis
}

fn default_bootstrap_task() -> String {
    "full_analysis".to_string()
}

fn default_sender() -> String {
    "scheduler".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_executed_agents: default_max_executed_agents(),
            completion_threshold: default_completion_threshold(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            first_agent: default_first_agent(),
            bootstrap_task: default_bootstrap_task(),
            sender: default_sender(),
        }
    }
}

impl SchedulerConfig {
    /// Dispatch timeout, at least one second.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }
}
