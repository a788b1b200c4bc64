use querymesh_core::AgentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-agent execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUtilization {
    /// Dispatches recorded.
    pub total_executions: u64,
    /// Dispatches that succeeded.
    pub successful_executions: u64,
    /// Running mean over every execution, successful or not.
    pub average_response_ms: f64,
}

impl AgentUtilization {
    fn record(&mut self, success: bool, duration_ms: u64) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        }
        let n = self.total_executions as f64;
        self.average_response_ms += (duration_ms as f64 - self.average_response_ms) / n;
    }
}

/// Workflow-level counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    /// Workflows finished.
    pub total_workflows: u64,
    /// Workflows that ended with a success reason.
    pub successful_workflows: u64,
    /// Running mean of workflow duration.
    pub average_duration_ms: f64,
}

#[derive(Debug, Default)]
struct MonitorState {
    agents: BTreeMap<AgentKind, AgentUtilization>,
    workflows: WorkflowStats,
}

/// Tracks agent utilization and workflow outcomes across scheduler runs.
#[derive(Clone)]
pub struct AgentMonitor {
    state: Arc<RwLock<MonitorState>>,
}

impl AgentMonitor {
    /// Monitor with a zeroed entry for every agent kind.
    pub fn new() -> Self {
        let agents = AgentKind::ALL
            .into_iter()
            .map(|kind| (kind, AgentUtilization::default()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(MonitorState {
                agents,
                workflows: WorkflowStats::default(),
            })),
        }
    }

    /// Record one dispatch to `kind`.
    pub async fn record_execution(&self, kind: AgentKind, success: bool, duration_ms: u64) {
        let mut state = self.state.write().await;
        state
            .agents
            .entry(kind)
            .or_default()
            .record(success, duration_ms);
    }

    /// Record a finished workflow.
    pub async fn record_workflow(&self, success: bool, duration_ms: u64) {
        let mut state = self.state.write().await;
        let stats = &mut state.workflows;
        stats.total_workflows += 1;
        if success {
            stats.successful_workflows += 1;
        }
        let n = stats.total_workflows as f64;
        stats.average_duration_ms += (duration_ms as f64 - stats.average_duration_ms) / n;
    }

    /// Counters for one agent kind.
    pub async fn utilization(&self, kind: AgentKind) -> AgentUtilization {
        let state = self.state.read().await;
        state.agents.get(&kind).cloned().unwrap_or_default()
    }

    /// Workflow counters.
    pub async fn workflow_stats(&self) -> WorkflowStats {
        self.state.read().await.workflows.clone()
    }

    /// Serialize the current counters as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let state = self.state.read().await;
        let success_rate = if state.workflows.total_workflows == 0 {
            0.0
        } else {
            state.workflows.successful_workflows as f64 / state.workflows.total_workflows as f64
                * 100.0
        };
        serde_json::json!({
            "agent_utilization": state.agents,
            "workflows": state.workflows,
            "workflow_success_rate": success_rate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
