use chrono::{DateTime, Utc};
use querymesh_core::AgentKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A proposed next task, produced by the analysis rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Agent that should run the task.
    pub agent: AgentKind,
    /// Task name handed to the agent.
    pub task_type: String,
    /// 1 = highest.
    pub priority: u8,
    /// Human-readable rationale, logged when the suggestion is selected.
    pub reason: String,
    /// Task input, merged into the dispatched message.
    #[serde(default)]
    pub input_data: Map<String, Value>,
    /// Required suggestions are always preferred over optional ones.
    #[serde(default)]
    pub required: bool,
}

impl Suggestion {
    /// A required suggestion.
    pub fn required(
        agent: AgentKind,
        task_type: impl Into<String>,
        priority: u8,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            task_type: task_type.into(),
            priority,
            reason: reason.into(),
            input_data: Map::new(),
            required: true,
        }
    }

    /// An optional suggestion.
    pub fn optional(
        agent: AgentKind,
        task_type: impl Into<String>,
        priority: u8,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(agent, task_type, priority, reason)
        }
    }

    /// Add one input entry for the task.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_data.insert(key.into(), value.into());
        self
    }
}

/// What happened when one suggestion was dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    /// Agent that ran.
    pub agent: AgentKind,
    /// Task it was given.
    pub task_type: String,
    /// Whether the agent reported success.
    pub success: bool,
    /// Agent-defined payload.
    #[serde(default)]
    pub result_data: Map<String, Value>,
    /// Failure text when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time of the dispatch.
    pub duration_ms: u64,
}

/// Symbolic completion signals raised by the analysis rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionFlag {
    /// A valid query ran and returned rows.
    ArtifactExecuted,
    /// The communication agent asked the user a question.
    ClarificationNeeded,
    /// The communication agent produced an explanation.
    CommunicationCompleted,
    /// Generation retries were exhausted.
    GenerationFailed,
}

/// Why a workflow stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A query ran and returned rows.
    Success,
    /// The user was asked a clarifying question.
    ClarificationNeeded,
    /// The communication agent explained the outcome.
    Explained,
    /// Generation retries were exhausted.
    GenerationFailed,
    /// The iteration cap was hit.
    MaxIterationsReached,
    /// A valid query exists but was never executed.
    GenerationSuccessful,
    /// The executed-agent ceiling was reached.
    WorkflowCompleted,
    /// The loop ran out of candidates before any stop condition held.
    CandidatesExhausted,
}

impl TerminationReason {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Success => "success",
            TerminationReason::ClarificationNeeded => "clarification_needed",
            TerminationReason::Explained => "explained",
            TerminationReason::GenerationFailed => "generation_failed",
            TerminationReason::MaxIterationsReached => "max_iterations_reached",
            TerminationReason::GenerationSuccessful => "generation_successful",
            TerminationReason::WorkflowCompleted => "workflow_completed",
            TerminationReason::CandidatesExhausted => "candidates_exhausted",
        }
    }

    /// Whether the caller got a usable query out of the run.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TerminationReason::Success | TerminationReason::GenerationSuccessful
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a terminated workflow.
///
/// Always carries the termination reason and whatever was learned, even when
/// the run failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Unique per run.
    pub workflow_id: Uuid,
    /// Whether the termination reason counts as success.
    pub success: bool,
    /// Why the run stopped.
    pub termination_reason: TerminationReason,
    /// One-line human-readable explanation of the termination reason.
    pub summary: String,
    /// Loop iterations used.
    pub iterations: u32,
    /// Agents that ran, in first-execution order.
    pub executed_agents: Vec<AgentKind>,
    /// Every dispatch, in order.
    pub execution_history: Vec<AgentExecutionResult>,
    /// Reason-specific result payload.
    pub final_result: Value,
    /// Insights gathered during the run, as JSON.
    pub accumulated_insights: Value,
    /// Completion flags raised by the analysis rules, in flag order.
    #[serde(default)]
    pub completion_flags: Vec<CompletionFlag>,
    /// Rendered answer on the success path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// Total run time.
    pub duration_ms: u64,
}

impl WorkflowResult {
    /// Dispatch count per agent.
    pub fn attempts(&self, agent: AgentKind) -> usize {
        self.execution_history
            .iter()
            .filter(|r| r.agent == agent)
            .count()
    }
}
