use crate::types::{AgentExecutionResult, CompletionFlag};
use querymesh_core::AgentKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Everything the workflow has learned so far.
///
/// Well-known signals have named fields; anything agent-specific goes in
/// `agent_payloads`, keyed by agent name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    /// Analysis confidence in `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Analysis reported open uncertainties.
    pub uncertain: bool,
    /// Free-form uncertainty level from analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty_level: Option<String>,
    /// Open uncertainties from analysis.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uncertainties: Vec<Value>,
    /// Full analysis payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_analysis: Option<Value>,
    /// Full exploration payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration: Option<Value>,
    /// Facts learned by exploration.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_insights: Vec<Value>,
    /// Uncertainties exploration settled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolved_uncertainties: Vec<Value>,
    /// The query that answers the request, once one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<String>,
    /// Row count of the last execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<Value>,
    /// Generator's explanation of its query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Questions for the user.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clarification_questions: Vec<Value>,
    /// User-facing message from the communication agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communication_message: Option<String>,
    /// Retries after an invalid query.
    pub generation_retries: u32,
    /// Repair passes after an execution error.
    pub repair_attempts: u32,
    /// Most recent error seen by the rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Last raw payload from each agent, keyed by agent name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_payloads: BTreeMap<String, Value>,
}

impl Insights {
    /// JSON object form, as handed to agents in `accumulated_context`.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// [`Insights::to_map`] as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }
}

/// Per-workflow state. Owned by exactly one run and dropped when it ends.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The natural-language request.
    pub query: String,
    /// Caller-supplied context, passed through to agents.
    pub user_context: Map<String, Value>,
    /// What has been learned so far.
    pub insights: Insights,
    executed_agents: Vec<AgentKind>,
    agent_results: BTreeMap<AgentKind, AgentExecutionResult>,
    history: Vec<AgentExecutionResult>,
    flags: BTreeSet<CompletionFlag>,
}

impl ExecutionContext {
    /// Fresh context for one run.
    pub fn new(query: impl Into<String>, user_context: Map<String, Value>) -> Self {
        Self {
            query: query.into(),
            user_context,
            insights: Insights::default(),
            executed_agents: Vec::new(),
            agent_results: BTreeMap::new(),
            history: Vec::new(),
            flags: BTreeSet::new(),
        }
    }

    /// Record a dispatch. The agent joins the executed set on first run only.
    pub fn record(&mut self, result: AgentExecutionResult) {
        if !self.executed_agents.contains(&result.agent) {
            self.executed_agents.push(result.agent);
        }
        self.agent_results.insert(result.agent, result.clone());
        self.history.push(result);
    }

    /// Whether `agent` has run at least once.
    pub fn has_executed(&self, agent: AgentKind) -> bool {
        self.executed_agents.contains(&agent)
    }

    /// Distinct agents executed so far, in first-execution order.
    pub fn executed_agents(&self) -> &[AgentKind] {
        &self.executed_agents
    }

    /// Number of distinct agents executed.
    pub fn executed_count(&self) -> usize {
        self.executed_agents.len()
    }

    /// The most recent result from `agent`.
    pub fn last_result(&self, agent: AgentKind) -> Option<&AgentExecutionResult> {
        self.agent_results.get(&agent)
    }

    /// Every dispatch, in order.
    pub fn history(&self) -> &[AgentExecutionResult] {
        &self.history
    }

    /// Consume the context, keeping the dispatch history.
    pub fn into_history(self) -> Vec<AgentExecutionResult> {
        self.history
    }

    /// Raise a completion flag. Raising it twice is a no-op.
    pub fn set_flag(&mut self, flag: CompletionFlag) {
        self.flags.insert(flag);
    }

    /// Whether `flag` has been raised.
    pub fn has_flag(&self, flag: CompletionFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Raised flags in flag order.
    pub fn flags(&self) -> impl Iterator<Item = CompletionFlag> + '_ {
        self.flags.iter().copied()
    }
}
