use crate::config::SchedulerConfig;
use crate::context::ExecutionContext;
use crate::monitor::AgentMonitor;
use crate::rules;
use crate::termination::{self, Termination};
use crate::types::{AgentExecutionResult, Suggestion, WorkflowResult};
use chrono::Utc;
use querymesh_core::{
    Agent, AgentKind, AgentOutcome, AgentTask, Capability, CapabilityAgent, Message,
    QuerymeshResult,
};
use querymesh_hub::Hub;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result-driven scheduler: runs one agent at a time and lets each result
/// decide what runs next.
///
/// Dispatches go through the shared [`Hub`]; every workflow owns its own
/// [`ExecutionContext`], so concurrent runs never share state beyond the hub
/// and the monitor.
pub struct DynamicScheduler {
    hub: Arc<Hub>,
    config: SchedulerConfig,
    monitor: AgentMonitor,
}

impl DynamicScheduler {
    /// Scheduler over `hub`. Agents are registered separately.
    pub fn new(hub: Arc<Hub>, config: SchedulerConfig) -> Self {
        Self {
            hub,
            config,
            monitor: AgentMonitor::new(),
        }
    }

    /// The hub every dispatch goes through.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Per-agent and per-workflow counters.
    pub fn monitor(&self) -> &AgentMonitor {
        &self.monitor
    }

    /// Register a ready-made agent with the hub.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.hub.register(agent).await;
    }

    /// Register a capability under its agent kind's canonical name.
    pub async fn register_capability<C: Capability + 'static>(&self, kind: AgentKind, capability: C) {
        self.hub
            .register(Arc::new(CapabilityAgent::new(kind.as_str(), capability)))
            .await;
    }

    /// Run one workflow to termination. Never fails: every fault ends up in
    /// the returned result.
    pub async fn run_workflow(
        &self,
        query: impl Into<String>,
        user_context: Map<String, Value>,
    ) -> WorkflowResult {
        let workflow_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut ctx = ExecutionContext::new(query, user_context);
        info!(workflow_id = %workflow_id, query = %ctx.query, "Workflow started");

        let mut candidates = vec![Suggestion::required(
            self.config.first_agent,
            self.config.bootstrap_task.clone(),
            1,
            "Initial analysis",
        )
        .with_input("query", ctx.query.as_str())];

        let mut iteration: u32 = 0;
        let mut termination: Option<Termination> = None;

        while !candidates.is_empty() && iteration < self.config.max_iterations {
            iteration += 1;

            if let Some(t) = termination::evaluate(&ctx, &self.config) {
                termination = Some(t);
                break;
            }

            let Some(selected) = self.select(&candidates, &ctx) else {
                debug!(workflow_id = %workflow_id, "No eligible candidate");
                break;
            };
            info!(
                workflow_id = %workflow_id,
                iteration,
                agent = %selected.agent,
                task = %selected.task_type,
                reason = %selected.reason,
                "Dispatching"
            );

            let result = self.execute(&selected, &ctx).await;
            self.monitor
                .record_execution(result.agent, result.success, result.duration_ms)
                .await;
            ctx.record(result.clone());

            candidates = if result.success {
                rules::analyze(&result, &mut ctx)
            } else {
                warn!(
                    workflow_id = %workflow_id,
                    agent = %result.agent,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Agent execution failed"
                );
                rules::failure_fallback(&result, &ctx)
            };
        }

        let termination = termination
            .or_else(|| termination::evaluate(&ctx, &self.config))
            .unwrap_or_else(|| {
                termination::fallback(&ctx, iteration >= self.config.max_iterations)
            });

        let success = termination.reason.is_success();
        let final_output =
            success.then(|| termination::format_final_output(&termination.final_result));
        let duration_ms = clock.elapsed().as_millis() as u64;
        self.monitor.record_workflow(success, duration_ms).await;

        info!(
            workflow_id = %workflow_id,
            reason = %termination.reason,
            iterations = iteration,
            agents = ctx.executed_count(),
            duration_ms,
            "Workflow finished"
        );

        WorkflowResult {
            workflow_id,
            success,
            termination_reason: termination.reason,
            summary: termination.summary,
            iterations: iteration,
            executed_agents: ctx.executed_agents().to_vec(),
            accumulated_insights: ctx.insights.to_value(),
            completion_flags: ctx.flags().collect(),
            execution_history: ctx.into_history(),
            final_result: termination.final_result,
            final_output,
            started_at,
            duration_ms,
        }
    }

    /// Required candidates first, lowest priority number, ties to the earlier
    /// one. Optional candidates must target a registered, not yet executed agent.
    fn select(&self, candidates: &[Suggestion], ctx: &ExecutionContext) -> Option<Suggestion> {
        lowest_priority(candidates.iter().filter(|s| s.required))
            .or_else(|| {
                lowest_priority(candidates.iter().filter(|s| {
                    self.hub.is_registered(s.agent.as_str()) && !ctx.has_executed(s.agent)
                }))
            })
            .cloned()
    }

    async fn execute(&self, suggestion: &Suggestion, ctx: &ExecutionContext) -> AgentExecutionResult {
        let started = Instant::now();
        let outcome = match self.dispatch(suggestion, ctx).await {
            Ok(reply) => AgentOutcome::from_reply(&reply),
            Err(e) => AgentOutcome::failure(e.to_string()),
        };
        AgentExecutionResult {
            agent: suggestion.agent,
            task_type: suggestion.task_type.clone(),
            success: outcome.success,
            result_data: outcome.result_data,
            error: outcome.error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn dispatch(&self, suggestion: &Suggestion, ctx: &ExecutionContext) -> QuerymeshResult<Message> {
        let mut accumulated_context = ctx.insights.to_map();
        accumulated_context.insert("query".into(), Value::String(ctx.query.clone()));
        for (key, value) in &ctx.user_context {
            accumulated_context.insert(key.clone(), value.clone());
        }

        let task = AgentTask {
            task_type: suggestion.task_type.clone(),
            input_data: suggestion.input_data.clone(),
            accumulated_context,
        };
        let message = Message::request(
            self.config.sender.as_str(),
            suggestion.agent.as_str(),
            serde_json::to_value(&task)?,
        )
        .with_priority(suggestion.priority)
        .with_timeout(self.config.dispatch_timeout());

        self.hub.dispatch(message).await
    }

    /// Registered agents, monitor counters, and hub stats.
    pub async fn status(&self) -> Value {
        let hub_stats = serde_json::to_value(self.hub.stats().await).unwrap_or(Value::Null);
        serde_json::json!({
            "registered_agents": self.hub.agent_names(),
            "monitor": self.monitor.to_json().await,
            "hub": hub_stats,
            "running": self.hub.is_running(),
        })
    }
}

/// Lowest priority number wins; ties go to the earlier candidate.
fn lowest_priority<'a>(candidates: impl Iterator<Item = &'a Suggestion>) -> Option<&'a Suggestion> {
    candidates.fold(None, |best, s| match best {
        Some(b) if b.priority <= s.priority => Some(b),
        _ => Some(s),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(Value);

    #[async_trait]
    impl Capability for Fixed {
        async fn execute(&self, _task: AgentTask) -> AgentOutcome {
            AgentOutcome::from_value(self.0.clone())
        }
    }

    fn scheduler() -> DynamicScheduler {
        DynamicScheduler::new(Arc::new(Hub::with_defaults()), SchedulerConfig::default())
    }

    #[tokio::test]
    async fn test_select_prefers_required() {
        let s = scheduler();
        let ctx = ExecutionContext::new("q", Map::new());
        let candidates = vec![
            Suggestion::optional(AgentKind::Exploration, "a", 1, ""),
            Suggestion::required(AgentKind::Generation, "b", 3, ""),
            Suggestion::required(AgentKind::Communication, "c", 3, ""),
        ];
        let chosen = s.select(&candidates, &ctx).unwrap();
        assert_eq!(chosen.agent, AgentKind::Generation);
    }

    #[tokio::test]
    async fn test_select_optional_needs_registered_unexecuted() {
        let s = scheduler();
        s.register_capability(AgentKind::Generation, Fixed(json!({})))
            .await;
        let ctx = ExecutionContext::new("q", Map::new());
        let candidates = vec![
            Suggestion::optional(AgentKind::Exploration, "a", 1, ""),
            Suggestion::optional(AgentKind::Generation, "b", 3, ""),
        ];
        assert_eq!(
            s.select(&candidates, &ctx).map(|c| c.agent),
            Some(AgentKind::Generation)
        );

        let mut ctx = ctx;
        ctx.record(AgentExecutionResult {
            agent: AgentKind::Generation,
            task_type: "b".into(),
            success: true,
            result_data: Map::new(),
            error: None,
            duration_ms: 0,
        });
        assert!(s.select(&candidates, &ctx).is_none());
    }

    #[tokio::test]
    async fn test_unregistered_bootstrap_ends_run() {
        let s = scheduler();
        let result = s.run_workflow("q", Map::new()).await;
        assert!(!result.success);
        // The communication fallback fails too, which ends the run.
        assert_eq!(result.execution_history.len(), 2);
        assert!(result.execution_history.iter().all(|r| !r.success));
        assert_eq!(result.attempts(AgentKind::Communication), 1);
        assert_eq!(result.iterations, 2);
        assert_eq!(
            result.termination_reason,
            crate::types::TerminationReason::CandidatesExhausted
        );
    }

    #[tokio::test]
    async fn test_status_lists_agents() {
        let s = scheduler();
        s.register_capability(AgentKind::Analysis, Fixed(json!({"confidence": 0.9})))
            .await;
        let status = s.status().await;
        assert_eq!(status["registered_agents"], json!(["analysis"]));
        assert!(status["monitor"]["workflows"].is_object());
        assert!(status["hub"]["total_messages"].is_number());
    }
}
