#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use querymesh_core::{AgentKind, AgentOutcome, AgentTask, Capability};
use querymesh_hub::Hub;
use querymesh_orchestrator::*;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Scripted agents
// ---------------------------------------------------------------------------

/// Plays back a fixed list of outcomes; the last one repeats.
#[derive(Clone)]
struct Scripted {
    outcomes: Arc<Vec<AgentOutcome>>,
    seen: Arc<Mutex<Vec<AgentTask>>>,
}

impl Scripted {
    fn new(outcomes: Vec<AgentOutcome>) -> Self {
        Self {
            outcomes: Arc::new(outcomes),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn ok(values: Vec<Value>) -> Self {
        Self::new(values.into_iter().map(AgentOutcome::from_value).collect())
    }

    fn tasks(&self) -> Vec<AgentTask> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for Scripted {
    async fn execute(&self, task: AgentTask) -> AgentOutcome {
        let mut seen = self.seen.lock().unwrap();
        let index = seen.len().min(self.outcomes.len().saturating_sub(1));
        seen.push(task);
        self.outcomes
            .get(index)
            .cloned()
            .unwrap_or_else(|| AgentOutcome::failure("script is empty"))
    }
}

struct Sleepy(Duration);

#[async_trait]
impl Capability for Sleepy {
    async fn execute(&self, _task: AgentTask) -> AgentOutcome {
        tokio::time::sleep(self.0).await;
        AgentOutcome::from_value(json!({"confidence": 0.9}))
    }
}

fn scheduler_with(config: SchedulerConfig) -> DynamicScheduler {
    DynamicScheduler::new(Arc::new(Hub::with_defaults()), config)
}

fn scheduler() -> DynamicScheduler {
    scheduler_with(SchedulerConfig::default())
}

fn dispatched(result: &WorkflowResult) -> Vec<AgentKind> {
    result.execution_history.iter().map(|r| r.agent).collect()
}

fn explainer() -> Scripted {
    Scripted::ok(vec![json!({"message": "Here is what happened."})])
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_high_confidence_goes_straight_to_generation() {
    let s = scheduler();
    let exploration = Scripted::ok(vec![json!({"successful_queries": 1})]);
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(AgentKind::Exploration, exploration.clone())
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT * FROM T", "returned_rows": 5})]),
    )
    .await;
    s.register_capability(AgentKind::Communication, explainer()).await;

    let result = s.run_workflow("show all rows in T", Map::new()).await;

    assert!(result.success);
    assert_eq!(result.termination_reason, TerminationReason::Success);
    assert_eq!(dispatched(&result), vec![AgentKind::Analysis, AgentKind::Generation]);
    assert!(exploration.tasks().is_empty());
    assert_eq!(result.final_result["sql_query"], "SELECT * FROM T");
    let output = result.final_output.unwrap();
    assert!(output.contains("```sql\nSELECT * FROM T\n```"));
    assert!(output.contains("Result: 5 rows returned"));
}

#[tokio::test]
async fn test_low_confidence_explores_first() {
    let s = scheduler();
    let generation = Scripted::ok(vec![json!({"sql": "SELECT * FROM T", "rows": 42})]);
    s.register_capability(
        AgentKind::Analysis,
        Scripted::ok(vec![json!({"confidence": 0.3, "uncertainties": ["which T?"]})]),
    )
    .await;
    s.register_capability(
        AgentKind::Exploration,
        Scripted::ok(vec![json!({
            "successful_queries": 2,
            "insights": ["T has 42 rows"],
            "resolved_uncertainties": ["which T?"],
        })]),
    )
    .await;
    s.register_capability(AgentKind::Generation, generation.clone()).await;

    let result = s.run_workflow("show all rows in T", Map::new()).await;

    assert_eq!(result.termination_reason, TerminationReason::Success);
    assert_eq!(
        result.executed_agents,
        vec![AgentKind::Analysis, AgentKind::Exploration, AgentKind::Generation]
    );
    assert_eq!(result.final_result["insights"], json!(["T has 42 rows"]));

    // Later agents see what earlier ones learned.
    let task = &generation.tasks()[0];
    assert_eq!(task.input_data["data_insights"], json!(["T has 42 rows"]));
    assert_eq!(task.accumulated_context["confidence"], 0.3);
    assert_eq!(task.accumulated_context["query"], "show all rows in T");
}

#[tokio::test]
async fn test_medium_confidence_prefers_exploration_when_available() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.75})]))
        .await;
    s.register_capability(
        AgentKind::Exploration,
        Scripted::ok(vec![json!({"successful_queries": 1})]),
    )
    .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT 1", "rows": 1})]),
    )
    .await;

    let result = s.run_workflow("q", Map::new()).await;
    assert_eq!(
        dispatched(&result),
        vec![AgentKind::Analysis, AgentKind::Exploration, AgentKind::Generation]
    );
    assert!(result.success);
}

#[tokio::test]
async fn test_medium_confidence_skips_unregistered_exploration() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.75})]))
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT 1", "rows": 1})]),
    )
    .await;

    let result = s.run_workflow("q", Map::new()).await;
    assert_eq!(dispatched(&result), vec![AgentKind::Analysis, AgentKind::Generation]);
    assert_eq!(result.termination_reason, TerminationReason::Success);
}

#[tokio::test]
async fn test_unexecuted_query_counts_as_generated() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.9})]))
        .await;
    s.register_capability(AgentKind::Generation, Scripted::ok(vec![json!({"sql": "SELECT 1"})]))
        .await;

    let result = s.run_workflow("q", Map::new()).await;
    assert_eq!(result.termination_reason, TerminationReason::GenerationSuccessful);
    assert!(result.success);
    assert!(result.final_output.is_some());
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_certain_analysis_then_rows_succeeds() {
    let s = scheduler();
    let exploration = Scripted::ok(vec![json!({"successful_queries": 1})]);
    let communication = explainer();
    s.register_capability(
        AgentKind::Analysis,
        Scripted::ok(vec![json!({"uncertain": false, "confidence": 0.95})]),
    )
    .await;
    s.register_capability(AgentKind::Exploration, exploration.clone())
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT * FROM T LIMIT 100", "rows": 42})]),
    )
    .await;
    s.register_capability(AgentKind::Communication, communication.clone())
        .await;

    let result = s.run_workflow("show all rows in T", Map::new()).await;

    assert!(result.success);
    assert_eq!(result.termination_reason, TerminationReason::Success);
    assert_eq!(
        result.executed_agents,
        vec![AgentKind::Analysis, AgentKind::Generation]
    );
    assert_eq!(dispatched(&result), vec![AgentKind::Analysis, AgentKind::Generation]);
    assert!(exploration.tasks().is_empty());
    assert!(communication.tasks().is_empty());
    assert_eq!(result.final_result["sql_query"], "SELECT * FROM T LIMIT 100");
    assert_eq!(result.completion_flags, vec![CompletionFlag::ArtifactExecuted]);
    assert_eq!(
        result.accumulated_insights["agent_payloads"]["generation"]["rows"],
        42
    );
}

#[tokio::test]
async fn test_certain_analysis_then_zero_rows_is_explained() {
    let s = scheduler();
    let communication = explainer();
    s.register_capability(
        AgentKind::Analysis,
        Scripted::ok(vec![json!({"uncertain": false, "confidence": 0.95})]),
    )
    .await;
    s.register_capability(
        AgentKind::Exploration,
        Scripted::ok(vec![json!({"successful_queries": 1})]),
    )
    .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT * FROM T LIMIT 100", "rows": 0})]),
    )
    .await;
    s.register_capability(AgentKind::Communication, communication.clone())
        .await;

    let result = s.run_workflow("show all rows in T", Map::new()).await;

    assert!(!result.success);
    assert_eq!(result.termination_reason, TerminationReason::Explained);
    assert_eq!(
        dispatched(&result),
        vec![AgentKind::Analysis, AgentKind::Generation, AgentKind::Communication]
    );
    assert_eq!(communication.tasks()[0].task_type, "empty_result_explanation");
    assert_eq!(
        result.completion_flags,
        vec![CompletionFlag::CommunicationCompleted]
    );
}

#[tokio::test]
async fn test_loosely_typed_payloads_keep_their_route() {
    let s = scheduler();
    let exploration = Scripted::ok(vec![json!({"successful_queries": 1})]);
    s.register_capability(
        AgentKind::Analysis,
        Scripted::ok(vec![json!({
            "uncertain": null,
            "confidence": 0.95,
            "uncertainties": {"column": "a"},
        })]),
    )
    .await;
    s.register_capability(AgentKind::Exploration, exploration.clone())
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT * FROM T LIMIT 100", "rows": 42.0})]),
    )
    .await;
    s.register_capability(AgentKind::Communication, explainer()).await;

    let result = s.run_workflow("show all rows in T", Map::new()).await;

    assert_eq!(result.termination_reason, TerminationReason::Success);
    assert_eq!(dispatched(&result), vec![AgentKind::Analysis, AgentKind::Generation]);
    assert!(exploration.tasks().is_empty());
    assert!(result.completion_flags.contains(&CompletionFlag::ArtifactExecuted));
    assert_eq!(result.accumulated_insights["generation_retries"], 0);
}

// ---------------------------------------------------------------------------
// Retry and repair
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_artifact_retries_twice_then_fails() {
    let s = scheduler();
    let generation = Scripted::ok(vec![json!({"sql": "SELECT a, b,"})]);
    let communication = explainer();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(AgentKind::Generation, generation.clone()).await;
    s.register_capability(AgentKind::Communication, communication.clone())
        .await;

    let result = s.run_workflow("q", Map::new()).await;

    assert!(!result.success);
    assert_eq!(result.termination_reason, TerminationReason::GenerationFailed);
    assert_eq!(result.attempts(AgentKind::Generation), 3);
    assert!(communication.tasks().is_empty());

    let tasks = generation.tasks();
    assert_eq!(tasks[1].input_data["mode"], "simplify");
    assert_eq!(tasks[2].input_data["previous_attempt"], "SELECT a, b,");
    assert_eq!(result.accumulated_insights["generation_retries"], 2);
}

#[tokio::test]
async fn test_recoverable_execution_error_is_repaired() {
    let s = scheduler();
    let generation = Scripted::ok(vec![
        json!({"sql": "SELECT nme FROM T", "execution_error": "Unrecognized name: nme"}),
        json!({"sql": "SELECT name FROM T", "rows": 7}),
    ]);
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(AgentKind::Generation, generation.clone()).await;

    let result = s.run_workflow("q", Map::new()).await;

    assert_eq!(result.termination_reason, TerminationReason::Success);
    assert_eq!(result.final_result["sql_query"], "SELECT name FROM T");
    let repair = &generation.tasks()[1];
    assert_eq!(repair.task_type, "execute_with_improvements");
    assert_eq!(repair.input_data["mode"], "repair");
    assert_eq!(repair.input_data["sql_query"], "SELECT nme FROM T");
}

#[tokio::test]
async fn test_unrecoverable_execution_error_is_explained() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT 1", "execution_error": "quota exceeded"})]),
    )
    .await;
    s.register_capability(AgentKind::Communication, explainer()).await;

    let result = s.run_workflow("q", Map::new()).await;
    assert_eq!(result.termination_reason, TerminationReason::Explained);
    assert_eq!(result.attempts(AgentKind::Generation), 1);
    assert_eq!(
        result.accumulated_insights["communication_message"],
        "Here is what happened."
    );
}

// ---------------------------------------------------------------------------
// Communication outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_result_is_explained() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT * FROM T WHERE 1 = 0", "rows": 0})]),
    )
    .await;
    let communication = explainer();
    s.register_capability(AgentKind::Communication, communication.clone())
        .await;

    let result = s.run_workflow("q", Map::new()).await;

    assert_eq!(
        dispatched(&result),
        vec![AgentKind::Analysis, AgentKind::Generation, AgentKind::Communication]
    );
    assert_eq!(result.termination_reason, TerminationReason::Explained);
    assert!(!result.success);
    assert_eq!(communication.tasks()[0].task_type, "empty_result_explanation");
}

#[tokio::test]
async fn test_analysis_error_leads_to_clarification() {
    let s = scheduler();
    s.register_capability(
        AgentKind::Analysis,
        Scripted::ok(vec![json!({"error": "no matching tables"})]),
    )
    .await;
    s.register_capability(
        AgentKind::Communication,
        Scripted::ok(vec![json!({"clarification_questions": ["Which table do you mean?"]})]),
    )
    .await;

    let result = s.run_workflow("q", Map::new()).await;
    assert_eq!(result.termination_reason, TerminationReason::ClarificationNeeded);
    assert_eq!(
        result.final_result["clarification_questions"],
        json!(["Which table do you mean?"])
    );
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_agent_failure_routes_to_communication() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::new(vec![AgentOutcome::failure("model unavailable")]),
    )
    .await;
    let communication = explainer();
    s.register_capability(AgentKind::Communication, communication.clone())
        .await;

    let result = s.run_workflow("q", Map::new()).await;

    assert_eq!(result.termination_reason, TerminationReason::Explained);
    let task = &communication.tasks()[0];
    assert_eq!(task.task_type, "generate_error_explanation");
    assert_eq!(task.input_data["failed_agent"], "generation");
    assert_eq!(task.input_data["error"], "model unavailable");
}

#[tokio::test]
async fn test_missing_communication_agent_terminates() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"error": "boom"})]))
        .await;

    let result = s.run_workflow("q", Map::new()).await;

    assert!(!result.success);
    assert_eq!(result.termination_reason, TerminationReason::CandidatesExhausted);
    assert_eq!(dispatched(&result), vec![AgentKind::Analysis, AgentKind::Communication]);
    assert!(result.execution_history[1]
        .error
        .as_deref()
        .unwrap()
        .contains("communication"));
    assert!(result.final_result["partial_results"].is_object());
}

#[tokio::test]
async fn test_dispatch_timeout_is_a_failure() {
    let config = SchedulerConfig {
        dispatch_timeout_secs: 1,
        ..SchedulerConfig::default()
    };
    let s = scheduler_with(config);
    s.register_capability(AgentKind::Analysis, Sleepy(Duration::from_secs(3)))
        .await;
    s.register_capability(AgentKind::Communication, explainer()).await;

    let result = s.run_workflow("q", Map::new()).await;

    let first = &result.execution_history[0];
    assert!(!first.success);
    assert!(first.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(result.termination_reason, TerminationReason::Explained);
}

#[tokio::test]
async fn test_iteration_cap_reports_partial_results() {
    let config = SchedulerConfig {
        max_iterations: 3,
        ..SchedulerConfig::default()
    };
    let s = scheduler_with(config);
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT x FROM T", "execution_error": "Table not found"})]),
    )
    .await;

    let result = s.run_workflow("q", Map::new()).await;

    assert_eq!(result.iterations, 3);
    assert_eq!(result.termination_reason, TerminationReason::MaxIterationsReached);
    assert_eq!(
        result.final_result["executed_agents"],
        json!(["analysis", "generation"])
    );
    assert_eq!(result.final_result["partial_results"]["confidence"], 0.95);
}

#[tokio::test]
async fn test_executed_agents_stay_bounded() {
    let config = SchedulerConfig {
        max_executed_agents: 2,
        ..SchedulerConfig::default()
    };
    let s = scheduler_with(config);
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.3})]))
        .await;
    s.register_capability(
        AgentKind::Exploration,
        Scripted::ok(vec![json!({"successful_queries": 1})]),
    )
    .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT 1", "rows": 1})]),
    )
    .await;

    let result = s.run_workflow("q", Map::new()).await;

    assert_eq!(result.termination_reason, TerminationReason::MaxIterationsReached);
    assert_eq!(
        result.executed_agents,
        vec![AgentKind::Analysis, AgentKind::Exploration]
    );
}

// ---------------------------------------------------------------------------
// Monitoring and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_monitor_and_hub_record_runs() {
    let s = scheduler();
    s.register_capability(AgentKind::Analysis, Scripted::ok(vec![json!({"confidence": 0.95})]))
        .await;
    s.register_capability(
        AgentKind::Generation,
        Scripted::ok(vec![json!({"sql": "SELECT 1", "rows": 1})]),
    )
    .await;

    let (a, b) = tokio::join!(
        s.run_workflow("first", Map::new()),
        s.run_workflow("second", Map::new())
    );
    assert!(a.success && b.success);
    assert_ne!(a.workflow_id, b.workflow_id);

    let stats = s.monitor().workflow_stats().await;
    assert_eq!(stats.total_workflows, 2);
    assert_eq!(stats.successful_workflows, 2);
    assert_eq!(
        s.monitor().utilization(AgentKind::Generation).await.total_executions,
        2
    );

    let hub = s.hub().stats().await;
    assert_eq!(hub.total_messages, 4);
    assert_eq!(hub.communication_matrix["scheduler"]["analysis"], 2);

    let status = s.status().await;
    assert_eq!(status["registered_agents"], json!(["analysis", "generation"]));
}

#[tokio::test]
async fn test_user_context_reaches_agents() {
    let s = scheduler();
    let analysis = Scripted::ok(vec![json!({"confidence": 0.95})]);
    s.register_capability(AgentKind::Analysis, analysis.clone()).await;

    let mut user_context = Map::new();
    user_context.insert("dataset".into(), json!("sales"));
    let result = s.run_workflow("q", user_context).await;

    assert_eq!(analysis.tasks()[0].accumulated_context["dataset"], "sales");
    assert_eq!(analysis.tasks()[0].task_type, "full_analysis");
    // Generation is required but unregistered, and so is the communication fallback.
    assert_eq!(result.termination_reason, TerminationReason::CandidatesExhausted);
}
