use crate::config::SchedulerConfig;
use crate::context::ExecutionContext;
use crate::types::{CompletionFlag, TerminationReason};
use querymesh_core::AgentKind;
use serde_json::{json, Value};

/// A satisfied stop condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Termination {
    /// Which condition held.
    pub reason: TerminationReason,
    /// One-line explanation.
    pub summary: String,
    /// Reason-specific payload.
    pub final_result: Value,
}

impl Termination {
    fn new(reason: TerminationReason, summary: impl Into<String>, final_result: Value) -> Self {
        Self {
            reason,
            summary: summary.into(),
            final_result,
        }
    }
}

/// Evaluate the stop conditions in order. The first that holds wins.
pub fn evaluate(ctx: &ExecutionContext, config: &SchedulerConfig) -> Option<Termination> {
    let insights = &ctx.insights;

    if ctx.has_flag(CompletionFlag::ArtifactExecuted) {
        if let Some(sql) = &insights.final_artifact {
            return Some(Termination::new(
                TerminationReason::Success,
                "Query generated and executed",
                success_payload(sql, ctx),
            ));
        }
    }

    if ctx.has_flag(CompletionFlag::ClarificationNeeded) {
        return Some(Termination::new(
            TerminationReason::ClarificationNeeded,
            "User clarification required",
            json!({
                "clarification_questions": insights.clarification_questions,
                "reason": "Unable to proceed without additional information",
            }),
        ));
    }

    if ctx.has_flag(CompletionFlag::CommunicationCompleted) {
        return Some(Termination::new(
            TerminationReason::Explained,
            "Issue explained to user",
            insights.to_value(),
        ));
    }

    if ctx.has_flag(CompletionFlag::GenerationFailed) {
        return Some(Termination::new(
            TerminationReason::GenerationFailed,
            "Query generation failed after retries",
            insights.to_value(),
        ));
    }

    if ctx.executed_count() >= config.max_executed_agents {
        return Some(Termination::new(
            TerminationReason::MaxIterationsReached,
            "Maximum number of agent executions reached",
            partial_payload(ctx),
        ));
    }

    // Reached when a query was produced but never executed.
    if ctx.has_executed(AgentKind::Generation) {
        if let Some(sql) = &insights.final_artifact {
            return Some(Termination::new(
                TerminationReason::GenerationSuccessful,
                "Query generated",
                success_payload(sql, ctx),
            ));
        }
    }

    if ctx.executed_count() >= config.completion_threshold {
        return Some(Termination::new(
            TerminationReason::WorkflowCompleted,
            format!("Workflow completed with {} agents", ctx.executed_count()),
            insights.to_value(),
        ));
    }

    None
}

/// Stop reason when the loop exits without any condition holding.
pub fn fallback(ctx: &ExecutionContext, iteration_cap_hit: bool) -> Termination {
    if iteration_cap_hit {
        Termination::new(
            TerminationReason::MaxIterationsReached,
            "Iteration limit reached",
            partial_payload(ctx),
        )
    } else {
        Termination::new(
            TerminationReason::CandidatesExhausted,
            "No further agents to run",
            partial_payload(ctx),
        )
    }
}

fn success_payload(sql: &str, ctx: &ExecutionContext) -> Value {
    json!({
        "sql_query": sql,
        "execution_result": ctx.insights.execution_result,
        "explanation": ctx.insights.explanation,
        "insights": ctx.insights.data_insights,
    })
}

fn partial_payload(ctx: &ExecutionContext) -> Value {
    json!({
        "partial_results": ctx.insights.to_value(),
        "executed_agents": ctx.executed_agents(),
    })
}

/// Human-readable rendering of a success payload.
pub fn format_final_output(final_result: &Value) -> String {
    let mut parts = Vec::new();

    if let Some(explanation) = final_result.get("explanation").and_then(Value::as_str) {
        parts.push(format!("Explanation: {explanation}"));
    }
    if let Some(sql) = final_result.get("sql_query").and_then(Value::as_str) {
        parts.push(format!("Generated query:\n```sql\n{sql}\n```"));
    }
    let execution = final_result.get("execution_result");
    if execution
        .and_then(|e| e.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let rows = execution
            .and_then(|e| e.get("returned_rows"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        parts.push(format!("Result: {rows} rows returned"));
    }

    parts.join("\n\n")
}
