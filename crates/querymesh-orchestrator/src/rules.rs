//! Result-analysis rules: one pure function per agent kind that turns a
//! completed result into the next candidate list.
//!
//! Rules may update the context's insights and completion flags. They never
//! dispatch anything themselves.

use crate::context::ExecutionContext;
use crate::repair::MAX_REPAIR_ATTEMPTS;
use crate::types::{AgentExecutionResult, CompletionFlag, Suggestion};
use crate::validation::validate_artifact;
use querymesh_core::AgentKind;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Confidence below which analysis always asks for exploration.
pub const LOW_CONFIDENCE: f64 = 0.5;
/// Uncertain analyses below this confidence also ask for exploration.
pub const UNCERTAIN_CONFIDENCE: f64 = 0.7;
/// Certain analyses at or above this confidence go straight to generation.
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Execution errors worth sending back to the generator for repair.
const RECOVERABLE_ERRORS: [&str; 5] = [
    "unrecognized name",
    "does not exist",
    "not found",
    "invalid",
    "syntax error",
];

/// Plan the next step after a successful dispatch.
///
/// The raw payload is kept under the agent's name in
/// [`Insights::agent_payloads`](crate::context::Insights::agent_payloads).
pub fn analyze(result: &AgentExecutionResult, ctx: &mut ExecutionContext) -> Vec<Suggestion> {
    ctx.insights.agent_payloads.insert(
        result.agent.as_str().to_string(),
        Value::Object(result.result_data.clone()),
    );
    let suggestions = match result.agent {
        AgentKind::Analysis => analyze_analysis(&result.result_data, ctx),
        AgentKind::Exploration => analyze_exploration(&result.result_data, ctx),
        AgentKind::Generation => analyze_generation(&result.result_data, ctx),
        AgentKind::Communication => analyze_communication(&result.result_data, ctx),
    };
    debug!(
        agent = %result.agent,
        suggestions = suggestions.len(),
        "Result analyzed"
    );
    suggestions
}

/// The single fallback after a failed dispatch.
///
/// A failing communication agent gets no fallback, so the run ends instead of
/// looping on itself.
pub fn failure_fallback(failed: &AgentExecutionResult, ctx: &ExecutionContext) -> Vec<Suggestion> {
    if failed.agent == AgentKind::Communication {
        return Vec::new();
    }
    let error = failed.error.clone().unwrap_or_else(|| "unknown error".to_string());
    vec![Suggestion::required(
        AgentKind::Communication,
        "generate_error_explanation",
        1,
        format!("Agent {} failed: {error}", failed.agent),
    )
    .with_input("error", error)
    .with_input("failed_agent", failed.agent.as_str())
    .with_input("query", ctx.query.as_str())]
}

/// Per-field view over a result payload. Each field is read on its own, so a
/// mistyped field is skipped without losing the rest.
struct Fields<'a> {
    agent: AgentKind,
    data: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(agent: AgentKind, data: &'a Map<String, Value>) -> Self {
        Self { agent, data }
    }

    /// First non-null value stored under any of `keys`.
    fn raw(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        keys.iter()
            .find_map(|key| self.data.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
    }

    fn mistyped(&self, field: &str, expected: &str, value: &Value) {
        warn!(
            agent = %self.agent,
            field,
            expected,
            value = %value,
            "Ignoring mistyped result field"
        );
    }

    fn text(&self, keys: &[&'static str]) -> Option<String> {
        let (key, value) = self.raw(keys)?;
        match value {
            Value::String(s) => Some(s.clone()),
            other => {
                self.mistyped(key, "string", other);
                None
            }
        }
    }

    /// An error marker. Falsy values mean "no error"; anything else is
    /// rendered as text.
    fn error_text(&self, keys: &[&'static str]) -> Option<String> {
        let (_, value) = self.raw(keys)?;
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Bool(false) => return None,
            Value::Number(n) if n.as_f64() == Some(0.0) => return None,
            Value::Array(a) if a.is_empty() => return None,
            Value::Object(o) if o.is_empty() => return None,
            other => other.to_string(),
        };
        (!text.trim().is_empty()).then_some(text)
    }

    fn number(&self, keys: &[&'static str]) -> Option<f64> {
        let (key, value) = self.raw(keys)?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed.filter(|n| n.is_finite()) {
            Some(n) => Some(n),
            None => {
                self.mistyped(key, "number", value);
                None
            }
        }
    }

    /// A non-negative count. Whole floats such as `42.0` are accepted.
    fn count(&self, keys: &[&'static str]) -> Option<u64> {
        let (key, value) = self.raw(keys)?;
        if let Some(n) = value.as_u64() {
            return Some(n);
        }
        match self.number(keys) {
            Some(n) if n >= 0.0 => Some(n as u64),
            Some(_) => {
                self.mistyped(key, "non-negative count", value);
                None
            }
            None => None,
        }
    }

    fn flag(&self, keys: &[&'static str]) -> Option<bool> {
        let (key, value) = self.raw(keys)?;
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            other => {
                self.mistyped(key, "bool", other);
                None
            }
        }
    }

    /// A list field. A lone value counts as a one-element list.
    fn list(&self, keys: &[&'static str]) -> Vec<Value> {
        match self.raw(keys) {
            Some((_, Value::Array(items))) => items.clone(),
            Some((_, other)) => vec![other.clone()],
            None => Vec::new(),
        }
    }
}

fn explain_error(error: &str, ctx: &ExecutionContext, reason: String) -> Suggestion {
    Suggestion::required(
        AgentKind::Communication,
        "generate_error_explanation",
        1,
        reason,
    )
    .with_input("error", error)
    .with_input("query", ctx.query.as_str())
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

fn analyze_analysis(data: &Map<String, Value>, ctx: &mut ExecutionContext) -> Vec<Suggestion> {
    let fields = Fields::new(AgentKind::Analysis, data);

    if let Some(error) = fields.error_text(&["error"]) {
        ctx.insights.last_error = Some(error.clone());
        let reason = format!("Schema analysis failed: {error}");
        return vec![explain_error(&error, ctx, reason)];
    }

    let confidence = fields.number(&["confidence"]).unwrap_or(0.0);
    let uncertain = fields
        .flag(&["uncertain", "has_uncertainty"])
        .unwrap_or(false);
    let uncertainties = fields.list(&["uncertainties"]);
    ctx.insights.confidence = Some(confidence);
    ctx.insights.uncertain = uncertain;
    ctx.insights.uncertainty_level = fields.text(&["uncertainty_level"]);
    ctx.insights.uncertainties = uncertainties.clone();
    ctx.insights.schema_analysis = Some(Value::Object(data.clone()));

    let low = confidence < LOW_CONFIDENCE || (uncertain && confidence < UNCERTAIN_CONFIDENCE);
    let high = !uncertain && confidence >= HIGH_CONFIDENCE;

    if low {
        vec![Suggestion::required(
            AgentKind::Exploration,
            "explore_uncertainties",
            1,
            format!("Uncertainties detected (confidence: {confidence:.2})"),
        )
        .with_input("uncertainties", uncertainties)
        .with_input("query", ctx.query.as_str())]
    } else if high {
        vec![Suggestion::required(
            AgentKind::Generation,
            "generate_sql",
            1,
            format!("High confidence analysis (confidence: {confidence:.2})"),
        )
        .with_input("query", ctx.query.as_str())]
    } else {
        vec![
            Suggestion::optional(
                AgentKind::Exploration,
                "quick_exploration",
                2,
                "Medium confidence, quick exploration recommended",
            )
            .with_input("uncertainties", uncertainties)
            .with_input("query", ctx.query.as_str()),
            Suggestion::optional(
                AgentKind::Generation,
                "generate_sql",
                3,
                "Alternative: proceed with current analysis",
            )
            .with_input("query", ctx.query.as_str()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Exploration
// ---------------------------------------------------------------------------

fn analyze_exploration(data: &Map<String, Value>, ctx: &mut ExecutionContext) -> Vec<Suggestion> {
    let fields = Fields::new(AgentKind::Exploration, data);

    if let Some(error) = fields.error_text(&["error"]) {
        ctx.insights.last_error = Some(error.clone());
        let reason = format!("Data exploration failed: {error}");
        return vec![explain_error(&error, ctx, reason)];
    }

    ctx.insights.exploration = Some(Value::Object(data.clone()));

    let successful_queries = fields
        .count(&["successful_queries", "successful_explorations"])
        .unwrap_or(0);
    if successful_queries > 0 {
        let insights = fields.list(&["insights"]);
        let insight_count = insights.len();
        ctx.insights.data_insights.extend(insights);
        ctx.insights
            .resolved_uncertainties
            .extend(fields.list(&["resolved_uncertainties"]));
        return vec![Suggestion::required(
            AgentKind::Generation,
            "generate_sql",
            1,
            format!(
                "Exploration successful ({successful_queries} queries, {insight_count} insights)"
            ),
        )
        .with_input("query", ctx.query.as_str())
        .with_input("data_insights", ctx.insights.data_insights.clone())];
    }

    vec![Suggestion::required(
        AgentKind::Communication,
        "generate_clarification",
        1,
        "Exploration failed, user clarification needed",
    )
    .with_input("query", ctx.query.as_str())
    .with_input("uncertainties", ctx.insights.uncertainties.clone())]
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

fn is_recoverable(error: &str) -> bool {
    let lower = error.to_lowercase();
    RECOVERABLE_ERRORS.iter().any(|p| lower.contains(p))
}

/// Send the query back to the generator in repair mode, or give up and explain.
fn repair_or_explain(error: &str, sql: Option<&str>, ctx: &mut ExecutionContext) -> Suggestion {
    ctx.insights.last_error = Some(error.to_string());
    if ctx.insights.repair_attempts < MAX_REPAIR_ATTEMPTS {
        ctx.insights.repair_attempts += 1;
        let mut suggestion = Suggestion::required(
            AgentKind::Generation,
            "execute_with_improvements",
            1,
            format!(
                "Repair attempt {}/{MAX_REPAIR_ATTEMPTS}: {error}",
                ctx.insights.repair_attempts
            ),
        )
        .with_input("mode", "repair")
        .with_input("error_message", error)
        .with_input("query", ctx.query.as_str());
        if let Some(sql) = sql {
            suggestion = suggestion.with_input("sql_query", sql);
        }
        suggestion
    } else {
        let reason = format!("Query failed after {MAX_REPAIR_ATTEMPTS} repair attempts: {error}");
        let mut suggestion = explain_error(error, ctx, reason);
        if let Some(sql) = sql {
            suggestion = suggestion.with_input("sql_query", sql);
        }
        suggestion
    }
}

fn analyze_generation(data: &Map<String, Value>, ctx: &mut ExecutionContext) -> Vec<Suggestion> {
    let fields = Fields::new(AgentKind::Generation, data);
    let sql = fields.text(&["sql", "sql_query"]);

    if let Some(error) = fields.error_text(&["error"]) {
        return vec![repair_or_explain(&error, sql.as_deref(), ctx)];
    }

    let sql = sql.unwrap_or_default();
    if let Err(issue) = validate_artifact(&sql) {
        ctx.insights.last_error = Some(issue.to_string());
        if ctx.insights.generation_retries < MAX_REPAIR_ATTEMPTS {
            ctx.insights.generation_retries += 1;
            return vec![Suggestion::required(
                AgentKind::Generation,
                "generate_sql",
                1,
                format!(
                    "Invalid query ({issue}), retry {}/{MAX_REPAIR_ATTEMPTS}",
                    ctx.insights.generation_retries
                ),
            )
            .with_input("mode", "simplify")
            .with_input("previous_attempt", sql)
            .with_input("issue", issue.to_string())
            .with_input("query", ctx.query.as_str())];
        }
        ctx.set_flag(CompletionFlag::GenerationFailed);
        let error = format!("Generated content is not a valid query: {issue}");
        return vec![explain_error(&error, ctx, "Query generation failed".to_string())
            .with_input("attempted_sql", sql)];
    }

    if let Some(explanation) = fields.text(&["explanation"]) {
        ctx.insights.explanation = Some(explanation);
    }

    if let Some(error) = fields.error_text(&["execution_error"]) {
        if is_recoverable(&error) {
            return vec![repair_or_explain(&error, Some(&sql), ctx)];
        }
        ctx.insights.last_error = Some(error.clone());
        let reason = format!("Query execution failed: {error}");
        return vec![explain_error(&error, ctx, reason).with_input("sql_query", sql)];
    }

    match fields.count(&["rows", "returned_rows"]) {
        Some(rows) if rows > 0 => {
            ctx.set_flag(CompletionFlag::ArtifactExecuted);
            ctx.insights.execution_result =
                Some(serde_json::json!({ "success": true, "returned_rows": rows }));
            ctx.insights.final_artifact = Some(sql);
            Vec::new()
        }
        Some(_) => {
            ctx.insights.execution_result =
                Some(serde_json::json!({ "success": true, "returned_rows": 0 }));
            vec![Suggestion::optional(
                AgentKind::Communication,
                "empty_result_explanation",
                2,
                "Query executed but returned no rows",
            )
            .with_input("sql_query", sql)
            .with_input("query", ctx.query.as_str())]
        }
        None => {
            ctx.insights.final_artifact = Some(sql);
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Communication
// ---------------------------------------------------------------------------

fn analyze_communication(data: &Map<String, Value>, ctx: &mut ExecutionContext) -> Vec<Suggestion> {
    let fields = Fields::new(AgentKind::Communication, data);
    let questions = fields.list(&["clarification_questions"]);

    if questions.is_empty() {
        ctx.insights.communication_message = fields.text(&["message", "explanation"]);
        ctx.set_flag(CompletionFlag::CommunicationCompleted);
    } else {
        ctx.insights.clarification_questions = questions;
        ctx.set_flag(CompletionFlag::ClarificationNeeded);
    }
    Vec::new()
}
