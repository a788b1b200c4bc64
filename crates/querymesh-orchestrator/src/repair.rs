//! Query self-repair.
//!
//! A [`RepairSession`] runs a failed query, collects repair candidates from an
//! optional model-backed [`RepairProposer`] plus built-in pattern repairs,
//! and executes the best one. High-confidence repairs run automatically;
//! the rest go through a [`ConfirmationGate`].

use async_trait::async_trait;
use querymesh_core::QuerymeshResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

/// Bound shared by generation retries and repair attempts.
pub const MAX_REPAIR_ATTEMPTS: u32 = 2;

/// Repairs scoring strictly above this run without confirmation.
pub const AUTO_EXECUTE_THRESHOLD: f64 = 0.7;

static UNRECOGNIZED_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Unrecognized name: (\w+)").ok());
static DID_YOU_MEAN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Did you mean (\w+)\?").ok());
static CREATED_AT_COMPARISON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\w+\.)?createdAt(\s*[><=]+\s*)").ok());

/// States visited by a repair run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    /// Running the query as given.
    ExecutingOriginal,
    /// Reading the backend error.
    Analyzing,
    /// Collecting proposer and pattern candidates.
    GeneratingCandidates,
    /// Picking the highest-confidence candidate.
    SelectingBest,
    /// The best candidate clears the threshold.
    AutoExecuting,
    /// Waiting on the confirmation gate.
    AwaitingConfirmation,
    /// Running the chosen rewrite.
    ExecutingCandidate,
    /// A query ran successfully.
    Done,
    /// No query ran successfully.
    DoneFailed,
}

/// Result of running one query against the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRun {
    /// Whether the backend accepted the query.
    pub success: bool,
    /// Row count on success.
    #[serde(default)]
    pub returned_rows: u64,
    /// Backend error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryRun {
    /// A successful run.
    pub fn rows(returned_rows: u64) -> Self {
        Self {
            success: true,
            returned_rows,
            error: None,
        }
    }

    /// A failed run.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            returned_rows: 0,
            error: Some(error.into()),
        }
    }
}

/// A proposed rewrite of a failed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairCandidate {
    /// e.g. `column_name`, `data_type`, `function`.
    pub issue_type: String,
    /// What the rewrite does.
    pub description: String,
    /// The rewritten query.
    pub repaired_query: String,
    /// Score in `0.0..=1.0`.
    pub confidence: f64,
    /// Individual edits, for display.
    #[serde(default)]
    pub changes: Vec<String>,
}

/// Runs queries against the data backend.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `query`. `Err` means the backend could not be reached.
    async fn execute(&self, query: &str) -> QuerymeshResult<QueryRun>;
}

/// Proposes repairs for a failed query, typically via a language model.
#[async_trait]
pub trait RepairProposer: Send + Sync {
    /// Candidates for `query`, which failed with `error` while answering `request`.
    async fn propose(
        &self,
        query: &str,
        error: &str,
        request: &str,
    ) -> QuerymeshResult<Vec<RepairCandidate>>;
}

/// Asks whether a low-confidence repair may run.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Whether `candidate` may run.
    async fn confirm(&self, candidate: &RepairCandidate) -> bool;
}

/// Gate that answers the same way every time.
pub struct FixedGate(
    /// The answer.
    pub bool,
);

#[async_trait]
impl ConfirmationGate for FixedGate {
    async fn confirm(&self, _candidate: &RepairCandidate) -> bool {
        self.0
    }
}

/// Outcome of a repair run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    /// `Done` or `DoneFailed`.
    pub final_state: RepairState,
    /// Every state entered, in order.
    pub visited: Vec<RepairState>,
    /// The last query executed.
    pub query: String,
    /// Outcome of the last execution.
    pub run: QueryRun,
    /// The candidate that was executed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<RepairCandidate>,
    /// Candidates collected before selection.
    pub candidates_considered: usize,
    /// The confirmation gate declined the best candidate.
    pub cancelled: bool,
}

impl RepairReport {
    /// Whether the run ended in `Done`.
    pub fn succeeded(&self) -> bool {
        self.final_state == RepairState::Done
    }

    /// Generation result payload for the scheduler's analysis rules.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("sql".into(), Value::String(self.query.clone()));
        if self.run.success {
            payload.insert("rows".into(), Value::from(self.run.returned_rows));
        } else {
            let error = self
                .run
                .error
                .clone()
                .unwrap_or_else(|| "query failed".to_string());
            payload.insert("execution_error".into(), Value::String(error));
        }
        if let Some(candidate) = &self.applied {
            payload.insert("repair".into(), serde_json::json!(candidate));
        }
        payload
    }
}

/// Drives one failed query through the repair states.
pub struct RepairSession {
    executor: Arc<dyn QueryExecutor>,
    proposer: Option<Arc<dyn RepairProposer>>,
    gate: Arc<dyn ConfirmationGate>,
}

impl RepairSession {
    /// Session with pattern repairs only.
    pub fn new(executor: Arc<dyn QueryExecutor>, gate: Arc<dyn ConfirmationGate>) -> Self {
        Self {
            executor,
            proposer: None,
            gate,
        }
    }

    /// Also ask `proposer` for candidates.
    pub fn with_proposer(mut self, proposer: Arc<dyn RepairProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    /// Execute `query`; on failure, repair and retry once with the best candidate.
    pub async fn run(&self, query: &str, request: &str) -> RepairReport {
        let mut visited = vec![RepairState::ExecutingOriginal];
        let original = self.execute(query).await;
        if original.success {
            visited.push(RepairState::Done);
            return report(visited, query, original, None, 0, false);
        }

        visited.push(RepairState::Analyzing);
        let error = original.error.clone().unwrap_or_default();
        info!(error = %error, "Query failed, generating repairs");

        visited.push(RepairState::GeneratingCandidates);
        let candidates = self.candidates(query, &error, request).await;
        if candidates.is_empty() {
            visited.push(RepairState::DoneFailed);
            return report(visited, query, original, None, 0, false);
        }

        visited.push(RepairState::SelectingBest);
        let considered = candidates.len();
        let Some(best) = best_candidate(&candidates).cloned() else {
            visited.push(RepairState::DoneFailed);
            return report(visited, query, original, None, considered, false);
        };

        if best.confidence > AUTO_EXECUTE_THRESHOLD {
            visited.push(RepairState::AutoExecuting);
        } else {
            visited.push(RepairState::AwaitingConfirmation);
            if !self.gate.confirm(&best).await {
                info!(issue = %best.issue_type, "Repair declined");
                visited.push(RepairState::DoneFailed);
                return report(visited, query, original, None, considered, true);
            }
            visited.push(RepairState::ExecutingCandidate);
        }

        info!(
            issue = %best.issue_type,
            confidence = best.confidence,
            "Executing repaired query"
        );
        let run = self.execute(&best.repaired_query).await;
        visited.push(if run.success {
            RepairState::Done
        } else {
            RepairState::DoneFailed
        });
        let repaired = best.repaired_query.clone();
        report(visited, &repaired, run, Some(best), considered, false)
    }

    async fn execute(&self, query: &str) -> QueryRun {
        match self.executor.execute(query).await {
            Ok(run) => run,
            Err(e) => QueryRun::failed(e.to_string()),
        }
    }

    /// Model proposals first, then pattern repairs.
    async fn candidates(&self, query: &str, error: &str, request: &str) -> Vec<RepairCandidate> {
        let mut candidates = match &self.proposer {
            Some(proposer) => match proposer.propose(query, error, request).await {
                Ok(proposed) => proposed,
                Err(e) => {
                    warn!(error = %e, "Repair proposer failed, using pattern repairs only");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        candidates.extend(pattern_repairs(query, error));
        candidates
    }
}

fn report(
    visited: Vec<RepairState>,
    query: &str,
    run: QueryRun,
    applied: Option<RepairCandidate>,
    candidates_considered: usize,
    cancelled: bool,
) -> RepairReport {
    RepairReport {
        final_state: visited.last().copied().unwrap_or(RepairState::DoneFailed),
        visited,
        query: query.to_string(),
        run,
        applied,
        candidates_considered,
        cancelled,
    }
}

/// Highest confidence wins; ties go to the earlier candidate.
pub fn best_candidate(candidates: &[RepairCandidate]) -> Option<&RepairCandidate> {
    candidates.iter().fold(None, |best, c| match best {
        Some(b) if b.confidence >= c.confidence => Some(b),
        _ => Some(c),
    })
}

/// Deterministic rewrites for known error signatures. At most one applies.
pub fn pattern_repairs(query: &str, error: &str) -> Vec<RepairCandidate> {
    if error.contains("Unrecognized name") {
        let wrong = UNRECOGNIZED_NAME
            .as_ref()
            .and_then(|re| re.captures(error))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        let right = DID_YOU_MEAN
            .as_ref()
            .and_then(|re| re.captures(error))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        if let (Some(wrong), Some(right)) = (wrong, right) {
            return vec![RepairCandidate {
                issue_type: "column_name".into(),
                description: format!("Rename column '{wrong}' to '{right}'"),
                repaired_query: query.replace(wrong, right),
                confidence: 0.95,
                changes: vec![format!("{wrong} -> {right}")],
            }];
        }
        return Vec::new();
    }

    if error.contains("No matching signature")
        && (error.contains("TIMESTAMP") || error.contains("STRING"))
    {
        if query.contains("createdAt") {
            if let Some(re) = CREATED_AT_COMPARISON.as_ref() {
                let repaired = re
                    .replace_all(
                        query,
                        "PARSE_TIMESTAMP('%Y-%m-%dT%H:%M:%E*SZ', ${1}createdAt)${2}",
                    )
                    .into_owned();
                return vec![RepairCandidate {
                    issue_type: "data_type".into(),
                    description: "Parse createdAt as an ISO 8601 timestamp before comparing"
                        .into(),
                    repaired_query: repaired,
                    confidence: 0.9,
                    changes: vec![
                        "createdAt -> PARSE_TIMESTAMP('%Y-%m-%dT%H:%M:%E*SZ', createdAt)".into(),
                    ],
                }];
            }
        }
        return Vec::new();
    }

    if query.contains("CURRENT_DATE") && error.contains("INTERVAL") {
        return vec![RepairCandidate {
            issue_type: "function".into(),
            description: "Use CURRENT_TIMESTAMP() for timestamp arithmetic".into(),
            repaired_query: query.replace("CURRENT_DATE()", "CURRENT_TIMESTAMP()"),
            confidence: 0.8,
            changes: vec!["CURRENT_DATE() -> CURRENT_TIMESTAMP()".into()],
        }];
    }

    Vec::new()
}
