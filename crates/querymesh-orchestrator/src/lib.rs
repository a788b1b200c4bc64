//! Result-driven orchestration for querymesh.
//!
//! The [`DynamicScheduler`] runs one agent at a time through the hub. After
//! every result it applies that agent's analysis rule to choose the next task
//! and checks an ordered set of stop conditions. Two ceilings, on iterations
//! and on distinct agents executed, guarantee every run ends.
//!
//! # Main types
//!
//! - [`DynamicScheduler`] — Seeds, selects, dispatches, and terminates workflows.
//! - [`ExecutionContext`] — Per-workflow state: insights, history, flags.
//! - [`WorkflowResult`] — What a finished workflow hands back.
//! - [`RepairSession`] — Self-repair state machine for failed queries.
//! - [`AgentMonitor`] — Agent utilization and workflow counters.

/// Scheduler limits.
pub mod config;
/// Per-workflow execution context and typed insights.
pub mod context;
/// Agent utilization and workflow counters.
pub mod monitor;
/// Query self-repair.
pub mod repair;
/// Result-analysis rule table.
pub mod rules;
/// The dynamic scheduler loop.
pub mod scheduler;
/// Ordered stop conditions.
pub mod termination;
/// Suggestions, results, flags, and termination reasons.
pub mod types;
/// Structural checks on generated queries.
pub mod validation;

pub use config::SchedulerConfig;
pub use context::{ExecutionContext, Insights};
pub use monitor::{AgentMonitor, AgentUtilization, WorkflowStats};
pub use repair::{
    ConfirmationGate, FixedGate, QueryExecutor, QueryRun, RepairCandidate, RepairProposer,
    RepairReport, RepairSession, RepairState,
};
pub use scheduler::DynamicScheduler;
pub use termination::Termination;
pub use types::{
    AgentExecutionResult, CompletionFlag, Suggestion, TerminationReason, WorkflowResult,
};
pub use validation::{validate_artifact, ValidationIssue};
