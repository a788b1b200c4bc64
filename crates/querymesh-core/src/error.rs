use thiserror::Error;

/// A convenience `Result` alias using [`QuerymeshError`].
pub type QuerymeshResult<T> = Result<T, QuerymeshError>;

/// Top-level error type for querymesh.
///
/// Each variant corresponds to a subsystem that can produce errors. None of
/// them escape a workflow run: the scheduler folds every variant into its
/// failure branch.
#[derive(Error, Debug)]
pub enum QuerymeshError {
    /// An agent reported a failure while processing a message.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The addressed agent is not registered with the hub.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The hub could not deliver a message.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// A middleware in the routing chain rejected the message.
    #[error("Middleware '{name}' rejected message: {reason}")]
    Middleware {
        /// Name the middleware was registered under.
        name: String,
        /// Why it rejected the message.
        reason: String,
    },

    /// An agent call did not complete within its timeout.
    #[error("Agent '{agent}' timed out after {after_ms}ms")]
    Timeout {
        /// Agent that was being called.
        agent: String,
        /// Elapsed budget in milliseconds.
        after_ms: u64,
    },

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the dynamic scheduler.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error raised while repairing a generated query.
    #[error("Repair error: {0}")]
    Repair(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
