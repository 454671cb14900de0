//! Error types for Godel
//!
//! Defines one error enum covering every failure mode of the orchestration core.
//! Uses thiserror for ergonomic error handling.
//!
//! Policy denials from the budget controller are normally returned as data
//! (see [`crate::budget::LimitCheck`]); the variants here are what mutating
//! operations surface once they decide to act on a deny.

use crate::lifecycle::LifecycleState;
use crate::retry::{RetryDecision, RetryableError};
use crate::team::TeamStatus;
use thiserror::Error;

/// Result type alias for Godel operations
pub type Result<T> = std::result::Result<T, GodelError>;

/// Comprehensive error type for Godel operations
#[derive(Error, Debug)]
pub enum GodelError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The requested operation is not legal from the agent's current state
    #[error(
        "Invalid state transition for agent '{agent_id}': cannot {operation} from {current} (allowed from: {})",
        format_states(.allowed)
    )]
    InvalidStateTransition {
        agent_id: String,
        operation: &'static str,
        current: LifecycleState,
        allowed: Vec<LifecycleState>,
    },

    /// Unknown agent id
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Unknown team id
    #[error("Team not found: {0}")]
    TeamNotFound(String),

    /// Unknown execution batch id
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Manager used before `start()` (or after `stop()`)
    #[error("{0} has not been started")]
    NotStarted(&'static str),

    /// The team's status does not permit the operation
    #[error("Team '{team_id}' is {status} and cannot {operation}")]
    InvalidTeamState {
        team_id: String,
        status: TeamStatus,
        operation: &'static str,
    },

    /// Global or per-team spend policy denied the operation
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Agent-count cap denied the operation
    #[error("Max agents exceeded: requested {requested}, limit {limit}")]
    MaxAgentsExceeded { requested: usize, limit: usize },

    /// The team has no budget left
    #[error("Team '{team_id}' budget exhausted: ${consumed:.2} of ${allocated:.2} consumed")]
    TeamBudgetExceeded {
        team_id: String,
        consumed: f64,
        allocated: f64,
    },

    /// Session backend call failed
    #[error("Session backend error: {0}")]
    Backend(String),

    /// A unit of work failed
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

fn format_states(states: &[LifecycleState]) -> String {
    if states.is_empty() {
        return "none".to_string();
    }
    states
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RetryableError for GodelError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            // Transient failures of the work itself or of the backend
            GodelError::Execution(_) => RetryDecision::Retry,
            GodelError::Backend(_) => RetryDecision::Retry,
            GodelError::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
                    RetryDecision::Retry
                }
                _ => RetryDecision::NoRetry,
            },

            // Caller or policy errors are permanent
            GodelError::Config(_)
            | GodelError::Json(_)
            | GodelError::Yaml(_)
            | GodelError::InvalidStateTransition { .. }
            | GodelError::AgentNotFound(_)
            | GodelError::TeamNotFound(_)
            | GodelError::BatchNotFound(_)
            | GodelError::NotStarted(_)
            | GodelError::InvalidTeamState { .. }
            | GodelError::BudgetExceeded(_)
            | GodelError::MaxAgentsExceeded { .. }
            | GodelError::TeamBudgetExceeded { .. }
            | GodelError::Other(_)
            | GodelError::Anyhow(_) => RetryDecision::NoRetry,
        }
    }
}
