//! Teams (swarms) of agents
//!
//! A team groups agents that share a task, a budget envelope and a
//! composition strategy:
//!
//! - **parallel**: every member works the full task
//! - **pipeline**: one member per stage, `Stage i/N`
//! - **map-reduce**: N-1 mappers feeding one reducer
//! - **tree**: every member works the full task
//!
//! Lifecycle operations on a team cascade to its members. Member failures
//! during a cascade are logged and do not abort the team operation.

mod manager;
mod record;

pub use manager::{TeamManager, TeamManagerConfig, TeamStats};
pub use record::{
    AgentOutcome, CompositionStrategy, PauseReason, Team, TeamBudget, TeamConfig, TeamMetrics,
    TeamStatus,
};
