//! Agent lifecycle state machine
//!
//! Every agent moves through a fixed set of fine-grained states:
//!
//! - `idle` / `spawning` → `start_agent` → `running`
//! - `running` / `retrying` → `pause` → `paused` → `resume` → `running`
//! - any non-terminal state → `kill` / `complete` → `killed` / `completed`
//! - any non-terminal state → `fail` → `retrying` (with exponential backoff),
//!   `escalated` (alternate model), or `failed`
//!
//! `completed`, `killed` and `failed` are terminal; only the explicit `retry`
//! operations leave `failed`.
//!
//! # Example
//!
//! ```ignore
//! use godel::lifecycle::{AgentLifecycle, FailOptions, SpawnOptions};
//!
//! lifecycle.start();
//! let agent = lifecycle
//!     .spawn(SpawnOptions::new("Refactor auth module").with_model("model-a"))
//!     .await?;
//!
//! lifecycle
//!     .fail(&agent.id, "rate limited", FailOptions::escalate_to("model-b"))
//!     .await?;
//! ```

mod manager;
mod state;

pub use manager::{AgentLifecycle, LifecycleConfig, LifecycleMetrics};
pub use state::{
    Agent, AgentMetadata, AgentState, AgentStatus, FailOptions, LifecycleOp, LifecycleState,
    SpawnOptions,
};
