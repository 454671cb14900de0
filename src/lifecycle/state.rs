//! Agent representation and lifecycle states
//!
//! Defines the Agent identity, its fine-grained [`LifecycleState`], the coarse
//! [`AgentStatus`] derived from it, and the transition table that every
//! lifecycle operation is validated against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Fine-grained lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Spawning,
    Running,
    Paused,
    Retrying,
    Completed,
    Failed,
    Escalated,
    Killed,
}

impl LifecycleState {
    /// All states, in declaration order
    pub const ALL: [LifecycleState; 9] = [
        Self::Idle,
        Self::Spawning,
        Self::Running,
        Self::Paused,
        Self::Retrying,
        Self::Completed,
        Self::Failed,
        Self::Escalated,
        Self::Killed,
    ];

    /// States no ordinary operation leaves
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Killed)
    }

    /// Coarse status shown to callers
    pub fn status(&self) -> AgentStatus {
        match self {
            Self::Idle | Self::Spawning | Self::Retrying | Self::Escalated => AgentStatus::Pending,
            Self::Running => AgentStatus::Running,
            Self::Paused => AgentStatus::Paused,
            Self::Completed => AgentStatus::Completed,
            Self::Failed => AgentStatus::Failed,
            Self::Killed => AgentStatus::Killed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
            Self::Killed => "killed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse agent status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Not yet running (spawning, waiting for a retry, escalating)
    Pending,

    /// Agent is actively working
    Running,

    /// Agent is paused
    Paused,

    /// Agent completed successfully
    Completed,

    /// Agent failed and exhausted its retries
    Failed,

    /// Agent was killed
    Killed,
}

impl AgentStatus {
    /// Get emoji indicator for status
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Pending => "🔵",
            Self::Running => "🟢",
            Self::Paused => "⏸️",
            Self::Failed => "🔴",
            Self::Completed => "✅",
            Self::Killed => "💀",
        }
    }

    /// Check if agent is still in play
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Paused)
    }

    /// Check if agent has finished (successfully or not)
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Killed | Self::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle operation, used to validate transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Start,
    Pause,
    Resume,
    Kill,
    Complete,
    Fail,
    Retry,
    Escalate,
}

const NON_TERMINAL: &[LifecycleState] = &[
    LifecycleState::Idle,
    LifecycleState::Spawning,
    LifecycleState::Running,
    LifecycleState::Paused,
    LifecycleState::Retrying,
    LifecycleState::Escalated,
];

impl LifecycleOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Kill => "kill",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Retry => "retry",
            Self::Escalate => "retry with alternate model",
        }
    }

    /// Source states from which the operation is legal
    pub fn allowed_from(&self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Self::Start => &[Idle, Spawning, Retrying, Escalated],
            Self::Pause => &[Running, Retrying],
            Self::Resume => &[Paused],
            Self::Kill | Self::Complete | Self::Fail => NON_TERMINAL,
            Self::Retry => &[Failed, Retrying],
            Self::Escalate => &[Failed, Retrying, Paused],
        }
    }

    pub fn permits(&self, state: LifecycleState) -> bool {
        self.allowed_from().contains(&state)
    }
}

/// Typed agent metadata with one open extension map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Role within the team composition (worker, mapper, reducer, stage)
    pub role: Option<String>,

    /// Pipeline stage (1-based) for pipeline teams
    pub stage: Option<u32>,

    /// Free-form labels
    #[serde(default)]
    pub tags: Vec<String>,

    /// Caller-defined extra fields
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// An agent's identity and assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: String,

    /// Model the agent runs on (swapped on escalation)
    pub model: String,

    /// Task description
    pub task: String,

    /// Owning team
    pub team_id: Option<String>,

    /// Agent that spawned this one
    pub parent_id: Option<String>,

    /// Spend limit in USD
    pub budget_limit: Option<f64>,

    pub metadata: AgentMetadata,
}

/// Lifecycle wrapper around an [`Agent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    pub agent: Agent,

    /// Coarse status, always `lifecycle_state.status()`
    pub status: AgentStatus,

    pub lifecycle_state: LifecycleState,

    /// External session handle
    pub session_id: Option<String>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Bumped each time an automatic restart is scheduled
    #[serde(default)]
    pub retry_generation: u64,

    /// Model to escalate to once retries are exhausted
    pub alternate_model: Option<String>,

    pub last_error: Option<String>,

    /// Output reported on completion
    pub output: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl AgentState {
    /// Wrap a freshly built agent in the `spawning` state
    pub fn new(agent: Agent, max_retries: u32, alternate_model: Option<String>) -> Self {
        Self {
            id: agent.id.clone(),
            agent,
            status: AgentStatus::Pending,
            lifecycle_state: LifecycleState::Spawning,
            session_id: None,
            retry_count: 0,
            max_retries,
            retry_generation: 0,
            alternate_model,
            last_error: None,
            output: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            paused_at: None,
            resumed_at: None,
        }
    }

    /// Move to `state`, keeping the coarse status in sync
    pub fn set_state(&mut self, state: LifecycleState) {
        self.lifecycle_state = state;
        self.status = state.status();

        let now = Utc::now();
        match state {
            LifecycleState::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            LifecycleState::Paused => self.paused_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }

        // Leaving failed through an explicit retry
        if !state.is_terminal() {
            self.completed_at = None;
        }
    }

    /// Time since the agent started (or was created), up to completion
    pub fn runtime(&self) -> Duration {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).to_std().unwrap_or_default()
    }

    /// Format runtime as human-readable string
    pub fn format_runtime(&self) -> String {
        let secs = self.runtime().as_secs();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
        }
    }

    /// One-line summary for CLI output
    pub fn display_line(&self) -> String {
        let team = self.agent.team_id.as_deref().unwrap_or("-");
        format!(
            "{} {} [{}] {} team={} retries={}/{} runtime={}",
            self.status.emoji(),
            self.id,
            self.lifecycle_state,
            self.agent.model,
            team,
            self.retry_count,
            self.max_retries,
            self.format_runtime()
        )
    }
}

/// Agent spawn options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnOptions {
    /// Model to run (falls back to the lifecycle default when empty)
    pub model: String,

    /// Task description
    pub task: String,

    /// Owning team
    pub team_id: Option<String>,

    /// Parent agent
    pub parent_id: Option<String>,

    /// Budget limit in USD
    pub budget_limit: Option<f64>,

    /// Retry cap (falls back to the lifecycle default)
    pub max_retries: Option<u32>,

    /// Model to escalate to when retries run out
    pub alternate_model: Option<String>,

    /// Start the agent right after spawning
    pub auto_start: bool,

    /// Extra session context
    pub context: Option<String>,

    /// Session token cap
    pub max_tokens: Option<u64>,

    pub metadata: AgentMetadata,
}

impl SpawnOptions {
    /// Create spawn options for a task
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            task: task.into(),
            team_id: None,
            parent_id: None,
            budget_limit: None,
            max_retries: None,
            alternate_model: None,
            auto_start: true,
            context: None,
            max_tokens: None,
            metadata: AgentMetadata::default(),
        }
    }

    /// Set model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set team
    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Set parent agent
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set budget limit
    pub fn with_budget(mut self, budget_usd: f64) -> Self {
        self.budget_limit = Some(budget_usd);
        self
    }

    /// Set retry cap
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set escalation model
    pub fn with_alternate_model(mut self, model: impl Into<String>) -> Self {
        self.alternate_model = Some(model.into());
        self
    }

    /// Control auto start
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Set session context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: AgentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Options for [`crate::lifecycle::AgentLifecycle::fail`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailOptions {
    /// Escalate instead of failing once retries are exhausted
    pub use_alternate_model: bool,

    /// Model to escalate to; overrides the one given at spawn
    pub alternate_model: Option<String>,
}

impl FailOptions {
    /// Escalate to `model` once retries are exhausted
    pub fn escalate_to(model: impl Into<String>) -> Self {
        Self {
            use_alternate_model: true,
            alternate_model: Some(model.into()),
        }
    }
}
