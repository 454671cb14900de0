//! Team records and composition

use crate::lifecycle::AgentMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Team status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    Creating,
    Active,
    Scaling,
    Paused,
    Completed,
    Failed,
    Destroyed,
}

impl TeamStatus {
    /// No further work will happen in the team
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Destroyed)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Creating | Self::Scaling => "🔵",
            Self::Active => "🟢",
            Self::Paused => "⏸️",
            Self::Completed => "✅",
            Self::Failed => "🔴",
            Self::Destroyed => "💀",
        }
    }
}

impl std::fmt::Display for TeamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Scaling => "scaling",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{}", name)
    }
}

/// How work is divided among team members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositionStrategy {
    /// Every member works the same task
    #[default]
    Parallel,

    /// One member per stage, in order
    Pipeline,

    /// N-1 mappers and one reducer
    MapReduce,

    /// Every member works the same task under a coordinating root
    Tree,
}

impl CompositionStrategy {
    /// Task and metadata for member `index` of a team of `total`
    pub fn member(&self, task: &str, index: usize, total: usize) -> (String, AgentMetadata) {
        match self {
            Self::Parallel | Self::Tree => (task.to_string(), role("worker", None)),
            Self::Pipeline => {
                let stage = index + 1;
                (
                    format!("Stage {}/{}: {}", stage, total, task),
                    role("stage", Some(stage as u32)),
                )
            }
            Self::MapReduce => {
                if index + 1 == total {
                    (format!("Reduce: {}", task), role("reducer", None))
                } else {
                    let mappers = total.saturating_sub(1);
                    (
                        format!("Map {}/{}: {}", index + 1, mappers, task),
                        role("mapper", None),
                    )
                }
            }
        }
    }

    /// Task and metadata for a member added by scaling up
    ///
    /// Map-reduce teams only ever gain mappers; the reducer stays unique.
    pub fn scaled_member(&self, task: &str, index: usize, total: usize) -> (String, AgentMetadata) {
        match self {
            Self::MapReduce => (
                format!("Map {}: {}", index + 1, task),
                role("mapper", None),
            ),
            _ => self.member(task, index, total),
        }
    }
}

fn role(name: &str, stage: Option<u32>) -> AgentMetadata {
    AgentMetadata {
        role: Some(name.to_string()),
        stage,
        ..Default::default()
    }
}

impl std::fmt::Display for CompositionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Parallel => "parallel",
            Self::Pipeline => "pipeline",
            Self::MapReduce => "map-reduce",
            Self::Tree => "tree",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for CompositionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "pipeline" => Ok(Self::Pipeline),
            "map-reduce" | "mapreduce" | "map_reduce" => Ok(Self::MapReduce),
            "tree" => Ok(Self::Tree),
            _ => Err(format!("unknown composition strategy: {}", s)),
        }
    }
}

/// Why a team is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    BudgetExhausted,
    DailyBudget,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::BudgetExhausted => "budget_exhausted",
            Self::DailyBudget => "daily_budget",
        };
        write!(f, "{}", name)
    }
}

/// Final outcome of a member agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Completed,
    Failed,
}

/// Team spend envelope
///
/// `remaining` is always `max(0, allocated - consumed)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamBudget {
    pub allocated: f64,
    pub consumed: f64,
    pub remaining: f64,
    pub tokens_used: u64,
}

impl TeamBudget {
    pub fn new(allocated: f64) -> Self {
        Self {
            allocated,
            consumed: 0.0,
            remaining: allocated.max(0.0),
            tokens_used: 0,
        }
    }

    /// Add spend and recompute the remainder
    pub fn consume(&mut self, tokens: u64, cost: f64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
        self.consumed += cost;
        self.remaining = (self.allocated - self.consumed).max(0.0);
    }

    /// Fraction of the allocation consumed
    pub fn usage(&self) -> f64 {
        if self.allocated > 0.0 {
            self.consumed / self.allocated
        } else {
            1.0
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0.0
    }
}

/// Member tallies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMetrics {
    pub total_agents: usize,
    pub completed_agents: usize,
    pub failed_agents: usize,
}

/// Request to create a team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    pub task: String,

    #[serde(default = "default_initial_agents")]
    pub initial_agents: usize,

    /// Team size cap (manager default when absent)
    #[serde(default)]
    pub max_agents: Option<usize>,

    #[serde(default)]
    pub strategy: CompositionStrategy,

    /// Team budget in USD
    #[serde(default)]
    pub budget: f64,

    /// Model for every member (lifecycle default when absent)
    #[serde(default)]
    pub model: Option<String>,

    /// Escalation model for members
    #[serde(default)]
    pub alternate_model: Option<String>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_initial_agents() -> usize {
    1
}

impl TeamConfig {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            initial_agents: default_initial_agents(),
            max_agents: None,
            strategy: CompositionStrategy::default(),
            budget: 0.0,
            model: None,
            alternate_model: None,
            max_retries: None,
        }
    }

    pub fn with_agents(mut self, count: usize) -> Self {
        self.initial_agents = count;
        self
    }

    pub fn with_max_agents(mut self, max: usize) -> Self {
        self.max_agents = Some(max);
        self
    }

    pub fn with_strategy(mut self, strategy: CompositionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_budget(mut self, budget_usd: f64) -> Self {
        self.budget = budget_usd;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_alternate_model(mut self, model: impl Into<String>) -> Self {
        self.alternate_model = Some(model.into());
        self
    }
}

/// A team of agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub task: String,
    pub status: TeamStatus,
    pub strategy: CompositionStrategy,

    /// Team size cap
    pub max_agents: usize,

    /// Member model, alternate model and retry cap
    pub model: Option<String>,
    pub alternate_model: Option<String>,
    pub max_retries: Option<u32>,

    /// Member agent ids, in the order they joined
    pub agents: Vec<String>,

    pub budget: TeamBudget,
    pub metrics: TeamMetrics,
    pub pause_reason: Option<PauseReason>,

    /// Recorded member outcomes; each agent counts once
    #[serde(default)]
    pub outcomes: BTreeMap<String, AgentOutcome>,

    /// Budget threshold events already published
    #[serde(default)]
    pub warning_sent: bool,
    #[serde(default)]
    pub critical_sent: bool,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Team {
    pub(crate) fn new(id: String, config: &TeamConfig, max_agents: usize) -> Self {
        Self {
            id,
            name: config.name.clone(),
            task: config.task.clone(),
            status: TeamStatus::Creating,
            strategy: config.strategy,
            max_agents,
            model: config.model.clone(),
            alternate_model: config.alternate_model.clone(),
            max_retries: config.max_retries,
            agents: Vec::new(),
            budget: TeamBudget::new(config.budget),
            metrics: TeamMetrics::default(),
            pause_reason: None,
            outcomes: BTreeMap::new(),
            warning_sent: false,
            critical_sent: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Members without a recorded outcome
    pub fn live_members(&self) -> usize {
        self.agents
            .iter()
            .filter(|id| !self.outcomes.contains_key(*id))
            .count()
    }

    /// Whether every member has reported an outcome
    pub fn all_members_done(&self) -> bool {
        self.metrics.total_agents > 0
            && self.metrics.completed_agents + self.metrics.failed_agents
                == self.metrics.total_agents
    }

    /// Drop a member and any outcome it reported
    pub(crate) fn remove_member(&mut self, agent_id: &str) {
        self.agents.retain(|id| id != agent_id);
        match self.outcomes.remove(agent_id) {
            Some(AgentOutcome::Completed) => {
                self.metrics.completed_agents = self.metrics.completed_agents.saturating_sub(1)
            }
            Some(AgentOutcome::Failed) => {
                self.metrics.failed_agents = self.metrics.failed_agents.saturating_sub(1)
            }
            None => {}
        }
        self.metrics.total_agents = self.agents.len();
    }

    /// One-line summary for CLI output
    pub fn display_line(&self) -> String {
        format!(
            "{} {} \"{}\" [{}] {} agents={} done={}/{} budget=${:.2}/${:.2}",
            self.status.emoji(),
            self.id,
            self.name,
            self.status,
            self.strategy,
            self.agents.len(),
            self.metrics.completed_agents + self.metrics.failed_agents,
            self.metrics.total_agents,
            self.budget.consumed,
            self.budget.allocated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_remaining_never_negative() {
        let mut budget = TeamBudget::new(10.0);
        budget.consume(100, 4.0);
        assert_eq!(budget.remaining, 6.0);
        assert!(!budget.is_exhausted());

        budget.consume(200, 7.0);
        assert_eq!(budget.remaining, 0.0);
        assert_eq!(budget.consumed, 11.0);
        assert_eq!(budget.tokens_used, 300);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_pipeline_members() {
        let (task, metadata) = CompositionStrategy::Pipeline.member("Ship it", 1, 3);
        assert_eq!(task, "Stage 2/3: Ship it");
        assert_eq!(metadata.stage, Some(2));
        assert_eq!(metadata.role.as_deref(), Some("stage"));
    }

    #[test]
    fn test_map_reduce_members() {
        let roles: Vec<String> = (0..4)
            .map(|i| {
                CompositionStrategy::MapReduce
                    .member("Index repo", i, 4)
                    .1
                    .role
                    .unwrap()
            })
            .collect();
        assert_eq!(roles, vec!["mapper", "mapper", "mapper", "reducer"]);

        let (_, scaled) = CompositionStrategy::MapReduce.scaled_member("Index repo", 4, 6);
        assert_eq!(scaled.role.as_deref(), Some("mapper"));
    }

    #[test]
    fn test_parallel_members_share_task() {
        let (task, metadata) = CompositionStrategy::Parallel.member("Fix bugs", 2, 3);
        assert_eq!(task, "Fix bugs");
        assert_eq!(metadata.role.as_deref(), Some("worker"));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "map-reduce".parse::<CompositionStrategy>().unwrap(),
            CompositionStrategy::MapReduce
        );
        assert!("star".parse::<CompositionStrategy>().is_err());
        assert_eq!(CompositionStrategy::MapReduce.to_string(), "map-reduce");
    }

    #[test]
    fn test_remove_member_drops_outcome() {
        let config = TeamConfig::new("t", "task");
        let mut team = Team::new("team-1".to_string(), &config, 5);
        team.agents = vec!["a".to_string(), "b".to_string()];
        team.metrics.total_agents = 2;
        team.outcomes.insert("b".to_string(), AgentOutcome::Completed);
        team.metrics.completed_agents = 1;

        assert_eq!(team.live_members(), 1);
        team.remove_member("b");
        assert_eq!(team.metrics.completed_agents, 0);
        assert_eq!(team.metrics.total_agents, 1);
        assert!(!team.all_members_done());
    }
}
