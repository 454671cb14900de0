//! Team manager
//!
//! Creates, scales, pauses, resumes and destroys teams of agents. Every
//! mutating operation runs under the team's lock; member operations then take
//! agent locks, so the order is always team before agent.

use super::record::{AgentOutcome, PauseReason, Team, TeamBudget, TeamConfig, TeamStatus};
use crate::budget::BudgetController;
use crate::events::{team_topic, Event, EventBus, EventKind};
use crate::lifecycle::{AgentLifecycle, AgentMetadata, AgentState, LifecycleState, SpawnOptions};
use crate::sync::KeyedMutex;
use crate::{GodelError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Team manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamManagerConfig {
    /// Default team size cap
    #[serde(default = "default_max_agents_per_team")]
    pub max_agents_per_team: usize,

    /// Budget usage fraction that publishes `team.budget.warning`
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,

    /// Budget usage fraction that publishes `team.budget.critical`
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
}

fn default_max_agents_per_team() -> usize {
    20
}

fn default_warning_threshold() -> f64 {
    0.75
}

fn default_critical_threshold() -> f64 {
    0.9
}

impl Default for TeamManagerConfig {
    fn default() -> Self {
        Self {
            max_agents_per_team: default_max_agents_per_team(),
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
        }
    }
}

/// Summary statistics across teams
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamStats {
    pub total_teams: usize,
    pub active_teams: usize,
    pub paused_teams: usize,
    pub completed_teams: usize,
    pub failed_teams: usize,
    pub total_agents: usize,
    pub total_allocated: f64,
    pub total_consumed: f64,
}

struct Inner {
    config: TeamManagerConfig,
    lifecycle: AgentLifecycle,
    budget: Arc<BudgetController>,
    bus: EventBus,
    teams: RwLock<HashMap<String, Team>>,
    locks: KeyedMutex,
    next_id: Mutex<u64>,
    active: AtomicBool,
}

/// Team manager
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TeamManager {
    inner: Arc<Inner>,
}

impl TeamManager {
    pub fn new(
        config: TeamManagerConfig,
        lifecycle: AgentLifecycle,
        budget: Arc<BudgetController>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle,
                budget,
                bus,
                teams: RwLock::new(HashMap::new()),
                locks: KeyedMutex::new(),
                next_id: Mutex::new(0),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn start(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
        info!("Team manager started");
    }

    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        info!("Team manager stopped");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Create a team and spawn its initial members
    pub async fn create(&self, config: TeamConfig) -> Result<Team> {
        if !self.is_active() {
            return Err(GodelError::NotStarted("team manager"));
        }

        let max_agents = config
            .max_agents
            .unwrap_or(self.inner.config.max_agents_per_team);
        if config.initial_agents > max_agents {
            return Err(GodelError::MaxAgentsExceeded {
                requested: config.initial_agents,
                limit: max_agents,
            });
        }

        // Counts the team and its initial members up front; released on rollback
        let check = self
            .inner
            .budget
            .try_reserve_team(config.initial_agents, config.budget);
        if !check.allowed {
            return Err(GodelError::BudgetExceeded(check.reason_or_default()));
        }

        let id = {
            let mut counter = self.inner.next_id.lock().await;
            *counter += 1;
            format!("team-{}", *counter)
        };

        let _guard = self.inner.locks.lock(&id).await;

        let mut team = Team::new(id.clone(), &config, max_agents);
        self.save(&team).await;

        info!(team_id = %id, name = %config.name, agents = config.initial_agents, strategy = %config.strategy, "Creating team");

        for index in 0..config.initial_agents {
            let (task, metadata) = config
                .strategy
                .member(&config.task, index, config.initial_agents);

            match self.spawn_member(&team, task, metadata).await {
                Ok(state) => {
                    team.agents.push(state.id);
                    team.metrics.total_agents = team.agents.len();
                }
                Err(e) => {
                    warn!(team_id = %id, error = %e, "Team member spawn failed, rolling back");
                    self.kill_members(&team, true).await;
                    self.inner
                        .budget
                        .adjust_agent_count(-(config.initial_agents as i64));
                    self.inner.budget.adjust_team_count(-1);

                    team.status = TeamStatus::Failed;
                    team.completed_at = Some(Utc::now());
                    self.save(&team).await;
                    return Err(e);
                }
            }
        }

        team.status = TeamStatus::Active;
        self.save(&team).await;

        self.publish(
            &team,
            EventKind::TeamCreated,
            TeamStatus::Creating,
            json!({
                "name": team.name,
                "strategy": team.strategy,
                "agents": team.agents,
                "budget": team.budget.allocated,
            }),
        );

        info!(team_id = %id, agents = team.agents.len(), "Team active");
        Ok(team)
    }

    /// Grow or shrink a team to `target` members
    pub async fn scale(&self, team_id: &str, target: usize) -> Result<Team> {
        let _guard = self.inner.locks.lock(team_id).await;
        let mut team = self.load(team_id).await?;

        if team.status.is_finished() {
            return Err(GodelError::InvalidTeamState {
                team_id: team_id.to_string(),
                status: team.status,
                operation: "scale",
            });
        }

        if target > team.max_agents {
            return Err(GodelError::MaxAgentsExceeded {
                requested: target,
                limit: team.max_agents,
            });
        }

        let current = team.agents.len();
        if target == current {
            debug!(team_id, size = current, "Scale to current size ignored");
            return Ok(team);
        }

        if target > current {
            let check = self.inner.budget.try_reserve_agents(target - current);
            if !check.allowed {
                return Err(GodelError::BudgetExceeded(check.reason_or_default()));
            }
        }

        let prior = team.status;
        team.status = TeamStatus::Scaling;
        self.save(&team).await;

        let mut spawn_error = None;

        if target > current {
            for index in current..target {
                let (task, metadata) = team.strategy.scaled_member(&team.task, index, target);
                match self.spawn_member(&team, task, metadata).await {
                    Ok(state) => {
                        if prior == TeamStatus::Paused {
                            if let Err(e) = self.inner.lifecycle.pause(&state.id).await {
                                warn!(agent_id = %state.id, error = %e, "Failed to pause new member of paused team");
                            }
                        }
                        team.agents.push(state.id);
                    }
                    Err(e) => {
                        let unspawned = target - team.agents.len();
                        self.inner.budget.adjust_agent_count(-(unspawned as i64));
                        spawn_error = Some(e);
                        break;
                    }
                }
            }
        } else {
            let removed: Vec<String> = team.agents[target..].to_vec();
            for agent_id in removed.iter().rev() {
                if !team.outcomes.contains_key(agent_id) {
                    self.inner.budget.adjust_agent_count(-1);
                }
                if let Err(e) = self.inner.lifecycle.kill(agent_id, true).await {
                    warn!(team_id, agent_id = %agent_id, error = %e, "Failed to kill member during scale down");
                }
                team.remove_member(agent_id);
            }
        }

        team.metrics.total_agents = team.agents.len();
        team.status = prior;
        self.save(&team).await;

        if let Some(e) = spawn_error {
            warn!(team_id, size = team.agents.len(), error = %e, "Scale up stopped early");
            return Err(e);
        }

        self.publish(
            &team,
            EventKind::TeamScaled,
            TeamStatus::Scaling,
            json!({ "previous_size": current, "new_size": team.agents.len() }),
        );
        info!(team_id, from = current, to = team.agents.len(), "Scaled team");

        if team.all_members_done() {
            self.complete_locked(&mut team).await;
        }

        Ok(team)
    }

    /// Kill every member and mark the team destroyed; a no-op when destroyed
    pub async fn destroy(&self, team_id: &str, force: bool) -> Result<Team> {
        let _guard = self.inner.locks.lock(team_id).await;
        let mut team = self.load(team_id).await?;

        if team.status == TeamStatus::Destroyed {
            debug!(team_id, "Team already destroyed");
            return Ok(team);
        }

        let killed = self.kill_members(&team, force).await;
        self.inner
            .budget
            .adjust_agent_count(-(team.live_members() as i64));
        if !team.status.is_finished() {
            self.inner.budget.adjust_team_count(-1);
        }

        let previous = team.status;
        team.agents.clear();
        team.status = TeamStatus::Destroyed;
        team.completed_at = Some(Utc::now());
        self.save(&team).await;

        self.publish(
            &team,
            EventKind::TeamDestroyed,
            previous,
            json!({ "force": force, "killed_agents": killed }),
        );
        info!(team_id, killed, "Destroyed team");
        Ok(team)
    }

    /// Charge spend to a team and to the global budget
    ///
    /// A team whose remaining budget reaches zero is paused with reason
    /// `budget_exhausted`.
    pub async fn consume_budget(
        &self,
        team_id: &str,
        agent_id: &str,
        tokens: u64,
        cost: f64,
    ) -> Result<Team> {
        let _guard = self.inner.locks.lock(team_id).await;
        let mut team = self.load(team_id).await?;

        if team.status == TeamStatus::Destroyed {
            return Err(GodelError::InvalidTeamState {
                team_id: team_id.to_string(),
                status: team.status,
                operation: "consume budget",
            });
        }

        let cost = if cost.is_finite() && cost >= 0.0 {
            cost
        } else {
            warn!(team_id, agent_id, cost, "Ignoring invalid cost");
            0.0
        };

        team.budget.consume(tokens, cost);
        self.inner.budget.record_spend(cost);
        debug!(
            team_id,
            agent_id,
            tokens,
            cost,
            remaining = team.budget.remaining,
            "Consumed team budget"
        );

        let usage = team.budget.usage();
        if usage >= self.inner.config.warning_threshold && !team.warning_sent {
            team.warning_sent = true;
            warn!(team_id, usage = usage * 100.0, "Team budget warning");
            self.publish_budget(&team, EventKind::TeamBudgetWarning, agent_id);
        }
        if usage >= self.inner.config.critical_threshold && !team.critical_sent {
            team.critical_sent = true;
            warn!(team_id, usage = usage * 100.0, "Team budget critical");
            self.publish_budget(&team, EventKind::TeamBudgetCritical, agent_id);
        }

        if team.budget.is_exhausted() {
            match team.status {
                TeamStatus::Active => {
                    warn!(team_id, consumed = team.budget.consumed, allocated = team.budget.allocated, "Team budget exhausted, pausing");
                    self.pause_locked(&mut team, PauseReason::BudgetExhausted)
                        .await;
                }
                TeamStatus::Paused
                    if team.pause_reason != Some(PauseReason::BudgetExhausted) =>
                {
                    warn!(team_id, previous_reason = ?team.pause_reason, "Team budget exhausted while paused");
                    team.pause_reason = Some(PauseReason::BudgetExhausted);
                    self.publish(
                        &team,
                        EventKind::TeamPaused,
                        TeamStatus::Paused,
                        json!({ "reason": PauseReason::BudgetExhausted, "paused_agents": 0 }),
                    );
                }
                _ => {}
            }
        }

        self.save(&team).await;
        Ok(team)
    }

    /// Pause a team and every member
    pub async fn pause_team(&self, team_id: &str) -> Result<Team> {
        self.pause_team_for(team_id, PauseReason::Manual).await
    }

    /// Pause a team with an explicit reason; a no-op when already paused
    pub async fn pause_team_for(&self, team_id: &str, reason: PauseReason) -> Result<Team> {
        let _guard = self.inner.locks.lock(team_id).await;
        let mut team = self.load(team_id).await?;

        match team.status {
            TeamStatus::Paused => Ok(team),
            TeamStatus::Active => {
                self.pause_locked(&mut team, reason).await;
                self.save(&team).await;
                Ok(team)
            }
            status => Err(GodelError::InvalidTeamState {
                team_id: team_id.to_string(),
                status,
                operation: "pause",
            }),
        }
    }

    /// Resume a paused team and its paused members
    pub async fn resume_team(&self, team_id: &str) -> Result<Team> {
        let _guard = self.inner.locks.lock(team_id).await;
        let mut team = self.load(team_id).await?;

        if team.status != TeamStatus::Paused {
            return Err(GodelError::InvalidTeamState {
                team_id: team_id.to_string(),
                status: team.status,
                operation: "resume",
            });
        }

        if team.budget.is_exhausted() {
            return Err(GodelError::TeamBudgetExceeded {
                team_id: team_id.to_string(),
                consumed: team.budget.consumed,
                allocated: team.budget.allocated,
            });
        }

        let mut resumed = 0;
        for agent_id in &team.agents {
            let paused = self
                .inner
                .lifecycle
                .get_state(agent_id)
                .await
                .is_some_and(|s| s.lifecycle_state == LifecycleState::Paused);
            if !paused {
                continue;
            }
            match self.inner.lifecycle.resume(agent_id).await {
                Ok(_) => resumed += 1,
                Err(e) => warn!(team_id, agent_id = %agent_id, error = %e, "Failed to resume member"),
            }
        }

        team.status = TeamStatus::Active;
        team.pause_reason = None;
        self.save(&team).await;

        self.publish(
            &team,
            EventKind::TeamResumed,
            TeamStatus::Paused,
            json!({ "resumed_agents": resumed }),
        );
        info!(team_id, resumed, "Resumed team");
        Ok(team)
    }

    /// Count a member's completion or failure once
    pub async fn record_agent_outcome(
        &self,
        team_id: &str,
        agent_id: &str,
        outcome: AgentOutcome,
    ) -> Result<Team> {
        let _guard = self.inner.locks.lock(team_id).await;
        let mut team = self.load(team_id).await?;

        if team.status == TeamStatus::Destroyed
            || !team.agents.iter().any(|id| id == agent_id)
            || team.outcomes.contains_key(agent_id)
        {
            debug!(team_id, agent_id, ?outcome, "Agent outcome ignored");
            return Ok(team);
        }

        team.outcomes.insert(agent_id.to_string(), outcome);
        match outcome {
            AgentOutcome::Completed => team.metrics.completed_agents += 1,
            AgentOutcome::Failed => team.metrics.failed_agents += 1,
        }
        self.inner.budget.adjust_agent_count(-1);

        if team.all_members_done() && !team.status.is_finished() {
            self.complete_locked(&mut team).await;
        } else {
            self.save(&team).await;
        }

        Ok(team)
    }

    /// Record outcomes for members that already ended but were never counted
    ///
    /// Covers completion and failure notices lost between the lifecycle and
    /// the team. Returns how many outcomes were recorded.
    pub async fn reconcile_outcomes(&self) -> usize {
        let mut recorded = 0;
        for team in self.list_teams().await {
            if team.status.is_finished() {
                continue;
            }
            for agent_id in &team.agents {
                if team.outcomes.contains_key(agent_id) {
                    continue;
                }
                let outcome = match self.inner.lifecycle.get_state(agent_id).await {
                    Some(state) if state.lifecycle_state == LifecycleState::Completed => {
                        AgentOutcome::Completed
                    }
                    Some(state) if state.lifecycle_state == LifecycleState::Failed => {
                        AgentOutcome::Failed
                    }
                    _ => continue,
                };
                match self.record_agent_outcome(&team.id, agent_id, outcome).await {
                    Ok(updated) if updated.outcomes.get(agent_id) == Some(&outcome) => {
                        recorded += 1
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(team_id = %team.id, agent_id = %agent_id, error = %e, "Outcome not reconciled")
                    }
                }
            }
        }
        if recorded > 0 {
            info!(recorded, "Reconciled missed agent outcomes");
        }
        recorded
    }

    pub async fn get_team(&self, team_id: &str) -> Option<Team> {
        self.inner.teams.read().await.get(team_id).cloned()
    }

    /// Every team, oldest first
    pub async fn list_teams(&self) -> Vec<Team> {
        let mut teams: Vec<Team> = self.inner.teams.read().await.values().cloned().collect();
        teams.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        teams
    }

    pub async fn teams_by_status(&self, status: TeamStatus) -> Vec<Team> {
        self.list_teams()
            .await
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    pub async fn stats(&self) -> TeamStats {
        let teams = self.inner.teams.read().await;
        let count = |status: TeamStatus| teams.values().filter(|t| t.status == status).count();

        TeamStats {
            total_teams: teams.len(),
            active_teams: count(TeamStatus::Active),
            paused_teams: count(TeamStatus::Paused),
            completed_teams: count(TeamStatus::Completed),
            failed_teams: count(TeamStatus::Failed),
            total_agents: teams.values().map(|t| t.agents.len()).sum(),
            total_allocated: teams.values().map(|t| t.budget.allocated).sum(),
            total_consumed: teams.values().map(|t| t.budget.consumed).sum(),
        }
    }

    /// Drop finished teams that ended more than `max_age` ago
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let candidates: Vec<String> = self
            .inner
            .teams
            .read()
            .await
            .values()
            .filter(|t| t.status.is_finished())
            .filter(|t| t.completed_at.is_some_and(|at| at <= cutoff))
            .map(|t| t.id.clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            let Some(guard) = self.inner.locks.try_lock(&id) else {
                continue;
            };
            if self.inner.teams.write().await.remove(&id).is_some() {
                removed += 1;
            }
            drop(guard);
            self.inner.locks.remove(&id);
        }

        if removed > 0 {
            info!(removed, "Cleaned up finished teams");
        }
        removed
    }

    /// Budget envelope of a team
    pub async fn team_budget(&self, team_id: &str) -> Result<TeamBudget> {
        self.load(team_id).await.map(|t| t.budget)
    }

    async fn spawn_member(
        &self,
        team: &Team,
        task: String,
        metadata: AgentMetadata,
    ) -> Result<AgentState> {
        let mut options = SpawnOptions::new(task)
            .with_team(team.id.clone())
            .with_metadata(metadata);
        if let Some(model) = &team.model {
            options = options.with_model(model.clone());
        }
        if let Some(alternate) = &team.alternate_model {
            options = options.with_alternate_model(alternate.clone());
        }
        options.max_retries = team.max_retries;

        self.inner.lifecycle.spawn(options).await
    }

    /// Best-effort kill of every member; returns how many were killed
    async fn kill_members(&self, team: &Team, force: bool) -> usize {
        let mut killed = 0;
        for agent_id in &team.agents {
            match self.inner.lifecycle.kill(agent_id, force).await {
                Ok(_) => killed += 1,
                Err(e) => {
                    warn!(team_id = %team.id, agent_id = %agent_id, error = %e, "Failed to kill member")
                }
            }
        }
        killed
    }

    async fn pause_locked(&self, team: &mut Team, reason: PauseReason) {
        let mut paused = 0;
        for agent_id in &team.agents {
            match self.inner.lifecycle.pause(agent_id).await {
                Ok(_) => paused += 1,
                Err(e) => {
                    debug!(team_id = %team.id, agent_id = %agent_id, error = %e, "Member not paused")
                }
            }
        }

        let previous = team.status;
        team.status = TeamStatus::Paused;
        team.pause_reason = Some(reason);

        self.publish(
            team,
            EventKind::TeamPaused,
            previous,
            json!({ "reason": reason, "paused_agents": paused }),
        );
        info!(team_id = %team.id, %reason, paused, "Paused team");
    }

    async fn complete_locked(&self, team: &mut Team) {
        let previous = team.status;
        team.status = TeamStatus::Completed;
        team.completed_at = Some(Utc::now());
        self.inner.budget.adjust_team_count(-1);
        self.save(team).await;

        self.publish(
            team,
            EventKind::TeamCompleted,
            previous,
            json!({
                "completed_agents": team.metrics.completed_agents,
                "failed_agents": team.metrics.failed_agents,
                "consumed": team.budget.consumed,
            }),
        );
        info!(
            team_id = %team.id,
            completed = team.metrics.completed_agents,
            failed = team.metrics.failed_agents,
            "Team completed"
        );
    }

    async fn load(&self, team_id: &str) -> Result<Team> {
        self.get_team(team_id)
            .await
            .ok_or_else(|| GodelError::TeamNotFound(team_id.to_string()))
    }

    async fn save(&self, team: &Team) {
        self.inner
            .teams
            .write()
            .await
            .insert(team.id.clone(), team.clone());
    }

    fn publish(
        &self,
        team: &Team,
        kind: EventKind,
        previous: TeamStatus,
        payload: serde_json::Value,
    ) {
        self.inner.bus.publish(
            Event::new(team_topic(&team.id), team.id.clone(), kind)
                .with_team(Some(team.id.clone()))
                .with_transition(previous, team.status)
                .with_payload(payload),
        );
    }

    fn publish_budget(&self, team: &Team, kind: EventKind, agent_id: &str) {
        self.inner.bus.publish(
            Event::new(team_topic(&team.id), team.id.clone(), kind)
                .with_team(Some(team.id.clone()))
                .with_payload(json!({
                    "agent_id": agent_id,
                    "allocated": team.budget.allocated,
                    "consumed": team.budget.consumed,
                    "remaining": team.budget.remaining,
                    "usage_percent": team.budget.usage() * 100.0,
                })),
        );
    }
}
