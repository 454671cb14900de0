//! Agent lifecycle manager
//!
//! Owns every [`AgentState`] and applies the transition table under the
//! agent's exclusive lock. Session backend and storage failures are logged
//! and tolerated: the in-process state machine is authoritative.

use super::state::{
    Agent, AgentState, AgentStatus, FailOptions, LifecycleOp, LifecycleState, SpawnOptions,
};
use crate::backend::{AgentPatch, AgentStore, SessionBackend, SessionRequest};
use crate::events::{agent_topic, Event, EventBus, EventKind};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::sync::KeyedMutex;
use crate::{GodelError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Automatic retries before escalation or failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Model used when a spawn request names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Timeout applied to every session backend call
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_model() -> String {
    "default".to_string()
}

fn default_backend_timeout_ms() -> u64 {
    30_000
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            default_model: default_model(),
            backend_timeout_ms: default_backend_timeout_ms(),
        }
    }
}

impl LifecycleConfig {
    /// Retry policy derived from the backoff settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Set backoff base and cap
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set retry count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Lifecycle summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleMetrics {
    pub total_agents: usize,
    pub active_agents: usize,
    pub by_state: BTreeMap<String, usize>,
    pub total_retries: u64,
    pub escalations: u64,
}

struct Inner {
    config: LifecycleConfig,
    retry_policy: RetryPolicy,
    backend: Arc<dyn SessionBackend>,
    store: Arc<dyn AgentStore>,
    bus: EventBus,
    states: RwLock<HashMap<String, AgentState>>,
    locks: KeyedMutex,
    next_id: Mutex<u64>,
    active: AtomicBool,
    total_retries: AtomicU64,
    escalations: AtomicU64,
}

/// Agent lifecycle manager
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentLifecycle {
    inner: Arc<Inner>,
}

impl AgentLifecycle {
    /// Create a stopped lifecycle manager
    pub fn new(
        config: LifecycleConfig,
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn AgentStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                retry_policy: config.retry_policy(),
                config,
                backend,
                store,
                bus,
                states: RwLock::new(HashMap::new()),
                locks: KeyedMutex::new(),
                next_id: Mutex::new(0),
                active: AtomicBool::new(false),
                total_retries: AtomicU64::new(0),
                escalations: AtomicU64::new(0),
            }),
        }
    }

    /// Accept spawn requests
    pub fn start(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
        info!("Agent lifecycle started");
    }

    /// Stop accepting spawns; pending automatic restarts are abandoned
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        info!("Agent lifecycle stopped");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    /// Spawn a new agent
    pub async fn spawn(&self, options: SpawnOptions) -> Result<AgentState> {
        if !self.is_active() {
            return Err(GodelError::NotStarted("agent lifecycle"));
        }

        let id = {
            let mut counter = self.inner.next_id.lock().await;
            *counter += 1;
            format!("agent-{}", *counter)
        };

        let _guard = self.inner.locks.lock(&id).await;

        let model = if options.model.is_empty() {
            self.inner.config.default_model.clone()
        } else {
            options.model.clone()
        };

        let agent = Agent {
            id: id.clone(),
            model,
            task: options.task.clone(),
            team_id: options.team_id.clone(),
            parent_id: options.parent_id.clone(),
            budget_limit: options.budget_limit,
            metadata: options.metadata.clone(),
        };
        let mut state = AgentState::new(
            agent,
            options.max_retries.unwrap_or(self.inner.config.max_retries),
            options.alternate_model.clone(),
        );

        if let Err(e) = self.inner.store.create(&state).await {
            warn!(agent_id = %id, error = %e, "Failed to persist agent record");
        }

        let request = SessionRequest {
            model: state.agent.model.clone(),
            task: state.agent.task.clone(),
            context: options.context.clone(),
            max_tokens: options.max_tokens,
        };
        state.session_id = self
            .backend_call(&id, "spawn_session", self.inner.backend.spawn_session(&id, &request))
            .await;

        self.inner
            .states
            .write()
            .await
            .insert(id.clone(), state.clone());
        self.persist(&state).await;
        metrics::record_agent_transition(None, state.lifecycle_state);

        info!(agent_id = %id, model = %state.agent.model, team_id = ?state.agent.team_id, "Spawned agent");
        self.publish(
            &state,
            EventKind::AgentSpawned,
            LifecycleState::Idle,
            json!({
                "model": state.agent.model,
                "task": state.agent.task,
                "session_id": state.session_id,
            }),
        );

        if options.auto_start {
            self.start_locked(&mut state).await?;
        }

        Ok(state)
    }

    /// Move an agent to `running`
    pub async fn start_agent(&self, agent_id: &str) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;
        self.start_locked(&mut state).await?;
        Ok(state)
    }

    /// Pause a running (or retrying) agent
    pub async fn pause(&self, agent_id: &str) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;
        self.check_transition(&state, LifecycleOp::Pause)?;

        if state.session_id.is_some() {
            self.backend_call(agent_id, "pause_session", self.inner.backend.pause_session(agent_id))
                .await;
        }

        let previous = state.lifecycle_state;
        state.set_state(LifecycleState::Paused);
        self.commit(&state, EventKind::AgentPaused, previous, json!({}))
            .await;

        info!(agent_id, "Paused agent");
        Ok(state)
    }

    /// Resume a paused agent
    pub async fn resume(&self, agent_id: &str) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;
        self.check_transition(&state, LifecycleOp::Resume)?;

        if state.session_id.is_some() {
            self.backend_call(
                agent_id,
                "resume_session",
                self.inner.backend.resume_session(agent_id),
            )
            .await;
        }

        let previous = state.lifecycle_state;
        state.set_state(LifecycleState::Running);
        state.resumed_at = Some(Utc::now());
        self.commit(&state, EventKind::AgentResumed, previous, json!({}))
            .await;

        info!(agent_id, "Resumed agent");
        Ok(state)
    }

    /// Kill an agent; a no-op on terminal agents
    pub async fn kill(&self, agent_id: &str, force: bool) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;

        if state.lifecycle_state.is_terminal() {
            debug!(agent_id, state = %state.lifecycle_state, "Kill on terminal agent ignored");
            return Ok(state);
        }

        self.end_session(&state, force).await;

        let previous = state.lifecycle_state;
        state.set_state(LifecycleState::Killed);
        self.commit(&state, EventKind::AgentKilled, previous, json!({ "force": force }))
            .await;

        info!(agent_id, force, "Killed agent");
        Ok(state)
    }

    /// Mark an agent completed; a no-op on terminal agents
    pub async fn complete(&self, agent_id: &str, output: Option<String>) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;

        if state.lifecycle_state.is_terminal() {
            debug!(agent_id, state = %state.lifecycle_state, "Complete on terminal agent ignored");
            return Ok(state);
        }

        self.end_session(&state, false).await;

        let previous = state.lifecycle_state;
        state.output = output;
        state.set_state(LifecycleState::Completed);
        self.commit(
            &state,
            EventKind::AgentCompleted,
            previous,
            json!({ "output": state.output, "runtime_secs": state.runtime().as_secs() }),
        )
        .await;

        info!(agent_id, runtime = %state.format_runtime(), "Agent completed");
        Ok(state)
    }

    /// Report a failure and apply the retry/escalation policy
    pub async fn fail(
        &self,
        agent_id: &str,
        error: impl Into<String>,
        options: FailOptions,
    ) -> Result<AgentState> {
        let error = error.into();
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;
        self.check_transition(&state, LifecycleOp::Fail)?;

        state.retry_count += 1;
        state.last_error = Some(error.clone());
        let previous = state.lifecycle_state;

        if state.retry_count <= state.max_retries {
            let delay = self.inner.retry_policy.backoff_duration(state.retry_count);
            state.retry_generation += 1;
            state.set_state(LifecycleState::Retrying);
            self.inner.total_retries.fetch_add(1, Ordering::Relaxed);
            metrics::inc_agent_retries();

            self.commit(
                &state,
                EventKind::AgentRetrying,
                previous,
                json!({
                    "retry_count": state.retry_count,
                    "max_retries": state.max_retries,
                    "delay_ms": delay.as_millis() as u64,
                    "error": error,
                }),
            )
            .await;

            warn!(
                agent_id,
                retry_count = state.retry_count,
                max_retries = state.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Agent failed, retrying"
            );
            self.schedule_restart(agent_id.to_string(), state.retry_generation, delay);
            return Ok(state);
        }

        let alternate = options.alternate_model.clone().or_else(|| {
            state
                .alternate_model
                .clone()
                .filter(|_| options.use_alternate_model)
        });

        match alternate {
            Some(model) => {
                self.escalate_locked(&mut state, model, Some(error.as_str())).await;
                self.start_locked(&mut state).await?;
            }
            None => {
                self.end_session(&state, true).await;
                state.set_state(LifecycleState::Failed);
                self.commit(
                    &state,
                    EventKind::AgentFailed,
                    previous,
                    json!({ "error": error, "retry_count": state.retry_count }),
                )
                .await;

                warn!(agent_id, error = %error, "Agent failed permanently");
            }
        }

        Ok(state)
    }

    /// Operator-driven retry of a failed or retrying agent
    pub async fn retry(&self, agent_id: &str) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;
        self.check_transition(&state, LifecycleOp::Retry)?;

        let previous = state.lifecycle_state;
        state.set_state(LifecycleState::Retrying);
        self.commit(
            &state,
            EventKind::AgentStatusChanged,
            previous,
            json!({ "reason": "manual_retry" }),
        )
        .await;

        self.start_locked(&mut state).await?;
        info!(agent_id, "Agent retried");
        Ok(state)
    }

    /// Swap the agent onto `model` and restart it
    pub async fn retry_with_alternate_model(
        &self,
        agent_id: &str,
        model: impl Into<String>,
    ) -> Result<AgentState> {
        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;
        self.check_transition(&state, LifecycleOp::Escalate)?;

        self.escalate_locked(&mut state, model.into(), None).await;
        self.start_locked(&mut state).await?;
        Ok(state)
    }

    /// Snapshot of one agent
    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.inner.states.read().await.get(agent_id).cloned()
    }

    /// Snapshot of every agent, oldest first
    pub async fn all_states(&self) -> Vec<AgentState> {
        let mut states: Vec<AgentState> =
            self.inner.states.read().await.values().cloned().collect();
        states.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        states
    }

    /// Agents with the given coarse status
    pub async fn agents_by_status(&self, status: AgentStatus) -> Vec<AgentState> {
        self.all_states()
            .await
            .into_iter()
            .filter(|s| s.status == status)
            .collect()
    }

    /// Agents belonging to a team
    pub async fn agents_by_team(&self, team_id: &str) -> Vec<AgentState> {
        self.all_states()
            .await
            .into_iter()
            .filter(|s| s.agent.team_id.as_deref() == Some(team_id))
            .collect()
    }

    /// Summary counts
    pub async fn metrics(&self) -> LifecycleMetrics {
        let states = self.inner.states.read().await;

        let mut by_state = BTreeMap::new();
        for state in states.values() {
            *by_state
                .entry(state.lifecycle_state.to_string())
                .or_insert(0) += 1;
        }

        LifecycleMetrics {
            total_agents: states.len(),
            active_agents: states.values().filter(|s| s.status.is_active()).count(),
            by_state,
            total_retries: self.inner.total_retries.load(Ordering::Relaxed),
            escalations: self.inner.escalations.load(Ordering::Relaxed),
        }
    }

    /// Remove terminal agents that finished more than `max_age` ago
    ///
    /// Agents whose lock is currently held are skipped.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let candidates: Vec<String> = self
            .inner
            .states
            .read()
            .await
            .values()
            .filter(|s| s.lifecycle_state.is_terminal())
            .filter(|s| s.completed_at.is_some_and(|t| t <= cutoff))
            .map(|s| s.id.clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            let Some(guard) = self.inner.locks.try_lock(&id) else {
                continue;
            };
            if let Some(state) = self.inner.states.write().await.remove(&id) {
                metrics::remove_agent(state.lifecycle_state);
                removed += 1;
            }
            drop(guard);
            self.inner.locks.remove(&id);
        }

        if removed > 0 {
            info!(removed, "Cleaned up finished agents");
        }
        removed
    }

    async fn start_locked(&self, state: &mut AgentState) -> Result<()> {
        self.check_transition(state, LifecycleOp::Start)?;

        if !self.inner.backend.has_session(&state.id).await {
            let request = SessionRequest {
                model: state.agent.model.clone(),
                task: state.agent.task.clone(),
                ..Default::default()
            };
            if let Some(session_id) = self
                .backend_call(
                    &state.id,
                    "spawn_session",
                    self.inner.backend.spawn_session(&state.id, &request),
                )
                .await
            {
                state.session_id = Some(session_id);
            }
        }

        let previous = state.lifecycle_state;
        state.set_state(LifecycleState::Running);
        self.commit(
            state,
            EventKind::AgentStarted,
            previous,
            json!({ "model": state.agent.model, "session_id": state.session_id }),
        )
        .await;

        debug!(agent_id = %state.id, from = %previous, "Agent running");
        Ok(())
    }

    async fn escalate_locked(&self, state: &mut AgentState, model: String, error: Option<&str>) {
        let previous = state.lifecycle_state;
        let previous_model = std::mem::replace(&mut state.agent.model, model);

        // The next start opens a session on the new model
        self.end_session(state, true).await;
        state.session_id = None;
        state.retry_count = 0;
        state.set_state(LifecycleState::Escalated);
        self.inner.escalations.fetch_add(1, Ordering::Relaxed);
        metrics::inc_agent_escalations();

        self.commit(
            state,
            EventKind::AgentEscalated,
            previous,
            json!({
                "previous_model": previous_model,
                "model": state.agent.model,
                "error": error,
            }),
        )
        .await;

        warn!(
            agent_id = %state.id,
            from = %previous_model,
            to = %state.agent.model,
            "Escalated agent to alternate model"
        );
    }

    fn schedule_restart(&self, agent_id: String, generation: u64, delay: Duration) {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = lifecycle.restart_after_backoff(&agent_id, generation).await {
                debug!(agent_id = %agent_id, error = %e, "Scheduled restart skipped");
            }
        });
    }

    async fn restart_after_backoff(&self, agent_id: &str, generation: u64) -> Result<()> {
        if !self.is_active() {
            debug!(agent_id, "Lifecycle stopped, abandoning restart");
            return Ok(());
        }

        let _guard = self.inner.locks.lock(agent_id).await;
        let mut state = self.load(agent_id).await?;

        if !self.is_active()
            || state.lifecycle_state != LifecycleState::Retrying
            || state.retry_generation != generation
        {
            debug!(agent_id, state = %state.lifecycle_state, "Restart superseded");
            return Ok(());
        }

        self.start_locked(&mut state).await
    }

    fn check_transition(&self, state: &AgentState, op: LifecycleOp) -> Result<()> {
        if op.permits(state.lifecycle_state) {
            return Ok(());
        }
        Err(GodelError::InvalidStateTransition {
            agent_id: state.id.clone(),
            operation: op.name(),
            current: state.lifecycle_state,
            allowed: op.allowed_from().to_vec(),
        })
    }

    async fn load(&self, agent_id: &str) -> Result<AgentState> {
        self.get_state(agent_id)
            .await
            .ok_or_else(|| GodelError::AgentNotFound(agent_id.to_string()))
    }

    async fn end_session(&self, state: &AgentState, force: bool) {
        if state.session_id.is_none() {
            return;
        }
        self.backend_call(
            &state.id,
            "kill_session",
            self.inner.backend.kill_session(&state.id, force),
        )
        .await;
    }

    /// Run a backend call under the configured timeout, logging failures
    async fn backend_call<T>(
        &self,
        agent_id: &str,
        action: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        let timeout = Duration::from_millis(self.inner.config.backend_timeout_ms);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(agent_id, action, error = %e, "Session backend call failed");
                None
            }
            Err(_) => {
                warn!(agent_id, action, timeout_ms = timeout.as_millis() as u64, "Session backend call timed out");
                None
            }
        }
    }

    async fn persist(&self, state: &AgentState) {
        if let Err(e) = self
            .inner
            .store
            .update(&state.id, AgentPatch::from_state(state))
            .await
        {
            warn!(agent_id = %state.id, error = %e, "Failed to update agent record");
        }
    }

    fn publish(
        &self,
        state: &AgentState,
        kind: EventKind,
        previous: LifecycleState,
        payload: serde_json::Value,
    ) {
        self.inner.bus.publish(
            Event::new(agent_topic(&state.id), state.id.clone(), kind)
                .with_team(state.agent.team_id.clone())
                .with_transition(previous, state.lifecycle_state)
                .with_payload(payload),
        );
    }

    /// Store the new state, persist it and publish one event
    async fn commit(
        &self,
        state: &AgentState,
        kind: EventKind,
        previous: LifecycleState,
        payload: serde_json::Value,
    ) {
        self.inner
            .states
            .write()
            .await
            .insert(state.id.clone(), state.clone());
        self.persist(state).await;
        metrics::record_agent_transition(Some(previous), state.lifecycle_state);
        self.publish(state, kind, previous, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryAgentStore, InMemorySessionBackend};

    fn lifecycle_with(
        config: LifecycleConfig,
    ) -> (AgentLifecycle, Arc<InMemorySessionBackend>, EventBus) {
        let backend = Arc::new(InMemorySessionBackend::new());
        let bus = EventBus::new(256);
        let lifecycle = AgentLifecycle::new(
            config,
            backend.clone(),
            Arc::new(InMemoryAgentStore::new()),
            bus.clone(),
        );
        lifecycle.start();
        (lifecycle, backend, bus)
    }

    fn fast_config() -> LifecycleConfig {
        LifecycleConfig::default()
            .with_delays(Duration::from_millis(1), Duration::from_millis(10))
    }

    async fn wait_for_state(lifecycle: &AgentLifecycle, id: &str, want: LifecycleState) {
        for _ in 0..200 {
            if lifecycle.get_state(id).await.map(|s| s.lifecycle_state) == Some(want) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("agent {} never reached {}", id, want);
    }

    #[tokio::test]
    async fn test_spawn_requires_start() {
        let backend = Arc::new(InMemorySessionBackend::new());
        let lifecycle = AgentLifecycle::new(
            LifecycleConfig::default(),
            backend,
            Arc::new(InMemoryAgentStore::new()),
            EventBus::default(),
        );

        let err = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap_err();
        assert!(matches!(err, GodelError::NotStarted(_)));
    }

    #[tokio::test]
    async fn test_spawn_auto_starts() {
        let (lifecycle, backend, bus) = lifecycle_with(fast_config());
        let mut events = bus.subscribe();

        let state = lifecycle
            .spawn(SpawnOptions::new("Review PR").with_model("model-a"))
            .await
            .unwrap();

        assert_eq!(state.id, "agent-1");
        assert_eq!(state.lifecycle_state, LifecycleState::Running);
        assert_eq!(state.session_id.as_deref(), Some("session-1"));
        assert!(backend.has_session("agent-1").await);

        let kinds: Vec<EventKind> = events.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::AgentSpawned, EventKind::AgentStarted]);
    }

    #[tokio::test]
    async fn test_spawn_without_auto_start_uses_default_model() {
        let (lifecycle, _, _) = lifecycle_with(fast_config());

        let state = lifecycle
            .spawn(SpawnOptions::new("task").with_auto_start(false))
            .await
            .unwrap();
        assert_eq!(state.lifecycle_state, LifecycleState::Spawning);
        assert_eq!(state.agent.model, "default");

        let started = lifecycle.start_agent(&state.id).await.unwrap();
        assert_eq!(started.lifecycle_state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_spawn_tolerates_backend_failure() {
        let (lifecycle, backend, _) = lifecycle_with(fast_config());
        backend.fail_all(true);

        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();
        assert_eq!(state.lifecycle_state, LifecycleState::Running);
        assert!(state.session_id.is_none());
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let (lifecycle, backend, _) = lifecycle_with(fast_config());
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();

        let paused = lifecycle.pause(&state.id).await.unwrap();
        assert_eq!(paused.status, AgentStatus::Paused);
        assert!(backend.is_paused(&state.id).await);

        let err = lifecycle.pause(&state.id).await.unwrap_err();
        assert!(matches!(err, GodelError::InvalidStateTransition { .. }));

        let resumed = lifecycle.resume(&state.id).await.unwrap();
        assert_eq!(resumed.lifecycle_state, LifecycleState::Running);
        assert!(resumed.resumed_at.is_some());
    }

    #[tokio::test]
    async fn test_resume_from_running_is_rejected() {
        let (lifecycle, _, _) = lifecycle_with(fast_config());
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();

        match lifecycle.resume(&state.id).await {
            Err(GodelError::InvalidStateTransition {
                current, allowed, ..
            }) => {
                assert_eq!(current, LifecycleState::Running);
                assert_eq!(allowed, vec![LifecycleState::Paused]);
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.lifecycle_state)),
        }
    }

    #[tokio::test]
    async fn test_kill_twice_publishes_once() {
        let (lifecycle, _, bus) = lifecycle_with(fast_config());
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();
        let mut events = bus.subscribe_topic(agent_topic(&state.id));

        lifecycle.kill(&state.id, false).await.unwrap();
        let again = lifecycle.kill(&state.id, true).await.unwrap();
        assert_eq!(again.lifecycle_state, LifecycleState::Killed);

        let killed = events
            .drain()
            .into_iter()
            .filter(|e| e.kind == EventKind::AgentKilled)
            .count();
        assert_eq!(killed, 1);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let (lifecycle, _, bus) = lifecycle_with(fast_config());
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();
        let mut events = bus.subscribe_topic(agent_topic(&state.id));

        let done = lifecycle
            .complete(&state.id, Some("ok".to_string()))
            .await
            .unwrap();
        assert_eq!(done.output.as_deref(), Some("ok"));
        lifecycle.complete(&state.id, None).await.unwrap();

        assert_eq!(events.drain().len(), 1);
        let err = lifecycle
            .fail(&state.id, "late", FailOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GodelError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_fail_retries_then_fails() {
        let (lifecycle, _, bus) = lifecycle_with(fast_config());
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();
        let mut events = bus.subscribe_topic(agent_topic(&state.id));

        for attempt in 1..=3 {
            let s = lifecycle
                .fail(&state.id, format!("boom {}", attempt), FailOptions::default())
                .await
                .unwrap();
            assert_eq!(s.lifecycle_state, LifecycleState::Retrying);
            wait_for_state(&lifecycle, &state.id, LifecycleState::Running).await;
        }

        let failed = lifecycle
            .fail(&state.id, "boom 4", FailOptions::default())
            .await
            .unwrap();
        assert_eq!(failed.lifecycle_state, LifecycleState::Failed);
        assert_eq!(failed.retry_count, 4);
        assert_eq!(failed.last_error.as_deref(), Some("boom 4"));

        let events = events.drain();
        let delays: Vec<u64> = events
            .iter()
            .filter(|e| e.kind == EventKind::AgentRetrying)
            .map(|e| e.payload["delay_ms"].as_u64().unwrap())
            .collect();
        assert_eq!(delays, vec![2, 4, 8]);
        assert_eq!(events.last().unwrap().kind, EventKind::AgentFailed);
    }

    #[tokio::test]
    async fn test_escalation_swaps_model() {
        let (lifecycle, backend, _) = lifecycle_with(fast_config());
        let state = lifecycle
            .spawn(
                SpawnOptions::new("task")
                    .with_model("model-a")
                    .with_max_retries(0),
            )
            .await
            .unwrap();

        let escalated = lifecycle
            .fail(&state.id, "too hard", FailOptions::escalate_to("backup-model"))
            .await
            .unwrap();

        assert_eq!(escalated.lifecycle_state, LifecycleState::Running);
        assert_eq!(escalated.agent.model, "backup-model");
        assert_eq!(escalated.retry_count, 0);
        assert_eq!(
            backend.session_model(&state.id).await.as_deref(),
            Some("backup-model")
        );
        assert_eq!(lifecycle.metrics().await.escalations, 1);
    }

    #[tokio::test]
    async fn test_spawn_alternate_model_needs_opt_in() {
        let (lifecycle, _, _) = lifecycle_with(fast_config());
        let state = lifecycle
            .spawn(
                SpawnOptions::new("task")
                    .with_max_retries(0)
                    .with_alternate_model("model-b"),
            )
            .await
            .unwrap();

        let failed = lifecycle
            .fail(&state.id, "nope", FailOptions::default())
            .await
            .unwrap();
        assert_eq!(failed.lifecycle_state, LifecycleState::Failed);

        let retried = lifecycle
            .retry_with_alternate_model(&state.id, "model-b")
            .await
            .unwrap();
        assert_eq!(retried.lifecycle_state, LifecycleState::Running);
        assert_eq!(retried.agent.model, "model-b");
    }

    #[tokio::test]
    async fn test_failed_agent_is_terminal() {
        let (lifecycle, _, bus) = lifecycle_with(fast_config());
        let state = lifecycle
            .spawn(SpawnOptions::new("task").with_max_retries(0))
            .await
            .unwrap();
        lifecycle
            .fail(&state.id, "nope", FailOptions::default())
            .await
            .unwrap();
        let mut events = bus.subscribe_topic(agent_topic(&state.id));

        let err = lifecycle
            .fail(&state.id, "again", FailOptions::escalate_to("backup-model"))
            .await
            .unwrap_err();
        assert!(matches!(err, GodelError::InvalidStateTransition { .. }));

        let killed = lifecycle.kill(&state.id, true).await.unwrap();
        assert_eq!(killed.lifecycle_state, LifecycleState::Failed);
        assert!(events.drain().is_empty());

        // Leaving failed takes an explicit escalation
        let escalated = lifecycle
            .retry_with_alternate_model(&state.id, "backup-model")
            .await
            .unwrap();
        assert_eq!(escalated.lifecycle_state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_manual_retry_from_failed() {
        let (lifecycle, _, bus) = lifecycle_with(fast_config());
        let state = lifecycle
            .spawn(SpawnOptions::new("task").with_max_retries(0))
            .await
            .unwrap();
        lifecycle
            .fail(&state.id, "nope", FailOptions::default())
            .await
            .unwrap();

        let mut events = bus.subscribe_topic(agent_topic(&state.id));
        let retried = lifecycle.retry(&state.id).await.unwrap();
        assert_eq!(retried.lifecycle_state, LifecycleState::Running);
        assert!(retried.completed_at.is_none());

        let kinds: Vec<EventKind> = events.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::AgentStatusChanged, EventKind::AgentStarted]
        );
    }

    #[tokio::test]
    async fn test_kill_during_backoff_prevents_restart() {
        let config = LifecycleConfig::default()
            .with_delays(Duration::from_millis(30), Duration::from_millis(60));
        let (lifecycle, _, _) = lifecycle_with(config);
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();

        lifecycle
            .fail(&state.id, "flaky", FailOptions::default())
            .await
            .unwrap();
        lifecycle.kill(&state.id, false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let after = lifecycle.get_state(&state.id).await.unwrap();
        assert_eq!(after.lifecycle_state, LifecycleState::Killed);
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_restart() {
        let config = LifecycleConfig::default()
            .with_delays(Duration::from_millis(20), Duration::from_millis(40));
        let (lifecycle, _, _) = lifecycle_with(config);
        let state = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();

        lifecycle
            .fail(&state.id, "flaky", FailOptions::default())
            .await
            .unwrap();
        lifecycle.stop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = lifecycle.get_state(&state.id).await.unwrap();
        assert_eq!(after.lifecycle_state, LifecycleState::Retrying);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let (lifecycle, _, _) = lifecycle_with(fast_config());
        let err = lifecycle.pause("agent-404").await.unwrap_err();
        assert!(matches!(err, GodelError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_spawns_get_unique_ids() {
        let (lifecycle, _, _) = lifecycle_with(fast_config());

        let spawns = (0..20).map(|i| {
            let lifecycle = lifecycle.clone();
            async move { lifecycle.spawn(SpawnOptions::new(format!("task {}", i))).await }
        });
        let results = futures::future::join_all(spawns).await;

        let mut ids: Vec<String> = results.into_iter().map(|r| r.unwrap().id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_queries_and_cleanup() {
        let (lifecycle, _, _) = lifecycle_with(fast_config());
        let a = lifecycle
            .spawn(SpawnOptions::new("a").with_team("team-1"))
            .await
            .unwrap();
        let b = lifecycle.spawn(SpawnOptions::new("b")).await.unwrap();
        lifecycle.complete(&b.id, None).await.unwrap();

        assert_eq!(lifecycle.agents_by_team("team-1").await.len(), 1);
        assert_eq!(
            lifecycle.agents_by_status(AgentStatus::Completed).await[0].id,
            b.id
        );

        let metrics = lifecycle.metrics().await;
        assert_eq!(metrics.total_agents, 2);
        assert_eq!(metrics.active_agents, 1);
        assert_eq!(metrics.by_state.get("completed"), Some(&1));

        assert_eq!(lifecycle.cleanup(Duration::from_secs(3600)).await, 0);
        assert_eq!(lifecycle.cleanup(Duration::ZERO).await, 1);
        assert!(lifecycle.get_state(&b.id).await.is_none());
        assert!(lifecycle.get_state(&a.id).await.is_some());
    }
}
