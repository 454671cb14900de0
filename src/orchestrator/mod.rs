//! Orchestrator
//!
//! Builds the four core components from one [`GodelConfig`] around a shared
//! [`EventBus`] and runs two background tasks:
//!
//! - a forwarder that turns `agent.completed` / `agent.failed` events of team
//!   members into [`TeamManager::record_agent_outcome`] calls, falling back
//!   to [`TeamManager::reconcile_outcomes`] when it lags behind the bus
//! - the [`BudgetMonitor`] loop, ticking every `monitor.interval_ms`
//!
//! Each orchestrator is an isolated instance; nothing is process-global
//! except the Prometheus registry.

mod monitor;

pub use monitor::{BudgetMonitor, MonitorTick};

use crate::backend::{AgentStore, InMemoryAgentStore, InMemorySessionBackend, SessionBackend};
use crate::budget::BudgetController;
use crate::config::GodelConfig;
use crate::events::{Delivery, EventBus, EventKind, Subscription};
use crate::execution::{ExecutionEngine, SimulatedRunner, UnitRunner};
use crate::lifecycle::AgentLifecycle;
use crate::team::{AgentOutcome, TeamManager};
use crate::{GodelError, Result};
use chrono::Local;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    config: GodelConfig,
    bus: EventBus,
    budget: Arc<BudgetController>,
    lifecycle: AgentLifecycle,
    teams: TeamManager,
    engine: ExecutionEngine,
    monitor: Arc<BudgetMonitor>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: GodelConfig,
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn AgentStore>,
        runner: Arc<dyn UnitRunner>,
    ) -> Self {
        let bus = EventBus::new(config.events.channel_capacity);
        let budget = Arc::new(BudgetController::new(config.budget.clone()));
        let lifecycle = AgentLifecycle::new(config.lifecycle.clone(), backend, store, bus.clone());
        let teams = TeamManager::new(
            config.teams.clone(),
            lifecycle.clone(),
            budget.clone(),
            bus.clone(),
        );
        let engine =
            ExecutionEngine::new(config.execution.clone(), runner, budget.clone(), bus.clone());
        let monitor = Arc::new(BudgetMonitor::new(budget.clone(), teams.clone()));

        Self {
            config,
            bus,
            budget,
            lifecycle,
            teams,
            engine,
            monitor,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Orchestrator over in-memory collaborators and a simulated unit runner
    pub fn in_memory(config: GodelConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemorySessionBackend::new()),
            Arc::new(InMemoryAgentStore::new()),
            Arc::new(SimulatedRunner::new(0.01, Duration::from_millis(10))),
        )
    }

    /// Start the components and background tasks
    ///
    /// Must be called inside a tokio runtime. Starting twice is a no-op; an
    /// orchestrator cannot be started again after [`Orchestrator::shutdown`].
    pub fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(GodelError::Other("orchestrator has been shut down".to_string()));
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return Ok(());
        }

        self.lifecycle.start();
        self.teams.start();

        tasks.push(tokio::spawn(forward_outcomes(
            self.bus.subscribe(),
            self.teams.clone(),
            self.shutdown.clone(),
        )));
        tasks.push(tokio::spawn(run_monitor(
            self.monitor.clone(),
            self.config.monitor.interval(),
            self.shutdown.clone(),
        )));

        info!(
            max_agents = self.config.budget.max_agents,
            max_daily_spend = self.config.budget.max_daily_spend,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop the components and wait for the background tasks to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.teams.stop();
        self.lifecycle.stop();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Orchestrator shut down");
    }

    pub fn config(&self) -> &GodelConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn budget(&self) -> &Arc<BudgetController> {
        &self.budget
    }

    pub fn lifecycle(&self) -> &AgentLifecycle {
        &self.lifecycle
    }

    pub fn teams(&self) -> &TeamManager {
        &self.teams
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn monitor(&self) -> &BudgetMonitor {
        &self.monitor
    }
}

async fn forward_outcomes(
    mut events: Subscription,
    teams: TeamManager,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = events.next() => match delivery {
                Some(Delivery::Event(event)) => event,
                Some(Delivery::Lagged(skipped)) => {
                    warn!(skipped, "Outcome forwarder lagged, reconciling team members");
                    teams.reconcile_outcomes().await;
                    continue;
                }
                None => break,
            },
        };

        let outcome = match event.kind {
            EventKind::AgentCompleted => AgentOutcome::Completed,
            EventKind::AgentFailed => AgentOutcome::Failed,
            _ => continue,
        };
        let Some(team_id) = event.team_id.as_deref() else {
            continue;
        };

        if let Err(e) = teams
            .record_agent_outcome(team_id, &event.entity_id, outcome)
            .await
        {
            debug!(team_id, agent_id = %event.entity_id, error = %e, "Agent outcome not recorded");
        }
    }
    debug!("Outcome forwarder stopped");
}

async fn run_monitor(monitor: Arc<BudgetMonitor>, period: Duration, shutdown: CancellationToken) {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let tick = monitor.tick(Local::now()).await;
                debug!(
                    night_mode_changed = tick.night_mode_changed,
                    daily_reset = tick.daily_reset,
                    new_alerts = tick.new_alerts.len(),
                    paused_teams = tick.paused_teams.len(),
                    "Budget monitor tick"
                );
            }
        }
    }
    debug!("Budget monitor stopped");
}
