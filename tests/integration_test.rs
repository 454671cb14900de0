//! Integration tests for Godel
//!
//! These tests drive the orchestrator end to end: team creation through
//! member failure, escalation, budget exhaustion and batch execution.

use godel::budget::{BudgetController, BudgetLimits, LimitRequest};
use godel::config::{validate_config, GodelConfig};
use godel::events::{agent_topic, team_topic, EventKind, Subscription};
use godel::execution::{BatchStatus, ExecutionStrategy, SimulatedRunner, UnitStatus};
use godel::lifecycle::{AgentStatus, FailOptions, LifecycleState, SpawnOptions};
use godel::team::{CompositionStrategy, PauseReason, TeamConfig, TeamStatus};
use godel::{GodelError, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Config with millisecond backoff and the clock-driven policies switched off
fn test_config() -> GodelConfig {
    let mut config = GodelConfig::default();
    config.lifecycle.base_delay_ms = 10;
    config.lifecycle.max_delay_ms = 1_000;
    config.budget.night_mode.enabled = false;
    config.monitor.interval_ms = 3_600_000;
    config.execution.retry_delay_ms = 1;
    config
}

fn started(config: GodelConfig) -> Orchestrator {
    let orchestrator = Orchestrator::in_memory(config);
    orchestrator.start().unwrap();
    orchestrator
}

fn kinds(events: &mut Subscription) -> Vec<EventKind> {
    events.drain().into_iter().map(|e| e.kind).collect()
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

mod team_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_parallel_team() {
        let orchestrator = started(test_config());
        let mut events = orchestrator.subscribe();

        let team = orchestrator
            .teams()
            .create(
                TeamConfig::new("reviewers", "Review the auth module")
                    .with_agents(3)
                    .with_strategy(CompositionStrategy::Parallel),
            )
            .await
            .unwrap();

        assert_eq!(team.status, TeamStatus::Active);
        assert_eq!(team.agents.len(), 3);
        assert_eq!(team.metrics.total_agents, 3);

        for agent_id in &team.agents {
            let state = orchestrator.lifecycle().get_state(agent_id).await.unwrap();
            assert_eq!(state.agent.team_id.as_deref(), Some(team.id.as_str()));
            assert_eq!(state.agent.task, "Review the auth module");
            assert_eq!(state.status, AgentStatus::Running);
        }

        let seen = kinds(&mut events);
        assert_eq!(
            seen.iter().filter(|k| **k == EventKind::AgentSpawned).count(),
            3
        );
        assert_eq!(
            seen.iter().filter(|k| **k == EventKind::TeamCreated).count(),
            1
        );
        assert_eq!(orchestrator.budget().status().team_count, 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_budget_exhaustion_pauses_members() {
        let orchestrator = started(test_config());
        let teams = orchestrator.teams();

        let team = teams
            .create(TeamConfig::new("t", "task").with_agents(2).with_budget(10.0))
            .await
            .unwrap();
        let mut team_events = orchestrator.bus().subscribe_topic(team_topic(&team.id));

        let team = teams
            .consume_budget(&team.id, &team.agents[0], 5_000, 11.0)
            .await
            .unwrap();

        assert_eq!(team.budget.remaining, 0.0);
        assert_eq!(team.budget.consumed, 11.0);
        assert_eq!(team.status, TeamStatus::Paused);
        assert_eq!(team.pause_reason, Some(PauseReason::BudgetExhausted));

        for agent_id in &team.agents {
            let state = orchestrator.lifecycle().get_state(agent_id).await.unwrap();
            assert_eq!(state.lifecycle_state, LifecycleState::Paused);
        }

        let seen = kinds(&mut team_events);
        assert_eq!(
            seen,
            vec![
                EventKind::TeamBudgetWarning,
                EventKind::TeamBudgetCritical,
                EventKind::TeamPaused
            ]
        );
        assert_eq!(orchestrator.budget().status().total_spend, 11.0);

        let err = teams.resume_team(&team.id).await.unwrap_err();
        assert!(matches!(err, GodelError::TeamBudgetExceeded { .. }));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_scale_keeps_member_count_consistent() {
        let orchestrator = started(test_config());
        let teams = orchestrator.teams();
        let team = teams
            .create(TeamConfig::new("t", "task").with_agents(2))
            .await
            .unwrap();

        let grown = teams.scale(&team.id, 5).await.unwrap();
        assert_eq!(grown.agents.len(), 5);
        assert_eq!(grown.metrics.total_agents, 5);

        let shrunk = teams.scale(&team.id, 1).await.unwrap();
        assert_eq!(shrunk.agents, vec![team.agents[0].clone()]);
        assert_eq!(shrunk.metrics.total_agents, 1);
        assert_eq!(shrunk.status, TeamStatus::Active);

        let killed = orchestrator
            .lifecycle()
            .agents_by_status(AgentStatus::Killed)
            .await;
        assert_eq!(killed.len(), 4);

        let mut events = orchestrator.bus().subscribe_topic(team_topic(&team.id));
        teams.scale(&team.id, 1).await.unwrap();
        assert!(kinds(&mut events).is_empty());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_member_outcomes_complete_team() {
        let orchestrator = started(test_config());
        let team = orchestrator
            .teams()
            .create(
                TeamConfig::new("pipeline", "Ship it")
                    .with_agents(2)
                    .with_strategy(CompositionStrategy::Pipeline),
            )
            .await
            .unwrap();

        for agent_id in &team.agents {
            orchestrator
                .lifecycle()
                .complete(agent_id, Some("ok".to_string()))
                .await
                .unwrap();
        }

        let teams = orchestrator.teams().clone();
        let team_id = team.id.clone();
        assert!(
            eventually(|| {
                let teams = teams.clone();
                let team_id = team_id.clone();
                async move {
                    teams
                        .get_team(&team_id)
                        .await
                        .is_some_and(|t| t.status == TeamStatus::Completed)
                }
            })
            .await
        );

        let done = teams.get_team(&team.id).await.unwrap();
        assert_eq!(done.metrics.completed_agents, 2);
        assert!(done.completed_at.is_some());
        assert_eq!(orchestrator.budget().status().team_count, 0);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let orchestrator = started(test_config());
        let teams = orchestrator.teams();
        let team = teams
            .create(TeamConfig::new("t", "task").with_agents(3))
            .await
            .unwrap();

        let destroyed = teams.destroy(&team.id, true).await.unwrap();
        assert_eq!(destroyed.status, TeamStatus::Destroyed);
        assert!(destroyed.agents.is_empty());

        let mut events = orchestrator.bus().subscribe_topic(team_topic(&team.id));
        teams.destroy(&team.id, true).await.unwrap();
        assert!(kinds(&mut events).is_empty());

        let err = teams.scale(&team.id, 2).await.unwrap_err();
        assert!(matches!(err, GodelError::InvalidTeamState { .. }));
        orchestrator.shutdown().await;
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_retries_then_terminal_failure() {
        let orchestrator = started(test_config());
        let lifecycle = orchestrator.lifecycle();

        let agent = lifecycle
            .spawn(SpawnOptions::new("flaky work").with_max_retries(3))
            .await
            .unwrap();
        let mut events = orchestrator.bus().subscribe_topic(agent_topic(&agent.id));

        let mut last = None;
        for _ in 0..4 {
            last = Some(
                lifecycle
                    .fail(&agent.id, "rate limited", FailOptions::default())
                    .await
                    .unwrap(),
            );
        }
        let last = last.unwrap();
        assert_eq!(last.lifecycle_state, LifecycleState::Failed);
        assert_eq!(last.last_error.as_deref(), Some("rate limited"));
        assert_eq!(last.retry_count, 4);

        let events = events.drain();
        let delays: Vec<u64> = events
            .iter()
            .filter(|e| e.kind == EventKind::AgentRetrying)
            .map(|e| e.payload["delay_ms"].as_u64().unwrap())
            .collect();
        assert_eq!(delays, vec![20, 40, 80]);
        assert_eq!(events.last().unwrap().kind, EventKind::AgentFailed);

        // Stale restarts never revive a failed agent
        tokio::time::sleep(Duration::from_millis(120)).await;
        let state = lifecycle.get_state(&agent.id).await.unwrap();
        assert_eq!(state.lifecycle_state, LifecycleState::Failed);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_escalation_to_backup_model() {
        let orchestrator = started(test_config());
        let lifecycle = orchestrator.lifecycle();

        let agent = lifecycle
            .spawn(
                SpawnOptions::new("hard problem")
                    .with_model("primary-model")
                    .with_max_retries(0),
            )
            .await
            .unwrap();
        let mut events = orchestrator.bus().subscribe_topic(agent_topic(&agent.id));

        let state = lifecycle
            .fail(&agent.id, "context overflow", FailOptions::escalate_to("backup-model"))
            .await
            .unwrap();

        assert_eq!(state.agent.model, "backup-model");
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.lifecycle_state, LifecycleState::Running);

        let seen = kinds(&mut events);
        assert_eq!(
            seen.iter().filter(|k| **k == EventKind::AgentEscalated).count(),
            1
        );
        assert_eq!(lifecycle.metrics().await.escalations, 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminal_operations_are_idempotent() {
        let orchestrator = started(test_config());
        let lifecycle = orchestrator.lifecycle();
        let agent = lifecycle.spawn(SpawnOptions::new("task")).await.unwrap();
        let mut events = orchestrator.bus().subscribe_topic(agent_topic(&agent.id));

        lifecycle.kill(&agent.id, false).await.unwrap();
        lifecycle.kill(&agent.id, true).await.unwrap();
        let state = lifecycle.complete(&agent.id, None).await.unwrap();
        assert_eq!(state.lifecycle_state, LifecycleState::Killed);

        assert_eq!(kinds(&mut events), vec![EventKind::AgentKilled]);

        let err = lifecycle
            .fail(&agent.id, "late", FailOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GodelError::InvalidStateTransition { .. }));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_fail_applies_policy_once_per_call() {
        let orchestrator = started(test_config());
        let lifecycle = orchestrator.lifecycle().clone();
        let agent = lifecycle
            .spawn(SpawnOptions::new("contended").with_max_retries(10))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                let id = agent.id.clone();
                tokio::spawn(async move { lifecycle.fail(&id, "boom", FailOptions::default()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = lifecycle.get_state(&agent.id).await.unwrap();
        assert_eq!(state.retry_count, 8);
        assert_eq!(lifecycle.metrics().await.total_retries, 8);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_requires_start() {
        let orchestrator = Orchestrator::in_memory(test_config());
        let err = orchestrator
            .lifecycle()
            .spawn(SpawnOptions::new("too early"))
            .await
            .unwrap_err();
        assert!(matches!(err, GodelError::NotStarted(_)));
    }
}

mod budget_tests {
    use super::*;

    #[test]
    fn test_per_team_cap_denies() {
        let controller = BudgetController::new(BudgetLimits {
            max_spend_per_team: 50.0,
            ..Default::default()
        });

        let check = controller.check_limits(LimitRequest::team_budget(60.0));
        assert!(!check.allowed);
        assert!(check.reason_or_default().contains("per-team cap"));

        assert!(controller.check_limits(LimitRequest::team_budget(50.0)).allowed);
    }

    #[test]
    fn test_agent_cap_boundary() {
        let controller = BudgetController::new(BudgetLimits {
            max_agents: 5,
            ..Default::default()
        });
        assert!(controller.check_limits(LimitRequest::agents(5)).allowed);
        assert!(!controller.check_limits(LimitRequest::agents(6)).allowed);
    }

    #[test]
    fn test_reset_daily_budget() {
        let controller = BudgetController::default();
        controller.record_spend(42.0);
        controller.reset_daily_budget();

        let status = controller.status();
        assert_eq!(status.total_spend, 0.0);
        assert_eq!(status.percent_used, 0.0);
    }

    #[tokio::test]
    async fn test_team_creation_denied_over_cap() {
        let mut config = test_config();
        config.budget.max_spend_per_team = 50.0;
        let orchestrator = started(config);

        let err = orchestrator
            .teams()
            .create(TeamConfig::new("big", "task").with_budget(60.0))
            .await
            .unwrap_err();
        match err {
            GodelError::BudgetExceeded(reason) => assert!(reason.contains("per-team cap")),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(orchestrator.budget().status().team_count, 0);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_spend_is_not_lost() {
        let controller = Arc::new(BudgetController::default());
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.record_spend(0.5) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(controller.status().total_spend, 25.0);
    }
}

mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_hybrid_batch_single_chunk() {
        let mut config = test_config();
        config.execution.strategy = ExecutionStrategy::Hybrid;
        config.execution.batch_size = 5;

        let runner = Arc::new(
            SimulatedRunner::new(0.2, Duration::from_millis(20)).with_failing_unit("unit-4"),
        );
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(godel::backend::InMemorySessionBackend::new()),
            Arc::new(godel::backend::InMemoryAgentStore::new()),
            runner.clone(),
        );
        let units: Vec<String> = (1..=5).map(|i| format!("unit-{}", i)).collect();

        let ctx = orchestrator.engine().execute("b1", units).await.unwrap();

        assert_eq!(runner.peak_concurrency(), 5);
        assert_eq!(ctx.status, BatchStatus::Failed);
        assert_eq!(ctx.succeeded(), 4);
        assert_eq!(ctx.results[3].status, UnitStatus::Failed);
        assert!((ctx.total_cost - 0.8).abs() < 1e-9);
        assert!((orchestrator.budget().status().total_spend - 0.8).abs() < 1e-9);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_config_save_load_validate() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.yaml");

        let mut config = GodelConfig::default();
        config.budget.max_daily_spend = 80.0;
        config.execution.strategy = ExecutionStrategy::Serial;
        config.save(&config_path).unwrap();

        let loaded = GodelConfig::load(&config_path).unwrap();
        assert_eq!(loaded, config);
        assert!(validate_config(&loaded).is_ok());
    }

    #[test]
    fn test_invalid_config_reports_every_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "budget:\n  max_daily_spend: 200.0\nexecution:\n  retry_attempts: 0\n",
        )
        .unwrap();

        let loaded = GodelConfig::load(&config_path).unwrap();
        let errors = validate_config(&loaded).unwrap_err();
        // Emergency stop (150) below the daily cap, and zero attempts
        assert_eq!(errors.len(), 2);
    }
}
