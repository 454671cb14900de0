//! Godel - budget-aware orchestration of agent teams
//!
//! Main entry point for the Godel CLI.

mod commands;

use chrono::Local;
use clap::Parser;
use commands::{Cli, Commands};
use godel::backend::{InMemoryAgentStore, InMemorySessionBackend};
use godel::budget::BudgetController;
use godel::config::{validate_config, GodelConfig};
use godel::execution::{ExecutionStrategy, SimulatedRunner, UnitStatus};
use godel::lifecycle::{FailOptions, LifecycleState};
use godel::team::{CompositionStrategy, TeamConfig, TeamStatus};
use godel::{GodelError, Orchestrator};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    if let Err(e) = godel::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> godel::Result<()> {
    let config_path = cli
        .config
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(GodelConfig::default_path);

    match cli.command {
        Commands::Init { force } => handle_init(&config_path, force),
        Commands::Validate => handle_validate(&config_path),
        Commands::Budget { spend } => {
            let config = load_or_default(&config_path)?;
            handle_budget(config, spend, cli.json)
        }
        Commands::Team {
            task,
            name,
            agents,
            strategy,
            budget,
            cost_per_agent,
            fail,
            scale,
        } => {
            let config = load_or_default(&config_path)?;
            let plan = TeamPlan {
                task,
                name,
                agents,
                strategy,
                budget,
                cost_per_agent,
                fail,
                scale,
            };
            handle_team(config, plan, cli.json).await
        }
        Commands::Batch {
            units,
            strategy,
            batch_size,
            cost,
            latency_ms,
            fail,
        } => {
            let mut config = load_or_default(&config_path)?;
            if let Some(strategy) = strategy {
                config.execution.strategy = strategy;
            }
            if let Some(batch_size) = batch_size {
                config.execution.batch_size = batch_size;
            }
            handle_batch(config, units, cost, latency_ms, fail, cli.json).await
        }
        Commands::Metrics => {
            print!("{}", godel::metrics::encode_metrics());
            Ok(())
        }
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_or_default(path: &Path) -> godel::Result<GodelConfig> {
    if path.exists() {
        GodelConfig::load(path)
    } else {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        Ok(GodelConfig::default())
    }
}

fn handle_init(path: &Path, force: bool) -> godel::Result<()> {
    if path.exists() && !force {
        return Err(GodelError::Config(format!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    GodelConfig::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn handle_validate(path: &Path) -> godel::Result<()> {
    let config = GodelConfig::load(path)?;

    match validate_config(&config) {
        Ok(()) => {
            println!("✓ {} is valid", path.display());
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("✗ {}", error);
            }
            Err(GodelError::Config(format!(
                "{} validation error(s) in {}",
                errors.len(),
                path.display()
            )))
        }
    }
}

fn handle_budget(config: GodelConfig, spend: Option<f64>, json: bool) -> godel::Result<()> {
    let controller = BudgetController::new(config.budget);
    controller.sync_night_mode(Local::now());
    if let Some(amount) = spend {
        controller.record_spend(amount);
    }

    let status = controller.status();
    let alerts = controller.check_alerts();
    let warnings = controller.check_soft_limits();

    if json {
        let report = serde_json::json!({
            "status": status,
            "alerts": alerts,
            "soft_warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", status.display());
    for alert in &alerts {
        println!(
            "  ⚠ {:.0}% threshold: {} ({})",
            alert.percent, alert.action, alert.channel
        );
    }
    for warning in &warnings {
        println!("  ⚠ {}", warning);
    }
    if controller.is_emergency() {
        println!("  ⛔ emergency stop spend reached");
    }
    Ok(())
}

struct TeamPlan {
    task: String,
    name: String,
    agents: usize,
    strategy: CompositionStrategy,
    budget: f64,
    cost_per_agent: f64,
    fail: Vec<usize>,
    scale: Option<usize>,
}

async fn handle_team(config: GodelConfig, plan: TeamPlan, json: bool) -> godel::Result<()> {
    let orchestrator = Orchestrator::in_memory(config);
    orchestrator.start()?;

    let result = simulate_team(&orchestrator, plan, json).await;
    orchestrator.shutdown().await;
    result
}

async fn simulate_team(
    orchestrator: &Orchestrator,
    plan: TeamPlan,
    json: bool,
) -> godel::Result<()> {
    let teams = orchestrator.teams();
    let lifecycle = orchestrator.lifecycle();

    let mut team = teams
        .create(
            TeamConfig::new(plan.name, plan.task)
                .with_agents(plan.agents)
                .with_strategy(plan.strategy)
                .with_budget(plan.budget),
        )
        .await?;
    if let Some(target) = plan.scale {
        team = teams.scale(&team.id, target).await?;
    }

    for (index, agent_id) in team.agents.iter().enumerate() {
        let current = teams.team_budget(&team.id).await?;
        if current.is_exhausted() {
            tracing::warn!(team_id = %team.id, "Team budget exhausted, stopping simulation");
            break;
        }
        teams
            .consume_budget(&team.id, agent_id, 1_000, plan.cost_per_agent)
            .await?;

        if plan.fail.contains(&index) {
            // Exhaust the retry budget so the member ends up failed
            loop {
                let state = lifecycle
                    .fail(agent_id, "simulated failure", FailOptions::default())
                    .await?;
                if state.lifecycle_state.is_terminal() {
                    break;
                }
            }
        } else {
            let state = lifecycle
                .get_state(agent_id)
                .await
                .ok_or_else(|| GodelError::AgentNotFound(agent_id.clone()))?;
            if state.lifecycle_state == LifecycleState::Paused {
                continue;
            }
            lifecycle
                .complete(agent_id, Some(format!("{} done", agent_id)))
                .await?;
        }
    }

    // Outcomes reach the team through the event forwarder
    for _ in 0..50 {
        match teams.get_team(&team.id).await {
            Some(t) if t.status.is_finished() || t.status == TeamStatus::Paused => break,
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }

    let team = teams
        .get_team(&team.id)
        .await
        .ok_or_else(|| GodelError::TeamNotFound(team.id.clone()))?;
    let members = lifecycle.agents_by_team(&team.id).await;

    if json {
        let report = serde_json::json!({
            "team": team,
            "members": members,
            "budget": orchestrator.budget().status(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", team.display_line());
    for member in &members {
        println!("  {}", member.display_line());
    }
    if let Some(reason) = team.pause_reason {
        println!("  paused: {}", reason);
    }
    println!();
    println!("{}", orchestrator.budget().status().display());
    Ok(())
}

async fn handle_batch(
    config: GodelConfig,
    units: usize,
    cost: f64,
    latency_ms: u64,
    fail: Vec<usize>,
    json: bool,
) -> godel::Result<()> {
    let unit_ids: Vec<String> = (1..=units).map(|i| format!("unit-{}", i)).collect();
    let runner = fail.iter().fold(
        SimulatedRunner::new(cost, Duration::from_millis(latency_ms)),
        |runner, n| runner.with_failing_unit(format!("unit-{}", n)),
    );

    let strategy: ExecutionStrategy = config.execution.strategy;
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(InMemorySessionBackend::new()),
        Arc::new(InMemoryAgentStore::new()),
        Arc::new(runner),
    );

    let batch_id = format!("batch-{}", Local::now().format("%Y%m%d%H%M%S"));
    let ctx = orchestrator.engine().execute(batch_id, unit_ids).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ctx)?);
        return Ok(());
    }

    println!(
        "{} [{}] strategy={} units={} succeeded={} failed={} cost=${:.2}",
        ctx.id,
        ctx.status,
        strategy,
        ctx.results.len(),
        ctx.succeeded(),
        ctx.failed(),
        ctx.total_cost
    );
    for result in &ctx.results {
        let mark = match result.status {
            UnitStatus::Succeeded => "✓",
            UnitStatus::Failed => "✗",
            _ => "·",
        };
        match &result.error {
            Some(error) => println!(
                "  {} {} retries={} {}",
                mark, result.unit_id, result.retries, error
            ),
            None => println!("  {} {} retries={}", mark, result.unit_id, result.retries),
        }
    }
    Ok(())
}
