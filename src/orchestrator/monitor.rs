//! Budget monitor
//!
//! One tick syncs night mode with the local clock, resets the daily budget
//! when the local date changes, acts on newly crossed alert thresholds and
//! logs soft-limit warnings. While the highest crossed threshold halts work,
//! every active team is paused with [`PauseReason::DailyBudget`].

use crate::budget::{AlertAction, AlertThreshold, BudgetController};
use crate::team::{PauseReason, TeamManager, TeamStatus};
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// What one monitor tick did
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorTick {
    pub night_mode_changed: bool,
    pub daily_reset: bool,
    /// Thresholds acted on for the first time this day
    pub new_alerts: Vec<AlertThreshold>,
    pub paused_teams: Vec<String>,
    pub soft_warnings: Vec<String>,
}

#[derive(Debug)]
struct MonitorState {
    day: NaiveDate,
    /// Highest alert percent already acted on today
    handled_percent: Option<f64>,
    last_soft_warnings: Vec<String>,
}

pub struct BudgetMonitor {
    budget: Arc<BudgetController>,
    teams: TeamManager,
    state: Mutex<MonitorState>,
}

impl BudgetMonitor {
    pub fn new(budget: Arc<BudgetController>, teams: TeamManager) -> Self {
        Self {
            budget,
            teams,
            state: Mutex::new(MonitorState {
                day: Local::now().date_naive(),
                handled_percent: None,
                last_soft_warnings: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one monitor pass as of local time `now`
    pub async fn tick(&self, now: DateTime<Local>) -> MonitorTick {
        let mut report = MonitorTick {
            night_mode_changed: self.budget.sync_night_mode(now),
            ..Default::default()
        };

        let crossed = self.budget_pass(now, &mut report);

        if crossed.last().is_some_and(|a| a.action.halts_work()) {
            for team in self.teams.teams_by_status(TeamStatus::Active).await {
                match self
                    .teams
                    .pause_team_for(&team.id, PauseReason::DailyBudget)
                    .await
                {
                    Ok(_) => report.paused_teams.push(team.id),
                    Err(e) => warn!(team_id = %team.id, error = %e, "Failed to pause team"),
                }
            }
            if !report.paused_teams.is_empty() {
                error!(
                    teams = report.paused_teams.len(),
                    "Paused active teams on daily budget"
                );
            }
        }

        report
    }

    /// Daily reset, alert ladder and soft limits; returns every crossed threshold
    fn budget_pass(&self, now: DateTime<Local>, report: &mut MonitorTick) -> Vec<AlertThreshold> {
        let mut state = self.state();

        let today = now.date_naive();
        if today != state.day {
            self.budget.reset_daily_budget();
            state.day = today;
            state.handled_percent = None;
            report.daily_reset = true;
        }

        let crossed = self.budget.check_alerts();
        let handled = state.handled_percent;
        report.new_alerts = crossed
            .iter()
            .filter(|a| handled.map_or(true, |h| a.percent > h))
            .cloned()
            .collect();

        for alert in &report.new_alerts {
            let status = self.budget.status();
            match alert.action {
                AlertAction::Log => info!(
                    percent = alert.percent,
                    channel = %alert.channel,
                    spend = status.total_spend,
                    "Budget threshold reached"
                ),
                AlertAction::Warn => warn!(
                    percent = alert.percent,
                    channel = %alert.channel,
                    spend = status.total_spend,
                    "Budget threshold reached"
                ),
                AlertAction::Alert | AlertAction::Pause | AlertAction::Stop => error!(
                    percent = alert.percent,
                    action = %alert.action,
                    channel = %alert.channel,
                    spend = status.total_spend,
                    "Budget threshold reached"
                ),
            }
        }
        if let Some(top) = crossed.last() {
            state.handled_percent = Some(top.percent);
        }

        report.soft_warnings = self.budget.check_soft_limits();
        if report.soft_warnings != state.last_soft_warnings {
            for warning in &report.soft_warnings {
                warn!(warning = %warning, "Soft limit exceeded");
            }
            state.last_soft_warnings = report.soft_warnings.clone();
        } else {
            debug!(count = report.soft_warnings.len(), "Soft limit warnings unchanged");
        }

        crossed
    }
}
