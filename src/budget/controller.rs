//! Process-wide budget accounting
//!
//! The controller is the single writer of spend. Every mutation is one
//! read-modify-write under its internal mutex, so concurrent callers never
//! lose updates.

use super::limits::{AlertThreshold, BudgetLimits, LimitCheck, LimitRequest};
use crate::metrics;
use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Snapshots kept in the spend history
pub const MAX_HISTORY: usize = 100;

/// One recorded spend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendSnapshot {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    /// Running total after this spend
    pub total_spend: f64,
}

/// Mutable accounting state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetState {
    pub total_spend: f64,
    pub agent_count: usize,
    pub team_count: usize,
    pub hour_spend: f64,
    /// Hours since the epoch that `hour_spend` belongs to
    pub hour_bucket: i64,
    pub history: VecDeque<SpendSnapshot>,
    pub night_mode: bool,
    pub last_reset: DateTime<Utc>,
}

impl BudgetState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_spend: 0.0,
            agent_count: 0,
            team_count: 0,
            hour_spend: 0.0,
            hour_bucket: hour_bucket(now),
            history: VecDeque::new(),
            night_mode: false,
            last_reset: now,
        }
    }
}

fn hour_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(3600)
}

/// Point-in-time budget report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub total_spend: f64,
    pub daily_limit: f64,
    pub percent_used: f64,
    pub remaining: f64,
    pub hour_spend: f64,
    pub agent_count: usize,
    pub team_count: usize,
    pub night_mode: bool,
    /// Agent cap currently in force (night or day)
    pub max_agents: usize,
    /// Team cap currently in force (night or day)
    pub max_concurrent_teams: usize,
    pub last_reset: DateTime<Utc>,
}

impl BudgetStatus {
    /// Multi-line summary for CLI output
    pub fn display(&self) -> String {
        format!(
            "Spend: ${:.2} / ${:.2} ({:.1}%), remaining ${:.2}\n\
             This hour: ${:.2}\n\
             Agents: {}/{}  Teams: {}/{}{}",
            self.total_spend,
            self.daily_limit,
            self.percent_used,
            self.remaining,
            self.hour_spend,
            self.agent_count,
            self.max_agents,
            self.team_count,
            self.max_concurrent_teams,
            if self.night_mode { "  (night mode)" } else { "" }
        )
    }
}

/// Global budget controller
#[derive(Debug)]
pub struct BudgetController {
    limits: BudgetLimits,
    state: Mutex<BudgetState>,
}

impl Default for BudgetController {
    fn default() -> Self {
        Self::new(BudgetLimits::default())
    }
}

impl BudgetController {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(BudgetState::new(Utc::now())),
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    fn state(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_caps(&self, night_mode: bool) -> (usize, usize) {
        if night_mode {
            (
                self.limits.night_mode.max_agents,
                self.limits.night_mode.max_concurrent_teams,
            )
        } else {
            (self.limits.max_agents, self.limits.max_concurrent_teams)
        }
    }

    fn percent_used(&self, total_spend: f64) -> f64 {
        if self.limits.max_daily_spend > 0.0 {
            total_spend / self.limits.max_daily_spend * 100.0
        } else if total_spend > 0.0 {
            100.0
        } else {
            0.0
        }
    }

    /// Check a candidate request against the hard limits
    ///
    /// Reaching a cap exactly is allowed.
    pub fn check_limits(&self, request: LimitRequest) -> LimitCheck {
        let state = self.state();
        self.check_locked(&state, request)
    }

    fn check_locked(&self, state: &BudgetState, request: LimitRequest) -> LimitCheck {
        let (max_agents, _) = self.active_caps(state.night_mode);

        if state.total_spend >= self.limits.emergency_stop_spend {
            return LimitCheck::deny(format!(
                "emergency stop: spend ${:.2} reached ${:.2}",
                state.total_spend, self.limits.emergency_stop_spend
            ));
        }

        let agents = state.agent_count + request.agent_count;
        if agents > max_agents {
            return LimitCheck::deny(format!(
                "agent count {} exceeds {}cap of {}",
                agents,
                if state.night_mode { "night-mode " } else { "" },
                max_agents
            ));
        }

        if request.team_budget > self.limits.max_spend_per_team {
            return LimitCheck::deny(format!(
                "team budget ${:.2} exceeds per-team cap of ${:.2}",
                request.team_budget, self.limits.max_spend_per_team
            ));
        }

        if state.total_spend + request.team_budget > self.limits.max_daily_spend {
            return LimitCheck::deny(format!(
                "daily spend ${:.2} plus ${:.2} exceeds daily cap of ${:.2}",
                state.total_spend, request.team_budget, self.limits.max_daily_spend
            ));
        }

        LimitCheck::allow()
    }

    /// [`check_limits`](Self::check_limits) plus the team cap and night gate
    pub fn check_team_creation(&self, candidate_agents: usize, team_budget: f64) -> LimitCheck {
        let state = self.state();
        self.check_team_locked(&state, candidate_agents, team_budget)
    }

    /// Check `count` more agents and count them in the same critical section
    ///
    /// On allow the agents are already counted; callers release unused ones
    /// with [`adjust_agent_count`](Self::adjust_agent_count).
    pub fn try_reserve_agents(&self, count: usize) -> LimitCheck {
        let mut state = self.state();
        let check = self.check_locked(&state, LimitRequest::agents(count));
        if check.allowed {
            state.agent_count += count;
            debug!(count, agents = state.agent_count, "Reserved agents");
        }
        check
    }

    /// Check a new team and count it plus its initial agents atomically
    ///
    /// Release with `adjust_team_count(-1)` and `adjust_agent_count` when the
    /// team is rolled back.
    pub fn try_reserve_team(&self, candidate_agents: usize, team_budget: f64) -> LimitCheck {
        let mut state = self.state();
        let check = self.check_team_locked(&state, candidate_agents, team_budget);
        if check.allowed {
            state.team_count += 1;
            state.agent_count += candidate_agents;
            metrics::set_active_teams(state.team_count);
            debug!(
                teams = state.team_count,
                agents = state.agent_count,
                "Reserved team"
            );
        }
        check
    }

    fn check_team_locked(
        &self,
        state: &BudgetState,
        candidate_agents: usize,
        team_budget: f64,
    ) -> LimitCheck {
        let (_, max_teams) = self.active_caps(state.night_mode);

        if state.night_mode && !self.limits.night_mode.allow_new_teams {
            return LimitCheck::deny("new teams are not allowed in night mode");
        }

        if state.team_count + 1 > max_teams {
            return LimitCheck::deny(format!(
                "team count {} exceeds {}cap of {}",
                state.team_count + 1,
                if state.night_mode { "night-mode " } else { "" },
                max_teams
            ));
        }

        self.check_locked(
            state,
            LimitRequest::agents(candidate_agents).with_team_budget(team_budget),
        )
    }

    /// Record spend in USD
    pub fn record_spend(&self, amount: f64) {
        self.record_spend_at(amount, Utc::now());
    }

    /// Record spend observed at `now`
    pub fn record_spend_at(&self, amount: f64, now: DateTime<Utc>) {
        if !amount.is_finite() || amount < 0.0 {
            warn!(amount, "Ignoring invalid spend amount");
            return;
        }

        let mut state = self.state();

        let bucket = hour_bucket(now);
        if bucket != state.hour_bucket {
            state.hour_bucket = bucket;
            state.hour_spend = 0.0;
        }

        state.total_spend += amount;
        state.hour_spend += amount;

        let snapshot = SpendSnapshot {
            timestamp: now,
            amount,
            total_spend: state.total_spend,
        };
        state.history.push_back(snapshot);
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }

        metrics::set_spend(state.total_spend, state.hour_spend);
        debug!(amount, total = state.total_spend, "Recorded spend");

        if state.total_spend >= self.limits.emergency_stop_spend {
            error!(
                total = state.total_spend,
                cap = self.limits.emergency_stop_spend,
                "Emergency stop spend reached"
            );
        }
    }

    /// Adjust the tracked agent count, saturating at zero
    pub fn adjust_agent_count(&self, delta: i64) -> usize {
        let mut state = self.state();
        state.agent_count = apply_delta(state.agent_count, delta);
        state.agent_count
    }

    /// Adjust the tracked team count, saturating at zero
    pub fn adjust_team_count(&self, delta: i64) -> usize {
        let mut state = self.state();
        state.team_count = apply_delta(state.team_count, delta);
        metrics::set_active_teams(state.team_count);
        state.team_count
    }

    pub fn enable_night_mode(&self) {
        let mut state = self.state();
        if !state.night_mode {
            state.night_mode = true;
            info!(
                max_agents = self.limits.night_mode.max_agents,
                max_teams = self.limits.night_mode.max_concurrent_teams,
                "Night mode enabled"
            );
        }
    }

    pub fn disable_night_mode(&self) {
        let mut state = self.state();
        if state.night_mode {
            state.night_mode = false;
            info!("Night mode disabled");
        }
    }

    pub fn is_night_mode(&self) -> bool {
        self.state().night_mode
    }

    /// Toggle night mode for the local time `now`; returns true on change
    pub fn sync_night_mode(&self, now: DateTime<Local>) -> bool {
        let want = self.limits.night_mode.enabled && self.limits.night_mode.contains(now.hour());
        if want == self.is_night_mode() {
            return false;
        }
        if want {
            self.enable_night_mode();
        } else {
            self.disable_night_mode();
        }
        true
    }

    /// Every alert threshold at or below current usage, ascending
    pub fn check_alerts(&self) -> Vec<AlertThreshold> {
        let percent = self.percent_used(self.state().total_spend);
        let mut crossed: Vec<AlertThreshold> = self
            .limits
            .alerts
            .iter()
            .filter(|a| a.percent <= percent)
            .cloned()
            .collect();
        crossed.sort_by(|a, b| a.percent.total_cmp(&b.percent));
        crossed
    }

    /// Advisory warnings for crossed soft limits
    pub fn check_soft_limits(&self) -> Vec<String> {
        let state = self.state();
        let soft = &self.limits.soft;
        let mut warnings = Vec::new();

        if state.hour_spend > soft.warn_hourly_spend {
            warnings.push(format!(
                "hourly spend ${:.2} above ${:.2}",
                state.hour_spend, soft.warn_hourly_spend
            ));
        }
        if state.agent_count > soft.warn_agent_count {
            warnings.push(format!(
                "agent count {} above {}",
                state.agent_count, soft.warn_agent_count
            ));
        }
        if state.team_count > soft.warn_team_count {
            warnings.push(format!(
                "team count {} above {}",
                state.team_count, soft.warn_team_count
            ));
        }

        warnings
    }

    pub fn status(&self) -> BudgetStatus {
        let state = self.state();
        let (max_agents, max_concurrent_teams) = self.active_caps(state.night_mode);

        BudgetStatus {
            total_spend: state.total_spend,
            daily_limit: self.limits.max_daily_spend,
            percent_used: self.percent_used(state.total_spend),
            remaining: (self.limits.max_daily_spend - state.total_spend).max(0.0),
            hour_spend: state.hour_spend,
            agent_count: state.agent_count,
            team_count: state.team_count,
            night_mode: state.night_mode,
            max_agents,
            max_concurrent_teams,
            last_reset: state.last_reset,
        }
    }

    /// Zero the spend counters and history
    pub fn reset_daily_budget(&self) {
        let mut state = self.state();
        state.total_spend = 0.0;
        state.hour_spend = 0.0;
        state.history.clear();
        state.last_reset = Utc::now();
        metrics::set_spend(0.0, 0.0);
        info!("Daily budget reset");
    }

    pub fn history(&self) -> Vec<SpendSnapshot> {
        self.state().history.iter().cloned().collect()
    }

    /// Spend at or above the emergency cap
    pub fn is_emergency(&self) -> bool {
        self.state().total_spend >= self.limits.emergency_stop_spend
    }
}

fn apply_delta(count: usize, delta: i64) -> usize {
    if delta >= 0 {
        count.saturating_add(delta as usize)
    } else {
        count.saturating_sub(delta.unsigned_abs() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::AlertAction;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    #[test]
    fn test_agent_cap_boundary() {
        let controller = BudgetController::default();
        assert!(controller.check_limits(LimitRequest::agents(50)).allowed);

        let denied = controller.check_limits(LimitRequest::agents(51));
        assert!(!denied.allowed);
        assert!(denied.reason_or_default().contains("cap of 50"));

        controller.adjust_agent_count(50);
        assert!(!controller.check_limits(LimitRequest::agents(1)).allowed);
    }

    #[test]
    fn test_per_team_cap() {
        let controller = BudgetController::default();

        let check = controller.check_limits(LimitRequest::team_budget(60.0));
        assert!(!check.allowed);
        assert!(check.reason_or_default().contains("per-team cap"));

        assert!(controller.check_limits(LimitRequest::team_budget(50.0)).allowed);
    }

    #[test]
    fn test_daily_cap() {
        let controller = BudgetController::default();
        controller.record_spend(80.0);

        assert!(controller.check_limits(LimitRequest::team_budget(20.0)).allowed);
        let check = controller.check_limits(LimitRequest::team_budget(21.0));
        assert!(!check.allowed);
        assert!(check.reason_or_default().contains("daily cap"));
    }

    #[test]
    fn test_team_creation_gates() {
        let limits = BudgetLimits {
            max_concurrent_teams: 1,
            ..Default::default()
        };
        let controller = BudgetController::new(limits);
        assert!(controller.check_team_creation(3, 10.0).allowed);

        controller.adjust_team_count(1);
        assert!(!controller.check_team_creation(3, 10.0).allowed);

        controller.adjust_team_count(-1);
        controller.enable_night_mode();
        let check = controller.check_team_creation(1, 1.0);
        assert!(!check.allowed);
        assert!(check.reason_or_default().contains("night mode"));
    }

    #[test]
    fn test_reservations_count_atomically() {
        let controller = BudgetController::new(BudgetLimits {
            max_agents: 4,
            max_concurrent_teams: 1,
            ..BudgetLimits::default()
        });

        assert!(controller.try_reserve_team(3, 1.0).allowed);
        let status = controller.status();
        assert_eq!((status.team_count, status.agent_count), (1, 3));

        // The reservation itself now blocks a second team
        assert!(!controller.try_reserve_team(0, 1.0).allowed);
        assert!(!controller.try_reserve_agents(2).allowed);
        assert!(controller.try_reserve_agents(1).allowed);
        assert_eq!(controller.status().agent_count, 4);
        assert_eq!(controller.status().team_count, 1);
    }

    #[test]
    fn test_concurrent_team_reservations_respect_cap() {
        let controller = Arc::new(BudgetController::new(BudgetLimits {
            max_concurrent_teams: 2,
            ..BudgetLimits::default()
        }));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let controller = controller.clone();
                std::thread::spawn(move || controller.try_reserve_team(1, 1.0).allowed)
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 2);
        assert_eq!(controller.status().team_count, 2);
        assert_eq!(controller.status().agent_count, 2);
    }

    #[test]
    fn test_night_mode_swaps_caps() {
        let controller = BudgetController::default();
        controller.enable_night_mode();
        assert_eq!(controller.status().max_agents, 10);
        assert!(!controller.check_limits(LimitRequest::agents(11)).allowed);

        controller.disable_night_mode();
        assert_eq!(controller.status().max_agents, 50);
    }

    #[test]
    fn test_sync_night_mode() {
        let controller = BudgetController::default();
        let midnight = Local.with_ymd_and_hms(2026, 1, 10, 0, 30, 0).unwrap();
        let noon = Local.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();

        assert!(controller.sync_night_mode(midnight));
        assert!(controller.is_night_mode());
        assert!(!controller.sync_night_mode(midnight));
        assert!(controller.sync_night_mode(noon));
        assert!(!controller.is_night_mode());
    }

    #[test]
    fn test_record_spend_and_hour_rollover() {
        let controller = BudgetController::default();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 10, 9, 15, 0).unwrap();

        controller.record_spend_at(2.0, t0);
        controller.record_spend_at(3.0, t0 + Duration::minutes(10));
        assert_eq!(controller.status().hour_spend, 5.0);

        controller.record_spend_at(1.0, t0 + Duration::hours(1));
        let status = controller.status();
        assert_eq!(status.hour_spend, 1.0);
        assert_eq!(status.total_spend, 6.0);
    }

    #[test]
    fn test_invalid_spend_ignored() {
        let controller = BudgetController::default();
        controller.record_spend(-5.0);
        controller.record_spend(f64::NAN);
        assert_eq!(controller.status().total_spend, 0.0);
        assert!(controller.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let controller = BudgetController::default();
        for _ in 0..(MAX_HISTORY + 20) {
            controller.record_spend(0.01);
        }
        let history = controller.history();
        assert_eq!(history.len(), MAX_HISTORY);
        assert!(history[0].total_spend > 0.15);
    }

    #[test]
    fn test_reset_daily_budget() {
        let controller = BudgetController::default();
        controller.record_spend(42.0);
        controller.reset_daily_budget();
        controller.reset_daily_budget();

        let status = controller.status();
        assert_eq!(status.total_spend, 0.0);
        assert_eq!(status.percent_used, 0.0);
        assert_eq!(status.remaining, 100.0);
    }

    #[test]
    fn test_alert_ladder_is_level_triggered() {
        let controller = BudgetController::default();
        assert!(controller.check_alerts().is_empty());

        controller.record_spend(76.0);
        let actions: Vec<AlertAction> =
            controller.check_alerts().iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            vec![AlertAction::Log, AlertAction::Warn, AlertAction::Alert]
        );

        // Same answer on repeat
        assert_eq!(controller.check_alerts().len(), 3);
    }

    #[test]
    fn test_soft_limits_and_emergency() {
        let controller = BudgetController::default();
        controller.record_spend(12.0);
        controller.adjust_agent_count(41);

        let warnings = controller.check_soft_limits();
        assert_eq!(warnings.len(), 2);

        controller.record_spend(140.0);
        assert!(controller.is_emergency());
        assert!(!controller.check_limits(LimitRequest::default()).allowed);
    }

    #[test]
    fn test_concurrent_spend_is_not_lost() {
        let controller = Arc::new(BudgetController::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        controller.record_spend(0.25);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(controller.status().total_spend, 200.0);
    }
}
