//! Budget limits, alert ladder and limit-check results

use serde::{Deserialize, Serialize};

/// Global budget limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Maximum concurrently tracked agents (day)
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Maximum concurrently active teams (day)
    #[serde(default = "default_max_concurrent_teams")]
    pub max_concurrent_teams: usize,

    /// Daily spend cap in USD
    #[serde(default = "default_max_daily_spend")]
    pub max_daily_spend: f64,

    /// Largest budget a single team may be given, in USD
    #[serde(default = "default_max_spend_per_team")]
    pub max_spend_per_team: f64,

    /// Spend at which everything should stop, in USD
    #[serde(default = "default_emergency_stop_spend")]
    pub emergency_stop_spend: f64,

    #[serde(default)]
    pub soft: SoftLimits,

    #[serde(default)]
    pub night_mode: NightModeConfig,

    /// Alert ladder, ascending by percent
    #[serde(default = "default_alerts")]
    pub alerts: Vec<AlertThreshold>,
}

fn default_max_agents() -> usize {
    50
}

fn default_max_concurrent_teams() -> usize {
    10
}

fn default_max_daily_spend() -> f64 {
    100.0
}

fn default_max_spend_per_team() -> f64 {
    50.0
}

fn default_emergency_stop_spend() -> f64 {
    150.0
}

fn default_alerts() -> Vec<AlertThreshold> {
    vec![
        AlertThreshold::new(25.0, AlertAction::Log, "log"),
        AlertThreshold::new(50.0, AlertAction::Warn, "dashboard"),
        AlertThreshold::new(75.0, AlertAction::Alert, "human"),
        AlertThreshold::new(90.0, AlertAction::Pause, "human_urgent"),
        AlertThreshold::new(100.0, AlertAction::Stop, "human_critical"),
    ]
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            max_concurrent_teams: default_max_concurrent_teams(),
            max_daily_spend: default_max_daily_spend(),
            max_spend_per_team: default_max_spend_per_team(),
            emergency_stop_spend: default_emergency_stop_spend(),
            soft: SoftLimits::default(),
            night_mode: NightModeConfig::default(),
            alerts: default_alerts(),
        }
    }
}

/// Advisory thresholds; crossing them only produces warnings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftLimits {
    #[serde(default = "default_warn_hourly_spend")]
    pub warn_hourly_spend: f64,

    #[serde(default = "default_warn_agent_count")]
    pub warn_agent_count: usize,

    #[serde(default = "default_warn_team_count")]
    pub warn_team_count: usize,
}

fn default_warn_hourly_spend() -> f64 {
    10.0
}

fn default_warn_agent_count() -> usize {
    40
}

fn default_warn_team_count() -> usize {
    8
}

impl Default for SoftLimits {
    fn default() -> Self {
        Self {
            warn_hourly_spend: default_warn_hourly_spend(),
            warn_agent_count: default_warn_agent_count(),
            warn_team_count: default_warn_team_count(),
        }
    }
}

/// Conservative caps applied during a local-time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightModeConfig {
    /// Whether the monitor toggles night mode automatically
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Window start, local hour (inclusive)
    #[serde(default = "default_night_start")]
    pub start_hour: u32,

    /// Window end, local hour (exclusive)
    #[serde(default = "default_night_end")]
    pub end_hour: u32,

    #[serde(default = "default_night_max_agents")]
    pub max_agents: usize,

    #[serde(default = "default_night_max_teams")]
    pub max_concurrent_teams: usize,

    /// Whether new teams may be created at night
    #[serde(default)]
    pub allow_new_teams: bool,
}

fn default_true() -> bool {
    true
}

fn default_night_start() -> u32 {
    23
}

fn default_night_end() -> u32 {
    7
}

fn default_night_max_agents() -> usize {
    10
}

fn default_night_max_teams() -> usize {
    2
}

impl Default for NightModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: default_night_start(),
            end_hour: default_night_end(),
            max_agents: default_night_max_agents(),
            max_concurrent_teams: default_night_max_teams(),
            allow_new_teams: false,
        }
    }
}

impl NightModeConfig {
    /// Whether `hour` (0-23) falls inside the window; wraps midnight
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour == self.end_hour {
            false
        } else if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// What to do when an alert threshold is crossed
///
/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    Log,
    Warn,
    Alert,
    Pause,
    Stop,
}

impl AlertAction {
    /// Whether the action halts work
    pub fn halts_work(&self) -> bool {
        matches!(self, Self::Pause | Self::Stop)
    }
}

impl std::fmt::Display for AlertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Alert => "alert",
            Self::Pause => "pause",
            Self::Stop => "stop",
        };
        write!(f, "{}", name)
    }
}

/// One rung of the alert ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    /// Percent of the daily cap
    pub percent: f64,
    pub action: AlertAction,
    /// Notification channel name
    pub channel: String,
}

impl AlertThreshold {
    pub fn new(percent: f64, action: AlertAction, channel: impl Into<String>) -> Self {
        Self {
            percent,
            action,
            channel: channel.into(),
        }
    }
}

/// Candidate resources for a limit check
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitRequest {
    /// Agents about to be added, on top of those already counted
    ///
    /// This is a delta: the cap check compares the current agent count plus
    /// this value against the agent cap.
    pub agent_count: usize,

    /// Budget about to be committed, in USD
    pub team_budget: f64,
}

impl LimitRequest {
    /// Request for `count` additional agents
    pub fn agents(count: usize) -> Self {
        Self {
            agent_count: count,
            team_budget: 0.0,
        }
    }

    /// Request for a team budget of `amount`
    pub fn team_budget(amount: f64) -> Self {
        Self {
            agent_count: 0,
            team_budget: amount,
        }
    }

    pub fn with_team_budget(mut self, amount: f64) -> Self {
        self.team_budget = amount;
        self
    }
}

/// Outcome of a limit check; a deny is data, not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl LimitCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    /// Deny reason, or an empty string when allowed
    pub fn reason_or_default(&self) -> String {
        self.reason.clone().unwrap_or_default()
    }
}
