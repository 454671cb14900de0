//! Godel configuration file handling
//!
//! Loads and saves ~/.config/godel/config.yaml. Every section and field has a
//! default, so an empty file is a valid configuration.

use crate::budget::BudgetLimits;
use crate::events::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::execution::ExecutionConfig;
use crate::lifecycle::LifecycleConfig;
use crate::team::TeamManagerConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before it lags
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Budget monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Tick interval in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
}

fn default_monitor_interval_ms() -> u64 {
    60_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Godel configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GodelConfig {
    /// Global hard and soft limits, night mode and alert ladder
    #[serde(default)]
    pub budget: BudgetLimits,

    /// Agent retry and backoff policy
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub teams: TeamManagerConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl GodelConfig {
    /// Load configuration from the default path (~/.config/godel/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::GodelError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading Godel configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            max_agents = config.budget.max_agents,
            max_daily_spend = config.budget.max_daily_spend,
            strategy = %config.execution.strategy,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving Godel configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/godel/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("godel");
        path.push("config.yaml");
        path
    }
}
