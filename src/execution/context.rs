//! Batch execution context and configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How units of a batch are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One unit at a time, in order
    Serial,

    /// Every unit at once
    Parallel,

    /// Chunks of `batch_size`, each chunk in parallel
    #[default]
    Hybrid,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Serial => "serial",
            Self::Parallel => "parallel",
            Self::Hybrid => "hybrid",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "parallel" => Ok(Self::Parallel),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("unknown execution strategy: {}", s)),
        }
    }
}

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub strategy: ExecutionStrategy,

    /// Chunk size for the hybrid strategy
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per unit, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Linear backoff step in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Batches allowed to run at once; the rest queue in arrival order
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    #[serde(default = "default_max_units_per_batch")]
    pub max_units_per_batch: usize,

    /// How long a finished context is kept, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_batch_size() -> usize {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_concurrent_batches() -> usize {
    3
}

fn default_max_units_per_batch() -> usize {
    100
}

fn default_cooldown_ms() -> u64 {
    60_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_concurrent_batches: default_max_concurrent_batches(),
            max_units_per_batch: default_max_units_per_batch(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one unit within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl UnitStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Result slot for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: String,
    pub status: UnitStatus,
    /// Cost of the successful attempt, in USD
    pub cost: f64,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Failed attempts
    pub retries: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UnitResult {
    pub fn pending(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::Pending,
            cost: 0.0,
            output: None,
            error: None,
            retries: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// State of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub id: String,
    /// Configuration the batch runs with
    pub config: ExecutionConfig,
    pub status: BatchStatus,
    /// One slot per unit, in submission order
    pub results: Vec<UnitResult>,
    /// Cost of succeeded units
    pub total_cost: f64,
    /// Finished units as a percentage of all units
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(id: impl Into<String>, config: ExecutionConfig, unit_ids: &[String]) -> Self {
        Self {
            id: id.into(),
            config,
            status: BatchStatus::Pending,
            results: unit_ids.iter().map(UnitResult::pending).collect(),
            total_cost: 0.0,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.count(UnitStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(UnitStatus::Failed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(UnitStatus::Cancelled)
    }

    fn count(&self, status: UnitStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Recompute progress and cost from the unit slots
    pub(crate) fn refresh(&mut self) {
        let finished = self.results.iter().filter(|r| r.status.is_finished()).count();
        self.progress = if self.results.is_empty() {
            100.0
        } else {
            finished as f64 / self.results.len() as f64 * 100.0
        };
        self.total_cost = self
            .results
            .iter()
            .filter(|r| r.status == UnitStatus::Succeeded)
            .map(|r| r.cost)
            .sum();
    }

    /// Cancel every unit that has not finished
    pub(crate) fn cancel_pending(&mut self) {
        let now = Utc::now();
        for result in self.results.iter_mut().filter(|r| !r.status.is_finished()) {
            result.status = UnitStatus::Cancelled;
            result.completed_at = Some(now);
        }
        self.status = BatchStatus::Cancelled;
        self.completed_at = Some(now);
        self.refresh();
    }

    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }
}
