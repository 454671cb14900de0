//! Work-unit runners
//!
//! The engine hands each unit to a [`UnitRunner`]. Errors classify
//! themselves through [`crate::retry::RetryableError`]; only retryable errors
//! are attempted again.

use crate::{GodelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Successful unit result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub output: Option<String>,
    /// Cost in USD
    pub cost: f64,
}

/// Executes one work unit
#[async_trait]
pub trait UnitRunner: Send + Sync {
    /// Run `unit_id`; `attempt` starts at 1
    async fn run(&self, batch_id: &str, unit_id: &str, attempt: u32) -> Result<UnitOutcome>;
}

/// Runner that sleeps and reports a fixed cost
///
/// Units can be configured to fail every attempt or only their first N
/// attempts. The peak number of units in flight is recorded.
#[derive(Debug, Default)]
pub struct SimulatedRunner {
    cost_per_unit: f64,
    latency: Duration,
    failing: HashSet<String>,
    flaky: HashMap<String, u32>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SimulatedRunner {
    pub fn new(cost_per_unit: f64, latency: Duration) -> Self {
        Self {
            cost_per_unit,
            latency,
            ..Default::default()
        }
    }

    /// Make `unit_id` fail on every attempt
    pub fn with_failing_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.failing.insert(unit_id.into());
        self
    }

    /// Make `unit_id` fail its first `failures` attempts
    pub fn with_flaky_unit(mut self, unit_id: impl Into<String>, failures: u32) -> Self {
        self.flaky.insert(unit_id.into(), failures);
        self
    }

    /// Highest number of units observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total `run` invocations, retries included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UnitRunner for SimulatedRunner {
    async fn run(&self, batch_id: &str, unit_id: &str, attempt: u32) -> Result<UnitOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let flaky = self
            .flaky
            .get(unit_id)
            .is_some_and(|failures| attempt <= *failures);
        if self.failing.contains(unit_id) || flaky {
            return Err(GodelError::Execution(format!(
                "unit '{}' failed on attempt {}",
                unit_id, attempt
            )));
        }

        Ok(UnitOutcome {
            output: Some(format!("{}/{} done", batch_id, unit_id)),
            cost: self.cost_per_unit,
        })
    }
}
