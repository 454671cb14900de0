//! Prometheus metrics
//!
//! Process-wide gauges and counters for agents, budget spend and batch runs.

use crate::execution::BatchStatus;
use crate::lifecycle::LifecycleState;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Gauge: tracked agents by lifecycle state
    pub static ref AGENTS_BY_STATE: GaugeVec = register_gauge_vec!(
        "godel_agents",
        "Tracked agents by lifecycle state",
        &["state"]
    )
    .expect("Failed to create agents metric");

    /// Counter: agent retries scheduled
    pub static ref AGENT_RETRIES: Counter = register_counter!(
        "godel_agent_retries_total",
        "Total agent retries scheduled"
    )
    .expect("Failed to create agent_retries metric");

    /// Counter: agents escalated to an alternate model
    pub static ref AGENT_ESCALATIONS: Counter = register_counter!(
        "godel_agent_escalations_total",
        "Total agents escalated to an alternate model"
    )
    .expect("Failed to create agent_escalations metric");

    /// Gauge: spend today (USD)
    pub static ref DAILY_SPEND: Gauge = register_gauge!(
        "godel_daily_spend_dollars",
        "Spend recorded since the last daily reset"
    )
    .expect("Failed to create daily_spend metric");

    /// Gauge: spend in the current hour (USD)
    pub static ref HOURLY_SPEND: Gauge = register_gauge!(
        "godel_hourly_spend_dollars",
        "Spend recorded in the current hour"
    )
    .expect("Failed to create hourly_spend metric");

    /// Gauge: teams counted against the concurrent team limit
    pub static ref ACTIVE_TEAMS: Gauge = register_gauge!(
        "godel_active_teams",
        "Teams counted against the concurrent team limit"
    )
    .expect("Failed to create active_teams metric");

    /// Counter: finished batches by status
    pub static ref BATCHES: CounterVec = register_counter_vec!(
        "godel_batches_total",
        "Finished batches by status",
        &["status"]
    )
    .expect("Failed to create batches metric");

    /// Histogram: batch run time (seconds)
    pub static ref BATCH_DURATION: HistogramVec = register_histogram_vec!(
        "godel_batch_duration_seconds",
        "Duration of batch runs",
        &["status"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
    )
    .expect("Failed to create batch_duration metric");
}

/// Move one agent between state gauges; `None` for a new agent
pub fn record_agent_transition(from: Option<LifecycleState>, to: LifecycleState) {
    if let Some(from) = from {
        if from == to {
            return;
        }
        AGENTS_BY_STATE.with_label_values(&[from.as_str()]).dec();
    }
    AGENTS_BY_STATE.with_label_values(&[to.as_str()]).inc();
}

/// Drop an agent that is no longer tracked
pub fn remove_agent(state: LifecycleState) {
    AGENTS_BY_STATE.with_label_values(&[state.as_str()]).dec();
}

pub fn inc_agent_retries() {
    AGENT_RETRIES.inc();
}

pub fn inc_agent_escalations() {
    AGENT_ESCALATIONS.inc();
}

/// Set daily and hourly spend
pub fn set_spend(total: f64, hour: f64) {
    DAILY_SPEND.set(total);
    HOURLY_SPEND.set(hour);
}

pub fn set_active_teams(count: usize) {
    ACTIVE_TEAMS.set(count as f64);
}

/// Record a finished batch
pub fn record_batch(status: BatchStatus, duration: Duration) {
    BATCHES.with_label_values(&[status.as_str()]).inc();
    BATCH_DURATION
        .with_label_values(&[status.as_str()])
        .observe(duration.as_secs_f64());
}

/// Register every metric so it appears in output before first use
pub fn register_all() {
    lazy_static::initialize(&AGENTS_BY_STATE);
    lazy_static::initialize(&AGENT_RETRIES);
    lazy_static::initialize(&AGENT_ESCALATIONS);
    lazy_static::initialize(&DAILY_SPEND);
    lazy_static::initialize(&HOURLY_SPEND);
    lazy_static::initialize(&ACTIVE_TEAMS);
    lazy_static::initialize(&BATCHES);
    lazy_static::initialize(&BATCH_DURATION);
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    register_all();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
