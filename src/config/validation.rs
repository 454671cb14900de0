//! Configuration validation
//!
//! Checks a [`GodelConfig`] for values the core cannot run with:
//! - Zero or negative caps
//! - Spend caps out of order (daily above emergency)
//! - Thresholds outside their range
//! - An alert ladder that is not ascending

use super::godel_config::GodelConfig;
use crate::GodelError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub section: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            section: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref section) = self.section {
            write!(f, "[{}] {}: {}", section, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a Godel configuration, collecting every problem
pub fn validate_config(config: &GodelConfig) -> ValidationResult {
    let mut errors = Vec::new();

    validate_budget(config, &mut errors);
    validate_lifecycle(config, &mut errors);
    validate_teams(config, &mut errors);
    validate_execution(config, &mut errors);

    if config.events.channel_capacity == 0 {
        errors.push(
            ValidationError::new("channel_capacity", "Must be greater than 0").in_section("events"),
        );
    }
    if config.monitor.interval_ms == 0 {
        errors.push(
            ValidationError::new("interval_ms", "Must be greater than 0").in_section("monitor"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_budget(config: &GodelConfig, errors: &mut Vec<ValidationError>) {
    let budget = &config.budget;
    let err =
        |field: &str, message: String| ValidationError::new(field, message).in_section("budget");

    if budget.max_agents == 0 {
        errors.push(err("max_agents", "Must be greater than 0".to_string()));
    }
    if budget.max_concurrent_teams == 0 {
        errors.push(err("max_concurrent_teams", "Must be greater than 0".to_string()));
    }
    for (field, value) in [
        ("max_daily_spend", budget.max_daily_spend),
        ("max_spend_per_team", budget.max_spend_per_team),
        ("emergency_stop_spend", budget.emergency_stop_spend),
    ] {
        if !value.is_finite() || value <= 0.0 {
            errors.push(err(field, format!("Must be a positive amount, got {}", value)));
        }
    }
    if budget.emergency_stop_spend < budget.max_daily_spend {
        errors.push(err(
            "emergency_stop_spend",
            format!(
                "Emergency stop ({}) is below the daily cap ({})",
                budget.emergency_stop_spend, budget.max_daily_spend
            ),
        ));
    }
    if budget.max_spend_per_team > budget.max_daily_spend {
        errors.push(err(
            "max_spend_per_team",
            format!(
                "Per-team cap ({}) exceeds the daily cap ({})",
                budget.max_spend_per_team, budget.max_daily_spend
            ),
        ));
    }

    let night = &budget.night_mode;
    if night.start_hour > 23 || night.end_hour > 23 {
        errors.push(err(
            "night_mode",
            format!(
                "Hours must be 0-23, got {}-{}",
                night.start_hour, night.end_hour
            ),
        ));
    }
    if night.max_agents > budget.max_agents {
        errors.push(err(
            "night_mode.max_agents",
            "Night cap exceeds the day cap".to_string(),
        ));
    }

    let mut previous = f64::MIN;
    for alert in &budget.alerts {
        if alert.percent <= previous {
            errors.push(err(
                "alerts",
                format!("Thresholds must ascend, {}% follows {}%", alert.percent, previous),
            ));
        }
        previous = alert.percent;
    }
}

fn validate_lifecycle(config: &GodelConfig, errors: &mut Vec<ValidationError>) {
    let lifecycle = &config.lifecycle;

    if lifecycle.base_delay_ms > lifecycle.max_delay_ms {
        errors.push(
            ValidationError::new(
                "base_delay_ms",
                format!(
                    "Base delay ({}ms) exceeds the cap ({}ms)",
                    lifecycle.base_delay_ms, lifecycle.max_delay_ms
                ),
            )
            .in_section("lifecycle"),
        );
    }
    if lifecycle.default_model.trim().is_empty() {
        errors.push(
            ValidationError::new("default_model", "Default model cannot be empty")
                .in_section("lifecycle"),
        );
    }
    if lifecycle.backend_timeout_ms == 0 {
        errors.push(
            ValidationError::new("backend_timeout_ms", "Must be greater than 0")
                .in_section("lifecycle"),
        );
    }
}

fn validate_teams(config: &GodelConfig, errors: &mut Vec<ValidationError>) {
    let teams = &config.teams;

    if teams.max_agents_per_team == 0 {
        errors.push(
            ValidationError::new("max_agents_per_team", "Must be greater than 0")
                .in_section("teams"),
        );
    }
    let in_range = |v: f64| v > 0.0 && v <= 1.0;
    if !in_range(teams.warning_threshold) || !in_range(teams.critical_threshold) {
        errors.push(
            ValidationError::new("thresholds", "Thresholds must be in (0, 1]").in_section("teams"),
        );
    } else if teams.warning_threshold >= teams.critical_threshold {
        errors.push(
            ValidationError::new(
                "warning_threshold",
                "Warning threshold must be below the critical threshold",
            )
            .in_section("teams"),
        );
    }
}

fn validate_execution(config: &GodelConfig, errors: &mut Vec<ValidationError>) {
    let execution = &config.execution;

    for (field, value) in [
        ("batch_size", execution.batch_size),
        ("max_concurrent_batches", execution.max_concurrent_batches),
        ("max_units_per_batch", execution.max_units_per_batch),
    ] {
        if value == 0 {
            errors.push(
                ValidationError::new(field, "Must be greater than 0").in_section("execution"),
            );
        }
    }
    if execution.retry_attempts == 0 {
        errors.push(
            ValidationError::new("retry_attempts", "At least one attempt is required")
                .in_section("execution"),
        );
    }
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &GodelConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        GodelError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
