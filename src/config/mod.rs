//! Configuration system
//!
//! Loads ~/.config/godel/config.yaml with sections for:
//! - Budget limits, night mode and the alert ladder
//! - Agent lifecycle retry policy
//! - Team manager defaults
//! - Execution engine defaults
//! - Event bus and budget monitor settings

mod godel_config;
pub mod validation;

pub use godel_config::{EventsConfig, GodelConfig, MonitorConfig};
pub use validation::{validate_config, validate_config_result, ValidationError};
