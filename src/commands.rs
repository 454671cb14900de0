//! CLI command definitions
//!
//! All CLI structs and subcommand enums are defined here.

use clap::{Parser, Subcommand};
use godel::execution::ExecutionStrategy;
use godel::team::CompositionStrategy;

/// Godel - budget-aware orchestration of agent teams
#[derive(Parser, Debug)]
#[command(name = "godel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/godel/config.yaml)
    #[arg(short, long, global = true, env = "GODEL_CONFIG")]
    pub config: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show budget status, optionally after recording spend
    Budget {
        /// Spend to record before reporting, in USD
        #[arg(short, long)]
        spend: Option<f64>,
    },

    /// Simulate a team run against in-memory backends
    Team {
        /// Task the team works on
        task: String,

        /// Team name
        #[arg(short, long, default_value = "swarm")]
        name: String,

        /// Initial member count
        #[arg(short, long, default_value_t = 3)]
        agents: usize,

        /// Composition strategy (parallel, pipeline, map-reduce, tree)
        #[arg(short, long, default_value = "parallel")]
        strategy: CompositionStrategy,

        /// Team budget in USD
        #[arg(short, long, default_value_t = 10.0)]
        budget: f64,

        /// Spend charged per member, in USD
        #[arg(long, default_value_t = 1.0)]
        cost_per_agent: f64,

        /// Members (by index) that fail permanently
        #[arg(long, value_delimiter = ',')]
        fail: Vec<usize>,

        /// Resize the team to this many members before running
        #[arg(long)]
        scale: Option<usize>,
    },

    /// Simulate a batch run with the execution engine
    Batch {
        /// Number of work units
        #[arg(short, long, default_value_t = 10)]
        units: usize,

        /// Execution strategy (serial, parallel, hybrid)
        #[arg(short, long)]
        strategy: Option<ExecutionStrategy>,

        /// Chunk size for the hybrid strategy
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Cost per successful unit, in USD
        #[arg(long, default_value_t = 0.05)]
        cost: f64,

        /// Simulated latency per unit, in milliseconds
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,

        /// Unit numbers (1-based) that fail on every attempt
        #[arg(long, value_delimiter = ',')]
        fail: Vec<usize>,
    },

    /// Print Prometheus metrics
    Metrics,
}
