//! Batch execution
//!
//! Runs batches of work units with a serial, parallel or hybrid strategy and
//! linear-backoff retry per unit.

mod context;
mod engine;
mod runner;

pub use context::{
    BatchStatus, ExecutionConfig, ExecutionContext, ExecutionStrategy, UnitResult, UnitStatus,
};
pub use engine::{EngineStats, ExecutionEngine};
pub use runner::{SimulatedRunner, UnitOutcome, UnitRunner};
