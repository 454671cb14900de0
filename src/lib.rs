//! Godel - budget-aware orchestration of agent teams
//!
//! Godel runs pools of autonomous agents organized into teams (swarms). It
//! keeps every agent's lifecycle state machine consistent under concurrent
//! callers, enforces global and per-team spend limits, and applies the
//! retry and escalation policy exactly once per failure.
//!
//! # Architecture
//!
//! - **lifecycle**: Agent state machine with retry backoff and model escalation
//! - **team**: Teams of agents with composition strategies and budget envelopes
//! - **budget**: Global spend, agent and team caps, night mode, alert ladder
//! - **execution**: Batch runner with serial, parallel and hybrid strategies
//! - **orchestrator**: Wires the components together and runs the budget monitor
//! - **backend**: Session backend and agent store traits with in-memory versions
//! - **events**: Transition events on a broadcast bus
//! - **config**: YAML configuration and validation

// Core modules
pub mod budget;
pub mod execution;
pub mod lifecycle;
pub mod team;

// Wiring
pub mod backend;
pub mod events;
pub mod orchestrator;

// Shared infrastructure
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod sync;

// Re-exports
pub use error::{GodelError, Result};
pub use orchestrator::Orchestrator;
