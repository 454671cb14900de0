//! External collaborators
//!
//! The orchestration core talks to two collaborators it does not own:
//!
//! - a [`SessionBackend`] that runs the agent's actual work session
//! - an [`AgentStore`] that persists agent records
//!
//! Both are traits so deployments can plug in real backends. The in-memory
//! implementations here are used by the CLI simulation and by tests, and
//! support failure injection to exercise the "backend is best effort" rules.

mod session;
mod store;

pub use session::{InMemorySessionBackend, SessionBackend, SessionRequest};
pub use store::{AgentPatch, AgentStore, InMemoryAgentStore};
