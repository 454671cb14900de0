//! Session backend contract
//!
//! A session is the remote execution handle an agent runs on. Every call may
//! fail; the lifecycle treats failures as non-fatal.

use crate::{GodelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Parameters for starting a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Model the session should run
    pub model: String,

    /// Task description handed to the session
    pub task: String,

    /// Optional extra context (system prompt, parent summary, ...)
    pub context: Option<String>,

    /// Optional token cap
    pub max_tokens: Option<u64>,
}

/// Backend that owns agent execution sessions
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Start a session for the agent, returning its handle
    async fn spawn_session(&self, agent_id: &str, request: &SessionRequest) -> Result<String>;

    /// Terminate the agent's session
    async fn kill_session(&self, agent_id: &str, force: bool) -> Result<()>;

    /// Suspend the agent's session
    async fn pause_session(&self, agent_id: &str) -> Result<()>;

    /// Continue a suspended session
    async fn resume_session(&self, agent_id: &str) -> Result<()>;

    /// Whether a session exists for the agent
    async fn has_session(&self, agent_id: &str) -> bool;
}

/// Session record kept by [`InMemorySessionBackend`]
#[derive(Debug, Clone)]
struct SessionEntry {
    session_id: String,
    model: String,
    paused: bool,
}

/// Session backend that keeps sessions in a map
///
/// Used for simulation and tests. Failures can be injected with
/// [`InMemorySessionBackend::fail_all`].
#[derive(Debug, Default)]
pub struct InMemorySessionBackend {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

impl InMemorySessionBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GodelError::Backend("session backend unavailable".to_string()));
        }
        Ok(())
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the agent's session is paused
    pub async fn is_paused(&self, agent_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(agent_id)
            .is_some_and(|s| s.paused)
    }

    /// Model the agent's session was started with
    pub async fn session_model(&self, agent_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(agent_id)
            .map(|s| s.model.clone())
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn spawn_session(&self, agent_id: &str, request: &SessionRequest) -> Result<String> {
        self.check_available()?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("session-{}", n);
        self.sessions.write().await.insert(
            agent_id.to_string(),
            SessionEntry {
                session_id: session_id.clone(),
                model: request.model.clone(),
                paused: false,
            },
        );

        debug!(agent_id, session_id = %session_id, model = %request.model, "Session spawned");
        Ok(session_id)
    }

    async fn kill_session(&self, agent_id: &str, force: bool) -> Result<()> {
        self.check_available()?;

        match self.sessions.write().await.remove(agent_id) {
            Some(entry) => {
                debug!(agent_id, session_id = %entry.session_id, force, "Session killed");
                Ok(())
            }
            None => Err(GodelError::Backend(format!(
                "no session for agent '{}'",
                agent_id
            ))),
        }
    }

    async fn pause_session(&self, agent_id: &str) -> Result<()> {
        self.check_available()?;

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(agent_id)
            .ok_or_else(|| GodelError::Backend(format!("no session for agent '{}'", agent_id)))?;
        entry.paused = true;
        Ok(())
    }

    async fn resume_session(&self, agent_id: &str) -> Result<()> {
        self.check_available()?;

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(agent_id)
            .ok_or_else(|| GodelError::Backend(format!("no session for agent '{}'", agent_id)))?;
        entry.paused = false;
        Ok(())
    }

    async fn has_session(&self, agent_id: &str) -> bool {
        self.sessions.read().await.contains_key(agent_id)
    }
}
