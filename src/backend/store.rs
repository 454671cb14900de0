//! Agent record storage contract
//!
//! A key-value upsert keyed by agent id. The core assumes nothing beyond
//! last-write-wins per field.

use crate::lifecycle::{AgentState, AgentStatus, LifecycleState};
use crate::{GodelError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Partial update of a stored agent record
///
/// Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPatch {
    pub status: Option<AgentStatus>,
    pub lifecycle_state: Option<LifecycleState>,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentPatch {
    /// Patch carrying the current status fields of `state`
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            status: Some(state.status),
            lifecycle_state: Some(state.lifecycle_state),
            model: Some(state.agent.model.clone()),
            session_id: state.session_id.clone(),
            retry_count: Some(state.retry_count),
            last_error: state.last_error.clone(),
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }

    fn apply(self, state: &mut AgentState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(lifecycle_state) = self.lifecycle_state {
            state.lifecycle_state = lifecycle_state;
        }
        if let Some(model) = self.model {
            state.agent.model = model;
        }
        if let Some(session_id) = self.session_id {
            state.session_id = Some(session_id);
        }
        if let Some(retry_count) = self.retry_count {
            state.retry_count = retry_count;
        }
        if let Some(last_error) = self.last_error {
            state.last_error = Some(last_error);
        }
        if let Some(started_at) = self.started_at {
            state.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            state.completed_at = Some(completed_at);
        }
    }
}

/// Persistent storage of agent records
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert a new record
    async fn create(&self, state: &AgentState) -> Result<()>;

    /// Apply a partial update to an existing record
    async fn update(&self, agent_id: &str, patch: AgentPatch) -> Result<()>;

    /// Fetch a record
    async fn get(&self, agent_id: &str) -> Result<Option<AgentState>>;
}

/// Agent store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryAgentStore {
    records: RwLock<HashMap<String, AgentState>>,
    failing: AtomicBool,
}

impl InMemoryAgentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GodelError::Other("agent store unavailable".to_string()));
        }
        Ok(())
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn create(&self, state: &AgentState) -> Result<()> {
        self.check_available()?;
        self.records
            .write()
            .await
            .insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn update(&self, agent_id: &str, patch: AgentPatch) -> Result<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(agent_id)
            .ok_or_else(|| GodelError::AgentNotFound(agent_id.to_string()))?;
        patch.apply(record);
        Ok(())
    }

    async fn get(&self, agent_id: &str) -> Result<Option<AgentState>> {
        self.check_available()?;
        Ok(self.records.read().await.get(agent_id).cloned())
    }
}
