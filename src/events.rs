//! Transition events
//!
//! Every significant state change in the core publishes exactly one [`Event`]
//! on the shared [`EventBus`]. Events are scoped to a topic
//! (`agent:<id>`, `team:<id>` or `batch:<id>`) and carry the previous and new
//! status where that applies, plus a JSON payload of event-specific fields.
//!
//! Publishers emit while holding the entity lock, so the order observed by a
//! subscriber within one topic matches emission order.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new(1000);
//! let mut agent_events = bus.subscribe_topic("agent:agent-1");
//!
//! while let Some(event) = agent_events.recv().await {
//!     println!("{} {:?}", event.kind, event.new_status);
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

/// Default event channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Kind of transition an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "agent.spawned")]
    AgentSpawned,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.paused")]
    AgentPaused,
    #[serde(rename = "agent.resumed")]
    AgentResumed,
    #[serde(rename = "agent.killed")]
    AgentKilled,
    #[serde(rename = "agent.completed")]
    AgentCompleted,
    #[serde(rename = "agent.failed")]
    AgentFailed,
    #[serde(rename = "agent.retrying")]
    AgentRetrying,
    #[serde(rename = "agent.escalated")]
    AgentEscalated,
    #[serde(rename = "agent.status_changed")]
    AgentStatusChanged,
    #[serde(rename = "team.created")]
    TeamCreated,
    #[serde(rename = "team.scaled")]
    TeamScaled,
    #[serde(rename = "team.completed")]
    TeamCompleted,
    #[serde(rename = "team.paused")]
    TeamPaused,
    #[serde(rename = "team.resumed")]
    TeamResumed,
    #[serde(rename = "team.destroyed")]
    TeamDestroyed,
    #[serde(rename = "team.budget.warning")]
    TeamBudgetWarning,
    #[serde(rename = "team.budget.critical")]
    TeamBudgetCritical,
    #[serde(rename = "batch.started")]
    BatchStarted,
    #[serde(rename = "batch.completed")]
    BatchCompleted,
    #[serde(rename = "batch.cancelled")]
    BatchCancelled,
}

impl EventKind {
    /// Dotted event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentSpawned => "agent.spawned",
            Self::AgentStarted => "agent.started",
            Self::AgentPaused => "agent.paused",
            Self::AgentResumed => "agent.resumed",
            Self::AgentKilled => "agent.killed",
            Self::AgentCompleted => "agent.completed",
            Self::AgentFailed => "agent.failed",
            Self::AgentRetrying => "agent.retrying",
            Self::AgentEscalated => "agent.escalated",
            Self::AgentStatusChanged => "agent.status_changed",
            Self::TeamCreated => "team.created",
            Self::TeamScaled => "team.scaled",
            Self::TeamCompleted => "team.completed",
            Self::TeamPaused => "team.paused",
            Self::TeamResumed => "team.resumed",
            Self::TeamDestroyed => "team.destroyed",
            Self::TeamBudgetWarning => "team.budget.warning",
            Self::TeamBudgetCritical => "team.budget.critical",
            Self::BatchStarted => "batch.started",
            Self::BatchCompleted => "batch.completed",
            Self::BatchCancelled => "batch.cancelled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Topic for events about one agent
pub fn agent_topic(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

/// Topic for events about one team
pub fn team_topic(team_id: &str) -> String {
    format!("team:{}", team_id)
}

/// Topic for events about one execution batch
pub fn batch_topic(batch_id: &str) -> String {
    format!("batch:{}", batch_id)
}

/// A published transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Topic the event is scoped to
    pub topic: String,

    /// Emitting entity
    pub entity_id: String,

    /// Owning team of the emitting agent, if any
    pub team_id: Option<String>,

    /// What happened
    pub kind: EventKind,

    /// Status before the transition
    pub previous_status: Option<String>,

    /// Status after the transition
    pub new_status: Option<String>,

    /// Event-specific fields
    pub payload: serde_json::Value,

    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(topic: impl Into<String>, entity_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            topic: topic.into(),
            entity_id: entity_id.into(),
            team_id: None,
            kind,
            previous_status: None,
            new_status: None,
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Set the owning team
    pub fn with_team(mut self, team_id: Option<impl Into<String>>) -> Self {
        self.team_id = team_id.map(Into::into);
        self
    }

    /// Set previous and new status
    pub fn with_transition(mut self, previous: impl ToString, new: impl ToString) -> Self {
        self.previous_status = Some(previous.to_string());
        self.new_status = Some(new.to_string());
        self
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Publish/subscribe hub shared by all core components
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every subscriber
    pub fn publish(&self, event: Event) {
        debug!(topic = %event.topic, kind = %event.kind, "Publishing event");
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topic: None,
        }
    }

    /// Subscribe to events of a single topic
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topic: Some(topic.into()),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving handle returned by [`EventBus::subscribe`]
/// What a [`Subscription`] yields from [`Subscription::next`]
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Event),
    /// The subscriber fell behind and this many events were overwritten
    Lagged(u64),
}

#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    topic: Option<String>,
}

impl Subscription {
    fn matches(&self, event: &Event) -> bool {
        self.topic.as_ref().map_or(true, |t| *t == event.topic)
    }

    /// Wait for the next matching event; `None` once the bus is gone
    ///
    /// Dropped events are only logged. Callers that must not miss a
    /// transition use [`next`](Self::next) instead.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.next().await? {
                Delivery::Event(event) => return Some(event),
                Delivery::Lagged(skipped) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
            }
        }
    }

    /// Next matching event, or a report of how many events were dropped
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Some(Delivery::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every buffered matching event
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
