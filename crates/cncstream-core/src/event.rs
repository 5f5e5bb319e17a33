//! Status events for the front end
//!
//! Provides:
//! - The status event pushed on every transition and significant send
//! - An event dispatcher for publishing events to subscribers

use crate::state::MachineState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What a status event reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatusKind {
    /// The machine changed state
    StateChanged {
        /// Previous state.
        from: MachineState,
    },
    /// A line was sent or a milestone reached
    Progress,
    /// Something failed; `text` carries the error
    Error,
}

/// A status update for the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// State at the time of the event.
    pub state: MachineState,
    /// Current status text.
    pub text: String,
    /// Kind of event.
    pub kind: StatusKind,
    /// When the event was raised.
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Create a new status event stamped with the current time
    pub fn new(state: MachineState, text: impl Into<String>, kind: StatusKind) -> Self {
        Self {
            state,
            text: text.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StatusKind::StateChanged { from } => {
                write!(f, "[{}] {} -> {}: {}", self.state, from, self.state, self.text)
            }
            StatusKind::Progress => write!(f, "[{}] {}", self.state, self.text),
            StatusKind::Error => write!(f, "[{}] error: {}", self.state, self.text),
        }
    }
}

/// Event dispatcher for publishing status events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for status events.
    tx: broadcast::Sender<StatusEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers that received it; having none is
    /// not an error.
    pub fn publish(&self, event: StatusEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
