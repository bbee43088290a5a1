//! Outbound event messages.
//!
//! An [`Event`] is built once per emit and shared between every recipient's
//! outbox.

use crate::connection::ConnectionId;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use waypoint_protocol::ServerEvent;

/// A unique event identifier.
pub type EventId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique event ID.
#[must_use]
pub fn generate_event_id() -> EventId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An event on its way to one or more connections.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Event name as seen by the client.
    pub name: String,
    /// JSON payload.
    pub payload: Value,
    /// Room the event was emitted to, if any.
    pub room: Option<String>,
    /// Connection whose action produced the event.
    pub source: Option<ConnectionId>,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_event_id(),
            name: name.into(),
            payload,
            room: None,
            source: None,
        }
    }

    /// Tag the event with the room it targets.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Tag the event with the connection that caused it.
    #[must_use]
    pub fn with_source(mut self, source: ConnectionId) -> Self {
        self.source = Some(source);
        self
    }

    /// Convert into the wire representation.
    #[must_use]
    pub fn to_server_event(&self) -> ServerEvent {
        ServerEvent::new(self.name.clone(), self.payload.clone())
    }
}

impl From<ServerEvent> for Event {
    fn from(event: ServerEvent) -> Self {
        Event::new(event.event, event.data)
    }
}
