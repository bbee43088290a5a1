//! Connection registry and room membership.
//!
//! The registry maps every live connection to its outbox and the rooms it
//! belongs to, and every room to its members. Both maps are sharded, so
//! joins, disconnects and emits from different connections proceed
//! concurrently.
//!
//! Lock order: a connection entry may be held while a room entry is taken,
//! never the other way round.

use crate::connection::ConnectionId;
use crate::message::Event;
use crate::presence::PresenceState;
use crate::room::{validate_room_name, Room, RoomName};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Receiving half of a connection's outbox.
pub type Outbox = mpsc::UnboundedReceiver<Arc<Event>>;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// The connection was never registered or has already left.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Maximum number of rooms reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,

    /// Maximum rooms per connection reached.
    #[error("Maximum rooms per connection reached")]
    MaxRoomsPerConnectionReached,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of rooms alive at once.
    pub max_rooms: usize,
    /// Maximum rooms a single connection may belong to, its own room included.
    pub max_rooms_per_connection: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 100_000,
            max_rooms_per_connection: 100,
        }
    }
}

struct ConnectionEntry {
    outbox: mpsc::UnboundedSender<Arc<Event>>,
    rooms: HashSet<RoomName>,
    presence: PresenceState,
}

/// The room registry.
pub struct RoomRegistry {
    rooms: DashMap<RoomName, Room>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            config,
        }
    }

    /// Register a freshly accepted connection.
    ///
    /// The connection is placed in a room named after its own ID so it can
    /// be addressed directly. Returns the receiving end of its outbox.
    pub fn register(&self, connection: &ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = HashSet::new();
        rooms.insert(connection.as_str().to_string());
        self.rooms
            .entry(connection.as_str().to_string())
            .or_insert_with(|| Room::new(connection.as_str()))
            .join(connection);

        self.connections.insert(
            connection.clone(),
            ConnectionEntry {
                outbox: tx,
                rooms,
                presence: PresenceState::new(connection.clone()),
            },
        );

        debug!(connection = %connection, "Registered connection");
        rx
    }

    /// Add a connection to a room.
    ///
    /// Returns `Ok(true)` if the connection was added and `Ok(false)` if it
    /// was already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid, the connection is not
    /// registered, or a limit is exceeded.
    pub fn join(&self, connection: &ConnectionId, room: &str) -> Result<bool, RegistryError> {
        validate_room_name(room).map_err(RegistryError::InvalidRoom)?;

        let mut entry = self
            .connections
            .get_mut(connection)
            .ok_or_else(|| RegistryError::UnknownConnection(connection.clone()))?;

        if entry.rooms.contains(room) {
            trace!(room = %room, connection = %connection, "Already in room");
            return Ok(false);
        }

        if entry.rooms.len() >= self.config.max_rooms_per_connection {
            return Err(RegistryError::MaxRoomsPerConnectionReached);
        }

        if !self.rooms.contains_key(room) && self.rooms.len() >= self.config.max_rooms {
            return Err(RegistryError::MaxRoomsReached);
        }

        let members = {
            let mut target = self.rooms.entry(room.to_string()).or_insert_with(|| {
                debug!(room = %room, "Creating room");
                Room::new(room)
            });
            target.join(connection);
            target.len()
        };
        entry.rooms.insert(room.to_string());

        debug!(room = %room, connection = %connection, members, "Joined");
        Ok(true)
    }

    /// Remove a connection from every room and forget it.
    ///
    /// Returns the rooms the connection was in. Rooms left empty are dropped.
    pub fn leave_all(&self, connection: &ConnectionId) -> Vec<RoomName> {
        let Some((_, entry)) = self.connections.remove(connection) else {
            return Vec::new();
        };

        for room in &entry.rooms {
            let now_empty = match self.rooms.get_mut(room) {
                Some(mut target) => {
                    target.leave(connection);
                    target.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.rooms.remove_if(room, |_, target| target.is_empty());
                debug!(room = %room, "Dropped empty room");
            }
        }

        debug!(connection = %connection, rooms = entry.rooms.len(), "Left all rooms");
        entry.rooms.into_iter().collect()
    }

    /// Deliver an event to every current member of a room.
    ///
    /// Best effort: members whose outbox is closed are skipped. Returns the
    /// number of outboxes the event was handed to.
    pub fn emit(&self, room: &str, event: Event) -> usize {
        let members = match self.rooms.get(room) {
            Some(target) => target.members(),
            None => {
                trace!(room = %room, event = %event.name, "Emit to empty room");
                return 0;
            }
        };

        let event = Arc::new(event);
        let delivered = members
            .iter()
            .filter(|member| self.deliver(member, Arc::clone(&event)))
            .count();

        trace!(room = %room, event = %event.name, recipients = delivered, "Emitted");
        delivered
    }

    /// Deliver an event to a single connection's outbox.
    pub fn deliver(&self, connection: &ConnectionId, event: Arc<Event>) -> bool {
        self.connections
            .get(connection)
            .map(|entry| entry.outbox.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Record inbound activity for a connection.
    pub fn touch(&self, connection: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(connection) {
            entry.presence.touch();
        }
    }

    /// Remember the identity a connection joined as.
    pub fn set_identity(&self, connection: &ConnectionId, identity: &str) {
        if let Some(mut entry) = self.connections.get_mut(connection) {
            entry.presence.identity = Some(identity.to_string());
        }
    }

    /// Presence snapshot for a connection.
    #[must_use]
    pub fn presence(&self, connection: &ConnectionId) -> Option<PresenceState> {
        self.connections
            .get(connection)
            .map(|entry| entry.presence.clone())
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Check if a room currently has members.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|r| r.len()).unwrap_or(0)
    }

    /// Members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms.get(room).map(|r| r.members()).unwrap_or_default()
    }

    /// Rooms a connection belongs to.
    #[must_use]
    pub fn connection_rooms(&self, connection: &ConnectionId) -> Vec<RoomName> {
        self.connections
            .get(connection)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.connections.len(),
            total_memberships: self.connections.iter().map(|c| c.rooms.len()).sum(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Number of non-empty rooms, implicit connection rooms included.
    pub room_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Total room memberships.
    pub total_memberships: usize,
}
