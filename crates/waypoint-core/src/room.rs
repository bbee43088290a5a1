//! Room abstraction.
//!
//! Rooms are named multicast groups. A room exists only while it has
//! members; the registry drops it as soon as the last one leaves.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Maximum room name length in bytes.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room name: an identity key, a trip key, or a connection ID.
pub type RoomName = String;

/// Validate a room name supplied by a client.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

/// Membership of a single room.
#[derive(Debug)]
pub struct Room {
    name: RoomName,
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<RoomName>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    /// Add a member. Returns `true` if it was not already present.
    pub fn join(&mut self, connection: &ConnectionId) -> bool {
        let added = self.members.insert(connection.clone());
        if added {
            debug!(room = %self.name, connection = %connection, "Joined room");
        }
        added
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn leave(&mut self, connection: &ConnectionId) -> bool {
        let removed = self.members.remove(connection);
        if removed {
            debug!(room = %self.name, connection = %connection, "Left room");
        }
        removed
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.members.contains(connection)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of member IDs.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_join_is_idempotent() {
        let mut room = Room::new("trip-1");
        let conn = ConnectionId::new("conn-1");

        assert!(room.join(&conn));
        assert!(!room.join(&conn));
        assert_eq!(room.len(), 1);
        assert!(room.contains(&conn));
    }

    #[test]
    fn test_room_leave() {
        let mut room = Room::new("trip-1");
        let conn = ConnectionId::new("conn-1");
        room.join(&conn);

        assert!(room.leave(&conn));
        assert!(!room.leave(&conn));
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_name_validation() {
        assert!(validate_room_name("rider-42").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(validate_room_name(&long_name).is_err());
    }
}
