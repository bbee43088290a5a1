//! Presence tracking for live connections.
//!
//! Each registered connection carries a [`PresenceState`] recording when it
//! connected, when it was last heard from, and the identity it most recently
//! joined as.

use crate::connection::ConnectionId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Presence state for a single connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceState {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// Identity most recently joined as. Diagnostic only.
    pub identity: Option<String>,
    /// When the connection was registered.
    pub connected_at: u64,
    /// Last inbound activity.
    pub last_seen: u64,
}

impl PresenceState {
    /// Create a new presence state.
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        let now = now_millis();
        Self {
            connection_id,
            identity: None,
            connected_at: now,
            last_seen: now,
        }
    }

    /// Update the last seen timestamp.
    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }

    /// Check if this connection has been silent for longer than `timeout`.
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let timeout_ms = timeout.as_millis() as u64;
        now_millis().saturating_sub(self.last_seen) > timeout_ms
    }
}
