//! A shareable handle to the relay for code outside the connection loop.
//!
//! HTTP handlers and other collaborators can be built before the relay is
//! up. They hold a [`RelayHandle`], which is filled in once at startup;
//! emits made before that are logged and dropped.

use crate::relay::Relay;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Cloneable, install-once handle to a [`Relay`].
#[derive(Clone, Default)]
pub struct RelayHandle {
    inner: Arc<OnceLock<Arc<Relay>>>,
}

impl RelayHandle {
    /// Create an empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle that is already installed.
    #[must_use]
    pub fn with_relay(relay: Arc<Relay>) -> Self {
        let handle = Self::new();
        let _ = handle.install(relay);
        handle
    }

    /// Install the relay. Every clone of this handle sees it.
    ///
    /// # Errors
    ///
    /// Returns the rejected relay if one was already installed.
    pub fn install(&self, relay: Arc<Relay>) -> Result<(), Arc<Relay>> {
        self.inner.set(relay)
    }

    /// The installed relay, if any.
    #[must_use]
    pub fn get(&self) -> Option<&Arc<Relay>> {
        self.inner.get()
    }

    /// Emit to an identity's room. Dropped with a warning if not installed.
    pub fn send_to_identity(&self, identity: &str, event: &str, payload: Value) {
        match self.inner.get() {
            Some(relay) => relay.send_to_identity(identity, event, payload),
            None => warn!(identity = %identity, event = %event, "Relay not initialized"),
        }
    }

    /// Emit to a single connection. Dropped with a warning if not installed.
    pub fn send_to_connection(&self, connection_id: &str, event: &str, payload: Value) {
        match self.inner.get() {
            Some(relay) => relay.send_to_connection(connection_id, event, payload),
            None => warn!(connection = %connection_id, event = %event, "Relay not initialized"),
        }
    }
}
