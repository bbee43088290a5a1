//! The relay: join, location update and disconnect handling.
//!
//! A [`Relay`] owns the room registry and talks to the [`Directory`]. Each
//! connection's task feeds it that connection's events one at a time; the
//! relay itself keeps no per-connection locks across directory calls, so a
//! slow directory only stalls the connection waiting on it.

use crate::connection::ConnectionId;
use crate::directory::{Directory, GeoPoint, Role};
use crate::message::Event;
use crate::registry::{Outbox, RegistryConfig, RegistryStats, RoomRegistry};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use waypoint_protocol::{ClientEvent, JoinPayload, LocationUpdatePayload, ServerEvent, WireLocation};

/// Message sent when a join cannot be completed.
pub const JOIN_FAILED: &str = "Could not join channel.";
/// Message sent when an update carries no usable coordinates.
pub const INVALID_LOCATION: &str = "Invalid location data";
/// Message sent when a location cannot be persisted.
pub const UPDATE_FAILED: &str = "Could not update location.";

/// The relay core.
pub struct Relay {
    registry: RoomRegistry,
    directory: Arc<dyn Directory>,
}

impl Relay {
    /// Create a relay with the default registry configuration.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self::with_config(directory, RegistryConfig::default())
    }

    /// Create a relay with a custom registry configuration.
    #[must_use]
    pub fn with_config(directory: Arc<dyn Directory>, config: RegistryConfig) -> Self {
        Self {
            registry: RoomRegistry::with_config(config),
            directory,
        }
    }

    /// The room registry.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Register a newly accepted connection and return its outbox.
    pub fn connect(&self, connection: &ConnectionId) -> Outbox {
        info!(connection = %connection, "Client connected");
        self.registry.register(connection)
    }

    /// Handle one inbound event from a connection.
    pub async fn handle(&self, connection: &ConnectionId, event: ClientEvent) {
        self.registry.touch(connection);
        match event {
            ClientEvent::Join(payload) => self.join(connection, payload).await,
            ClientEvent::UpdateLocationCaptain(payload) => {
                self.update_location(connection, payload).await;
            }
        }
    }

    /// Join protocol.
    ///
    /// An absent identity is ignored without reply. Otherwise the connection
    /// joins the identity's room and the directory records the connection.
    /// Failures are reported to this connection only.
    pub async fn join(&self, connection: &ConnectionId, payload: JoinPayload) {
        let Some(identity) = payload.identity() else {
            trace!(connection = %connection, "Join without identity ignored");
            return;
        };

        if let Err(e) = self.registry.join(connection, identity) {
            warn!(connection = %connection, identity = %identity, error = %e, "Join rejected");
            self.reply(connection, ServerEvent::error(JOIN_FAILED));
            return;
        }
        self.registry.set_identity(connection, identity);

        match self.directory.attach_connection(identity, connection).await {
            Ok(participant) => match participant.role() {
                Some(role) => {
                    info!(connection = %connection, identity = %identity, role = %role, "Joined identity room");
                }
                None => {
                    debug!(connection = %connection, identity = %identity, "Identity not in directory");
                }
            },
            Err(e) => {
                error!(connection = %connection, identity = %identity, error = %e, "Error during join");
                self.reply(connection, ServerEvent::error(JOIN_FAILED));
            }
        }
    }

    /// Location update protocol.
    ///
    /// The location is validated before anything is written. An update
    /// naming no driver writes nothing but is otherwise treated like one for
    /// an unknown driver. A successful or empty write is broadcast to the
    /// trip room when a trip key is given; a failed write is reported to this
    /// connection and never broadcast.
    pub async fn update_location(&self, connection: &ConnectionId, payload: LocationUpdatePayload) {
        let Some((lat, lng)) = payload.location.as_ref().and_then(WireLocation::coordinates) else {
            self.reply(connection, ServerEvent::error(INVALID_LOCATION));
            return;
        };
        let identity = payload.identity();

        match identity {
            Some(identity) => match self
                .directory
                .update_driver_location(identity, GeoPoint::from_lat_lng(lat, lng))
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(connection = %connection, identity = %identity, "No driver record for location update");
                }
                Err(e) => {
                    error!(connection = %connection, identity = %identity, error = %e, "Error updating captain location");
                    self.reply(connection, ServerEvent::error(UPDATE_FAILED));
                    return;
                }
            },
            None => {
                debug!(connection = %connection, "Location update without captain id");
            }
        }

        if let Some(trip) = payload.trip_key() {
            let event = Event::from(ServerEvent::captain_location_updated(
                identity,
                WireLocation::new(lat, lng),
            ))
            .with_room(trip)
            .with_source(connection.clone());
            let recipients = self.registry.emit(trip, event);
            debug!(identity = ?identity, room = %trip, recipients, "Broadcast captain location");
        }
    }

    /// Disconnect protocol.
    ///
    /// Leaves every room, then clears the rider-side and driver-side
    /// directory references to this connection. Directory failures are
    /// logged only; nobody is left to tell.
    pub async fn disconnect(&self, connection: &ConnectionId) {
        let rooms = self.registry.leave_all(connection);
        info!(connection = %connection, rooms = rooms.len(), "Client disconnected");

        let (rider, driver) = tokio::join!(
            self.directory.detach_connection(Role::Rider, connection),
            self.directory.detach_connection(Role::Driver, connection),
        );

        for (role, result) in [(Role::Rider, rider), (Role::Driver, driver)] {
            match result {
                Ok(cleared) => {
                    for identity in cleared {
                        debug!(connection = %connection, identity = %identity, role = %role, "Cleared stale connection");
                    }
                }
                Err(e) => {
                    error!(connection = %connection, role = %role, error = %e, "Error during cleanup on disconnect");
                }
            }
        }
    }

    /// Emit an event to every connection joined under `identity`.
    pub fn send_to_identity(&self, identity: &str, event: &str, payload: Value) {
        debug!(identity = %identity, event = %event, "Emitting event to identity room");
        self.registry
            .emit(identity, Event::new(event, payload).with_room(identity));
    }

    /// Emit an event to one connection, addressed by its raw ID.
    pub fn send_to_connection(&self, connection_id: &str, event: &str, payload: Value) {
        debug!(connection = %connection_id, event = %event, "Emitting event to connection");
        self.registry
            .emit(connection_id, Event::new(event, payload).with_room(connection_id));
    }

    /// Send an event to the originating connection only.
    pub fn reply(&self, connection: &ConnectionId, event: ServerEvent) {
        self.registry
            .deliver(connection, Arc::new(Event::from(event)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryError, InMemoryDirectory, Participant};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use waypoint_protocol::events::names;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn relay_with(directory: Arc<InMemoryDirectory>) -> Relay {
        Relay::new(directory)
    }

    fn seeded() -> Arc<InMemoryDirectory> {
        Arc::new(InMemoryDirectory::seeded(["rider1"], ["driver1"]))
    }

    fn drain(outbox: &mut Outbox) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        while let Ok(event) = outbox.try_recv() {
            events.push(event);
        }
        events
    }

    fn update(identity: &str, location: Option<WireLocation>, trip: Option<&str>) -> ClientEvent {
        ClientEvent::UpdateLocationCaptain(LocationUpdatePayload {
            user_id: Some(identity.to_string()),
            location,
            ride_id: trip.map(str::to_string),
        })
    }

    /// A directory whose every call fails, counting attempts.
    #[derive(Default)]
    struct BrokenDirectory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Directory for BrokenDirectory {
        async fn attach_connection(
            &self,
            _identity: &str,
            _connection: &ConnectionId,
        ) -> Result<Participant, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DirectoryError::Unavailable("down".into()))
        }

        async fn detach_connection(
            &self,
            _role: Role,
            _connection: &ConnectionId,
        ) -> Result<Vec<String>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DirectoryError::Unavailable("down".into()))
        }

        async fn update_driver_location(
            &self,
            _identity: &str,
            _location: GeoPoint,
        ) -> Result<bool, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DirectoryError::Backend("write rejected".into()))
        }
    }

    #[tokio::test]
    async fn test_join_then_send_to_identity() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));

        relay.handle(&conn("a"), ClientEvent::join("rider1")).await;
        relay.send_to_identity("rider1", "ride-confirmed", json!({"rideId": "trip1"}));

        let received = drain(&mut a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "ride-confirmed");
        assert_eq!(received[0].payload["rideId"], "trip1");
        assert!(drain(&mut b).is_empty());

        assert_eq!(directory.connection_of("rider1"), Some(conn("a")));
    }

    #[tokio::test]
    async fn test_join_without_identity_is_silent() {
        let relay = relay_with(seeded());
        let mut a = relay.connect(&conn("a"));

        relay.handle(&conn("a"), ClientEvent::Join(JoinPayload::default())).await;
        relay
            .handle(
                &conn("a"),
                ClientEvent::Join(JoinPayload {
                    user_id: Some(String::new()),
                }),
            )
            .await;

        assert_eq!(relay.registry().connection_rooms(&conn("a")), vec!["a"]);
        assert!(drain(&mut a).is_empty());
    }

    #[tokio::test]
    async fn test_join_twice_is_idempotent() {
        let relay = relay_with(seeded());
        let mut a = relay.connect(&conn("a"));

        relay.handle(&conn("a"), ClientEvent::join("rider1")).await;
        relay.handle(&conn("a"), ClientEvent::join("rider1")).await;

        assert_eq!(relay.registry().member_count("rider1"), 1);
        assert_eq!(relay.registry().connection_rooms(&conn("a")).len(), 2);

        relay.send_to_identity("rider1", "ping", json!({}));
        assert_eq!(drain(&mut a).len(), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_identity_still_joins_room() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let mut a = relay.connect(&conn("a"));

        relay.handle(&conn("a"), ClientEvent::join("trip1")).await;

        assert_eq!(relay.registry().member_count("trip1"), 1);
        assert!(drain(&mut a).is_empty());
        assert_eq!(directory.connection_of("trip1"), None);
    }

    #[tokio::test]
    async fn test_join_directory_failure_reports_to_origin_only() {
        let directory = Arc::new(BrokenDirectory::default());
        let relay = Relay::new(directory.clone());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));
        relay.handle(&conn("b"), ClientEvent::join("rider1")).await;
        drain(&mut b);

        relay.handle(&conn("a"), ClientEvent::join("rider1")).await;

        let received = drain(&mut a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, names::ERROR);
        assert_eq!(received[0].payload["message"], JOIN_FAILED);
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_update_with_missing_coordinates() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let mut b = relay.connect(&conn("b"));
        let mut a = relay.connect(&conn("a"));
        relay.handle(&conn("a"), ClientEvent::join("trip1")).await;

        let partial = [
            None,
            Some(WireLocation::default()),
            Some(WireLocation {
                ltd: Some(10.0),
                lng: None,
            }),
            Some(WireLocation {
                ltd: None,
                lng: Some(20.0),
            }),
        ];

        for location in partial {
            relay
                .handle(&conn("b"), update("driver1", location, Some("trip1")))
                .await;

            let received = drain(&mut b);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].name, names::ERROR);
            assert_eq!(received[0].payload["message"], INVALID_LOCATION);
        }

        assert_eq!(directory.location_of("driver1"), None);
        assert!(drain(&mut a).is_empty());
    }

    #[tokio::test]
    async fn test_update_with_missing_coordinates_skips_directory() {
        let directory = Arc::new(BrokenDirectory::default());
        let relay = Relay::new(directory.clone());
        let mut b = relay.connect(&conn("b"));

        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::default()), None))
            .await;

        assert_eq!(drain(&mut b).len(), 1);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_persists_in_storage_order() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let mut b = relay.connect(&conn("b"));

        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::new(10.0, 20.0)), None))
            .await;

        assert_eq!(
            directory.location_of("driver1").map(|p| p.coordinates),
            Some([20.0, 10.0])
        );
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_update_without_trip_never_broadcasts() {
        let relay = relay_with(seeded());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));
        relay.handle(&conn("a"), ClientEvent::join("driver1")).await;
        relay.handle(&conn("a"), ClientEvent::join("trip1")).await;
        relay.handle(&conn("b"), ClientEvent::join("driver1")).await;

        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::new(1.0, 2.0)), None))
            .await;
        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::new(1.0, 2.0)), Some("")))
            .await;

        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_skips_broadcast() {
        let directory = Arc::new(BrokenDirectory::default());
        let relay = Relay::new(directory);
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));
        relay.registry().join(&conn("a"), "trip1").unwrap();

        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::new(1.0, 2.0)), Some("trip1")))
            .await;

        assert!(drain(&mut a).is_empty());
        let received = drain(&mut b);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload["message"], UPDATE_FAILED);
    }

    #[tokio::test]
    async fn test_update_without_captain_still_broadcasts() {
        let directory = Arc::new(BrokenDirectory::default());
        let relay = Relay::new(directory.clone());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));
        relay.registry().join(&conn("a"), "trip1").unwrap();

        for user_id in [None, Some(String::new())] {
            let payload = LocationUpdatePayload {
                user_id,
                location: Some(WireLocation::new(10.0, 20.0)),
                ride_id: Some("trip1".to_string()),
            };
            relay
                .handle(&conn("b"), ClientEvent::UpdateLocationCaptain(payload))
                .await;

            let received = drain(&mut a);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].name, names::CAPTAIN_LOCATION_UPDATED);
            assert_eq!(
                received[0].payload,
                json!({"location": {"ltd": 10.0, "lng": 20.0}})
            );
        }

        assert!(drain(&mut b).is_empty());
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_at_zero_coordinates() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));
        relay.handle(&conn("a"), ClientEvent::join("trip1")).await;

        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::new(0.0, 0.0)), Some("trip1")))
            .await;

        assert!(drain(&mut b).is_empty());
        assert_eq!(
            directory.location_of("driver1").map(|p| p.coordinates),
            Some([0.0, 0.0])
        );
        let received = drain(&mut a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload["location"], json!({"ltd": 0.0, "lng": 0.0}));
    }

    #[tokio::test]
    async fn test_trip_broadcast_scenario() {
        let relay = relay_with(seeded());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));

        relay.handle(&conn("a"), ClientEvent::join("rider1")).await;
        relay.handle(&conn("b"), ClientEvent::join("driver1")).await;

        let location = WireLocation::new(10.0, 20.0);
        relay
            .handle(&conn("b"), update("driver1", Some(location), Some("trip1")))
            .await;
        assert!(drain(&mut a).is_empty());

        relay.handle(&conn("a"), ClientEvent::join("trip1")).await;
        relay
            .handle(&conn("b"), update("driver1", Some(location), Some("trip1")))
            .await;

        let received = drain(&mut a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, names::CAPTAIN_LOCATION_UPDATED);
        assert_eq!(
            received[0].payload,
            json!({"captainId": "driver1", "location": {"ltd": 10.0, "lng": 20.0}})
        );
        assert_eq!(received[0].room.as_deref(), Some("trip1"));
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_trip_member() {
        let relay = relay_with(seeded());
        let mut outboxes: Vec<_> = ["a", "c", "d"]
            .iter()
            .map(|id| {
                let outbox = relay.connect(&conn(id));
                (*id, outbox)
            })
            .collect();
        let _b = relay.connect(&conn("b"));

        for (id, _) in &outboxes {
            relay.handle(&conn(id), ClientEvent::join("trip1")).await;
        }

        relay
            .handle(&conn("b"), update("driver1", Some(WireLocation::new(3.0, 4.0)), Some("trip1")))
            .await;

        for (_, outbox) in &mut outboxes {
            assert_eq!(drain(outbox).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_rooms_and_directory() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let _a = relay.connect(&conn("a"));
        let mut other = relay.connect(&conn("other"));

        relay.handle(&conn("a"), ClientEvent::join("rider1")).await;
        assert_eq!(directory.connection_of("rider1"), Some(conn("a")));

        relay.disconnect(&conn("a")).await;

        assert!(!relay.registry().room_exists("rider1"));
        assert!(!relay.registry().is_registered(&conn("a")));
        assert_eq!(directory.connection_of("rider1"), None);

        relay.send_to_identity("rider1", "ping", json!({}));
        assert!(drain(&mut other).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_clears_every_identity_of_connection() {
        let directory = Arc::new(InMemoryDirectory::seeded(["rider1", "rider2"], ["driver1"]));
        let relay = relay_with(directory.clone());
        let _a = relay.connect(&conn("a"));

        for identity in ["rider1", "rider2", "driver1"] {
            relay.handle(&conn("a"), ClientEvent::join(identity)).await;
        }
        relay.disconnect(&conn("a")).await;

        for identity in ["rider1", "rider2", "driver1"] {
            assert_eq!(directory.connection_of(identity), None);
            assert!(!relay.registry().room_exists(identity));
        }
    }

    #[tokio::test]
    async fn test_disconnect_keeps_newer_connection() {
        let directory = seeded();
        let relay = relay_with(directory.clone());
        let _old = relay.connect(&conn("old"));
        let mut new = relay.connect(&conn("new"));

        relay.handle(&conn("old"), ClientEvent::join("rider1")).await;
        relay.handle(&conn("new"), ClientEvent::join("rider1")).await;
        relay.disconnect(&conn("old")).await;

        assert_eq!(directory.connection_of("rider1"), Some(conn("new")));
        relay.send_to_identity("rider1", "ping", json!({}));
        assert_eq!(drain(&mut new).len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_swallows_directory_failure() {
        let directory = Arc::new(BrokenDirectory::default());
        let relay = Relay::new(directory.clone());
        let _a = relay.connect(&conn("a"));

        relay.disconnect(&conn("a")).await;

        // Both sides are attempted even though each fails.
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
        assert_eq!(relay.stats().connection_count, 0);
    }

    #[tokio::test]
    async fn test_send_to_connection() {
        let relay = relay_with(seeded());
        let mut a = relay.connect(&conn("a"));
        let mut b = relay.connect(&conn("b"));

        relay.send_to_connection("b", "ride-started", json!({"rideId": "trip1"}));

        assert!(drain(&mut a).is_empty());
        let received = drain(&mut b);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "ride-started");
    }
}
