//! Event types for the Waypoint protocol.
//!
//! Inbound events form a closed enum so every payload is validated at the
//! boundary. Outbound events are open-ended: external callers may push any
//! event name to a connection.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::version::Version;

/// Event names used on the wire.
pub mod names {
    pub const JOIN: &str = "join";
    pub const UPDATE_LOCATION_CAPTAIN: &str = "update-location-captain";
    pub const ERROR: &str = "error";
    pub const CAPTAIN_LOCATION_UPDATED: &str = "captain-location-updated";
    pub const CONNECTED: &str = "connected";
}

/// Payload of a `join` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Identity of the rider or driver joining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl JoinPayload {
    /// The identity, if present and non-empty.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref())
    }
}

/// A position as it travels on the wire.
///
/// Latitude is spelled `ltd`; `lat` is accepted on input. The storage
/// convention (`[lng, lat]`) lives in the directory, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WireLocation {
    /// Latitude.
    #[serde(default, alias = "lat")]
    pub ltd: Option<f64>,
    /// Longitude.
    #[serde(default)]
    pub lng: Option<f64>,
}

impl WireLocation {
    /// Create a location with both coordinates set.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            ltd: Some(lat),
            lng: Some(lng),
        }
    }

    /// Returns `(lat, lng)` when both coordinates are present.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.ltd?, self.lng?))
    }
}

/// Payload of an `update-location-captain` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdatePayload {
    /// Identity of the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Reported position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<WireLocation>,
    /// Trip whose room should hear about the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
}

impl LocationUpdatePayload {
    /// The driver identity, if present and non-empty.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref())
    }

    /// The trip key, if present and non-empty.
    #[must_use]
    pub fn trip_key(&self) -> Option<&str> {
        non_empty(self.ride_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// An event sent by a client.
///
/// A missing or `null` `data` decodes to the payload's default, so an
/// empty `join` reaches the relay as a join without identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Associate this connection with an identity.
    #[serde(rename = "join")]
    Join(JoinPayload),

    /// A driver reports its position.
    #[serde(rename = "update-location-captain")]
    UpdateLocationCaptain(LocationUpdatePayload),
}

impl ClientEvent {
    /// Create a `join` event.
    #[must_use]
    pub fn join(identity: impl Into<String>) -> Self {
        ClientEvent::Join(JoinPayload {
            user_id: Some(identity.into()),
        })
    }

    /// Create an `update-location-captain` event.
    #[must_use]
    pub fn update_location(
        identity: impl Into<String>,
        location: WireLocation,
        trip_key: Option<String>,
    ) -> Self {
        ClientEvent::UpdateLocationCaptain(LocationUpdatePayload {
            user_id: Some(identity.into()),
            location: Some(location),
            ride_id: trip_key,
        })
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => names::JOIN,
            ClientEvent::UpdateLocationCaptain(_) => names::UPDATE_LOCATION_CAPTAIN,
        }
    }
}

/// Envelope as read off the wire, before the payload is typed.
#[derive(Deserialize)]
struct RawClientEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload_or_default<T: DeserializeOwned + Default>(data: Value) -> Result<T, serde_json::Error> {
    if data.is_null() {
        Ok(T::default())
    } else {
        serde_json::from_value(data)
    }
}

impl<'de> Deserialize<'de> for ClientEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawClientEvent::deserialize(deserializer)?;
        let event = match raw.event.as_str() {
            names::JOIN => payload_or_default(raw.data).map(ClientEvent::Join),
            names::UPDATE_LOCATION_CAPTAIN => {
                payload_or_default(raw.data).map(ClientEvent::UpdateLocationCaptain)
            }
            other => {
                return Err(de::Error::unknown_variant(
                    other,
                    &[names::JOIN, names::UPDATE_LOCATION_CAPTAIN],
                ))
            }
        };
        event.map_err(de::Error::custom)
    }
}

/// Body of a `captain-location-updated` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptainLocation {
    /// Absent when the update named no driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captain_id: Option<String>,
    pub location: WireLocation,
}

/// An event sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl ServerEvent {
    /// Create an event with an arbitrary name.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(names::ERROR, json!({ "message": message.into() }))
    }

    /// Create a `captain-location-updated` event.
    #[must_use]
    pub fn captain_location_updated(captain_id: Option<&str>, location: WireLocation) -> Self {
        let body = CaptainLocation {
            captain_id: captain_id.map(str::to_string),
            location,
        };
        Self::new(
            names::CAPTAIN_LOCATION_UPDATED,
            serde_json::to_value(body).unwrap_or(Value::Null),
        )
    }

    /// Create the `connected` handshake event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: Version, heartbeat_ms: u32) -> Self {
        Self::new(
            names::CONNECTED,
            json!({
                "connectionId": connection_id.into(),
                "version": version.to_string(),
                "heartbeat": heartbeat_ms,
            }),
        )
    }

    /// Whether this is an `error` event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event == names::ERROR
    }
}
