//! The directory seam.
//!
//! The directory is the persistent store of riders and drivers. The relay
//! only asks it to record or clear which connection belongs to an identity
//! and to persist driver positions. [`InMemoryDirectory`] backs the server
//! binary and the tests; production deployments plug in their own store.

use crate::connection::ConnectionId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backing store could not be reached.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    /// The backing store rejected the operation.
    #[error("Directory backend error: {0}")]
    Backend(String),
}

/// Which side of the directory a record lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
}

impl Role {
    /// Both roles, riders first.
    pub const ALL: [Role; 2] = [Role::Rider, Role::Driver];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Rider => f.write_str("rider"),
            Role::Driver => f.write_str("driver"),
        }
    }
}

/// Result of resolving an identity against the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Rider,
    Driver,
    /// Neither a rider nor a driver record exists.
    Unknown,
}

impl Participant {
    /// The role, if the identity is known.
    #[must_use]
    pub fn role(self) -> Option<Role> {
        match self {
            Participant::Rider => Some(Role::Rider),
            Participant::Driver => Some(Role::Driver),
            Participant::Unknown => None,
        }
    }
}

impl From<Role> for Participant {
    fn from(role: Role) -> Self {
        match role {
            Role::Rider => Participant::Rider,
            Role::Driver => Participant::Driver,
        }
    }
}

/// A point in storage order: `[longitude, latitude]`.
///
/// The wire format carries latitude first; convert with
/// [`GeoPoint::from_lat_lng`] and never reorder by hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    /// Build a point from wire-order coordinates.
    #[must_use]
    pub fn from_lat_lng(lat: f64, lng: f64) -> Self {
        Self {
            coordinates: [lng, lat],
        }
    }

    #[must_use]
    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }

    #[must_use]
    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Persistent store of riders and drivers.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Record `connection` as the live connection of `identity`.
    ///
    /// The identity is resolved to a rider or a driver in one step; an
    /// identity with no record is reported as [`Participant::Unknown`] and
    /// nothing is written.
    async fn attach_connection(
        &self,
        identity: &str,
        connection: &ConnectionId,
    ) -> Result<Participant, DirectoryError>;

    /// Clear the connection reference of every `role` record that points at
    /// `connection`. One connection may have joined as several identities.
    /// Returns the identities that were cleared.
    async fn detach_connection(
        &self,
        role: Role,
        connection: &ConnectionId,
    ) -> Result<Vec<String>, DirectoryError>;

    /// Persist the last-known location of a driver.
    ///
    /// Returns `false` if no driver record exists for `identity`.
    async fn update_driver_location(
        &self,
        identity: &str,
        location: GeoPoint,
    ) -> Result<bool, DirectoryError>;
}

#[derive(Debug, Clone, Default)]
struct Record {
    connection: Option<ConnectionId>,
    location: Option<GeoPoint>,
}

/// In-process directory keyed by identity.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    riders: DashMap<String, Record>,
    drivers: DashMap<String, Record>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory seeded with rider and driver identities.
    #[must_use]
    pub fn seeded<R, D>(riders: R, drivers: D) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let directory = Self::new();
        for rider in riders {
            directory.insert_rider(rider);
        }
        for driver in drivers {
            directory.insert_driver(driver);
        }
        directory
    }

    /// Add a rider record.
    pub fn insert_rider(&self, identity: impl Into<String>) {
        self.riders.insert(identity.into(), Record::default());
    }

    /// Add a driver record.
    pub fn insert_driver(&self, identity: impl Into<String>) {
        self.drivers.insert(identity.into(), Record::default());
    }

    /// Connection currently recorded for an identity.
    #[must_use]
    pub fn connection_of(&self, identity: &str) -> Option<ConnectionId> {
        self.riders
            .get(identity)
            .or_else(|| self.drivers.get(identity))
            .and_then(|record| record.connection.clone())
    }

    /// Last persisted location of a driver.
    #[must_use]
    pub fn location_of(&self, identity: &str) -> Option<GeoPoint> {
        self.drivers.get(identity).and_then(|record| record.location)
    }

    fn side(&self, role: Role) -> &DashMap<String, Record> {
        match role {
            Role::Rider => &self.riders,
            Role::Driver => &self.drivers,
        }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn attach_connection(
        &self,
        identity: &str,
        connection: &ConnectionId,
    ) -> Result<Participant, DirectoryError> {
        for role in Role::ALL {
            if let Some(mut record) = self.side(role).get_mut(identity) {
                record.connection = Some(connection.clone());
                debug!(identity = %identity, role = %role, connection = %connection, "Recorded connection");
                return Ok(role.into());
            }
        }
        Ok(Participant::Unknown)
    }

    async fn detach_connection(
        &self,
        role: Role,
        connection: &ConnectionId,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut cleared = Vec::new();
        for mut record in self.side(role).iter_mut() {
            if record.connection.as_ref() == Some(connection) {
                record.connection = None;
                cleared.push(record.key().clone());
            }
        }
        Ok(cleared)
    }

    async fn update_driver_location(
        &self,
        identity: &str,
        location: GeoPoint,
    ) -> Result<bool, DirectoryError> {
        match self.drivers.get_mut(identity) {
            Some(mut record) => {
                record.location = Some(location);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
