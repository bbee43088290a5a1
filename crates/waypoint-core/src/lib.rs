//! # waypoint-core
//!
//! Room registry, directory seam and relay protocol for the Waypoint
//! location relay.
//!
//! - **Registry** - Live connections, their outboxes and room memberships
//! - **Directory** - Seam to the store of riders and drivers
//! - **Relay** - Join, location update and disconnect handling
//! - **Handle** - Install-once access to the relay for external callers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Directory  │
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod directory;
pub mod handle;
pub mod message;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod room;

pub use connection::ConnectionId;
pub use directory::{Directory, DirectoryError, GeoPoint, InMemoryDirectory, Participant, Role};
pub use handle::RelayHandle;
pub use message::Event;
pub use presence::PresenceState;
pub use registry::{Outbox, RegistryConfig, RegistryError, RegistryStats, RoomRegistry};
pub use relay::Relay;
pub use room::{Room, RoomName};
