//! # waypoint-protocol
//!
//! Wire protocol definitions for the Waypoint location relay.
//!
//! Every message exchanged with a client is an envelope of the form
//! `{"event": <name>, "data": <payload>}`. Clients speak a closed set of
//! events; the relay may emit arbitrary event names on behalf of external
//! callers.
//!
//! ## Events
//!
//! - `join` - Associate the connection with an identity
//! - `update-location-captain` - Driver position update
//! - `error` - Validation or failure notice, sent only to the originator
//! - `captain-location-updated` - Broadcast to a trip room
//! - `connected` - Handshake sent right after accept
//!
//! ## Example
//!
//! ```rust
//! use waypoint_protocol::{codec, ClientEvent};
//!
//! let event: ClientEvent = codec::decode_text(r#"{"event":"join","data":{"userId":"rider-1"}}"#).unwrap();
//! assert_eq!(event, ClientEvent::join("rider-1"));
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{Encoding, ProtocolError};
pub use events::{ClientEvent, JoinPayload, LocationUpdatePayload, ServerEvent, WireLocation};
pub use version::{Version, PROTOCOL_VERSION};
