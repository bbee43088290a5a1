//! Shared fixtures for the Waypoint benchmarks.

use std::sync::Arc;
use waypoint_core::{ConnectionId, InMemoryDirectory, Outbox, Relay};

/// Build a relay with `members` connections joined to `room`.
///
/// Returns the relay and the outboxes, which must stay alive for the
/// connections to count as recipients.
#[must_use]
pub fn relay_with_room(room: &str, members: usize) -> (Relay, Vec<Outbox>) {
    let directory = Arc::new(InMemoryDirectory::seeded(
        Vec::<String>::new(),
        ["driver-bench".to_string()],
    ));
    let relay = Relay::new(directory);
    let outboxes = (0..members)
        .map(|i| {
            let id = ConnectionId::new(format!("conn-{}", i));
            let outbox = relay.connect(&id);
            // Fixture rooms are always valid and under the limits.
            let _ = relay.registry().join(&id, room);
            outbox
        })
        .collect();
    (relay, outboxes)
}

/// Drop everything queued in the outboxes.
pub fn drain(outboxes: &mut [Outbox]) {
    for outbox in outboxes {
        while outbox.try_recv().is_ok() {}
    }
}
