//! Fan-out benchmarks for Waypoint.
//!
//! Measures room emits and the full location update path against the
//! in-memory directory.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use waypoint_bench::{drain, relay_with_room};
use waypoint_core::{ConnectionId, Event};
use waypoint_protocol::{ClientEvent, WireLocation};

/// Benchmark a raw room emit at different room sizes.
fn bench_room_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_emit");

    for members in [1usize, 10, 100, 1000] {
        let (relay, mut outboxes) = relay_with_room("trip-bench", members);
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let event = Event::new("captain-location-updated", json!({"captainId": "driver-bench"}));
                let delivered = relay.registry().emit(black_box("trip-bench"), event);
                drain(&mut outboxes);
                delivered
            });
        });
    }

    group.finish();
}

/// Benchmark join on a fresh room per iteration.
fn bench_join(c: &mut Criterion) {
    let (relay, _outboxes) = relay_with_room("trip-bench", 1);
    let connection = ConnectionId::new("conn-0");
    let mut i = 0u64;

    c.bench_function("registry_join", |b| {
        b.iter(|| {
            i += 1;
            let room = format!("room:{}", i % 64);
            relay.registry().join(black_box(&connection), &room)
        });
    });
}

/// Benchmark a location update broadcast through the relay.
fn bench_location_update(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("location_update");

    for members in [1usize, 100] {
        let (relay, mut outboxes) = relay_with_room("trip-bench", members);
        let driver = ConnectionId::new("driver-conn");
        let _driver_outbox = relay.connect(&driver);
        let event = ClientEvent::update_location(
            "driver-bench",
            WireLocation::new(52.52, 13.405),
            Some("trip-bench".to_string()),
        );

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                runtime.block_on(relay.handle(&driver, event.clone()));
                drain(&mut outboxes);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_room_emit, bench_join, bench_location_update);
criterion_main!(benches);
