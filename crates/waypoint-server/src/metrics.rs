//! Prometheus instrumentation for the relay.
//!
//! Recording goes through the `metrics` facade, so the helpers here are
//! no-ops until [`start_metrics_server`] installs the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "waypoint_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "waypoint_connections_active";
    pub const EVENTS_TOTAL: &str = "waypoint_events_total";
    pub const FRAME_BYTES: &str = "waypoint_frame_bytes";
    pub const ROOMS_ACTIVE: &str = "waypoint_rooms_active";
    pub const HANDLER_SECONDS: &str = "waypoint_handler_seconds";
    pub const EXTERNAL_EMITS_TOTAL: &str = "waypoint_external_emits_total";
    pub const ERRORS_TOTAL: &str = "waypoint_errors_total";
}

/// Which way a frame or event crossed the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Register descriptions for every relay metric.
pub fn init_metrics() {
    metrics::describe_counter!(names::CONNECTIONS_TOTAL, "WebSocket connections accepted");
    metrics::describe_gauge!(names::CONNECTIONS_ACTIVE, "WebSocket connections currently open");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Relay events by direction and event name");
    metrics::describe_counter!(names::FRAME_BYTES, "WebSocket payload bytes by direction");
    metrics::describe_gauge!(
        names::ROOMS_ACTIVE,
        "Rooms with at least one member, per-connection rooms included"
    );
    metrics::describe_histogram!(
        names::HANDLER_SECONDS,
        "Time spent handling one client event, directory calls included"
    );
    metrics::describe_counter!(
        names::EXTERNAL_EMITS_TOTAL,
        "Events pushed through the HTTP emit endpoints, by target kind"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Rejected frames, upgrades and dropped sockets");

    info!("Metrics initialized");
}

/// Install the Prometheus exporter on `0.0.0.0:<port>`.
///
/// # Errors
///
/// Returns an error if the exporter is already installed or the listener
/// cannot bind.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Count one relay event.
pub fn record_event(name: &str, direction: Direction) {
    counter!(names::EVENTS_TOTAL, "direction" => direction.label(), "event" => name.to_string())
        .increment(1);
}

/// Count WebSocket payload bytes.
pub fn record_bytes(bytes: usize, direction: Direction) {
    counter!(names::FRAME_BYTES, "direction" => direction.label()).increment(bytes as u64);
}

pub fn record_handler_latency(seconds: f64) {
    histogram!(names::HANDLER_SECONDS).record(seconds);
}

/// `target` is `identity` or `connection`.
pub fn record_external_emit(target: &'static str) {
    counter!(names::EXTERNAL_EMITS_TOTAL, "target" => target).increment(1);
}

pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Count an error by kind, e.g. `decode`, `origin` or `heartbeat_timeout`.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => kind).increment(1);
}

/// Holds one slot of the active-connection gauge for a socket's lifetime.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
