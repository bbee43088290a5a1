//! Connection handlers for the Waypoint server.
//!
//! This module handles the connection lifecycle and the HTTP emit API.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Direction};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};
use waypoint_core::{ConnectionId, InMemoryDirectory, Relay, RelayHandle};
use waypoint_protocol::codec::{self, Encoding, ProtocolError};
use waypoint_protocol::{ClientEvent, ServerEvent, PROTOCOL_VERSION};

/// Sent when a frame cannot be decoded into a known event.
const MALFORMED_EVENT: &str = "Malformed event";
/// Sent when a frame exceeds `limits.max_message_size`.
const MESSAGE_TOO_LARGE: &str = "Message too large";

/// Shared server state.
pub struct AppState {
    /// The relay serving WebSocket connections.
    pub relay: Arc<Relay>,
    /// Handle used by the HTTP emit API.
    pub handle: RelayHandle,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state backed by an in-memory directory seeded from
    /// the configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let directory = Arc::new(InMemoryDirectory::seeded(
            config.directory.riders.clone(),
            config.directory.drivers.clone(),
        ));
        let relay = Arc::new(Relay::with_config(directory, config.registry_config()));

        Self {
            handle: RelayHandle::with_relay(Arc::clone(&relay)),
            relay,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/emit/identity/:identity", post(emit_identity_handler))
        .route("/emit/connection/:connection_id", post(emit_connection_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let websocket_path = config.transport.websocket_path.clone();
    let allowed_origin = config.cors.allowed_origin.clone();
    let app = build_app(Arc::new(AppState::new(config)));

    let listener = TcpListener::bind(addr).await?;

    info!("Waypoint server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);
    info!("Allowed origin: {}", allowed_origin);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "registry": state.relay.stats(),
    }))
}

/// Body of an emit request.
#[derive(Debug, Deserialize)]
struct EmitRequest {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Push an event to every connection joined under an identity.
async fn emit_identity_handler(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
    Json(request): Json<EmitRequest>,
) -> StatusCode {
    if request.event.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    metrics::record_external_emit("identity");
    state
        .handle
        .send_to_identity(&identity, &request.event, request.data);
    StatusCode::ACCEPTED
}

/// Push an event to a single connection.
async fn emit_connection_handler(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
    Json(request): Json<EmitRequest>,
) -> StatusCode {
    if request.event.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    metrics::record_external_emit("connection");
    state
        .handle
        .send_to_connection(&connection_id, &request.event, request.data);
    StatusCode::ACCEPTED
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        if !state.config.cors.allows(origin) {
            warn!(origin = %origin, "Rejected WebSocket upgrade from disallowed origin");
            metrics::record_error("origin");
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }

    if state.relay.registry().connection_count() >= state.config.limits.max_connections {
        warn!("Connection limit reached");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let relay = Arc::clone(&state.relay);
    let mut outbox = relay.connect(&connection_id);
    metrics::set_active_rooms(relay.stats().room_count);

    let (mut sender, mut receiver) = socket.split();
    let mut encoding = Encoding::Json;

    let heartbeat_interval = state.config.heartbeat_interval();
    let heartbeat_timeout = state.config.heartbeat_timeout();
    let max_message_size = state.config.limits.max_message_size;

    let connected = ServerEvent::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION,
        u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX),
    );
    if let Err(e) = send_event(&mut sender, &connected, encoding).await {
        error!(connection = %connection_id, error = %e, "Failed to send connected event");
        relay.disconnect(&connection_id).await;
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;

            Some(event) = outbox.recv() => {
                trace!(
                    connection = %connection_id,
                    event_id = event.id,
                    event = %event.name,
                    room = ?event.room,
                    source = ?event.source,
                    "Delivering event"
                );
                let wire = event.to_server_event();
                if let Err(e) = send_event(&mut sender, &wire, encoding).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
                metrics::record_event(&wire.event, Direction::Outbound);
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        relay.registry().touch(&connection_id);
                        encoding = Encoding::Json;
                        metrics::record_bytes(text.len(), Direction::Inbound);

                        if text.len() > max_message_size {
                            relay.reply(&connection_id, ServerEvent::error(MESSAGE_TOO_LARGE));
                            metrics::record_error("message_too_large");
                            continue;
                        }

                        match codec::decode_text::<ClientEvent>(&text) {
                            Ok(event) => dispatch(&relay, &connection_id, event).await,
                            Err(e) => reject_frame(&relay, &connection_id, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        relay.registry().touch(&connection_id);
                        encoding = Encoding::MessagePack;
                        metrics::record_bytes(data.len(), Direction::Inbound);

                        if read_buffer.len() + data.len() > max_message_size {
                            read_buffer.clear();
                            relay.reply(&connection_id, ServerEvent::error(MESSAGE_TOO_LARGE));
                            metrics::record_error("message_too_large");
                            continue;
                        }
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => dispatch(&relay, &connection_id, event).await,
                                Ok(None) => break,
                                Err(e @ ProtocolError::FrameTooLarge(_)) => {
                                    read_buffer.clear();
                                    reject_frame(&relay, &connection_id, &e);
                                    break;
                                }
                                // The bad frame was consumed; keep reading.
                                Err(e) => reject_frame(&relay, &connection_id, &e),
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        relay.registry().touch(&connection_id);
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        relay.registry().touch(&connection_id);
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                let presence = relay.registry().presence(&connection_id);
                let stale = presence
                    .as_ref()
                    .map_or(true, |presence| presence.is_stale(heartbeat_timeout));
                if stale {
                    let identity = presence.and_then(|presence| presence.identity);
                    info!(connection = %connection_id, identity = ?identity, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    relay.disconnect(&connection_id).await;
    metrics::set_active_rooms(relay.stats().room_count);
}

/// Run one client event to completion before the next frame is read.
async fn dispatch(relay: &Relay, connection_id: &ConnectionId, event: ClientEvent) {
    metrics::record_event(event.name(), Direction::Inbound);
    let start = Instant::now();
    relay.handle(connection_id, event).await;
    metrics::record_handler_latency(start.elapsed().as_secs_f64());
    metrics::set_active_rooms(relay.stats().room_count);
}

fn reject_frame(relay: &Relay, connection_id: &ConnectionId, error: &ProtocolError) {
    debug!(connection = %connection_id, error = %error, "Undecodable frame");
    metrics::record_error("decode");
    relay.reply(connection_id, ServerEvent::error(MALFORMED_EVENT));
}

/// Send an event to the WebSocket in the connection's encoding.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_text(event)?),
        Encoding::MessagePack => Message::Binary(codec::encode_binary(event)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_bytes(len, Direction::Outbound);
    sender.send(message).await?;
    Ok(())
}
