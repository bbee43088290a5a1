//! Relay server configuration.
//!
//! Every field has a default, so an empty `waypoint.toml` (or none at all)
//! yields a working local relay. `WAYPOINT_HOST`, `WAYPOINT_PORT` and
//! `WAYPOINT_ALLOWED_ORIGIN` replace the built-in defaults for the fields
//! a file leaves out.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use waypoint_core::RegistryConfig;
use waypoint_protocol::codec::MAX_FRAME_SIZE;

/// Top-level configuration of the `waypoint` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Seed records for the in-memory directory.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// Origin policy for WebSocket upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated list of allowed origins, or `*`.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

/// Where clients connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Route of the WebSocket upgrade. Must start with `/`.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Caps on connections, rooms and frame size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Open sockets beyond this are refused with `503`.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Live rooms across all connections.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum rooms per connection, its own room included.
    #[serde(default = "default_max_rooms_per_connection")]
    pub max_rooms_per_connection: usize,

    /// Largest inbound frame in bytes; never above the codec's 16 MiB cap.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Server pings and the silence that drops a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping period, also announced in the `connected` event.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// A connection silent this long is disconnected. Must exceed the interval.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Prometheus exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port of the exporter's own HTTP listener.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Identities preloaded into the in-memory directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub riders: Vec<String>,

    /// Only drivers get location writes.
    #[serde(default)]
    pub drivers: Vec<String>,
}

fn default_host() -> String {
    std::env::var("WAYPOINT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("WAYPOINT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_allowed_origin() -> String {
    std::env::var("WAYPOINT_ALLOWED_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string())
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_rooms() -> usize {
    100_000
}

fn default_max_rooms_per_connection() -> usize {
    100
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_heartbeat_interval() -> u64 {
    25_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: CorsConfig::default(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: default_allowed_origin(),
        }
    }
}

impl CorsConfig {
    /// Check whether an `Origin` header value is allowed.
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        self.allowed_origin
            .split(',')
            .map(str::trim)
            .any(|allowed| allowed == "*" || allowed.trim_end_matches('/') == origin.trim_end_matches('/'))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_rooms: default_max_rooms(),
            max_rooms_per_connection: default_max_rooms_per_connection(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load the first `waypoint.toml` on the search path, or the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// fails [`Config::validate`].
    pub fn load() -> Result<Self> {
        let config_paths = [
            "waypoint.toml",
            "/etc/waypoint/waypoint.toml",
            "~/.config/waypoint/waypoint.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/', got {:?}",
            self.transport.websocket_path
        );
        ensure!(self.heartbeat.interval_ms > 0, "heartbeat.interval_ms must be positive");
        ensure!(
            self.heartbeat.timeout_ms > self.heartbeat.interval_ms,
            "heartbeat.timeout_ms ({}) must exceed heartbeat.interval_ms ({})",
            self.heartbeat.timeout_ms,
            self.heartbeat.interval_ms
        );
        ensure!(
            self.limits.max_message_size <= MAX_FRAME_SIZE,
            "limits.max_message_size must not exceed {} bytes",
            MAX_FRAME_SIZE
        );
        // A connection's own room takes one slot.
        ensure!(
            self.limits.max_rooms_per_connection >= 2,
            "limits.max_rooms_per_connection must be at least 2"
        );
        Ok(())
    }

    /// Ping period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms.max(1))
    }

    /// Silence after which a connection is dropped.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Registry limits derived from this configuration.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_rooms: self.limits.max_rooms,
            max_rooms_per_connection: self.limits.max_rooms_per_connection,
        }
    }
}
