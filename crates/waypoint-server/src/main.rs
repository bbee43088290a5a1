//! # Waypoint Server
//!
//! Real-time location relay for riders and drivers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! waypoint
//!
//! # Run with environment variables
//! WAYPOINT_PORT=8080 WAYPOINT_ALLOWED_ORIGIN=https://app.example.com waypoint
//! ```
//!
//! A `waypoint.toml` in the working directory, `/etc/waypoint/` or
//! `~/.config/waypoint/` is picked up automatically.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypoint=debug,waypoint_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Waypoint server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
