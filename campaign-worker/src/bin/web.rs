//! Mailcast Web Server - campaign open/click tracking.
//!
//! This binary serves the tracking endpoints embedded in outgoing campaign
//! mail:
//! - Open pixels record an open and return a transparent image
//! - Click links record a click and redirect to the campaign destination

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailcast::shutdown::shutdown_signal;
use mailcast::web::{router, AppState};
use mailcast::{Config, MongoDatabase};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        mongodb_database = %config.mongodb_database,
        fallback_url = %config.tracking_fallback_url,
        "config_loaded"
    );

    let db = MongoDatabase::connect(&config.mongodb_uri, &config.mongodb_database)
        .await
        .context("Failed to connect to MongoDB")?;

    // Create application state
    let state = AppState::new(Arc::new(db), config.tracking_fallback_url.as_str());

    // Build the router
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("web_server_shutting_down");
        })
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}
