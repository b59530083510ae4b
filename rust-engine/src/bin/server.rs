//! Phantom Server - capture/tracking receiver.
//!
//! Hosts the credential capture endpoint, click/open tracking and the
//! external event webhook. Every request is translated into at most one
//! event for the aggregator; on shutdown the aggregator drains before the
//! process exits.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use phantom::{Aggregator, AppState, CampaignStore, EngineConfig, TrackingState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("server_starting");

    let config = EngineConfig::from_env();
    info!(
        port = config.port,
        campaigns_dir = %config.campaigns_dir.display(),
        captured_dir = %config.captured_dir.display(),
        "config_loaded"
    );

    let store = Arc::new(CampaignStore::new(config.campaigns_dir.clone()).await?);
    let aggregator = Aggregator::start(Arc::clone(&store));

    let state = AppState::new(
        aggregator.sender(),
        TrackingState::new(),
        config.captured_dir.clone(),
    );
    let app = phantom::web::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Drain outstanding events before exiting.
    aggregator.shutdown().await;

    info!("server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("server_shutting_down");
}
