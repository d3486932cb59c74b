//! OpenAlgo Live Feed - market data ingestion service
//!
//! Pulls live quotes for a configured symbol list from a prioritized chain
//! of sources (Zerodha Kite, NSE, synthetic fallback), guards each source
//! with a circuit breaker, persists snapshots to SQLite in batches and fans
//! updates out to subscribers over a REST/SSE API.

pub mod api;
pub mod broadcast;
pub mod buffer;
pub mod db;
pub mod error;
pub mod health;
pub mod resolver;
pub mod scheduler;
pub mod security;
pub mod service;
pub mod sources;
pub mod state;

use api::ApiServer;
use state::AppState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize and run the live feed until Ctrl+C
pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openalgo_livefeed=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OpenAlgo Live Feed...");

    // Initialize application state (starts the ingestion pipeline)
    let app_state = Arc::new(AppState::new(state::data_dir_from_env()).await?);
    tracing::info!("Application state initialized");

    // Start API server if enabled
    let mut server = ApiServer::new();
    if let Err(e) = server.start(app_state.clone()).await {
        tracing::error!("Failed to start API server: {}", e);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    // Stopping the feed first flushes the buffer and ends open SSE streams,
    // which lets the server drain.
    if let Err(e) = app_state.service.stop_service().await {
        tracing::error!("Live feed stopped with errors: {}", e);
    }
    server.stop().await;

    tracing::info!("OpenAlgo Live Feed stopped");
    Ok(())
}
