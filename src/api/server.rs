//! HTTP server for the REST API and live stream
//!
//! Provides:
//! - REST API for stats, latest values and history (/api/v1/*)
//! - Server-sent event stream for dashboards (/api/v1/stream)
//! - Rate limiting so one client cannot starve the rest

use crate::api::handlers;
use crate::api::rate_limiter::{rate_limit_middleware, RateLimiterState};
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Build the router with every route, the rate limiter, CORS and tracing
pub fn router(state: Arc<AppState>, rate_per_minute: u32) -> Router {
    let rate_limiter = Arc::new(RateLimiterState::new(rate_per_minute));

    // Build CORS layer (allow all, dashboards are served from elsewhere)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ================================================================
        // Health check
        // ================================================================
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::health_check))

        // ================================================================
        // REST API v1
        // ================================================================
        .route("/api/v1/stats", get(handlers::get_stats))
        .route("/api/v1/live/:symbol", get(handlers::get_live))
        .route("/api/v1/snapshots/:symbol", get(handlers::get_snapshots))
        .route("/api/v1/breakers/:source/reset", post(handlers::reset_breaker))
        .route("/api/v1/symbols/reload", post(handlers::reload_symbols))

        // Live stream (server-sent events)
        .route("/api/v1/stream", get(handlers::stream))

        // ================================================================
        // Add state and middleware
        // ================================================================
        .with_state(state)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// How long `stop` waits for open connections before giving up on them
const STOP_GRACE: Duration = Duration::from_secs(5);

/// REST/SSE server manager
pub struct ApiServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    stop_grace: Duration,
}

impl Default for ApiServer {
    fn default() -> Self {
        Self {
            shutdown_tx: None,
            task: None,
            stop_grace: STOP_GRACE,
        }
    }
}

impl ApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Start the server; returns the bound address, or `None` when disabled
    pub async fn start(&mut self, state: Arc<AppState>) -> Result<Option<SocketAddr>> {
        let settings = state.settings.clone();
        if !settings.api_enabled {
            info!("REST API server is disabled");
            return Ok(None);
        }

        // Parse address
        let addr: SocketAddr = format!("{}:{}", settings.api_host, settings.api_port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid address: {}", e)))?;

        info!(
            "Rate limit: API={}/min",
            settings.api_rate_limit_per_minute
        );
        let app = router(state, settings.api_rate_limit_per_minute);

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            AppError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;
        let bound = listener.local_addr()?;

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        // Spawn server task
        self.task = Some(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            });

            if let Err(e) = server.await {
                error!("API server error: {}", e);
            }
        }));

        info!("Live feed API server listening on {}", bound);
        info!("  GET  /health");
        info!("  GET  /api/v1/stats");
        info!("  GET  /api/v1/live/:symbol");
        info!("  GET  /api/v1/snapshots/:symbol?limit=");
        info!("  POST /api/v1/breakers/:source/reset");
        info!("  POST /api/v1/symbols/reload");
        info!("  GET  /api/v1/stream?symbol=&mode=&topic=");

        Ok(Some(bound))
    }

    /// Stop the server, giving in-flight requests the grace period to finish.
    /// Connections still open after that are abandoned.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("API server stop signal sent");
        }
        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(self.stop_grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("API server task failed: {}", e),
            Err(_) => {
                warn!(
                    "API server still busy after {:?}, abandoning open connections",
                    self.stop_grace
                );
                task.abort();
                let _ = task.await;
            }
        }
    }

    /// Check if server is running
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}
