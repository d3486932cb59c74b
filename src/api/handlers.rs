//! REST and SSE endpoint handlers
//!
//! Provides handlers for:
//! - Service health and statistics (/health, /api/v1/stats)
//! - Latest values and stored history (/api/v1/live, /api/v1/snapshots)
//! - Operator actions (breaker reset, symbol reload)
//! - Live event stream over server-sent events (/api/v1/stream)

use crate::api::types::*;
use crate::broadcast::{FeedEvent, Subscription, SubscriptionMode, Topic};
use crate::error::AppError;
use crate::scheduler;
use crate::service::MarketDataService;
use crate::state::AppState;
use axum::{
    extract::{Json, Path, Query, State as AxumState},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

/// Default number of rows for the snapshot history endpoint
const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

/// Upper bound on one history request
const MAX_SNAPSHOT_LIMIT: usize = 1000;

/// Idle SSE connections get a comment line this often
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ============================================================================
// Health Check
// ============================================================================

/// Health check endpoint - GET /health or GET /
pub async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::<Empty>::success_with_message(
        "OpenAlgo live feed is running",
    ))
}

// ============================================================================
// Service
// ============================================================================

/// Service statistics - GET /api/v1/stats
pub async fn get_stats(AxumState(state): AxumState<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success_with_data(state.service.get_service_stats()))
}

/// Reset a source's circuit breaker - POST /api/v1/breakers/:source/reset
pub async fn reset_breaker(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(source): Path<String>,
) -> Result<Json<ApiResponse<Empty>>, AppError> {
    state.service.reset_circuit_breaker(&source)?;
    info!("Circuit breaker for '{}' reset via API", source);

    Ok(Json(ApiResponse::success_with_message(&format!(
        "Circuit breaker for {} reset",
        source
    ))))
}

/// Re-read the active symbol list - POST /api/v1/symbols/reload
pub async fn reload_symbols(
    AxumState(state): AxumState<Arc<AppState>>,
) -> Result<Json<ApiResponse<ReloadResult>>, AppError> {
    let active_symbols = state.service.reload_symbols().await?;
    Ok(Json(ApiResponse::success_with_data(ReloadResult {
        active_symbols,
    })))
}

// ============================================================================
// Market Data
// ============================================================================

/// Latest value for a symbol - GET /api/v1/live/:symbol
///
/// Always answers: the cached value, or an on-demand resolution that
/// bottoms out in the synthetic source.
pub async fn get_live(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.service.latest(&symbol.to_uppercase()).await;
    Json(ApiResponse::success_with_data(snapshot))
}

/// Stored history, newest first - GET /api/v1/snapshots/:symbol?limit=
pub async fn get_snapshots(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_SNAPSHOT_LIMIT);
    if limit == 0 || limit > MAX_SNAPSHOT_LIMIT {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_SNAPSHOT_LIMIT
        )));
    }

    let snapshots = state
        .service
        .recent_snapshots(&symbol.to_uppercase(), limit)
        .await?;
    Ok(Json(ApiResponse::success_with_data(snapshots)))
}

// ============================================================================
// Live Stream
// ============================================================================

/// Subscription owned by one SSE connection; unsubscribes when the client goes away
struct StreamGuard {
    service: Arc<MarketDataService>,
    subscription: Option<Subscription>,
    shutdown: watch::Receiver<bool>,
}

impl StreamGuard {
    /// Next frame for the client; `None` ends the stream
    async fn next_event(&mut self) -> Option<Event> {
        let subscription = self.subscription.as_mut()?;
        loop {
            let received = tokio::select! {
                received = subscription.receiver.recv() => received,
                _ = scheduler::shutdown_requested(&mut self.shutdown) => {
                    info!("Closing SSE stream on {}, live feed stopping", subscription.topic);
                    return None;
                }
            };

            match received {
                Ok(event) => {
                    if let Some(sse) = to_sse(&event) {
                        return Some(sse);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "SSE client on {} lagged, skipped {} events",
                        subscription.topic, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.service.unsubscribe(subscription);
        }
    }
}

fn to_sse(event: &FeedEvent) -> Option<Event> {
    match Event::default().event(event.kind()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.kind(), e);
            None
        }
    }
}

/// Topic for a stream request. No symbol means the dashboard-wide stream.
fn stream_topic(query: &StreamQuery) -> Result<Topic, AppError> {
    match query.topic.as_deref() {
        Some("heartbeat") => return Ok(Topic::Heartbeat),
        Some("all") => return Ok(Topic::AllSymbols),
        Some("symbol") | None => {}
        Some(other) => {
            return Err(AppError::Validation(format!(
                "unknown topic '{}' (expected symbol, all or heartbeat)",
                other
            )))
        }
    }

    let Some(symbol) = query.symbol.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(Topic::AllSymbols);
    };

    let mode = match query.mode.as_deref() {
        Some(mode) => mode.parse::<SubscriptionMode>().map_err(AppError::Validation)?,
        None => SubscriptionMode::Ltp,
    };

    Ok(Topic::Symbol {
        mode,
        symbol: symbol.to_uppercase(),
    })
}

/// Live event stream - GET /api/v1/stream?symbol=&mode=&topic=
pub async fn stream(
    AxumState(state): AxumState<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let topic = stream_topic(&query)?;
    info!("SSE client subscribed to {}", topic);

    let guard = StreamGuard {
        service: state.service.clone(),
        subscription: Some(state.service.subscribe(topic)),
        shutdown: state.service.shutdown_signal(),
    };

    let events = stream::unfold(guard, |mut guard| async move {
        let event = guard.next_event().await?;
        Some((Ok(event), guard))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(symbol: Option<&str>, mode: Option<&str>, topic: Option<&str>) -> StreamQuery {
        StreamQuery {
            symbol: symbol.map(String::from),
            mode: mode.map(String::from),
            topic: topic.map(String::from),
        }
    }

    #[test]
    fn test_stream_topic_selection() {
        assert_eq!(
            stream_topic(&query(Some("nifty"), None, None)).unwrap(),
            Topic::ltp("NIFTY")
        );
        assert_eq!(
            stream_topic(&query(Some("NIFTY"), Some("full"), None)).unwrap(),
            Topic::quote("NIFTY")
        );
        assert_eq!(
            stream_topic(&query(None, None, None)).unwrap(),
            Topic::AllSymbols
        );
        assert_eq!(
            stream_topic(&query(Some("NIFTY"), None, Some("heartbeat"))).unwrap(),
            Topic::Heartbeat
        );
    }

    #[test]
    fn test_stream_topic_rejects_bad_input() {
        assert!(matches!(
            stream_topic(&query(Some("NIFTY"), Some("depth"), None)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            stream_topic(&query(None, None, Some("orders"))),
            Err(AppError::Validation(_))
        ));
    }
}
