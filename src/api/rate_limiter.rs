//! Rate limiting middleware for the REST API
//!
//! Token bucket shared by every API route. Health checks are exempt so
//! monitors keep working while a client is being throttled.

use super::types::{ApiResponse, Empty};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Requests-per-minute budget that refills continuously
#[derive(Debug)]
pub struct TokenBucket {
    burst: f64,
    available: f64,
    per_second: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// Full bucket of `rate_per_minute` requests
    pub fn per_minute(rate_per_minute: u32) -> Self {
        let burst = f64::from(rate_per_minute.max(1));
        Self {
            burst,
            available: burst,
            per_second: burst / 60.0,
            refilled_at: Instant::now(),
        }
    }

    /// Spend one request at `now`, or report how long until one is available
    pub fn take(&mut self, now: Instant) -> Result<(), Duration> {
        let idle = now.saturating_duration_since(self.refilled_at);
        let earned = idle.as_secs_f64() * self.per_second;
        self.available = (self.available + earned).min(self.burst);
        self.refilled_at = now;

        if self.available < 1.0 {
            return Err(Duration::from_secs_f64((1.0 - self.available) / self.per_second));
        }
        self.available -= 1.0;
        Ok(())
    }
}

/// Bucket shared by every API route
#[derive(Debug)]
pub struct RateLimiterState {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiterState {
    pub fn new(rate_per_minute: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::per_minute(rate_per_minute)),
        }
    }

    pub fn check(&self) -> Result<(), Duration> {
        self.bucket.lock().take(Instant::now())
    }
}

fn is_exempt(path: &str) -> bool {
    path == "/health" || path == "/"
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    match state.check() {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            tracing::warn!(
                "API rate limit hit on {}, next slot in {:?}",
                request.uri().path(),
                wait
            );
            too_many_requests(wait)
        }
    }
}

/// 429 with a whole-second `Retry-After`
fn too_many_requests(wait: Duration) -> Response {
    let seconds = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);
    let message = format!("Too many requests, retry in {}s", seconds);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiResponse::<Empty>::error("RATE_LIMITED", &message)),
    )
        .into_response();
    response
        .headers_mut()
        .insert("Retry-After", HeaderValue::from(seconds));
    response
}
