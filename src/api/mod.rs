//! REST API and live event stream
//!
//! Provides:
//! - Service stats, latest values and stored history
//! - Operator actions (breaker reset, symbol reload)
//! - Server-sent events over the broadcast hub

pub mod handlers;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use server::{router, ApiServer};
