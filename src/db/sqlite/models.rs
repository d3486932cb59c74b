//! SQLite database models

use crate::health::BreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Feed settings (single row in `feed_settings`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    pub ingest_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub breaker_max_failures: u32,
    pub breaker_reset_secs: u64,
    // REST/SSE server
    pub api_enabled: bool,
    pub api_host: String,
    pub api_port: u16,
    pub api_rate_limit_per_minute: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ingest_interval_secs: 5,
            flush_interval_secs: 10,
            heartbeat_interval_secs: 30,
            breaker_max_failures: 5,
            breaker_reset_secs: 300,
            api_enabled: true,
            api_host: "127.0.0.1".to_string(),
            api_port: 5100,
            api_rate_limit_per_minute: 600,
        }
    }
}

impl FeedSettings {
    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            max_failures: self.breaker_max_failures.max(1),
            reset_timeout: Duration::from_secs(self.breaker_reset_secs),
        }
    }
}
