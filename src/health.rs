//! Source health registry and per-source circuit breaker
//!
//! Upstream brokers fail in bursts (expired sessions, rate-limit bans). After
//! `max_failures` consecutive failures a source's breaker opens and the
//! resolver stops calling it. Once `reset_timeout` has passed the breaker
//! admits a single trial call: success closes it, failure re-opens it with a
//! fresh timestamp.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker thresholds
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Breaker state as reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Tripped, calls are refused until the reset timeout passes
    Open,
    /// Reset timeout passed; one trial call is allowed or in flight
    HalfOpen,
}

/// Health record for one source
#[derive(Debug, Clone)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
    pub opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl SourceHealth {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            is_healthy: true,
            consecutive_failures: 0,
            last_failure_time: None,
            last_response_time_ms: None,
            opened_at: None,
            trial_started_at: None,
        }
    }

    fn trial_in_flight(&self, now: Instant, reset_timeout: Duration) -> bool {
        // A trial that never reported back expires after one more timeout
        self.trial_started_at
            .map(|started| now.duration_since(started) <= reset_timeout)
            .unwrap_or(false)
    }

    fn cooled_down(&self, now: Instant, reset_timeout: Duration) -> bool {
        self.opened_at
            .map(|opened| now.duration_since(opened) > reset_timeout)
            .unwrap_or(true)
    }

    /// Whether a call could be attempted now, without claiming the trial
    pub fn admits(&self, now: Instant, reset_timeout: Duration) -> bool {
        self.is_healthy
            || (self.cooled_down(now, reset_timeout) && !self.trial_in_flight(now, reset_timeout))
    }

    pub fn state(&self, now: Instant, reset_timeout: Duration) -> BreakerState {
        if self.is_healthy {
            BreakerState::Closed
        } else if self.trial_in_flight(now, reset_timeout) || self.cooled_down(now, reset_timeout) {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }
}

/// Read-only copy of every source's health, as seen at one instant
pub type HealthView = HashMap<String, SourceHealth>;

/// Serializable breaker summary for stats and heartbeats
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
}

/// Registry of per-source health, shared by reference with the resolver
pub struct HealthRegistry {
    config: BreakerConfig,
    sources: DashMap<String, SourceHealth>,
}

impl HealthRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            sources: DashMap::new(),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Make a source visible in stats before its first call
    pub fn register(&self, source: &str) {
        self.sources
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));
    }

    /// Record a successful call
    pub fn record_success(&self, source: &str, response_time_ms: u64) {
        let mut entry = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));

        if !entry.is_healthy {
            info!("Circuit breaker for '{}' closed after successful trial", source);
        }
        entry.is_healthy = true;
        entry.consecutive_failures = 0;
        entry.last_response_time_ms = Some(response_time_ms);
        entry.opened_at = None;
        entry.trial_started_at = None;
    }

    /// Record a failed call; returns the breaker state afterwards
    pub fn record_failure(&self, source: &str) -> BreakerState {
        let now = Instant::now();
        let mut entry = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_failure_time = Some(Utc::now());
        entry.trial_started_at = None;

        if entry.consecutive_failures >= self.config.max_failures {
            if entry.is_healthy {
                warn!(
                    "Circuit breaker for '{}' opened after {} consecutive failures",
                    source, entry.consecutive_failures
                );
            } else {
                warn!("Circuit breaker for '{}' re-opened after failed trial", source);
            }
            entry.is_healthy = false;
            entry.opened_at = Some(now);
        }

        entry.state(now, self.config.reset_timeout)
    }

    /// Whether the resolver may call this source now.
    ///
    /// When the breaker is open and the reset timeout has passed, the first
    /// caller claims the single trial call; everyone else is refused until
    /// that trial reports back.
    pub fn is_eligible(&self, source: &str) -> bool {
        let now = Instant::now();
        let reset_timeout = self.config.reset_timeout;
        let mut entry = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceHealth::new(source));

        if entry.is_healthy {
            return true;
        }
        if entry.admits(now, reset_timeout) {
            entry.trial_started_at = Some(now);
            info!("Circuit breaker for '{}' half-open, allowing trial call", source);
            return true;
        }
        false
    }

    /// Hand back a claimed trial without a verdict, for calls that never
    /// exercised the upstream (the source does not cover the symbol)
    pub fn release_trial(&self, source: &str) {
        if let Some(mut entry) = self.sources.get_mut(source) {
            entry.trial_started_at = None;
        }
    }

    /// Operator override: close the breaker immediately
    pub fn reset(&self, source: &str) -> bool {
        match self.sources.get_mut(source) {
            Some(mut entry) => {
                entry.is_healthy = true;
                entry.consecutive_failures = 0;
                entry.opened_at = None;
                entry.trial_started_at = None;
                info!("Circuit breaker for '{}' reset by operator", source);
                true
            }
            None => false,
        }
    }

    pub fn health(&self, source: &str) -> Option<SourceHealth> {
        self.sources.get(source).map(|r| r.clone())
    }

    pub fn view(&self) -> HealthView {
        self.sources
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn breaker_states(&self) -> BTreeMap<String, BreakerStatus> {
        let now = Instant::now();
        self.sources
            .iter()
            .map(|r| {
                let h = r.value();
                (
                    r.key().clone(),
                    BreakerStatus {
                        state: h.state(now, self.config.reset_timeout),
                        is_healthy: h.is_healthy,
                        consecutive_failures: h.consecutive_failures,
                        last_failure_time: h.last_failure_time,
                        last_response_time_ms: h.last_response_time_ms,
                    },
                )
            })
            .collect()
    }
}
