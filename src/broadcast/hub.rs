//! Topic-based pub/sub for live snapshots
//!
//! One `tokio::sync::broadcast` channel per topic, created on first subscribe
//! and dropped with its last subscriber. Transports (SSE today) sit on top of
//! `subscribe` and never see the map.

use super::handlers;
use crate::service::ServiceStats;
use crate::sources::types::LiveSnapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events buffered per topic before slow receivers start lagging
const TOPIC_CAPACITY: usize = 256;

/// Subscription type for market data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    Ltp,   // Last traded price only
    Quote, // Full snapshot
}

impl FromStr for SubscriptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ltp" => Ok(SubscriptionMode::Ltp),
            "quote" | "full" => Ok(SubscriptionMode::Quote),
            other => Err(format!("unknown subscription mode '{}'", other)),
        }
    }
}

/// What a subscriber listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Symbol { mode: SubscriptionMode, symbol: String },
    AllSymbols,
    Heartbeat,
}

impl Topic {
    pub fn ltp(symbol: &str) -> Self {
        Topic::Symbol {
            mode: SubscriptionMode::Ltp,
            symbol: symbol.to_string(),
        }
    }

    pub fn quote(symbol: &str) -> Self {
        Topic::Symbol {
            mode: SubscriptionMode::Quote,
            symbol: symbol.to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Symbol { mode: SubscriptionMode::Ltp, symbol } => write!(f, "ltp:{}", symbol),
            Topic::Symbol { mode: SubscriptionMode::Quote, symbol } => write!(f, "quote:{}", symbol),
            Topic::AllSymbols => f.write_str("all"),
            Topic::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// Full snapshot update
#[derive(Debug, Clone, Serialize)]
pub struct TickEvent {
    pub symbol: String,
    pub snapshot: LiveSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Last-price-only update
#[derive(Debug, Clone, Serialize)]
pub struct LtpEvent {
    pub symbol: String,
    pub ltp: f64,
    pub source: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Periodic service status
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatEvent {
    pub heartbeat: ServiceStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedEvent {
    Tick(TickEvent),
    Ltp(LtpEvent),
    Heartbeat(HeartbeatEvent),
}

impl FeedEvent {
    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Tick(_) => "tick",
            FeedEvent::Ltp(_) => "ltp",
            FeedEvent::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Live subscription handle
pub struct Subscription {
    pub id: Uuid,
    pub topic: Topic,
    pub receiver: broadcast::Receiver<FeedEvent>,
}

/// Broadcast hub for live snapshots and heartbeats
pub struct BroadcastHub {
    topics: DashMap<Topic, broadcast::Sender<FeedEvent>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let receiver = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        let id = Uuid::new_v4();
        handlers::on_subscribed(&topic, &id);

        Subscription {
            id,
            topic,
            receiver,
        }
    }

    /// Drop a subscription, removing its topic when nobody else listens
    pub fn unsubscribe(&self, subscription: Subscription) {
        let Subscription {
            id,
            topic,
            receiver,
        } = subscription;
        drop(receiver);
        handlers::on_unsubscribed(&topic, &id);
        self.release(&topic);
    }

    /// Remove a topic whose receivers are all gone
    pub fn release(&self, topic: &Topic) -> bool {
        let removed = self
            .topics
            .remove_if(topic, |_, sender| sender.receiver_count() == 0)
            .is_some();
        if removed {
            handlers::on_topic_closed(topic);
        }
        removed
    }

    /// Sweep topics left behind by receivers dropped without unsubscribing
    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.topics.len())
    }

    /// Fan a batch out to symbol topics and the all-symbols topic
    pub fn publish(&self, snapshots: &[LiveSnapshot]) -> usize {
        let mut delivered = 0;
        for snapshot in snapshots {
            let now = Utc::now();
            let tick = FeedEvent::Tick(TickEvent {
                symbol: snapshot.symbol.clone(),
                snapshot: snapshot.clone(),
                timestamp: now,
            });
            let ltp = FeedEvent::Ltp(LtpEvent {
                symbol: snapshot.symbol.clone(),
                ltp: snapshot.price,
                source: snapshot.source.clone(),
                sequence: snapshot.sequence,
                timestamp: now,
            });

            delivered += self.send(&Topic::quote(&snapshot.symbol), tick.clone());
            delivered += self.send(&Topic::ltp(&snapshot.symbol), ltp);
            delivered += self.send(&Topic::AllSymbols, tick);
        }
        if delivered > 0 {
            handlers::on_published(snapshots.len(), delivered);
        }
        delivered
    }

    pub fn publish_heartbeat(&self, stats: ServiceStats) -> usize {
        self.send(
            &Topic::Heartbeat,
            FeedEvent::Heartbeat(HeartbeatEvent {
                heartbeat: stats,
                timestamp: Utc::now(),
            }),
        )
    }

    fn send(&self, topic: &Topic, event: FeedEvent) -> usize {
        // Clone the sender out so no map lock is held while sending
        let Some(sender) = self.topics.get(topic).map(|s| s.clone()) else {
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
