//! Broadcast lifecycle callbacks
//!
//! Logging hooks for subscription events.

use super::hub::Topic;
use tracing::{debug, info};
use uuid::Uuid;

/// Handle a new subscription
pub fn on_subscribed(topic: &Topic, id: &Uuid) {
    info!("Subscriber {} joined topic {}", id, topic);
}

/// Handle an explicit unsubscribe
pub fn on_unsubscribed(topic: &Topic, id: &Uuid) {
    info!("Subscriber {} left topic {}", id, topic);
}

/// Handle removal of a topic with no subscribers left
pub fn on_topic_closed(topic: &Topic) {
    debug!("Topic {} closed", topic);
}

/// Handle a published batch
pub fn on_published(snapshots: usize, deliveries: usize) {
    debug!(
        "Published {} snapshots ({} deliveries)",
        snapshots, deliveries
    );
}
