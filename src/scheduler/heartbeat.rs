//! Heartbeat loop
//!
//! Publishes service stats to the heartbeat topic and sweeps topics whose
//! subscribers went away without unsubscribing.

use super::{spawn_periodic, LoopHandle};
use crate::broadcast::BroadcastHub;
use crate::service::ServiceStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub fn spawn<F>(
    hub: Arc<BroadcastHub>,
    stats: F,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> LoopHandle
where
    F: Fn() -> ServiceStats + Send + Sync + 'static,
{
    let stats = Arc::new(stats);
    spawn_periodic("heartbeat", period, shutdown, move || {
        let hub = hub.clone();
        let stats = stats.clone();
        async move {
            let pruned = hub.prune();
            if pruned > 0 {
                debug!("Pruned {} idle topics", pruned);
            }
            let receivers = hub.publish_heartbeat(stats());
            debug!("Heartbeat sent to {} subscribers", receivers);
        }
    })
}
