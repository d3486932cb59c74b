//! Scheduler module for the live feed
//!
//! Handles the periodic loops of the pipeline:
//! - Ingestion tick (resolve every active symbol)
//! - Write buffer flush
//! - Heartbeat broadcast
//! - Market session timing (NSE cash hours, IST)

pub mod flush;
pub mod heartbeat;
pub mod ingestion;
pub mod market_hours;

pub use flush::Flusher;
pub use ingestion::{Ingestor, TickReport};
pub use market_hours::is_market_open;

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Shutdown signal shared by every loop
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a spawned loop
pub struct LoopHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    /// Wait for the loop to exit after shutdown was signalled
    pub async fn join(self) {
        match self.handle.await {
            Ok(()) => debug!("{} loop joined", self.name),
            Err(e) => error!("{} loop terminated abnormally: {}", self.name, e),
        }
    }
}

/// Resolve once shutdown was signalled or its sender is gone
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // An error means the sender was dropped, which also ends the service
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Run `task` every `period` until shutdown is signalled.
///
/// The first run happens immediately. A run that overruns the period skips
/// the missed ticks instead of bursting, and shutdown is only observed
/// between runs, so an in-flight run always completes.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> LoopHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("{} loop started (every {:?})", name, period);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => task().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("{} loop stopped", name);
    });

    LoopHandle::new(name, handle)
}
