//! Ingestion tick
//!
//! Every tick resolves all active symbols, preferring one bulk call to the
//! primary source and falling back to concurrent per-symbol resolution. Each
//! per-symbol resolution runs in its own task so a panic for one symbol
//! cannot take the rest of the tick down.

use crate::broadcast::BroadcastHub;
use crate::buffer::{Enqueued, WriteBuffer};
use crate::resolver::FallbackResolver;
use crate::sources::types::{LiveSnapshot, Symbol};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub symbols: usize,
    pub batched: usize,
    pub resolved: usize,
    pub failed: usize,
    pub stale: usize,
    pub delivered: usize,
}

/// Drives resolution for the active symbol list
pub struct Ingestor {
    resolver: Arc<FallbackResolver>,
    buffer: Arc<WriteBuffer>,
    hub: Arc<BroadcastHub>,
    symbols: Arc<RwLock<Vec<Symbol>>>,
    latest: Arc<DashMap<String, LiveSnapshot>>,
    ticks: AtomicU64,
}

impl Ingestor {
    pub fn new(
        resolver: Arc<FallbackResolver>,
        buffer: Arc<WriteBuffer>,
        hub: Arc<BroadcastHub>,
        symbols: Arc<RwLock<Vec<Symbol>>>,
        latest: Arc<DashMap<String, LiveSnapshot>>,
    ) -> Self {
        Self {
            resolver,
            buffer,
            hub,
            symbols,
            latest,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn ticks_completed(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Last-update bookkeeping; an older sequence never replaces a newer one
    fn remember(&self, snapshot: &LiveSnapshot) {
        self.latest
            .entry(snapshot.symbol.clone())
            .and_modify(|current| {
                if snapshot.sequence > current.sequence {
                    *current = snapshot.clone();
                }
            })
            .or_insert_with(|| snapshot.clone());
    }

    pub async fn run_tick(&self) -> TickReport {
        let symbols: Vec<Symbol> = self
            .symbols
            .read()
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect();

        let mut report = TickReport {
            symbols: symbols.len(),
            ..Default::default()
        };
        if symbols.is_empty() {
            warn!("No active symbols, skipping tick");
            self.ticks.fetch_add(1, Ordering::SeqCst);
            return report;
        }

        let mut snapshots: Vec<LiveSnapshot> = Vec::with_capacity(symbols.len());
        let mut remaining = symbols.clone();

        if let Some(batch) = self.resolver.resolve_batch(&symbols).await {
            remaining.retain(|symbol| !batch.iter().any(|s| s.symbol == symbol.name));
            report.batched = batch.len();
            snapshots.extend(batch);
        }

        let tasks: Vec<(String, JoinHandle<LiveSnapshot>)> = remaining
            .into_iter()
            .map(|symbol| {
                let resolver = self.resolver.clone();
                let name = symbol.name.clone();
                (name, tokio::spawn(async move { resolver.resolve(&symbol).await }))
            })
            .collect();

        for (name, task) in tasks {
            match task.await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    report.failed += 1;
                    error!("Resolution for {} aborted: {}", name, e);
                }
            }
        }

        for snapshot in &snapshots {
            match self.buffer.enqueue(snapshot.clone()) {
                Enqueued::Stale => report.stale += 1,
                Enqueued::Inserted | Enqueued::Replaced => {}
            }
            self.remember(snapshot);
        }

        report.resolved = snapshots.len();
        report.delivered = self.hub.publish(&snapshots);
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        debug!(
            "Tick {}: {}/{} symbols resolved ({} bulk, {} failed, {} stale)",
            tick, report.resolved, report.symbols, report.batched, report.failed, report.stale
        );
        report
    }
}
