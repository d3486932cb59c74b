//! Fallback resolver
//!
//! Resolves one symbol by walking the configured sources in strict priority
//! order, skipping sources whose breaker is open. The first success wins.
//! When every real source is exhausted the synthetic generator answers
//! unconditionally, so resolution never fails.

use crate::error::SourceError;
use crate::health::{HealthRegistry, HealthView};
use crate::sources::types::*;
use crate::sources::{RequestQueue, SourceAdapter, SourceRegistry, SyntheticSource};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pick the next source to try.
///
/// Pure function of the candidate list and a health snapshot: returns the
/// first enabled, not yet tried candidate whose breaker admits a call, in
/// `(priority, name)` order.
pub fn choose_source<'a>(
    candidates: &'a [SourceDescriptor],
    health: &HealthView,
    tried: &HashSet<String>,
    now: Instant,
    reset_timeout: Duration,
) -> Option<&'a SourceDescriptor> {
    let mut ordered: Vec<&SourceDescriptor> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    ordered.into_iter().find(|source| {
        source.enabled
            && !tried.contains(&source.name)
            && health
                .get(&source.name)
                .map(|h| h.admits(now, reset_timeout))
                .unwrap_or(true)
    })
}

/// One configured source with its adapter and optional request queue
struct SourceEntry {
    descriptor: SourceDescriptor,
    adapter: Arc<dyn SourceAdapter>,
    queue: Option<RequestQueue>,
}

/// Resolves symbols to snapshots across the source chain
pub struct FallbackResolver {
    descriptors: Vec<SourceDescriptor>,
    entries: Vec<SourceEntry>,
    synthetic: Arc<SyntheticSource>,
    registry: Arc<HealthRegistry>,
    sequence: AtomicU64,
    reauth: Option<mpsc::Sender<String>>,
}

impl FallbackResolver {
    /// Build the chain from configuration. Must be called inside a Tokio
    /// runtime when any source is throttled.
    pub fn new(
        descriptors: Vec<SourceDescriptor>,
        sources: &SourceRegistry,
        synthetic: Arc<SyntheticSource>,
        registry: Arc<HealthRegistry>,
    ) -> Self {
        let mut descriptors = descriptors;
        sort_by_priority(&mut descriptors);

        let mut entries = Vec::new();
        for descriptor in descriptors {
            let Some(adapter) = sources.get(&descriptor.name) else {
                warn!("No adapter registered for source '{}', skipping", descriptor.name);
                continue;
            };
            if adapter.is_synthetic() {
                // Always last, whatever its configured priority
                continue;
            }
            let queue = descriptor
                .min_spacing()
                .map(|spacing| RequestQueue::new(&descriptor.name, spacing));
            registry.register(&descriptor.name);
            entries.push(SourceEntry {
                descriptor,
                adapter,
                queue,
            });
        }
        registry.register(synthetic.name());

        info!(
            "Source chain: {} -> {}",
            entries
                .iter()
                .map(|e| e.descriptor.name.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
            synthetic.name()
        );

        Self {
            descriptors: entries.iter().map(|e| e.descriptor.clone()).collect(),
            entries,
            synthetic,
            registry,
            sequence: AtomicU64::new(1),
            reauth: None,
        }
    }

    /// Route auth failures to a background re-authentication task
    pub fn with_reauth(mut self, sender: mpsc::Sender<String>) -> Self {
        self.reauth = Some(sender);
        self
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Real sources in resolution order (synthetic excluded)
    pub fn descriptors(&self) -> &[SourceDescriptor] {
        &self.descriptors
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.entry(name).map(|e| e.adapter.clone())
    }

    /// Requests waiting in throttled source queues
    pub fn queued_requests(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.queue.as_ref())
            .map(|q| q.pending())
            .sum()
    }

    fn entry(&self, name: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Resolve one symbol. Never fails.
    pub async fn resolve(&self, symbol: &Symbol) -> LiveSnapshot {
        let sequence = self.next_sequence();
        let reset_timeout = self.registry.config().reset_timeout;
        let mut tried = HashSet::new();

        loop {
            let view = self.registry.view();
            let Some(pick) =
                choose_source(&self.descriptors, &view, &tried, Instant::now(), reset_timeout)
            else {
                break;
            };
            tried.insert(pick.name.clone());

            // The snapshot may be stale; the registry has the final say on trials
            if !self.registry.is_eligible(&pick.name) {
                continue;
            }
            let Some(entry) = self.entry(&pick.name) else {
                continue;
            };

            let started = Instant::now();
            match self.call(entry, symbol.clone()).await {
                Ok(mut quote) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    self.registry.record_success(&entry.descriptor.name, elapsed);
                    debug!(
                        "{} resolved from {} in {}ms",
                        symbol.name, entry.descriptor.name, elapsed
                    );
                    quote.symbol = symbol.name.clone();
                    return LiveSnapshot::from_quote(quote, &entry.descriptor.name, sequence);
                }
                Err(err) if err.is_capability_miss() => {
                    debug!(
                        "Source '{}' does not cover {}: {}",
                        entry.descriptor.name, symbol.name, err
                    );
                    self.registry.release_trial(&entry.descriptor.name);
                }
                Err(err) => {
                    warn!(
                        "Source '{}' failed for {}: {}",
                        entry.descriptor.name, symbol.name, err
                    );
                    self.handle_failure(&entry.descriptor.name, &err);
                }
            }
        }

        info!("All sources exhausted for {}, serving synthetic quote", symbol.name);
        self.synthesize(symbol, sequence)
    }

    /// Resolve a symbol outside the ingestion schedule.
    ///
    /// Only sources with a closed breaker and no request queue are tried, and
    /// outcomes are not recorded, so ad-hoc lookups can neither trip a
    /// breaker nor spend a throttled source's dispatch budget.
    pub async fn resolve_detached(&self, symbol: &Symbol) -> LiveSnapshot {
        let sequence = self.next_sequence();
        let view = self.registry.view();

        for entry in &self.entries {
            let name = entry.descriptor.name.as_str();
            let closed = view.get(name).map(|h| h.is_healthy).unwrap_or(true);
            if !entry.descriptor.enabled || entry.queue.is_some() || !closed {
                continue;
            }

            match bounded(entry.descriptor.timeout(), entry.adapter.fetch(symbol)).await {
                Ok(mut quote) => {
                    quote.symbol = symbol.name.clone();
                    return LiveSnapshot::from_quote(quote, name, sequence);
                }
                Err(err) => debug!("Lookup of {} on '{}' failed: {}", symbol.name, name, err),
            }
        }

        let quote = self.synthetic.quote(symbol);
        LiveSnapshot::from_quote(quote, self.synthetic.name(), sequence)
    }

    /// One bulk call to the primary source covering every symbol.
    ///
    /// Returns `None` when the primary cannot serve a bulk request right now
    /// (no bulk endpoint, no session, breaker open) or the call fails.
    pub async fn resolve_batch(&self, symbols: &[Symbol]) -> Option<Vec<LiveSnapshot>> {
        let entry = self.entries.iter().find(|e| e.descriptor.enabled)?;
        let name = entry.descriptor.name.as_str();

        if symbols.is_empty()
            || !entry.adapter.supports_batch()
            || !entry.adapter.is_authenticated()
            || !self.registry.is_eligible(name)
        {
            return None;
        }

        let first_sequence = self
            .sequence
            .fetch_add(symbols.len() as u64, Ordering::SeqCst);
        let adapter = entry.adapter.clone();
        let timeout = entry.descriptor.timeout();
        let batch = symbols.to_vec();
        let request = async move { bounded(timeout, adapter.fetch_batch(&batch)).await };

        let started = Instant::now();
        let result = match &entry.queue {
            Some(queue) => queue.submit(request).await,
            None => request.await,
        };

        match result {
            Ok(quotes) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.registry.record_success(name, elapsed);
                let snapshots = quotes
                    .into_iter()
                    .filter_map(|quote| {
                        let index = symbols.iter().position(|s| s.name == quote.symbol)?;
                        Some(LiveSnapshot::from_quote(
                            quote,
                            name,
                            first_sequence + index as u64,
                        ))
                    })
                    .collect::<Vec<_>>();
                debug!(
                    "Bulk quote from {}: {}/{} symbols in {}ms",
                    name,
                    snapshots.len(),
                    symbols.len(),
                    elapsed
                );
                Some(snapshots)
            }
            Err(err) if err.is_capability_miss() => {
                debug!("Bulk quote from '{}' not available: {}", name, err);
                self.registry.release_trial(name);
                None
            }
            Err(err) => {
                warn!("Bulk quote from '{}' failed: {}", name, err);
                self.handle_failure(name, &err);
                None
            }
        }
    }

    /// Serve the synthetic fallback for a symbol
    fn synthesize(&self, symbol: &Symbol, sequence: u64) -> LiveSnapshot {
        let quote = self.synthetic.quote(symbol);
        self.registry.record_success(self.synthetic.name(), 0);
        LiveSnapshot::from_quote(quote, self.synthetic.name(), sequence)
    }

    async fn call(&self, entry: &SourceEntry, symbol: Symbol) -> Result<SourceQuote, SourceError> {
        let adapter = entry.adapter.clone();
        let timeout = entry.descriptor.timeout();
        let request = async move { bounded(timeout, adapter.fetch(&symbol)).await };

        match &entry.queue {
            Some(queue) => queue.submit(request).await,
            None => request.await,
        }
    }

    fn handle_failure(&self, source: &str, err: &SourceError) {
        self.registry.record_failure(source);

        if err.is_auth() {
            if let Some(reauth) = &self.reauth {
                // A full channel means a re-auth is already pending
                if reauth.try_send(source.to_string()).is_ok() {
                    info!("Queued re-authentication for '{}'", source);
                }
            }
        }
    }
}

/// Apply the hard per-call timeout; an elapsed call counts as a failure
async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit.as_millis() as u64)),
    }
}
