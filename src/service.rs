//! Market data service
//!
//! Wires the pipeline together and owns its lifecycle: loads configuration,
//! builds the resolver chain, spawns the ingestion, flush, heartbeat and
//! re-authentication tasks, and tears them down again on stop.

use crate::broadcast::{BroadcastHub, Subscription, Topic};
use crate::buffer::WriteBuffer;
use crate::db::{ConfigStore, SnapshotStore};
use crate::db::sqlite::FeedSettings;
use crate::error::{AppError, Result};
use crate::health::{BreakerConfig, BreakerStatus, HealthRegistry};
use crate::resolver::FallbackResolver;
use crate::scheduler::{self, market_hours, Flusher, Ingestor, LoopHandle, Shutdown};
use crate::sources::types::*;
use crate::sources::SourceRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Pending re-authentication requests; extra requests while full are dropped
const REAUTH_QUEUE: usize = 8;

/// Bound on one re-authentication attempt
const REAUTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Loop cadence and breaker thresholds
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub ingest_interval: Duration,
    pub flush_interval: Duration,
    pub heartbeat_interval: Duration,
    pub breaker: BreakerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig::from(&FeedSettings::default())
    }
}

impl From<&FeedSettings> for ServiceConfig {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            ingest_interval: settings.ingest_interval(),
            flush_interval: settings.flush_interval(),
            heartbeat_interval: settings.heartbeat_interval(),
            breaker: settings.breaker(),
        }
    }
}

/// Operational snapshot of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub is_running: bool,
    pub active_symbol_count: usize,
    pub buffer_size: usize,
    pub breaker_state: BTreeMap<String, BreakerStatus>,
    pub last_update_per_symbol: BTreeMap<String, DateTime<Utc>>,
    pub market_open: bool,
    pub ticks_completed: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
    pub queued_requests: usize,
    pub subscribed_topics: usize,
}

/// Shared pipeline parts, also read by the heartbeat loop
struct FeedCore {
    resolver: Arc<FallbackResolver>,
    health: Arc<HealthRegistry>,
    buffer: Arc<WriteBuffer>,
    hub: Arc<BroadcastHub>,
    symbols: Arc<RwLock<Vec<Symbol>>>,
    latest: Arc<DashMap<String, LiveSnapshot>>,
    ingestor: Arc<Ingestor>,
    flusher: Arc<Flusher>,
    running: AtomicBool,
}

impl FeedCore {
    fn stats(&self) -> ServiceStats {
        ServiceStats {
            is_running: self.running.load(Ordering::SeqCst),
            active_symbol_count: self.symbols.read().iter().filter(|s| s.active).count(),
            buffer_size: self.buffer.len(),
            breaker_state: self.health.breaker_states(),
            last_update_per_symbol: self
                .latest
                .iter()
                .map(|r| (r.key().clone(), r.value().timestamp))
                .collect(),
            market_open: market_hours::market_open_now(),
            ticks_completed: self.ingestor.ticks_completed(),
            last_flush_at: self.flusher.last_flush_at(),
            queued_requests: self.resolver.queued_requests(),
            subscribed_topics: self.hub.topic_count(),
        }
    }
}

/// Live market data service
pub struct MarketDataService {
    core: Arc<FeedCore>,
    config: Arc<dyn ConfigStore>,
    store: Arc<dyn SnapshotStore>,
    shutdown: Shutdown,
    loops: Mutex<Vec<LoopHandle>>,
}

impl MarketDataService {
    /// Load configuration, build the pipeline and start every loop
    pub async fn start(
        settings: ServiceConfig,
        sources: SourceRegistry,
        config: Arc<dyn ConfigStore>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let descriptors = load_sources(config.as_ref()).await;
        let symbols = load_symbols(config.as_ref()).await;
        info!(
            "Starting live feed: {} symbols, {} sources",
            symbols.len(),
            descriptors.len()
        );

        let health = Arc::new(HealthRegistry::new(settings.breaker));
        let (reauth_tx, reauth_rx) = mpsc::channel(REAUTH_QUEUE);
        let resolver = Arc::new(
            FallbackResolver::new(
                descriptors,
                &sources,
                sources.synthetic(),
                health.clone(),
            )
            .with_reauth(reauth_tx.clone()),
        );

        let buffer = Arc::new(WriteBuffer::new());
        let hub = Arc::new(BroadcastHub::new());
        let symbols = Arc::new(RwLock::new(symbols));
        let latest = Arc::new(DashMap::new());
        let ingestor = Arc::new(Ingestor::new(
            resolver.clone(),
            buffer.clone(),
            hub.clone(),
            symbols.clone(),
            latest.clone(),
        ));
        let flusher = Arc::new(Flusher::new(buffer.clone(), store.clone()));

        let core = Arc::new(FeedCore {
            resolver,
            health,
            buffer,
            hub,
            symbols,
            latest,
            ingestor,
            flusher,
            running: AtomicBool::new(true),
        });

        let service = Self {
            core,
            config,
            store,
            shutdown: Shutdown::new(),
            loops: Mutex::new(Vec::new()),
        };

        // Sessions are established in the background; until then the
        // resolver simply falls through to the next source.
        for descriptor in service.core.resolver.descriptors() {
            let logged_out = service
                .core
                .resolver
                .adapter(&descriptor.name)
                .map(|adapter| !adapter.is_authenticated())
                .unwrap_or(false);
            if logged_out {
                let _ = reauth_tx.try_send(descriptor.name.clone());
            }
        }
        drop(reauth_tx);

        service.spawn_loops(settings, reauth_rx);
        Ok(service)
    }

    fn spawn_loops(&self, settings: ServiceConfig, reauth_rx: mpsc::Receiver<String>) {
        let ingestor = self.core.ingestor.clone();
        let ingestion = scheduler::spawn_periodic(
            "ingestion",
            settings.ingest_interval,
            self.shutdown.subscribe(),
            move || {
                let ingestor = ingestor.clone();
                async move {
                    ingestor.run_tick().await;
                }
            },
        );

        let flusher = self.core.flusher.clone();
        let flush = scheduler::spawn_periodic(
            "flush",
            settings.flush_interval,
            self.shutdown.subscribe(),
            move || {
                let flusher = flusher.clone();
                async move {
                    // Failures are logged and requeued inside
                    let _ = flusher.flush_once().await;
                }
            },
        );

        let core = self.core.clone();
        let heartbeat = scheduler::heartbeat::spawn(
            self.core.hub.clone(),
            move || core.stats(),
            settings.heartbeat_interval,
            self.shutdown.subscribe(),
        );

        let reauth = spawn_reauth(
            self.core.resolver.clone(),
            self.config.clone(),
            reauth_rx,
            self.shutdown.subscribe(),
        );

        self.loops
            .lock()
            .extend([ingestion, flush, heartbeat, reauth]);
    }

    /// Stop every loop, then flush what is left in the buffer
    pub async fn stop_service(&self) -> Result<()> {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            debug!("Live feed already stopped");
            return Ok(());
        }

        info!("Stopping live feed...");
        self.shutdown.trigger();

        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            handle.join().await;
        }

        match self.core.flusher.flush_once().await {
            Ok(count) => {
                info!("Live feed stopped, final flush wrote {} snapshots", count);
                Ok(())
            }
            Err(e) => {
                error!("Final flush failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub fn get_service_stats(&self) -> ServiceStats {
        self.core.stats()
    }

    /// Operator override: close a source's breaker immediately
    pub fn reset_circuit_breaker(&self, source: &str) -> Result<()> {
        if self.core.health.reset(source) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Unknown source: {}", source)))
        }
    }

    /// Re-read the active symbol list; returns the new count.
    ///
    /// A store error keeps the current list. An empty list falls back to the
    /// built-in symbols.
    pub async fn reload_symbols(&self) -> Result<usize> {
        let mut symbols = self.config.list_active_symbols().await.map_err(|e| {
            warn!("Symbol reload failed, keeping current list: {}", e);
            e
        })?;
        if symbols.is_empty() {
            warn!("No active symbols configured, using built-in list");
            symbols = default_symbols();
        }

        let count = symbols.len();
        self.core
            .latest
            .retain(|name, _| symbols.iter().any(|s| &s.name == name));
        *self.core.symbols.write() = symbols;

        info!("Reloaded {} active symbols", count);
        Ok(count)
    }

    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.core.symbols.read().clone()
    }

    /// Latest value for a symbol, looked up on demand when nothing is cached.
    /// On-demand lookups never touch breaker state.
    pub async fn latest(&self, symbol: &str) -> LiveSnapshot {
        if let Some(cached) = self.core.latest.get(symbol) {
            return cached.clone();
        }

        let tracked = self
            .core
            .symbols
            .read()
            .iter()
            .find(|s| s.name == symbol)
            .cloned();
        let symbol = tracked.unwrap_or_else(|| Symbol::new(symbol, SymbolKind::Stock, "NSE"));
        self.core.resolver.resolve_detached(&symbol).await
    }

    pub async fn recent_snapshots(&self, symbol: &str, limit: usize) -> Result<Vec<LiveSnapshot>> {
        self.store.query_recent_snapshots(symbol, limit).await
    }

    /// Flips to `true` once `stop_service` begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.core.hub.subscribe(topic)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.core.hub.unsubscribe(subscription)
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.core.hub.clone()
    }
}

/// Source chain from configuration, or the built-in chain
async fn load_sources(config: &dyn ConfigStore) -> Vec<SourceDescriptor> {
    match config.list_sources().await {
        Ok(sources) if !sources.is_empty() => sources,
        Ok(_) => {
            warn!("No sources configured, using built-in chain");
            default_sources()
        }
        Err(e) => {
            warn!("Failed to load sources, using built-in chain: {}", e);
            default_sources()
        }
    }
}

/// Active symbols from configuration, or the built-in list
async fn load_symbols(config: &dyn ConfigStore) -> Vec<Symbol> {
    match config.list_active_symbols().await {
        Ok(symbols) if !symbols.is_empty() => symbols,
        Ok(_) => {
            warn!("No active symbols configured, using built-in list");
            default_symbols()
        }
        Err(e) => {
            warn!("Failed to load symbols, using built-in list: {}", e);
            default_symbols()
        }
    }
}

fn spawn_reauth(
    resolver: Arc<FallbackResolver>,
    config: Arc<dyn ConfigStore>,
    mut requests: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) -> LoopHandle {
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(source) => reauthenticate(&resolver, config.as_ref(), &source).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Re-authentication task stopped");
    });

    LoopHandle::new("reauth", handle)
}

async fn reauthenticate(resolver: &FallbackResolver, config: &dyn ConfigStore, source: &str) {
    let Some(adapter) = resolver.adapter(source) else {
        return;
    };
    if adapter.is_authenticated() {
        // An earlier request in the queue already restored the session
        return;
    }

    let credentials = match config.get_source_credentials(source).await {
        Ok(Some(credentials)) => credentials,
        Ok(None) => {
            warn!("No credentials stored for '{}', cannot re-authenticate", source);
            return;
        }
        Err(e) => {
            warn!("Failed to read credentials for '{}': {}", source, e);
            return;
        }
    };

    info!("Re-authenticating '{}'", source);
    match tokio::time::timeout(REAUTH_TIMEOUT, adapter.authenticate(&credentials)).await {
        Ok(Ok(())) => info!("Source '{}' re-authenticated", source),
        Ok(Err(e)) => warn!("Re-authentication of '{}' failed: {}", source, e),
        Err(_) => warn!("Re-authentication of '{}' timed out", source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteDb;
    use crate::db::FeedConfigStore;
    use crate::error::SourceError;
    use crate::security::{CredentialStore, MemoryCredentials};
    use crate::sources::mock::{Behavior, MockSource};
    use async_trait::async_trait;

    fn fast_config(max_failures: u32) -> ServiceConfig {
        ServiceConfig {
            ingest_interval: Duration::from_millis(20),
            flush_interval: Duration::from_millis(40),
            heartbeat_interval: Duration::from_millis(30),
            breaker: BreakerConfig {
                max_failures,
                reset_timeout: Duration::from_secs(300),
            },
        }
    }

    struct Harness {
        db: Arc<SqliteDb>,
        credentials: Arc<MemoryCredentials>,
    }

    impl Harness {
        fn new() -> Self {
            let db = Arc::new(SqliteDb::open_in_memory().unwrap());
            // Unthrottled primary keeps the tests fast
            db.upsert_source(&SourceDescriptor::new("zerodha", 1)).unwrap();
            Self {
                db,
                credentials: Arc::new(MemoryCredentials::new()),
            }
        }

        async fn start(&self, primary: Arc<MockSource>, max_failures: u32) -> MarketDataService {
            let mut sources = SourceRegistry::new();
            sources.register(primary);
            let config = Arc::new(FeedConfigStore::new(self.db.clone(), self.credentials.clone()));
            MarketDataService::start(fast_config(max_failures), sources, config, self.db.clone())
                .await
                .unwrap()
        }
    }

    struct BrokenConfig;

    #[async_trait]
    impl ConfigStore for BrokenConfig {
        async fn list_active_symbols(&self) -> Result<Vec<Symbol>> {
            Err(AppError::Config("database locked".into()))
        }

        async fn list_sources(&self) -> Result<Vec<SourceDescriptor>> {
            Err(AppError::Config("database locked".into()))
        }

        async fn get_source_credentials(&self, _source: &str) -> Result<Option<SourceCredentials>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_start_ingest_and_stop_flushes() {
        let harness = Harness::new();
        let primary = Arc::new(MockSource::ok("zerodha", 24_500.0));
        let service = harness.start(primary.clone(), 5).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = service.get_service_stats();
        assert!(stats.is_running);
        assert_eq!(stats.active_symbol_count, 5);
        assert!(stats.ticks_completed >= 1);
        assert_eq!(stats.last_update_per_symbol.len(), 5);
        assert!(stats.breaker_state.contains_key("zerodha"));

        service.stop_service().await.unwrap();
        assert!(!service.is_running());
        assert_eq!(service.get_service_stats().buffer_size, 0);
        assert!(harness.db.count_snapshots("NIFTY").unwrap() >= 1);

        // Loops are gone: no more upstream calls after stop
        let calls = primary.calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(primary.calls(), calls);

        // Stopping twice is harmless
        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_broken_config_falls_back_to_builtins() {
        let db = Arc::new(SqliteDb::open_in_memory().unwrap());

        // No adapters registered: the built-in chain degrades to synthetic
        let service = MarketDataService::start(
            fast_config(5),
            SourceRegistry::new(),
            Arc::new(BrokenConfig),
            db,
        )
        .await
        .unwrap();

        let names: Vec<String> = service.active_symbols().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["NIFTY", "BANKNIFTY", "FINNIFTY", "MIDCPNIFTY", "SENSEX"]);
        assert!(service.reload_symbols().await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.latest("NIFTY").await.source, "synthetic");
        assert_eq!(service.active_symbols().len(), 5);

        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_circuit_breaker() {
        let harness = Harness::new();
        let primary = Arc::new(MockSource::failing("zerodha"));
        let service = harness.start(primary, 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = &service.get_service_stats().breaker_state["zerodha"];
        assert!(!state.is_healthy);

        service.reset_circuit_breaker("zerodha").unwrap();
        let state = &service.get_service_stats().breaker_state["zerodha"];
        assert!(state.is_healthy);
        assert_eq!(state.consecutive_failures, 0);

        assert!(matches!(
            service.reset_circuit_breaker("unknown"),
            Err(AppError::NotFound(_))
        ));
        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_symbols_picks_up_changes() {
        let harness = Harness::new();
        let service = harness
            .start(Arc::new(MockSource::ok("zerodha", 1.0)), 5)
            .await;

        harness.db.set_symbol_active("SENSEX", false).unwrap();
        harness.db.set_symbol_active("MIDCPNIFTY", false).unwrap();
        assert_eq!(service.reload_symbols().await.unwrap(), 3);
        assert_eq!(service.get_service_stats().active_symbol_count, 3);

        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure_triggers_background_reauth() {
        let harness = Harness::new();
        harness
            .credentials
            .store_credentials(
                "zerodha",
                &SourceCredentials {
                    api_key: "kite".into(),
                    access_token: Some("token".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let primary = Arc::new(
            MockSource::new("zerodha", Behavior::Fail(SourceError::Auth("TokenException".into())))
                .logged_out(),
        );
        let service = harness.start(primary.clone(), 5).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(primary.auth_calls() >= 1);
        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_always_returns_a_value() {
        let harness = Harness::new();
        let service = harness
            .start(Arc::new(MockSource::ok("zerodha", 24_500.0)), 5)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let nifty = service.latest("NIFTY").await;
        assert_eq!(nifty.source, "zerodha");

        // Untracked symbol, resolved on demand
        let other = service.latest("RELIANCE").await;
        assert_eq!(other.symbol, "RELIANCE");

        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_subscribers() {
        let harness = Harness::new();
        let service = harness
            .start(Arc::new(MockSource::ok("zerodha", 1.0)), 5)
            .await;
        let mut sub = service.subscribe(Topic::Heartbeat);

        let event = tokio::time::timeout(Duration::from_secs(2), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "heartbeat");

        service.unsubscribe(sub);
        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_on_demand_lookups_do_not_trip_breaker() {
        let harness = Harness::new();
        let primary = Arc::new(MockSource::ok("zerodha", 24_500.0));
        for name in ["X1", "X2", "X3", "X4", "X5"] {
            primary.set_symbol_behavior(
                name,
                Behavior::Fail(SourceError::Upstream {
                    status: 500,
                    message: "unknown instrument".into(),
                }),
            );
        }
        let service = harness.start(primary, 1).await;

        for name in ["X1", "X2", "X3", "X4", "X5"] {
            let snapshot = service.latest(name).await;
            assert_eq!(snapshot.symbol, name);
            assert_eq!(snapshot.source, "synthetic");
        }

        let state = &service.get_service_stats().breaker_state["zerodha"];
        assert!(state.is_healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(service.latest("NIFTY").await.source, "zerodha");

        service.stop_service().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_signal_flips_on_stop() {
        let harness = Harness::new();
        let service = harness
            .start(Arc::new(MockSource::ok("zerodha", 1.0)), 5)
            .await;
        let mut signal = service.shutdown_signal();
        assert!(!*signal.borrow());

        service.stop_service().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), scheduler::shutdown_requested(&mut signal))
            .await
            .unwrap();
    }
}
