//! Market data source adapters

pub mod types;
pub mod queue;
pub mod zerodha;
pub mod nse;
pub mod synthetic;
#[cfg(test)]
pub mod mock;

use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use types::*;

pub use queue::RequestQueue;
pub use synthetic::SyntheticSource;

/// Source trait that all market data origins implement
///
/// Adapters wrap exactly one upstream. They never retry and never panic on an
/// upstream error response; the resolver decides what happens next.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source name (e.g., "zerodha", "nse", "synthetic")
    fn name(&self) -> &str;

    /// Fetch a quote for a single symbol
    async fn fetch(&self, symbol: &Symbol) -> Result<SourceQuote, SourceError>;

    /// Whether `fetch_batch` can cover many symbols in one upstream call
    fn supports_batch(&self) -> bool {
        false
    }

    /// Fetch quotes for many symbols in one upstream call
    async fn fetch_batch(&self, _symbols: &[Symbol]) -> Result<Vec<SourceQuote>, SourceError> {
        Err(SourceError::Unsupported(format!(
            "{} has no bulk quote endpoint",
            self.name()
        )))
    }

    /// Whether the adapter currently holds a usable session
    fn is_authenticated(&self) -> bool {
        true
    }

    /// Establish or refresh the upstream session
    async fn authenticate(&self, _credentials: &SourceCredentials) -> Result<(), SourceError> {
        Ok(())
    }

    /// The synthetic generator is the unconditional last resort
    fn is_synthetic(&self) -> bool {
        false
    }
}

/// Source registry for looking up adapters by name
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn SourceAdapter>>,
    synthetic: Option<Arc<SyntheticSource>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            synthetic: None,
        }
    }

    /// Registry with every built-in source
    pub fn with_builtin_sources() -> Result<Self, SourceError> {
        let mut registry = Self::new();
        registry.register(Arc::new(zerodha::ZerodhaSource::new()?));
        registry.register(Arc::new(nse::NseSource::new()?));
        registry.register_synthetic(Arc::new(SyntheticSource::new()));
        Ok(registry)
    }

    /// Register an adapter under its own name, replacing any previous one
    pub fn register(&mut self, source: Arc<dyn SourceAdapter>) {
        self.sources.insert(source.name().to_string(), source);
    }

    /// Get source by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.sources.get(name).cloned()
    }

    /// Register the fallback generator, also reachable by name
    pub fn register_synthetic(&mut self, synthetic: Arc<SyntheticSource>) {
        self.register(synthetic.clone());
        self.synthetic = Some(synthetic);
    }

    /// The registered fallback generator, or a fresh one when none was registered
    pub fn synthetic(&self) -> Arc<SyntheticSource> {
        self.synthetic
            .clone()
            .unwrap_or_else(|| Arc::new(SyntheticSource::new()))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
