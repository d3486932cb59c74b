//! Scriptable source for tests

use crate::error::SourceError;
use crate::sources::types::*;
use crate::sources::SourceAdapter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Behavior {
    Quote(f64),
    Fail(SourceError),
    Delay(Duration, f64),
    Panic,
}

pub struct MockSource {
    name: String,
    behavior: Mutex<Behavior>,
    per_symbol: Mutex<HashMap<String, Behavior>>,
    batch: bool,
    authenticated: AtomicBool,
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
    auth_calls: AtomicUsize,
}

impl MockSource {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior: Mutex::new(behavior),
            per_symbol: Mutex::new(HashMap::new()),
            batch: false,
            authenticated: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            auth_calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(name: &str, price: f64) -> Self {
        Self::new(name, Behavior::Quote(price))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(
            name,
            Behavior::Fail(SourceError::Upstream {
                status: 503,
                message: "service unavailable".into(),
            }),
        )
    }

    pub fn with_batch(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn logged_out(self) -> Self {
        self.authenticated.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_symbol_behavior(&self, symbol: &str, behavior: Behavior) {
        self.per_symbol.lock().insert(symbol.to_string(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, symbol: &str) -> Behavior {
        let scripted = self.per_symbol.lock().get(symbol).cloned();
        scripted.unwrap_or_else(|| self.behavior.lock().clone())
    }

    async fn run(&self, symbol: &str) -> Result<SourceQuote, SourceError> {
        match self.behavior_for(symbol) {
            Behavior::Quote(price) => Ok(quote(symbol, price)),
            Behavior::Fail(err) => Err(err),
            Behavior::Delay(delay, price) => {
                tokio::time::sleep(delay).await;
                Ok(quote(symbol, price))
            }
            Behavior::Panic => panic!("mock source panicked for {}", symbol),
        }
    }
}

pub fn quote(symbol: &str, price: f64) -> SourceQuote {
    SourceQuote {
        symbol: symbol.to_string(),
        price,
        volume: 1_000,
        open_interest: 10_000,
        change: 0.0,
        change_percent: 0.0,
        high: price,
        low: price,
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, symbol: &Symbol) -> Result<SourceQuote, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.run(&symbol.name).await
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<SourceQuote>, SourceError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.behavior.lock().clone();
        if let Behavior::Fail(err) = current {
            return Err(err);
        }
        let mut quotes = Vec::new();
        for symbol in symbols {
            if let Ok(q) = self.run(&symbol.name).await {
                quotes.push(q);
            }
        }
        Ok(quotes)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate(&self, _credentials: &SourceCredentials) -> Result<(), SourceError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }
}
