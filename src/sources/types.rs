//! Common market data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Instrument class of a tracked symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Index,
    Stock,
    Commodity,
    Currency,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Index => "index",
            SymbolKind::Stock => "stock",
            SymbolKind::Commodity => "commodity",
            SymbolKind::Currency => "currency",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "index" => Ok(SymbolKind::Index),
            "stock" | "equity" => Ok(SymbolKind::Stock),
            "commodity" => Ok(SymbolKind::Commodity),
            "currency" => Ok(SymbolKind::Currency),
            other => Err(format!("unknown symbol kind '{}'", other)),
        }
    }
}

/// Tracked symbol (reference data, loaded at startup)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub exchange: String,
    pub active: bool,
}

impl Symbol {
    pub fn new(name: &str, kind: SymbolKind, exchange: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            exchange: exchange.to_string(),
            active: true,
        }
    }

    pub fn index(name: &str, exchange: &str) -> Self {
        Self::new(name, SymbolKind::Index, exchange)
    }
}

/// Built-in symbol list used when the configuration store is unavailable
pub fn default_symbols() -> Vec<Symbol> {
    vec![
        Symbol::index("NIFTY", "NSE"),
        Symbol::index("BANKNIFTY", "NSE"),
        Symbol::index("FINNIFTY", "NSE"),
        Symbol::index("MIDCPNIFTY", "NSE"),
        Symbol::index("SENSEX", "BSE"),
    ]
}

/// Static description of one data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    /// Lower is preferred
    pub priority: u32,
    pub enabled: bool,
    /// Hard bound on a single call to this source
    pub timeout_ms: u64,
    /// Minimum spacing between dispatches; `None` means unthrottled
    pub min_spacing_ms: Option<u64>,
}

impl SourceDescriptor {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            enabled: true,
            timeout_ms: 4_000,
            min_spacing_ms: None,
        }
    }

    pub fn with_spacing(mut self, spacing_ms: u64) -> Self {
        self.min_spacing_ms = Some(spacing_ms);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn min_spacing(&self) -> Option<Duration> {
        self.min_spacing_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Order sources by priority, breaking ties by name so the order is total
pub fn sort_by_priority(sources: &mut [SourceDescriptor]) {
    sources.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
}

/// Built-in source chain used when the configuration store is unavailable
pub fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::new("zerodha", 1).with_spacing(2_000),
        SourceDescriptor::new("nse", 2),
        SourceDescriptor::new("synthetic", 99),
    ]
}

/// Credentials for one source, as stored in the keychain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCredentials {
    pub api_key: String,
    pub api_secret: Option<String>,
    pub request_token: Option<String>,
    pub access_token: Option<String>,
}

/// Raw quote as returned by a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceQuote {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub change: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
}

/// Resolved quote tagged with the source that served it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub change: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// Monotonic across the process; assigned when resolution starts
    pub sequence: u64,
}

impl LiveSnapshot {
    pub fn from_quote(quote: SourceQuote, source: &str, sequence: u64) -> Self {
        Self {
            symbol: quote.symbol,
            price: quote.price,
            volume: quote.volume,
            open_interest: quote.open_interest,
            change: quote.change,
            change_percent: quote.change_percent,
            high: quote.high,
            low: quote.low,
            source: source.to_string(),
            timestamp: Utc::now(),
            sequence,
        }
    }
}
