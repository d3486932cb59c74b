//! NSE public index feed (exchange source)
//!
//! Unauthenticated, index-only. One `allIndices` call carries every NSE index,
//! so the payload is downloaded once per tick and shared by every lookup.

use crate::error::SourceError;
use crate::sources::types::*;
use crate::sources::SourceAdapter;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const BASE_URL: &str = "https://www.nseindia.com";
const NAME: &str = "nse";

/// A downloaded payload is reused for this long. Shorter than any ingest interval.
const PAYLOAD_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct AllIndices {
    data: Vec<IndexRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexRow {
    index: String,
    last: f64,
    #[serde(default)]
    variation: f64,
    #[serde(default)]
    percent_change: f64,
    #[serde(default)]
    high: f64,
    #[serde(default)]
    low: f64,
}

type Payload = Arc<Vec<IndexRow>>;

/// NSE index snapshot source
pub struct NseSource {
    client: Client,
    base_url: String,
    payload: Mutex<Option<(Instant, Payload)>>,
}

impl NseSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        // NSE rejects requests without a browser-like agent
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            payload: Mutex::new(None),
        })
    }

    /// Index name as published by NSE, if the symbol is an NSE index
    pub fn index_name(symbol: &Symbol) -> Option<String> {
        if symbol.kind != SymbolKind::Index || symbol.exchange != "NSE" {
            return None;
        }
        let name = match symbol.name.as_str() {
            "NIFTY" => "NIFTY 50",
            "BANKNIFTY" => "NIFTY BANK",
            "FINNIFTY" => "NIFTY FINANCIAL SERVICES",
            "MIDCPNIFTY" => "NIFTY MIDCAP SELECT",
            other => other,
        };
        Some(name.to_string())
    }

    /// Every index row, downloaded at most once per `PAYLOAD_TTL`.
    ///
    /// The lock is held across the download so concurrent lookups wait for
    /// the one request in flight instead of issuing their own.
    async fn indices(&self) -> Result<Payload, SourceError> {
        let mut cached = self.payload.lock().await;
        if let Some((fetched_at, rows)) = cached.as_ref() {
            if fetched_at.elapsed() < PAYLOAD_TTL {
                return Ok(rows.clone());
            }
        }

        let rows = Arc::new(self.download().await?);
        debug!("NSE allIndices refreshed, {} indices", rows.len());
        *cached = Some((Instant::now(), rows.clone()));
        Ok(rows)
    }

    async fn download(&self) -> Result<Vec<IndexRow>, SourceError> {
        let response = self
            .client
            .get(format!("{}/api/allIndices", self.base_url))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        match status {
            200..=299 => parse_payload(&body),
            401 | 403 => Err(SourceError::Upstream {
                status,
                message: "NSE refused the request (cookie or bot check)".to_string(),
            }),
            429 => Err(SourceError::RateLimited("NSE allIndices".to_string())),
            _ => Err(SourceError::Upstream {
                status,
                message: body.chars().take(200).collect(),
            }),
        }
    }
}

#[async_trait]
impl SourceAdapter for NseSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, symbol: &Symbol) -> Result<SourceQuote, SourceError> {
        let index_name = Self::index_name(symbol)
            .ok_or_else(|| SourceError::SymbolNotSupported(symbol.name.clone()))?;

        let rows = self.indices().await?;
        find_index(&rows, &symbol.name, &index_name)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    /// Quotes for every NSE index in `symbols` from one payload. Other
    /// symbols and indices missing from the payload are left out.
    async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<SourceQuote>, SourceError> {
        let covered: Vec<(&Symbol, String)> = symbols
            .iter()
            .filter_map(|symbol| Self::index_name(symbol).map(|name| (symbol, name)))
            .collect();
        if covered.is_empty() {
            return Err(SourceError::Unsupported(
                "no NSE indices in bulk request".to_string(),
            ));
        }

        let rows = self.indices().await?;
        Ok(covered
            .into_iter()
            .filter_map(|(symbol, index_name)| find_index(&rows, &symbol.name, &index_name).ok())
            .collect())
    }
}

fn parse_payload(body: &str) -> Result<Vec<IndexRow>, SourceError> {
    let payload: AllIndices = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("NSE allIndices payload: {}", e)))?;
    Ok(payload.data)
}

fn find_index(rows: &[IndexRow], symbol: &str, index_name: &str) -> Result<SourceQuote, SourceError> {
    let row = rows
        .iter()
        .find(|row| row.index.eq_ignore_ascii_case(index_name))
        .ok_or_else(|| {
            SourceError::InvalidResponse(format!("{} missing from allIndices", index_name))
        })?;

    Ok(SourceQuote {
        symbol: symbol.to_string(),
        price: row.last,
        volume: 0,
        open_interest: 0,
        change: row.variation,
        change_percent: row.percent_change,
        high: if row.high > 0.0 { row.high } else { row.last },
        low: if row.low > 0.0 { row.low } else { row.last },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIXTURE: &str = r#"{
        "data": [
            {"key": "BROAD MARKET INDICES", "index": "NIFTY 50", "indexSymbol": "NIFTY 50",
             "last": 24551.2, "variation": 101.4, "percentChange": 0.41,
             "open": 24420.0, "high": 24602.1, "low": 24391.7, "previousClose": 24449.8},
            {"key": "SECTORAL INDICES", "index": "NIFTY BANK", "indexSymbol": "NIFTY BANK",
             "last": 52110.0, "variation": -80.0, "percentChange": -0.15}
        ]
    }"#;

    #[test]
    fn test_index_name_mapping() {
        assert_eq!(
            NseSource::index_name(&Symbol::index("NIFTY", "NSE")).as_deref(),
            Some("NIFTY 50")
        );
        assert_eq!(
            NseSource::index_name(&Symbol::index("FINNIFTY", "NSE")).as_deref(),
            Some("NIFTY FINANCIAL SERVICES")
        );
        assert!(NseSource::index_name(&Symbol::index("SENSEX", "BSE")).is_none());
        assert!(NseSource::index_name(&Symbol::new("RELIANCE", SymbolKind::Stock, "NSE")).is_none());
    }

    fn rows() -> Vec<IndexRow> {
        parse_payload(FIXTURE).unwrap()
    }

    #[test]
    fn test_parse_index() {
        let quote = find_index(&rows(), "NIFTY", "NIFTY 50").unwrap();
        assert_eq!(quote.symbol, "NIFTY");
        assert_eq!(quote.price, 24551.2);
        assert_eq!(quote.change, 101.4);
        assert_eq!(quote.change_percent, 0.41);
        assert_eq!(quote.high, 24602.1);
    }

    #[test]
    fn test_parse_index_fills_missing_range() {
        let quote = find_index(&rows(), "BANKNIFTY", "NIFTY BANK").unwrap();
        assert_eq!(quote.high, 52110.0);
        assert_eq!(quote.low, 52110.0);
    }

    #[test]
    fn test_parse_index_missing_row() {
        let err = find_index(&rows(), "MIDCPNIFTY", "NIFTY MIDCAP SELECT").unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_stock_symbols_are_rejected_without_io() {
        let source = NseSource::with_base_url("http://127.0.0.1:9").unwrap();
        let err = source
            .fetch(&Symbol::new("RELIANCE", SymbolKind::Stock, "NSE"))
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::SymbolNotSupported("RELIANCE".into()));
    }

    #[test]
    fn test_malformed_payload_is_invalid_response() {
        let err = parse_payload("<html>Access Denied</html>").unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    /// Local allIndices endpoint counting downloads
    async fn serve_fixture() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/allIndices",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // Concurrent lookups must queue behind this download
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    FIXTURE
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_download() {
        let (base_url, hits) = serve_fixture().await;
        let source = NseSource::with_base_url(&base_url).unwrap();

        let nifty = Symbol::index("NIFTY", "NSE");
        let bank = Symbol::index("BANKNIFTY", "NSE");
        let (nifty, bank) = tokio::join!(source.fetch(&nifty), source.fetch(&bank));
        assert_eq!(nifty.unwrap().price, 24551.2);
        assert_eq!(bank.unwrap().price, 52110.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_covers_indices_in_one_download() {
        let (base_url, hits) = serve_fixture().await;
        let source = NseSource::with_base_url(&base_url).unwrap();
        assert!(source.supports_batch());

        let symbols = vec![
            Symbol::index("NIFTY", "NSE"),
            Symbol::index("BANKNIFTY", "NSE"),
            Symbol::index("MIDCPNIFTY", "NSE"),
            Symbol::new("RELIANCE", SymbolKind::Stock, "NSE"),
        ];
        let quotes = source.fetch_batch(&symbols).await.unwrap();
        let names: Vec<&str> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(names, vec!["NIFTY", "BANKNIFTY"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let stocks = [Symbol::new("TCS", SymbolKind::Stock, "NSE")];
        let err = source.fetch_batch(&stocks).await.unwrap_err();
        assert!(err.is_capability_miss());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
