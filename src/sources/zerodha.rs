//! Zerodha Kite source adapter (primary broker feed)

use crate::error::SourceError;
use crate::sources::types::*;
use crate::sources::SourceAdapter;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const BASE_URL: &str = "https://api.kite.trade";
const NAME: &str = "zerodha";

/// Active Kite session
#[derive(Debug, Clone)]
struct KiteSession {
    api_key: String,
    access_token: String,
}

/// Zerodha Kite quote source
pub struct ZerodhaSource {
    client: Client,
    base_url: String,
    session: RwLock<Option<KiteSession>>,
}

impl ZerodhaSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: RwLock::new(None),
        })
    }

    fn get_headers(api_key: &str, access_token: Option<&str>) -> Result<HeaderMap, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Content-Type",
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert("X-Kite-Version", HeaderValue::from_static("3"));

        if let Some(token) = access_token {
            let value = HeaderValue::from_str(&format!("token {}:{}", api_key, token))
                .map_err(|e| SourceError::Auth(format!("Malformed access token: {}", e)))?;
            headers.insert("Authorization", value);
        }

        Ok(headers)
    }

    /// Generate checksum for Kite session exchange
    fn generate_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
        let input = format!("{}{}{}", api_key, request_token, api_secret);
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Kite instrument key (`EXCHANGE:TRADINGSYMBOL`) for a tracked symbol
    pub fn instrument_key(symbol: &Symbol) -> String {
        let trading_symbol = match symbol.name.as_str() {
            "NIFTY" => "NIFTY 50",
            "BANKNIFTY" => "NIFTY BANK",
            "FINNIFTY" => "NIFTY FIN SERVICE",
            "MIDCPNIFTY" => "NIFTY MID SELECT",
            other => other,
        };
        format!("{}:{}", symbol.exchange, trading_symbol)
    }

    async fn get_quotes(&self, symbols: &[Symbol]) -> Result<Vec<SourceQuote>, SourceError> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or_else(|| SourceError::Auth("No active Kite session".to_string()))?;

        // Query params like i=NSE:NIFTY%2050&i=NSE:RELIANCE
        let query = symbols
            .iter()
            .map(|s| format!("i={}", urlencoding::encode(&Self::instrument_key(s))))
            .collect::<Vec<_>>()
            .join("&");

        let response = self
            .client
            .get(format!("{}/quote?{}", self.base_url, query))
            .headers(Self::get_headers(&session.api_key, Some(&session.access_token))?)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        if !(200..300).contains(&status) {
            let err = classify_error(status, &body);
            if err.is_auth() {
                // Token is dead; drop it so the scheduler stops using the bulk path
                *self.session.write() = None;
            }
            return Err(err);
        }

        parse_quote_response(&body, symbols)
    }
}

#[async_trait]
impl SourceAdapter for ZerodhaSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, symbol: &Symbol) -> Result<SourceQuote, SourceError> {
        self.get_quotes(std::slice::from_ref(symbol))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SourceError::InvalidResponse(format!("No quote returned for {}", symbol.name))
            })
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<SourceQuote>, SourceError> {
        if symbols.is_empty() {
            return Ok(vec![]);
        }
        self.get_quotes(symbols).await
    }

    fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    async fn authenticate(&self, credentials: &SourceCredentials) -> Result<(), SourceError> {
        // A pre-issued access token skips the session exchange
        if let Some(token) = credentials.access_token.as_ref().filter(|t| !t.is_empty()) {
            *self.session.write() = Some(KiteSession {
                api_key: credentials.api_key.clone(),
                access_token: token.clone(),
            });
            info!("Kite session restored from stored access token");
            return Ok(());
        }

        let request_token = credentials
            .request_token
            .as_deref()
            .ok_or_else(|| SourceError::Auth("Request token is required".to_string()))?;

        let api_secret = credentials
            .api_secret
            .as_deref()
            .ok_or_else(|| SourceError::Auth("API secret is required".to_string()))?;

        let checksum = Self::generate_checksum(&credentials.api_key, request_token, api_secret);

        let params = [
            ("api_key", credentials.api_key.as_str()),
            ("request_token", request_token),
            ("checksum", checksum.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/session/token", self.base_url))
            .headers(Self::get_headers(&credentials.api_key, None)?)
            .form(&params)
            .send()
            .await?;

        #[derive(Deserialize)]
        struct SessionResponse {
            status: String,
            data: Option<SessionData>,
            message: Option<String>,
        }

        #[derive(Deserialize)]
        struct SessionData {
            access_token: String,
        }

        let result: SessionResponse = response.json().await?;

        if result.status != "success" {
            return Err(SourceError::Auth(
                result.message.unwrap_or_else(|| "Authentication failed".to_string()),
            ));
        }

        let data = result
            .data
            .ok_or_else(|| SourceError::Auth("No data in session response".to_string()))?;

        *self.session.write() = Some(KiteSession {
            api_key: credentials.api_key.clone(),
            access_token: data.access_token,
        });
        info!("Kite session established");
        Ok(())
    }
}

/// Map a non-2xx Kite response onto a source error
fn classify_error(status: u16, body: &str) -> SourceError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error_type: Option<String>,
    }

    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());
    let token_error = parsed
        .as_ref()
        .and_then(|b| b.error_type.as_deref())
        .map(|t| t == "TokenException")
        .unwrap_or(false);

    match status {
        401 | 403 => SourceError::Auth(message),
        _ if token_error => SourceError::Auth(message),
        429 => SourceError::RateLimited(message),
        _ => SourceError::Upstream { status, message },
    }
}

/// Parse a `/quote` response; instruments absent from the payload are omitted
fn parse_quote_response(body: &str, symbols: &[Symbol]) -> Result<Vec<SourceQuote>, SourceError> {
    #[derive(Deserialize)]
    struct QuoteResponse {
        status: String,
        data: Option<HashMap<String, KiteQuote>>,
        message: Option<String>,
    }

    #[derive(Deserialize)]
    struct KiteQuote {
        last_price: f64,
        #[serde(default)]
        volume: f64,
        #[serde(default)]
        oi: f64,
        #[serde(default)]
        net_change: f64,
        ohlc: KiteOhlc,
    }

    #[derive(Deserialize)]
    struct KiteOhlc {
        high: f64,
        low: f64,
        close: f64,
    }

    let result: QuoteResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("Kite quote payload: {}", e)))?;

    if result.status != "success" {
        return Err(SourceError::InvalidResponse(
            result.message.unwrap_or_else(|| "Quote request failed".to_string()),
        ));
    }

    let data = result.data.unwrap_or_default();
    let mut quotes = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let key = ZerodhaSource::instrument_key(symbol);
        let Some(q) = data.get(&key) else {
            debug!("Kite response missing {}", key);
            continue;
        };

        let change = if q.ohlc.close > 0.0 {
            q.last_price - q.ohlc.close
        } else {
            q.net_change
        };
        let change_percent = if q.ohlc.close > 0.0 {
            change / q.ohlc.close * 100.0
        } else {
            0.0
        };

        quotes.push(SourceQuote {
            symbol: symbol.name.clone(),
            price: q.last_price,
            volume: q.volume as i64,
            open_interest: q.oi as i64,
            change,
            change_percent,
            high: q.ohlc.high,
            low: q.ohlc.low,
        });
    }

    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUOTE_FIXTURE: &str = r#"{
        "status": "success",
        "data": {
            "NSE:NIFTY 50": {
                "instrument_token": 256265,
                "last_price": 24550.5,
                "net_change": 0,
                "ohlc": {"open": 24400.0, "high": 24600.0, "low": 24380.0, "close": 24450.5}
            },
            "NSE:RELIANCE": {
                "instrument_token": 738561,
                "last_price": 2950.0,
                "volume": 4123456,
                "oi": 0,
                "net_change": 12.5,
                "ohlc": {"open": 2940.0, "high": 2960.0, "low": 2930.0, "close": 2937.5}
            }
        }
    }"#;

    #[test]
    fn test_generate_checksum() {
        // sha256("abc")
        assert_eq!(
            ZerodhaSource::generate_checksum("a", "b", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_instrument_key_maps_indices() {
        assert_eq!(
            ZerodhaSource::instrument_key(&Symbol::index("NIFTY", "NSE")),
            "NSE:NIFTY 50"
        );
        assert_eq!(
            ZerodhaSource::instrument_key(&Symbol::index("SENSEX", "BSE")),
            "BSE:SENSEX"
        );
        assert_eq!(
            ZerodhaSource::instrument_key(&Symbol::new("RELIANCE", SymbolKind::Stock, "NSE")),
            "NSE:RELIANCE"
        );
    }

    #[test]
    fn test_parse_quote_response() {
        let symbols = vec![
            Symbol::index("NIFTY", "NSE"),
            Symbol::new("RELIANCE", SymbolKind::Stock, "NSE"),
            Symbol::index("BANKNIFTY", "NSE"),
        ];
        let quotes = parse_quote_response(QUOTE_FIXTURE, &symbols).unwrap();

        // BANKNIFTY is absent from the payload
        assert_eq!(quotes.len(), 2);

        let nifty = &quotes[0];
        assert_eq!(nifty.symbol, "NIFTY");
        assert_eq!(nifty.price, 24550.5);
        assert_eq!(nifty.volume, 0);
        assert!((nifty.change - 100.0).abs() < 1e-9);
        assert!((nifty.change_percent - 100.0 / 24450.5 * 100.0).abs() < 1e-9);

        let reliance = &quotes[1];
        assert_eq!(reliance.volume, 4_123_456);
        assert_eq!(reliance.high, 2960.0);
        assert_eq!(reliance.low, 2930.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_quote_response("<html>", &[Symbol::index("NIFTY", "NSE")]).unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));

        let err = parse_quote_response(
            r#"{"status":"error","message":"Invalid instrument"}"#,
            &[Symbol::index("NIFTY", "NSE")],
        )
        .unwrap_err();
        assert_eq!(err, SourceError::InvalidResponse("Invalid instrument".into()));
    }

    #[test]
    fn test_classify_error() {
        let body = r#"{"status":"error","message":"Incorrect `api_key` or `access_token`.","error_type":"TokenException"}"#;
        assert!(classify_error(403, body).is_auth());
        assert!(classify_error(400, body).is_auth());
        assert!(matches!(
            classify_error(429, r#"{"message":"Too many requests"}"#),
            SourceError::RateLimited(_)
        ));
        assert_eq!(
            classify_error(502, "Bad Gateway"),
            SourceError::Upstream {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
    }

    #[tokio::test]
    async fn test_access_token_restores_session() {
        let source = ZerodhaSource::new().unwrap();
        assert!(!source.is_authenticated());

        let credentials = SourceCredentials {
            api_key: "kite_key".into(),
            access_token: Some("stored_token".into()),
            ..Default::default()
        };
        source.authenticate(&credentials).await.unwrap();
        assert!(source.is_authenticated());
    }

    #[tokio::test]
    async fn test_fetch_without_session_is_auth_failure() {
        let source = ZerodhaSource::new().unwrap();
        let err = source.fetch(&Symbol::index("NIFTY", "NSE")).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_authenticate_requires_request_token() {
        let source = ZerodhaSource::new().unwrap();
        let credentials = SourceCredentials {
            api_key: "kite_key".into(),
            ..Default::default()
        };
        let err = source.authenticate(&credentials).await.unwrap_err();
        assert_eq!(err, SourceError::Auth("Request token is required".into()));
    }
}
