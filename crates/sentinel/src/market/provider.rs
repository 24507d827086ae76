use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::SentinelError;
use crate::types::{FetchRange, PricePoint, Ticker24h};

/// A source of OHLCV bars and, optionally, 24h statistics.
///
/// Implementations do one network round-trip per call; rate limiting,
/// caching and retries are the gateway's job.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<Vec<PricePoint>, SentinelError>;

    async fn ticker_24h(&self, symbol: &str) -> Result<Ticker24h, SentinelError> {
        Err(SentinelError::data_unavailable(
            symbol,
            format!("{}: 24h statistics not supported", self.name()),
        ))
    }
}

/// Binance spot klines (`/api/v3/klines`) or a compatible mirror.
pub struct BinanceProvider {
    name: String,
    base_url: String,
    client: Client,
}

impl BinanceProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, SentinelError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<Vec<PricePoint>, SentinelError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let exchange_symbol = exchange_symbol(symbol);
        let limit = range.limit.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", exchange_symbol.as_str()),
                ("interval", range.interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(provider = %self.name, "rate limited by upstream");
            return Err(SentinelError::data_unavailable(symbol, format!("{}: HTTP 429", self.name)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(provider = %self.name, %status, body = %body, "klines request failed");
            return Err(SentinelError::data_unavailable(
                symbol,
                format!("{}: HTTP {status}", self.name),
            ));
        }

        let body: Value = resp.json().await?;
        let points = parse_klines(symbol, &body)?;
        debug!(provider = %self.name, symbol, bars = points.len(), "klines fetched");
        Ok(points)
    }

    async fn ticker_24h(&self, symbol: &str) -> Result<Ticker24h, SentinelError> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let exchange_symbol = exchange_symbol(symbol);

        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", exchange_symbol.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(provider = %self.name, %status, body = %body, "24h ticker request failed");
            return Err(SentinelError::data_unavailable(
                symbol,
                format!("{}: HTTP {status}", self.name),
            ));
        }

        let body: Value = resp.json().await?;
        let ticker = parse_ticker_24h(symbol, &body)?;
        debug!(provider = %self.name, symbol, last_price = %ticker.last_price, "24h ticker fetched");
        Ok(ticker)
    }
}

/// `BTC/USDT` → `BTCUSDT`.
fn exchange_symbol(symbol: &str) -> String {
    symbol.chars().filter(|c| *c != '/' && *c != '-').collect::<String>().to_uppercase()
}

/// Parse a klines array: `[[open_time_ms, open, high, low, close, volume, ...], ...]`.
///
/// Malformed rows are skipped; unparseable numbers become zero and are
/// dropped later by normalization.
pub(crate) fn parse_klines(symbol: &str, body: &Value) -> Result<Vec<PricePoint>, SentinelError> {
    let rows = body
        .as_array()
        .ok_or_else(|| SentinelError::data_unavailable(symbol, "klines response not an array"))?;

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let items = match row.as_array() {
            Some(a) if a.len() >= 6 => a,
            _ => continue,
        };
        points.push(PricePoint {
            timestamp: items[0].as_i64().unwrap_or(0) / 1000,
            open: parse_decimal(&items[1]),
            high: parse_decimal(&items[2]),
            low: parse_decimal(&items[3]),
            close: parse_decimal(&items[4]),
            volume: parse_decimal(&items[5]),
        });
    }
    Ok(points)
}

/// Parse a `/api/v3/ticker/24hr` object. Missing prices are an error;
/// missing counters default to zero.
pub(crate) fn parse_ticker_24h(symbol: &str, body: &Value) -> Result<Ticker24h, SentinelError> {
    let obj = body
        .as_object()
        .ok_or_else(|| SentinelError::data_unavailable(symbol, "24h ticker response not an object"))?;
    let price = |field: &str| -> Result<Decimal, SentinelError> {
        obj.get(field)
            .map(parse_decimal)
            .filter(|d| *d > Decimal::ZERO)
            .ok_or_else(|| SentinelError::data_unavailable(symbol, format!("24h ticker missing {field}")))
    };
    let number = |field: &str| obj.get(field).map(parse_decimal).unwrap_or(Decimal::ZERO);
    let millis = |field: &str| obj.get(field).and_then(Value::as_i64).unwrap_or(0) / 1000;

    Ok(Ticker24h {
        symbol: symbol.to_string(),
        last_price: price("lastPrice")?,
        open_price: price("openPrice")?,
        high_price: price("highPrice")?,
        low_price: price("lowPrice")?,
        price_change: number("priceChange"),
        price_change_percent: number("priceChangePercent"),
        weighted_avg_price: number("weightedAvgPrice"),
        volume: number("volume"),
        quote_volume: number("quoteVolume"),
        trade_count: obj.get("count").and_then(Value::as_u64).unwrap_or(0),
        open_time: millis("openTime"),
        close_time: millis("closeTime"),
    })
}

fn parse_decimal(v: &Value) -> Decimal {
    v.as_str()
        .and_then(|s| s.parse::<Decimal>().ok())
        .or_else(|| v.as_f64().and_then(Decimal::from_f64))
        .unwrap_or(Decimal::ZERO)
}
