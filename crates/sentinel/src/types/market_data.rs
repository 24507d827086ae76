use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Polling class of an instrument. Each class has its own heartbeat cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentClass {
    Primary,
    Secondary,
}

impl InstrumentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored instrument, loaded once from `instruments.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub class: InstrumentClass,
    /// Overrides the class cadence when set.
    #[serde(default)]
    pub poll_interval_seconds: Option<u64>,
    /// Provider names in priority order (first wins on merge conflicts).
    pub providers: Vec<String>,
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Bar open time, unix seconds.
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

impl PricePoint {
    /// A bar is usable when prices are positive and the range is consistent.
    pub fn is_well_formed(&self) -> bool {
        self.timestamp > 0
            && self.open > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.high >= self.low
            && self.volume >= Decimal::ZERO
    }
}

/// Requested window of bars: the most recent `limit` bars at `interval`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchRange {
    /// Exchange interval string, e.g. `1m`, `15m`, `1h`.
    pub interval: String,
    pub limit: u32,
}

impl FetchRange {
    pub fn new(interval: impl Into<String>, limit: u32) -> Self {
        Self {
            interval: interval.into(),
            limit,
        }
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.interval, self.limit)
    }
}

/// Rolling 24h statistics for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub open_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_change: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_change_percent: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weighted_avg_price: Decimal,
    /// Base asset volume.
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
    pub trade_count: u64,
    /// Window bounds, unix seconds.
    pub open_time: i64,
    pub close_time: i64,
}
