use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market_data::{InstrumentClass, PricePoint};

/// One indicator output aligned to the timestamp of the bar it was computed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
}

/// MACD triple at one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdValue {
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub signal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub histogram: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovingAverageKind {
    Sma,
    Ema,
}

/// Latest and previous readings of every indicator the trigger rules consume.
///
/// `*_prev` is `None` when the series has a single value (exactly the warm-up
/// length was supplied); crossover rules never fire without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorReadings {
    pub rsi: IndicatorValue,
    pub rsi_prev: Option<IndicatorValue>,
    pub ma_fast: IndicatorValue,
    pub ma_fast_prev: Option<IndicatorValue>,
    pub ma_slow: IndicatorValue,
    pub ma_slow_prev: Option<IndicatorValue>,
    pub macd: MacdValue,
    pub macd_prev: Option<MacdValue>,
}

/// Everything the trigger detector and the oracle see about one instrument at
/// one heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub class: InstrumentClass,
    /// Timestamp of the latest bar.
    pub as_of: i64,
    pub latest: PricePoint,
    /// Short rolling history ending with `latest`, oldest first.
    pub history: Vec<PricePoint>,
    pub readings: IndicatorReadings,
}

impl MarketSnapshot {
    /// Close price `lookback` bars before the latest one, if held in history.
    pub fn close_back(&self, lookback: usize) -> Option<Decimal> {
        let n = self.history.len();
        if lookback == 0 || lookback >= n {
            return None;
        }
        Some(self.history[n - 1 - lookback].close)
    }

    /// Content digest used to tie trigger events to the data that fired them.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}
