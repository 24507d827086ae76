//! Read-only market capabilities: raw bars, on-demand indicator readings,
//! 24h statistics and an out-of-band trigger check.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::info;

use super::schema::{str_arg, u64_arg};
use super::{Capability, CapabilityDeps};
use crate::core::indicators::compute_snapshot;
use crate::core::trigger_detector::TriggerDetector;
use crate::errors::SentinelError;
use crate::types::{
    CapabilityDescriptor, FetchRange, FieldSpec, FieldType, IdempotenceClass, InvocationContext,
    Schema,
};

/// Upper bound on bars returned by `get_market_data`.
const MAX_BARS: u64 = 500;
const DEFAULT_BARS: u64 = 50;

pub struct GetMarketData {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetMarketData {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_market_data",
                description: "Recent OHLCV bars for a symbol, merged across its providers.",
                input: Schema::new(vec![
                    FieldSpec::required("symbol", FieldType::String, "Exchange symbol, e.g. BTCUSDT"),
                    FieldSpec::optional("interval", FieldType::String, "Bar interval, e.g. 15m; defaults to the heartbeat interval"),
                    FieldSpec::optional("limit", FieldType::Integer, "Number of bars (max 500)"),
                ]),
                output: json!({
                    "symbol": "string",
                    "interval": "string",
                    "latest_close": "decimal string",
                    "bars": "array of {timestamp, open, high, low, close, volume}",
                }),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetMarketData {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let symbol = str_arg(&args, "symbol").unwrap_or_default();
        let interval = str_arg(&args, "interval").unwrap_or(self.deps.signals.interval.as_str());
        let limit = u64_arg(&args, "limit").unwrap_or(DEFAULT_BARS);
        if limit == 0 || limit > MAX_BARS {
            return Err(SentinelError::invalid_arguments(
                self.descriptor.name,
                format!("limit must be between 1 and {MAX_BARS}"),
            ));
        }

        let instrument = self.deps.instrument(symbol);
        let range = FetchRange::new(interval, limit as u32);
        let bars = self.deps.gateway.fetch(&instrument, &range, ctx.deadline).await?;
        let latest_close = bars.last().map(|b| b.close.to_string());

        Ok(json!({
            "symbol": instrument.symbol,
            "interval": interval,
            "latest_close": latest_close,
            "bars": bars,
        }))
    }
}

pub struct TechnicalAnalysis {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl TechnicalAnalysis {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "technical_analysis",
                description: "RSI, moving averages and MACD for a symbol computed from fresh bars.",
                input: Schema::new(vec![
                    FieldSpec::required("symbol", FieldType::String, "Exchange symbol, e.g. BTCUSDT"),
                    FieldSpec::optional("interval", FieldType::String, "Bar interval; defaults to the heartbeat interval"),
                ]),
                output: json!({
                    "snapshot": "market snapshot with indicator readings",
                    "trend": "bullish | bearish | flat",
                    "rsi_zone": "overbought | oversold | neutral",
                }),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for TechnicalAnalysis {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let signals = &self.deps.signals;
        let symbol = str_arg(&args, "symbol").unwrap_or_default();
        let interval = str_arg(&args, "interval").unwrap_or(signals.interval.as_str());

        let instrument = self.deps.instrument(symbol);
        let range = FetchRange::new(interval, signals.history_bars);
        let bars = self.deps.gateway.fetch(&instrument, &range, ctx.deadline).await?;
        let snapshot = compute_snapshot(&instrument, &bars, &signals.indicators, signals.snapshot_history)?;

        let r = &snapshot.readings;
        let trend = match r.ma_fast.value.cmp(&r.ma_slow.value) {
            std::cmp::Ordering::Greater => "bullish",
            std::cmp::Ordering::Less => "bearish",
            std::cmp::Ordering::Equal => "flat",
        };
        let rsi_zone = if r.rsi.value >= rust_decimal_macros::dec!(70) {
            "overbought"
        } else if r.rsi.value <= rust_decimal_macros::dec!(30) {
            "oversold"
        } else {
            "neutral"
        };

        Ok(json!({
            "interval": interval,
            "trend": trend,
            "rsi_zone": rsi_zone,
            "snapshot": snapshot,
        }))
    }
}

pub struct FundamentalAnalysis {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl FundamentalAnalysis {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "fundamental_analysis",
                description: "Rolling 24h statistics for a symbol: change, range, volume and trade count.",
                input: Schema::new(vec![FieldSpec::required(
                    "symbol",
                    FieldType::String,
                    "Exchange symbol, e.g. BTCUSDT",
                )]),
                output: json!({
                    "ticker": "24h statistics",
                    "range_position_percent": "where the last price sits between the 24h low (0) and high (100)",
                    "range_percent": "24h high-low range relative to the low",
                }),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for FundamentalAnalysis {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let symbol = str_arg(&args, "symbol").unwrap_or_default();
        let instrument = self.deps.instrument(symbol);
        let ticker = self.deps.gateway.ticker_24h(&instrument, ctx.deadline).await?;

        let hundred = Decimal::ONE_HUNDRED;
        let spread = ticker.high_price - ticker.low_price;
        let range_position = (!spread.is_zero())
            .then(|| ((ticker.last_price - ticker.low_price) / spread * hundred).round_dp(2).normalize());
        let range_percent = (spread / ticker.low_price * hundred).round_dp(2).normalize();

        Ok(json!({
            "range_position_percent": range_position.map(|d| d.to_string()),
            "range_percent": range_percent.to_string(),
            "ticker": ticker,
        }))
    }
}

/// Fresh snapshot for one symbol and the trigger conditions it currently
/// satisfies. Cooldowns are neither consulted nor consumed, so a manual
/// check never silences the heartbeat.
pub struct ManualTriggerAnalysis {
    deps: CapabilityDeps,
    detector: TriggerDetector,
    descriptor: CapabilityDescriptor,
}

impl ManualTriggerAnalysis {
    pub fn new(deps: CapabilityDeps) -> Self {
        let detector = TriggerDetector::new(deps.signals.triggers.clone());
        Self {
            deps,
            detector,
            descriptor: CapabilityDescriptor {
                name: "manual_trigger_analysis",
                description: "Force an immediate analysis of one symbol: fresh bars, indicators and every trigger condition that holds now, ignoring cooldowns.",
                input: Schema::new(vec![
                    FieldSpec::required("symbol", FieldType::String, "Exchange symbol, e.g. BTCUSDT"),
                    FieldSpec::optional("reason", FieldType::String, "Why the analysis was requested"),
                ]),
                output: json!({
                    "matched": "array of {condition_id, detail}",
                    "snapshot": "market snapshot with indicator readings",
                }),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for ManualTriggerAnalysis {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let signals = &self.deps.signals;
        let symbol = str_arg(&args, "symbol").unwrap_or_default();
        let reason = str_arg(&args, "reason").unwrap_or("manual request");

        let instrument = self.deps.instrument(symbol);
        let range = FetchRange::new(&signals.interval, signals.history_bars);
        let bars = self.deps.gateway.fetch(&instrument, &range, ctx.deadline).await?;
        let snapshot = compute_snapshot(&instrument, &bars, &signals.indicators, signals.snapshot_history)?;

        let matched: Vec<Value> = self
            .detector
            .matching(&snapshot)
            .into_iter()
            .map(|(condition_id, detail)| json!({"condition_id": condition_id, "detail": detail}))
            .collect();
        info!(symbol = %instrument.symbol, reason, matched = matched.len(), "manual trigger analysis");

        Ok(json!({
            "reason": reason,
            "matched": matched,
            "snapshot": snapshot,
        }))
    }
}
