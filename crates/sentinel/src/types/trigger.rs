use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Predicate family of a trigger rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionKind {
    /// RSI strictly above `line`.
    RsiOverbought {
        #[serde(with = "rust_decimal::serde::str")]
        line: Decimal,
    },
    /// RSI strictly below `line`.
    RsiOversold {
        #[serde(with = "rust_decimal::serde::str")]
        line: Decimal,
    },
    /// Fast moving average crossed above the slow one since the previous bar.
    MaCrossUp,
    /// Fast moving average crossed below the slow one since the previous bar.
    MaCrossDown,
    /// MACD line crossed above its signal line.
    MacdCrossUp,
    /// MACD line crossed below its signal line.
    MacdCrossDown,
    /// Absolute close-to-close change over `lookback` bars of at least `percent`.
    PriceChange {
        #[serde(with = "rust_decimal::serde::str")]
        percent: Decimal,
        lookback: usize,
    },
}

/// Configured rule, applied to every instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    #[serde(flatten)]
    pub kind: ConditionKind,
    pub cooldown_seconds: u64,
}

/// A rule bound to a specific instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub symbol: String,
    pub id: String,
    pub kind: ConditionKind,
    pub cooldown_seconds: u64,
}

impl TriggerCondition {
    pub fn bind(symbol: &str, rule: &TriggerRule) -> Self {
        Self {
            symbol: symbol.to_string(),
            id: rule.id.clone(),
            kind: rule.kind.clone(),
            cooldown_seconds: rule.cooldown_seconds,
        }
    }
}

/// A recorded firing of one condition for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub symbol: String,
    pub condition_id: String,
    /// Unix seconds.
    pub fired_at: i64,
    /// Timestamp of the bar that satisfied the predicate.
    pub bar_timestamp: i64,
    pub snapshot_digest: String,
    /// Human-readable description of what was observed.
    pub detail: String,
}
