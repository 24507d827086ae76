use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{Instrument, InstrumentClass, MovingAverageKind, TriggerRule};

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    pub app: AppConfig,
    pub instruments: InstrumentsConfig,
    pub providers: ProvidersConfig,
    pub signals: SignalConfig,
    pub scheduler: SchedulerConfig,
    pub oracle: OracleConfig,
    pub execution: ExecutionConfig,
    pub channel: Option<ChannelConfig>,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub default_filter: String,
}

fn default_log_file() -> String {
    "sentinel.log".into()
}

fn default_log_filter() -> String {
    "market_sentinel=info,warn".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: String,
}

// ---------------------------------------------------------------------------
// instruments.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsConfig {
    pub instruments: Vec<Instrument>,
}

// ---------------------------------------------------------------------------
// providers.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Binance spot `/api/v3/klines` or any compatible mirror.
    BinanceKlines,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub rate_limit: RateLimitConfig,
    pub cache_ttl_seconds: u64,
    pub retry: RetryConfig,
    /// Upper bound on a single HTTP request, independent of caller deadlines.
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket size (burst).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

// ---------------------------------------------------------------------------
// signals.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Bar interval requested from providers, e.g. `15m`.
    pub interval: String,
    /// Number of bars fetched per tick.
    pub history_bars: u32,
    /// Bars kept in the snapshot's rolling history.
    pub snapshot_history: usize,
    pub indicators: IndicatorParams,
    pub triggers: Vec<TriggerRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub ma_kind: MovingAverageKind,
    pub ma_fast: usize,
    pub ma_slow: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

// ---------------------------------------------------------------------------
// scheduler.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub primary_interval_seconds: u64,
    pub secondary_interval_seconds: u64,
    /// Submit a decision at least this often per instrument even without
    /// triggers. `0` disables.
    pub always_analyze_seconds: u64,
    pub max_concurrency: usize,
    pub tick_timeout_seconds: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl SchedulerConfig {
    /// Heartbeat cadence of one instrument: its override, else its class cadence.
    pub fn interval_for(&self, instrument: &Instrument) -> u64 {
        instrument
            .poll_interval_seconds
            .unwrap_or(match instrument.class {
                InstrumentClass::Primary => self.primary_interval_seconds,
                InstrumentClass::Secondary => self.secondary_interval_seconds,
            })
    }
}

// ---------------------------------------------------------------------------
// oracle.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Chat-completions URL of an OpenAI-compatible endpoint.
    pub endpoint: String,
    pub model: String,
    /// Name of the env var holding the API key. Unset means no auth header.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

// ---------------------------------------------------------------------------
// execution.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub dry_run: bool,
    /// Deadline for a single capability invocation.
    pub capability_timeout_seconds: u64,
    /// Extra attempts for safe-to-retry capabilities.
    pub retry_attempts: u32,
    pub paper: PaperConfig,
    pub guard: GuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub starting_cash: Decimal,
    pub quote_asset: String,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(with = "rust_decimal::serde::str")]
    pub max_order_notional: Decimal,
    pub max_orders_per_24h: u32,
    #[serde(default)]
    pub paused: bool,
}

// ---------------------------------------------------------------------------
// channel.json (optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Name of the env var holding the bot token.
    pub bot_token_env: String,
    /// Chat receiving heartbeat notifications.
    pub notify_chat_id: i64,
    /// Chats allowed to talk to the sentinel. Empty accepts any chat.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
    pub poll_timeout_seconds: u64,
}
