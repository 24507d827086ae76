use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Upper bound on cached (provider, symbol, range) entries.
pub const GATEWAY_CACHE_CAPACITY: usize = 512;

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

pub const RSI_MAX: Decimal = dec!(100);
pub const RSI_NEUTRAL: Decimal = dec!(50);

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Number of idempotency records retained for at-most-once capabilities.
pub const IDEMPOTENCY_LEDGER_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

pub const INBOUND_CHANNEL_CAPACITY: usize = 64;
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than 4096 UTF-16 code units.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4000;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub const SECONDS_PER_DAY: u64 = 86_400;
