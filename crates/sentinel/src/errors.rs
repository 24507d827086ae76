use thiserror::Error;

/// Typed error hierarchy for the market sentinel.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum SentinelError {
    // -- Indicators ---------------------------------------------------------
    #[error("insufficient data for {indicator}: need {needed} points, got {got}")]
    InsufficientData {
        indicator: String,
        needed: usize,
        got: usize,
    },

    // -- Market data --------------------------------------------------------
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("rate limiter for provider {provider} could not admit the call before the deadline")]
    RateLimitTimeout { provider: String },

    #[error("{operation} timed out")]
    Timeout { operation: String },

    // -- Capabilities -------------------------------------------------------
    #[error("invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("capability {capability} failed: {reason}")]
    CapabilityExecution { capability: String, reason: String },

    // -- Policy oracle ------------------------------------------------------
    #[error("policy oracle failure: {reason}")]
    OracleFailure { reason: String },

    // -- Store --------------------------------------------------------------
    #[error("store error: {reason}")]
    Store { reason: String },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SentinelError {
    pub fn data_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_arguments(capability: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }

    pub fn execution(capability: &str, reason: impl Into<String>) -> Self {
        Self::CapabilityExecution {
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }

    pub fn oracle(reason: impl Into<String>) -> Self {
        Self::OracleFailure {
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Stable machine-readable tag, used in audit records and oracle payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "insufficient_data",
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::RateLimitTimeout { .. } => "rate_limit_timeout",
            Self::Timeout { .. } => "timeout",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::CapabilityExecution { .. } => "capability_execution_error",
            Self::OracleFailure { .. } => "oracle_failure",
            Self::Store { .. } | Self::Sqlx(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Reqwest(_) | Self::Io(_) => "transport_error",
            Self::SerdeJson(_) => "serialization_error",
        }
    }
}
