use anyhow::{bail, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;

use super::types::SentinelConfig;
use crate::constants::RSI_MAX;
use crate::types::ConditionKind;

/// Validate invariants across the merged config that serde alone cannot enforce.
///
/// Every violation is collected so a broken deployment is fixed in one pass.
/// Called automatically by [`super::load_config`].
pub fn validate_config(config: &SentinelConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_instruments(config, &mut errors);
    validate_providers(config, &mut errors);
    validate_signals(config, &mut errors);
    validate_scheduler(config, &mut errors);
    validate_oracle(config, &mut errors);
    validate_execution(config, &mut errors);
    validate_channel(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

fn validate_instruments(config: &SentinelConfig, errors: &mut Vec<String>) {
    let instruments = &config.instruments.instruments;
    if instruments.is_empty() {
        errors.push("instruments: at least one instrument is required".into());
    }

    let declared: HashSet<&str> = config
        .providers
        .providers
        .iter()
        .map(|p| p.name.as_str())
        .collect();

    let mut seen = HashSet::new();
    for inst in instruments {
        if inst.symbol.trim().is_empty() {
            errors.push("instruments: symbol must not be empty".into());
        }
        if !seen.insert(inst.symbol.as_str()) {
            errors.push(format!("instruments: duplicate symbol '{}'", inst.symbol));
        }
        if inst.poll_interval_seconds == Some(0) {
            errors.push(format!(
                "instruments.{}: poll_interval_seconds must be > 0",
                inst.symbol
            ));
        }
        if inst.providers.is_empty() {
            errors.push(format!("instruments.{}: providers must not be empty", inst.symbol));
        }
        for provider in &inst.providers {
            if !declared.contains(provider.as_str()) {
                errors.push(format!(
                    "instruments.{}: provider '{provider}' is not declared in providers.json",
                    inst.symbol
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

fn validate_providers(config: &SentinelConfig, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for p in &config.providers.providers {
        if !seen.insert(p.name.as_str()) {
            errors.push(format!("providers: duplicate provider '{}'", p.name));
        }
        if p.base_url.is_empty() {
            errors.push(format!("providers.{}: base_url is empty", p.name));
        }
        if p.rate_limit.capacity == 0 {
            errors.push(format!("providers.{}: rate_limit.capacity must be > 0", p.name));
        }
        if p.rate_limit.refill_per_second.is_nan() || p.rate_limit.refill_per_second <= 0.0 {
            errors.push(format!(
                "providers.{}: rate_limit.refill_per_second must be > 0",
                p.name
            ));
        }
        if p.retry.max_attempts == 0 {
            errors.push(format!("providers.{}: retry.max_attempts must be >= 1", p.name));
        }
        if p.retry.base_backoff_ms > p.retry.max_backoff_ms {
            errors.push(format!(
                "providers.{}: retry.base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                p.name, p.retry.base_backoff_ms, p.retry.max_backoff_ms
            ));
        }
        if p.request_timeout_seconds == 0 {
            errors.push(format!("providers.{}: request_timeout_seconds must be > 0", p.name));
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

fn validate_signals(config: &SentinelConfig, errors: &mut Vec<String>) {
    let signals = &config.signals;
    let ind = &signals.indicators;

    if signals.interval.is_empty() {
        errors.push("signals: interval is empty".into());
    }
    if signals.snapshot_history == 0 {
        errors.push("signals: snapshot_history must be > 0".into());
    }

    for (name, value) in [
        ("rsi_period", ind.rsi_period),
        ("ma_fast", ind.ma_fast),
        ("ma_slow", ind.ma_slow),
        ("macd_fast", ind.macd_fast),
        ("macd_slow", ind.macd_slow),
        ("macd_signal", ind.macd_signal),
    ] {
        if value == 0 {
            errors.push(format!("signals.indicators: {name} must be > 0"));
        }
    }
    if ind.ma_fast >= ind.ma_slow {
        errors.push(format!(
            "signals.indicators: ma_fast ({}) must be < ma_slow ({})",
            ind.ma_fast, ind.ma_slow
        ));
    }
    if ind.macd_fast >= ind.macd_slow {
        errors.push(format!(
            "signals.indicators: macd_fast ({}) must be < macd_slow ({})",
            ind.macd_fast, ind.macd_slow
        ));
    }

    // The widest warm-up must fit in one fetch.
    let warmup = [
        ind.rsi_period + 1,
        ind.ma_slow + 1,
        ind.macd_slow + ind.macd_signal,
    ]
    .into_iter()
    .max()
    .unwrap_or(0);
    if (signals.history_bars as usize) < warmup {
        errors.push(format!(
            "signals: history_bars ({}) is below the indicator warm-up ({warmup})",
            signals.history_bars
        ));
    }

    let mut ids = HashSet::new();
    let mut overbought: Option<Decimal> = None;
    let mut oversold: Option<Decimal> = None;
    for rule in &signals.triggers {
        if rule.id.is_empty() {
            errors.push("signals.triggers: id must not be empty".into());
        }
        if !ids.insert(rule.id.as_str()) {
            errors.push(format!("signals.triggers: duplicate id '{}'", rule.id));
        }
        match &rule.kind {
            ConditionKind::RsiOverbought { line } | ConditionKind::RsiOversold { line } => {
                if *line < Decimal::ZERO || *line > RSI_MAX {
                    errors.push(format!(
                        "signals.triggers.{}: RSI line {line} outside [0, 100]",
                        rule.id
                    ));
                }
                if matches!(rule.kind, ConditionKind::RsiOverbought { .. }) {
                    overbought = Some(overbought.map_or(*line, |o| o.min(*line)));
                } else {
                    oversold = Some(oversold.map_or(*line, |o| o.max(*line)));
                }
            }
            ConditionKind::PriceChange { percent, lookback } => {
                if *percent <= Decimal::ZERO {
                    errors.push(format!(
                        "signals.triggers.{}: percent must be > 0",
                        rule.id
                    ));
                }
                if *lookback == 0 || *lookback >= signals.snapshot_history {
                    errors.push(format!(
                        "signals.triggers.{}: lookback must be in 1..{}",
                        rule.id, signals.snapshot_history
                    ));
                }
            }
            ConditionKind::MaCrossUp
            | ConditionKind::MaCrossDown
            | ConditionKind::MacdCrossUp
            | ConditionKind::MacdCrossDown => {}
        }
    }

    if let (Some(ob), Some(os)) = (overbought, oversold) {
        if os >= ob {
            errors.push(format!(
                "signals.triggers: oversold line ({os}) must be below overbought line ({ob})"
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

fn validate_scheduler(config: &SentinelConfig, errors: &mut Vec<String>) {
    let s = &config.scheduler;
    if s.primary_interval_seconds == 0 {
        errors.push("scheduler: primary_interval_seconds must be > 0".into());
    }
    if s.secondary_interval_seconds == 0 {
        errors.push("scheduler: secondary_interval_seconds must be > 0".into());
    }
    if s.max_concurrency == 0 {
        errors.push("scheduler: max_concurrency must be > 0".into());
    }
    if s.tick_timeout_seconds == 0 {
        errors.push("scheduler: tick_timeout_seconds must be > 0".into());
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

fn validate_oracle(config: &SentinelConfig, errors: &mut Vec<String>) {
    let o = &config.oracle;
    if o.endpoint.is_empty() {
        errors.push("oracle: endpoint is empty".into());
    } else if !o.endpoint.starts_with("http://") && !o.endpoint.starts_with("https://") {
        errors.push(format!("oracle: endpoint '{}' must be an http(s) URL", o.endpoint));
    }
    if o.model.is_empty() {
        errors.push("oracle: model is empty".into());
    }
    if o.timeout_seconds == 0 {
        errors.push("oracle: timeout_seconds must be > 0".into());
    }
    if let Some(t) = o.temperature {
        if !(0.0..=2.0).contains(&t) {
            errors.push(format!("oracle: temperature {t} outside [0, 2]"));
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn validate_execution(config: &SentinelConfig, errors: &mut Vec<String>) {
    let e = &config.execution;

    // Only the paper exchange is wired up.
    if !e.dry_run {
        errors.push("execution: live trading is not available, dry_run must be true".into());
    }
    if e.capability_timeout_seconds == 0 {
        errors.push("execution: capability_timeout_seconds must be > 0".into());
    }
    if e.paper.starting_cash <= Decimal::ZERO {
        errors.push("execution.paper: starting_cash must be > 0".into());
    }
    if e.paper.quote_asset.is_empty() {
        errors.push("execution.paper: quote_asset is empty".into());
    }
    if e.paper.slippage_bps >= 10_000 {
        errors.push(format!(
            "execution.paper: slippage_bps ({}) must be < 10000",
            e.paper.slippage_bps
        ));
    }
    if e.guard.max_order_notional <= Decimal::ZERO {
        errors.push("execution.guard: max_order_notional must be > 0".into());
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

fn validate_channel(config: &SentinelConfig, errors: &mut Vec<String>) {
    let Some(channel) = &config.channel else {
        return;
    };
    let t = &channel.telegram;
    if t.bot_token_env.is_empty() {
        errors.push("channel.telegram: bot_token_env is empty".into());
    } else if super::env_string(&t.bot_token_env).is_none() {
        errors.push(format!(
            "channel.telegram: env var {} must hold the bot token",
            t.bot_token_env
        ));
    }
    if t.poll_timeout_seconds == 0 {
        errors.push("channel.telegram: poll_timeout_seconds must be > 0".into());
    }
}
