//! Read-only views of the running system: health counters, monitored
//! instruments, heartbeat cadence and the trigger audit trail.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::schema::{str_arg, u64_arg};
use super::{Capability, CapabilityDeps};
use crate::errors::SentinelError;
use crate::store::{Filter, SortOrder, Table};
use crate::types::{
    CapabilityDescriptor, FieldSpec, FieldType, IdempotenceClass, InvocationContext, Schema,
};

const DEFAULT_TRIGGER_LIMIT: u64 = 20;
const MAX_TRIGGER_LIMIT: u64 = 200;

pub struct GetSystemStatus {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetSystemStatus {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_system_status",
                description: "Heartbeat health counters, uptime, providers and trading pause state.",
                input: Schema::empty(),
                output: json!({"health": "counters", "providers": "array", "trading_paused": "boolean"}),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetSystemStatus {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        Ok(json!({
            "health": self.deps.health.snapshot(),
            "providers": self.deps.gateway.provider_names(),
            "instruments": self.deps.instruments.len(),
            "trading_paused": self.deps.guard.is_paused(),
            "mode": "paper",
        }))
    }
}

pub struct GetMonitoringSymbols {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetMonitoringSymbols {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_monitoring_symbols",
                description: "Instruments under heartbeat monitoring with their class, cadence and providers.",
                input: Schema::empty(),
                output: json!({"instruments": "array of {symbol, class, interval_seconds, providers}", "triggers": "array of rule ids"}),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetMonitoringSymbols {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let instruments: Vec<Value> = self
            .deps
            .instruments
            .iter()
            .map(|i| {
                json!({
                    "symbol": i.symbol,
                    "class": i.class,
                    "interval_seconds": self.deps.scheduler.interval_for(i),
                    "providers": i.providers,
                })
            })
            .collect();
        let triggers: Vec<&str> = self.deps.signals.triggers.iter().map(|t| t.id.as_str()).collect();
        Ok(json!({ "instruments": instruments, "triggers": triggers }))
    }
}

pub struct GetHeartbeatSettings {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetHeartbeatSettings {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_heartbeat_settings",
                description: "Heartbeat cadences, concurrency, timeouts and indicator parameters.",
                input: Schema::empty(),
                output: json!({"scheduler": "object", "signals": "object"}),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetHeartbeatSettings {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let s = &self.deps.scheduler;
        let sig = &self.deps.signals;
        let p = &sig.indicators;
        Ok(json!({
            "scheduler": {
                "primary_interval_seconds": s.primary_interval_seconds,
                "secondary_interval_seconds": s.secondary_interval_seconds,
                "always_analyze_seconds": s.always_analyze_seconds,
                "max_concurrency": s.max_concurrency,
                "tick_timeout_seconds": s.tick_timeout_seconds,
                "jitter_ms": s.jitter_ms,
            },
            "signals": {
                "interval": sig.interval,
                "history_bars": sig.history_bars,
                "rsi_period": p.rsi_period,
                "ma_kind": p.ma_kind,
                "ma_fast": p.ma_fast,
                "ma_slow": p.ma_slow,
                "macd": [p.macd_fast, p.macd_slow, p.macd_signal],
                "triggers": sig.triggers,
            },
        }))
    }
}

/// Store-backed; unlike the audit writes, a store failure here fails the call.
pub struct GetRecentTriggers {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetRecentTriggers {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_recent_triggers",
                description: "Most recent trigger events, newest first.",
                input: Schema::new(vec![
                    FieldSpec::optional("symbol", FieldType::String, "Only this symbol"),
                    FieldSpec::optional("condition_id", FieldType::String, "Only this trigger rule"),
                    FieldSpec::optional("limit", FieldType::Integer, "Number of events (max 200, default 20)"),
                ]),
                output: json!({"events": "array of trigger events"}),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetRecentTriggers {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let limit = u64_arg(&args, "limit")
            .unwrap_or(DEFAULT_TRIGGER_LIMIT)
            .clamp(1, MAX_TRIGGER_LIMIT);

        let mut filter = Filter::all();
        if let Some(symbol) = str_arg(&args, "symbol") {
            filter = filter.eq("symbol", symbol.to_ascii_uppercase());
        }
        if let Some(id) = str_arg(&args, "condition_id") {
            filter = filter.eq("condition_id", id);
        }

        let rows = self
            .deps
            .store
            .query(Table::TriggerEvents, &filter, limit as u32, SortOrder::Desc)
            .await?;
        let events: Vec<Value> = rows.into_iter().map(|r| r.record).collect();
        Ok(json!({ "events": events }))
    }
}
