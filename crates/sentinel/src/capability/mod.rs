//! Capability registry and the built-in capability catalog.

pub mod account;
pub mod market;
pub mod notify;
pub mod registry;
pub mod schema;
pub mod system;

pub use registry::{CapabilityRegistry, RegistryBuilder};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::channel::Notifier;
use crate::config::{SchedulerConfig, SignalConfig};
use crate::core::health::HealthStats;
use crate::errors::SentinelError;
use crate::execution::{Exchange, TradeGuard};
use crate::market::{MarketDataGateway, RetryPolicy};
use crate::store::Store;
use crate::types::{CapabilityDescriptor, Instrument, InvocationContext};

/// A named, schema-validated operation the decision core can invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Reject malformed arguments before anything runs.
    fn validate(&self, args: &Value) -> Result<(), SentinelError> {
        let descriptor = self.descriptor();
        descriptor.input.validate(descriptor.name, args)
    }

    /// Run with already-validated arguments. The registry enforces
    /// `ctx.deadline`; implementations pass it down to their own I/O.
    async fn execute(&self, args: Value, ctx: &InvocationContext) -> Result<Value, SentinelError>;
}

/// Everything the built-in capabilities read from or act on.
#[derive(Clone)]
pub struct CapabilityDeps {
    pub gateway: Arc<MarketDataGateway>,
    pub instruments: Arc<Vec<Instrument>>,
    pub signals: Arc<SignalConfig>,
    pub scheduler: Arc<SchedulerConfig>,
    pub exchange: Arc<dyn Exchange>,
    pub guard: Arc<TradeGuard>,
    pub health: Arc<HealthStats>,
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
}

impl CapabilityDeps {
    /// Configured instrument, or an ad-hoc one served by every provider.
    pub(crate) fn instrument(&self, symbol: &str) -> Instrument {
        let wanted = symbol.to_ascii_uppercase();
        self.instruments
            .iter()
            .find(|i| i.symbol.eq_ignore_ascii_case(&wanted))
            .cloned()
            .unwrap_or_else(|| self.gateway.ad_hoc(&wanted))
    }
}

/// Registry with the full built-in catalog.
pub fn builtin_registry(
    deps: CapabilityDeps,
    retry_attempts: u32,
) -> Result<CapabilityRegistry, SentinelError> {
    let retry = RetryPolicy {
        max_attempts: retry_attempts.max(1),
        base_backoff: Duration::from_millis(250),
        max_backoff: Duration::from_secs(2),
    };

    CapabilityRegistry::builder()
        .retry(retry)
        .register(Arc::new(market::GetMarketData::new(deps.clone())))
        .register(Arc::new(market::TechnicalAnalysis::new(deps.clone())))
        .register(Arc::new(market::FundamentalAnalysis::new(deps.clone())))
        .register(Arc::new(market::ManualTriggerAnalysis::new(deps.clone())))
        .register(Arc::new(account::GetAccountStatus::new(deps.clone())))
        .register(Arc::new(account::GetCurrentPositions::new(deps.clone())))
        .register(Arc::new(account::ExecuteTrade::new(deps.clone())))
        .register(Arc::new(system::GetSystemStatus::new(deps.clone())))
        .register(Arc::new(system::GetMonitoringSymbols::new(deps.clone())))
        .register(Arc::new(system::GetHeartbeatSettings::new(deps.clone())))
        .register(Arc::new(system::GetRecentTriggers::new(deps.clone())))
        .register(Arc::new(notify::SendNotification::new(deps)))
        .build()
}
