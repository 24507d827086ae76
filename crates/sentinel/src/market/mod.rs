pub mod gateway;
pub mod provider;
pub mod rate_limiter;

pub use gateway::{MarketDataGateway, RetryPolicy};
pub use provider::{BinanceProvider, MarketDataProvider};
pub use rate_limiter::TokenBucket;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{ProviderKind, ProvidersConfig};
use crate::errors::SentinelError;

/// Build the gateway with every provider declared in `providers.json`.
pub fn build_gateway(config: &ProvidersConfig) -> Result<MarketDataGateway, SentinelError> {
    let mut gateway = MarketDataGateway::new();
    for p in &config.providers {
        let provider: Arc<dyn MarketDataProvider> = match p.kind {
            ProviderKind::BinanceKlines => Arc::new(BinanceProvider::new(
                &p.name,
                &p.base_url,
                Duration::from_secs(p.request_timeout_seconds),
            )?),
        };
        info!(
            provider = %p.name,
            base_url = %p.base_url,
            capacity = p.rate_limit.capacity,
            refill_per_second = p.rate_limit.refill_per_second,
            cache_ttl_seconds = p.cache_ttl_seconds,
            "market data provider registered"
        );
        gateway = gateway.with_provider(
            provider,
            TokenBucket::new(&p.name, p.rate_limit.capacity, p.rate_limit.refill_per_second),
            Duration::from_secs(p.cache_ttl_seconds),
            RetryPolicy::from(&p.retry),
        );
    }
    Ok(gateway)
}
