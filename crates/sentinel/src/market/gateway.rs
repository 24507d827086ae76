//! Market data gateway: per-provider rate limiting, TTL cache, bounded
//! retries, and a normalizing merge across an instrument's providers.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::provider::MarketDataProvider;
use super::rate_limiter::TokenBucket;
use crate::config::RetryConfig;
use crate::constants::GATEWAY_CACHE_CAPACITY;
use crate::errors::SentinelError;
use crate::types::{FetchRange, Instrument, PricePoint, Ticker24h};

type Result<T> = std::result::Result<T, SentinelError>;

/// Exponential backoff schedule: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }
}

struct ProviderHandle {
    provider: Arc<dyn MarketDataProvider>,
    bucket: TokenBucket,
    cache_ttl: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider: String,
    symbol: String,
    range: FetchRange,
}

struct CacheEntry {
    points: Vec<PricePoint>,
    expires_at: Instant,
}

pub struct MarketDataGateway {
    providers: HashMap<String, ProviderHandle>,
    /// Declaration order, used for ad-hoc symbols.
    order: Vec<String>,
    cache: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl Default for MarketDataGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataGateway {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(GATEWAY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Register a provider with its own bucket, cache TTL and retry policy.
    pub fn with_provider(
        mut self,
        provider: Arc<dyn MarketDataProvider>,
        bucket: TokenBucket,
        cache_ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(
            name,
            ProviderHandle {
                provider,
                bucket,
                cache_ttl,
                retry,
            },
        );
        self
    }

    pub fn provider_names(&self) -> &[String] {
        &self.order
    }

    // -----------------------------------------------------------------------
    // Single provider
    // -----------------------------------------------------------------------

    /// Fetch normalized bars from one provider.
    ///
    /// Order of operations: cache → rate limiter → provider call under the
    /// deadline, retried with backoff. A backoff that would cross the deadline
    /// ends the call with `Timeout`; exhausting all attempts yields
    /// `DataUnavailable`.
    pub async fn fetch_from(
        &self,
        provider_name: &str,
        symbol: &str,
        range: &FetchRange,
        deadline: Instant,
    ) -> Result<Vec<PricePoint>> {
        let handle = self.providers.get(provider_name).ok_or_else(|| {
            SentinelError::data_unavailable(symbol, format!("unknown provider '{provider_name}'"))
        })?;

        let key = CacheKey {
            provider: provider_name.to_string(),
            symbol: symbol.to_string(),
            range: range.clone(),
        };
        if let Some(points) = self.cached(&key) {
            trace!(provider = provider_name, symbol, %range, bars = points.len(), "cache HIT");
            return Ok(points);
        }
        trace!(provider = provider_name, symbol, %range, "cache MISS");

        let retry = handle.retry;
        let mut last_error = String::new();

        for attempt in 0..retry.max_attempts {
            handle.bucket.acquire(deadline).await?;

            let started = Instant::now();
            match tokio::time::timeout_at(deadline, handle.provider.fetch(symbol, range)).await {
                Ok(Ok(raw)) => {
                    let points = normalize(raw);
                    debug!(
                        provider = provider_name,
                        symbol,
                        bars = points.len(),
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "fetched bars"
                    );
                    self.store(key, points.clone(), handle.cache_ttl);
                    return Ok(points);
                }
                Ok(Err(e)) => {
                    warn!(provider = provider_name, symbol, attempt, error = %e, "provider call failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    return Err(SentinelError::timeout(format!(
                        "fetch {symbol} from {provider_name}"
                    )));
                }
            }

            if attempt + 1 < retry.max_attempts {
                let delay = retry.backoff(attempt);
                if Instant::now() + delay >= deadline {
                    return Err(SentinelError::timeout(format!(
                        "fetch {symbol} from {provider_name} (retry backoff past deadline)"
                    )));
                }
                tokio::time::sleep(delay).await;
            }
        }

        Err(SentinelError::data_unavailable(
            symbol,
            format!(
                "{provider_name}: {} attempt(s) failed, last error: {last_error}",
                retry.max_attempts
            ),
        ))
    }

    // -----------------------------------------------------------------------
    // Instrument (all providers)
    // -----------------------------------------------------------------------

    /// Query every provider of the instrument concurrently and merge.
    ///
    /// Earlier-listed providers win timestamp conflicts. Partial provider
    /// failure is logged; only total failure is an error.
    pub async fn fetch(
        &self,
        instrument: &Instrument,
        range: &FetchRange,
        deadline: Instant,
    ) -> Result<Vec<PricePoint>> {
        if instrument.providers.is_empty() {
            return Err(SentinelError::data_unavailable(
                &instrument.symbol,
                "no providers configured",
            ));
        }

        let futures = instrument
            .providers
            .iter()
            .map(|p| self.fetch_from(p, &instrument.symbol, range, deadline));
        let results = futures::future::join_all(futures).await;

        let mut series = Vec::new();
        let mut failures = Vec::new();
        for (provider, result) in instrument.providers.iter().zip(results) {
            match result {
                Ok(points) => series.push(points),
                Err(e) => failures.push((provider.as_str(), e)),
            }
        }

        if series.is_empty() {
            if failures.len() == 1 {
                if let Some((_, e)) = failures.pop() {
                    return Err(e);
                }
            }
            let reason = failures
                .iter()
                .map(|(p, e)| format!("{p}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SentinelError::data_unavailable(&instrument.symbol, reason));
        }

        for (provider, e) in &failures {
            warn!(symbol = %instrument.symbol, provider, error = %e, "provider failed, merging the rest");
        }

        Ok(merge(series, range.limit as usize))
    }

    /// Most recent bar of the instrument.
    pub async fn latest_bar(
        &self,
        instrument: &Instrument,
        interval: &str,
        deadline: Instant,
    ) -> Result<PricePoint> {
        let range = FetchRange::new(interval, 2);
        self.fetch(instrument, &range, deadline)
            .await?
            .pop()
            .ok_or_else(|| SentinelError::data_unavailable(&instrument.symbol, "provider returned no bars"))
    }

    /// Close of the most recent bar.
    pub async fn latest_price(
        &self,
        instrument: &Instrument,
        interval: &str,
        deadline: Instant,
    ) -> Result<rust_decimal::Decimal> {
        Ok(self.latest_bar(instrument, interval, deadline).await?.close)
    }

    /// 24h statistics from the first of the instrument's providers that
    /// serves them. Each provider is tried once, under its rate limiter.
    pub async fn ticker_24h(&self, instrument: &Instrument, deadline: Instant) -> Result<Ticker24h> {
        let symbol = instrument.symbol.as_str();
        let mut failures = Vec::new();

        for name in &instrument.providers {
            let Some(handle) = self.providers.get(name) else {
                failures.push(format!("{name}: unknown provider"));
                continue;
            };
            handle.bucket.acquire(deadline).await?;
            match tokio::time::timeout_at(deadline, handle.provider.ticker_24h(symbol)).await {
                Ok(Ok(ticker)) => {
                    debug!(provider = %name, symbol, "24h ticker served");
                    return Ok(ticker);
                }
                Ok(Err(e)) => {
                    warn!(provider = %name, symbol, error = %e, "24h ticker failed, trying next provider");
                    failures.push(format!("{name}: {e}"));
                }
                Err(_) => return Err(SentinelError::timeout(format!("24h ticker {symbol} from {name}"))),
            }
        }

        let reason = if failures.is_empty() {
            "no providers configured".to_string()
        } else {
            failures.join("; ")
        };
        Err(SentinelError::data_unavailable(symbol, reason))
    }

    /// Instrument descriptor for a symbol outside the configured set, using
    /// every provider in declaration order.
    pub fn ad_hoc(&self, symbol: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            class: crate::types::InstrumentClass::Secondary,
            poll_interval_seconds: None,
            providers: self.order.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    fn cached(&self, key: &CacheKey) -> Option<Vec<PricePoint>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.points.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: CacheKey, points: Vec<PricePoint>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(
            key,
            CacheEntry {
                points,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// Sort by timestamp, keep the first bar for each timestamp, drop malformed
/// bars. Gaps are left as they are.
pub fn normalize(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    let before = points.len();
    points.retain(PricePoint::is_well_formed);
    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);
    if points.len() != before {
        debug!(dropped = before - points.len(), "normalization dropped bars");
    }
    points
}

/// Merge normalized series in priority order; keep the last `limit` bars.
fn merge(series: Vec<Vec<PricePoint>>, limit: usize) -> Vec<PricePoint> {
    let mut merged: BTreeMap<i64, PricePoint> = BTreeMap::new();
    for points in series {
        for p in points {
            merged.entry(p.timestamp).or_insert(p);
        }
    }
    let mut out: Vec<PricePoint> = merged.into_values().collect();
    if limit > 0 && out.len() > limit {
        out.drain(..out.len() - limit);
    }
    out
}
