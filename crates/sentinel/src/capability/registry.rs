//! Closed catalog of capabilities with validation, deadline enforcement,
//! retry for safe-to-retry operations and key-based deduplication for
//! at-most-once operations.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::Capability;
use crate::constants::IDEMPOTENCY_LEDGER_CAPACITY;
use crate::errors::SentinelError;
use crate::market::RetryPolicy;
use crate::types::{CapabilityDescriptor, IdempotenceClass, InvocationContext};

type Result<T> = std::result::Result<T, SentinelError>;

struct LedgerEntry {
    digest: String,
    result: Arc<OnceCell<Value>>,
}

pub struct CapabilityRegistry {
    capabilities: BTreeMap<&'static str, Arc<dyn Capability>>,
    retry: RetryPolicy,
    /// (capability, idempotency key) -> first successful result.
    ledger: Mutex<LruCache<(String, String), LedgerEntry>>,
}

pub struct RegistryBuilder {
    capabilities: Vec<Arc<dyn Capability>>,
    retry: RetryPolicy,
}

impl RegistryBuilder {
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Freeze the catalog. Duplicate names are a startup error.
    pub fn build(self) -> Result<CapabilityRegistry> {
        let mut capabilities = BTreeMap::new();
        for capability in self.capabilities {
            let name = capability.descriptor().name;
            if capabilities.insert(name, capability).is_some() {
                return Err(SentinelError::Config(format!(
                    "capability '{name}' registered twice"
                )));
            }
        }

        info!(count = capabilities.len(), "capability registry built");
        let capacity = NonZeroUsize::new(IDEMPOTENCY_LEDGER_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(CapabilityRegistry {
            capabilities,
            retry: self.retry,
            ledger: Mutex::new(LruCache::new(capacity)),
        })
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            capabilities: Vec::new(),
            retry: RetryPolicy {
                max_attempts: 1,
                base_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_secs(2),
            },
        }
    }

    /// Descriptors sorted by name.
    pub fn catalog(&self) -> Vec<&CapabilityDescriptor> {
        self.capabilities.values().map(|c| c.descriptor()).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(name).map(|c| c.descriptor())
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Validate and run one capability under `ctx.deadline`.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &InvocationContext) -> Result<Value> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| SentinelError::invalid_arguments(name, "unknown capability"))?;

        capability.validate(&args)?;

        match capability.descriptor().idempotence {
            IdempotenceClass::SafeToRetry => self.run_with_retry(capability.as_ref(), args, ctx).await,
            IdempotenceClass::AtMostOnce => self.run_once(capability.as_ref(), args, ctx).await,
        }
    }

    async fn run_with_retry(
        &self,
        capability: &dyn Capability,
        args: Value,
        ctx: &InvocationContext,
    ) -> Result<Value> {
        let name = capability.descriptor().name;
        let mut attempt: u32 = 0;

        loop {
            let result = timeout_at(ctx.deadline, capability.execute(args.clone(), ctx))
                .await
                .map_err(|_| SentinelError::timeout(format!("capability {name}")))?;

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e @ SentinelError::InvalidArguments { .. }) => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(err);
            }
            let delay = self.retry.backoff(attempt - 1);
            if Instant::now() + delay >= ctx.deadline {
                debug!(capability = name, "no time left for another attempt");
                return Err(err);
            }
            warn!(
                capability = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "capability failed, retrying"
            );
            sleep(delay).await;
        }
    }

    async fn run_once(
        &self,
        capability: &dyn Capability,
        args: Value,
        ctx: &InvocationContext,
    ) -> Result<Value> {
        let name = capability.descriptor().name;
        let key = ctx.idempotency_key.as_deref().ok_or_else(|| {
            SentinelError::invalid_arguments(name, "an idempotency key is required")
        })?;
        let digest = args_digest(&args);

        let cell = {
            let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            let ledger_key = (name.to_string(), key.to_string());
            match ledger.get(&ledger_key) {
                Some(entry) if entry.digest != digest => {
                    return Err(SentinelError::invalid_arguments(
                        name,
                        format!("idempotency key '{key}' was already used with different arguments"),
                    ));
                }
                Some(entry) => Arc::clone(&entry.result),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    ledger.put(
                        ledger_key,
                        LedgerEntry {
                            digest,
                            result: Arc::clone(&cell),
                        },
                    );
                    cell
                }
            }
        };

        if let Some(value) = cell.get() {
            info!(capability = name, key, "duplicate invocation, returning recorded result");
            return Ok(value.clone());
        }

        // Concurrent callers with the same key wait here for the first one;
        // a failed attempt leaves the cell empty for the next caller.
        let init = cell.get_or_try_init(|| capability.execute(args, ctx));
        match timeout_at(ctx.deadline, init).await {
            Ok(Ok(value)) => Ok(value.clone()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SentinelError::timeout(format!("capability {name}"))),
        }
    }
}

fn args_digest(args: &Value) -> String {
    // serde_json maps are key-sorted, so equal arguments serialize equally.
    let bytes = serde_json::to_vec(args).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
