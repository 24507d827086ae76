//! Token-bucket rate limiter, one per provider.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::errors::SentinelError;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Callers over the budget wait for a token instead of failing, unless the
/// wait would cross their deadline.
pub struct TokenBucket {
    provider: String,
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(provider: impl Into<String>, capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            provider: provider.into(),
            capacity,
            refill_per_second: refill_per_second.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one is available.
    ///
    /// Fails with `RateLimitTimeout` as soon as it is known that no token can
    /// be granted before `deadline`. The lock is never held across a sleep.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), SentinelError> {
        loop {
            let wait = match self.try_take() {
                None => return Ok(()),
                Some(wait) => wait,
            };

            let wakes_at = Instant::now().checked_add(wait);
            if wakes_at.map_or(true, |at| at > deadline) {
                return Err(SentinelError::RateLimitTimeout {
                    provider: self.provider.clone(),
                });
            }

            trace!(provider = %self.provider, wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available; otherwise return how long until the
    /// next one accrues (saturating at `Duration::MAX`).
    fn try_take(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            let secs = (1.0 - state.tokens) / self.refill_per_second;
            Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = Instant::now().duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_per_second).min(self.capacity)
    }
}
