//! Trade guard: default-to-deny checks in front of every order.
//!
//! Every order placed through `execute_trade` passes `check_order` first,
//! which reserves a slot in the rolling 24h window under the same lock as the
//! count check. The slot is kept with `OrderReservation::commit` once the
//! order fills and released on drop otherwise. A poisoned lock blocks trading
//! rather than letting orders through.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::GuardConfig;
use crate::constants::SECONDS_PER_DAY;
use crate::errors::SentinelError;

const CAPABILITY: &str = "execute_trade";

#[derive(Debug)]
pub struct TradeGuard {
    paused: AtomicBool,
    max_order_notional: Decimal,
    max_orders_per_24h: u32,
    order_times: Mutex<VecDeque<Instant>>,
}

impl TradeGuard {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            paused: AtomicBool::new(config.paused),
            max_order_notional: config.max_order_notional,
            max_orders_per_24h: config.max_orders_per_24h,
            order_times: Mutex::new(VecDeque::new()),
        }
    }

    /// Checks (in order): global pause, order notional, 24h order count.
    /// On success the order holds one slot of the daily limit until the
    /// returned reservation is committed or dropped.
    pub fn check_order(&self, notional: Decimal) -> Result<OrderReservation<'_>, SentinelError> {
        if self.is_paused() {
            return Err(blocked("trading is paused"));
        }

        if notional > self.max_order_notional {
            return Err(blocked(format!(
                "order notional {notional} exceeds max {}",
                self.max_order_notional
            )));
        }

        let mut times = self
            .order_times
            .lock()
            .map_err(|_| blocked("order counter lock poisoned"))?;
        prune(&mut times);
        if times.len() as u32 >= self.max_orders_per_24h {
            return Err(blocked(format!(
                "daily order limit reached ({}/24h)",
                self.max_orders_per_24h
            )));
        }
        let at = Instant::now();
        times.push_back(at);
        Ok(OrderReservation {
            guard: self,
            at,
            committed: false,
        })
    }

    fn release(&self, at: Instant) {
        if let Ok(mut times) = self.order_times.lock() {
            if let Some(pos) = times.iter().rposition(|t| *t == at) {
                times.remove(pos);
            }
        }
    }

    pub fn pause(&self, reason: &str) {
        self.paused.store(true, Ordering::SeqCst);
        error!(reason, "trading PAUSED");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("trading pause cleared");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn orders_last_24h(&self) -> u32 {
        match self.order_times.lock() {
            Ok(mut times) => {
                prune(&mut times);
                times.len() as u32
            }
            Err(_) => self.max_orders_per_24h,
        }
    }

    pub fn status(&self) -> Value {
        json!({
            "paused": self.is_paused(),
            "max_order_notional": self.max_order_notional.to_string(),
            "max_orders_per_24h": self.max_orders_per_24h,
            "orders_last_24h": self.orders_last_24h(),
        })
    }
}

/// A slot in the 24h order window, held between the guard check and the fill.
#[must_use = "an uncommitted reservation is released when dropped"]
#[derive(Debug)]
pub struct OrderReservation<'a> {
    guard: &'a TradeGuard,
    at: Instant,
    committed: bool,
}

impl OrderReservation<'_> {
    /// Count the order toward the daily limit.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for OrderReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.release(self.at);
        }
    }
}

fn prune(times: &mut VecDeque<Instant>) {
    let window = Duration::from_secs(SECONDS_PER_DAY);
    let now = Instant::now();
    while times.front().is_some_and(|t| now.duration_since(*t) >= window) {
        times.pop_front();
    }
}

fn blocked(reason: impl Into<String>) -> SentinelError {
    SentinelError::execution(CAPABILITY, format!("blocked by trade guard: {}", reason.into()))
}
