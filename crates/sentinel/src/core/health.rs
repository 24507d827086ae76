//! Process-wide heartbeat counters backing `get_system_status`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::time::Instant;

/// Lock-free counters updated by the scheduler, router and decision core.
pub struct HealthStats {
    started: Instant,
    started_at: i64,
    cycles: AtomicU64,
    missed_cycles: AtomicU64,
    data_failures: AtomicU64,
    skipped: AtomicU64,
    triggers_fired: AtomicU64,
    messages_received: AtomicU64,
    decisions_completed: AtomicU64,
    decisions_failed: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub started_at: i64,
    pub uptime_seconds: u64,
    pub cycles: u64,
    pub missed_cycles: u64,
    pub data_failures: u64,
    /// Cycles skipped for insufficient history.
    pub skipped: u64,
    pub triggers_fired: u64,
    pub messages_received: u64,
    pub decisions_completed: u64,
    pub decisions_failed: u64,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: chrono::Utc::now().timestamp(),
            cycles: AtomicU64::new(0),
            missed_cycles: AtomicU64::new(0),
            data_failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            triggers_fired: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            decisions_completed: AtomicU64::new(0),
            decisions_failed: AtomicU64::new(0),
        }
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missed_cycle(&self) {
        self.missed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_data_failure(&self) {
        self.data_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_triggers(&self, n: usize) {
        self.triggers_fired.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, completed: bool) {
        let counter = if completed {
            &self.decisions_completed
        } else {
            &self.decisions_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs(),
            cycles: self.cycles.load(Ordering::Relaxed),
            missed_cycles: self.missed_cycles.load(Ordering::Relaxed),
            data_failures: self.data_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decisions_completed: self.decisions_completed.load(Ordering::Relaxed),
            decisions_failed: self.decisions_failed.load(Ordering::Relaxed),
        }
    }
}
