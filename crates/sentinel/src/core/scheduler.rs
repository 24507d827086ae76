//! Heartbeat scheduler.
//!
//! One timer task per (class, cadence) group. Each timer tick starts a cycle
//! that processes the group's instruments concurrently, bounded by a shared
//! semaphore. An instrument whose previous tick is still running misses the
//! cycle rather than queueing behind it, which also keeps its snapshots in
//! timestamp order. The fetch, indicator and trigger stage runs under
//! `tick_timeout_seconds`. Trigger events leave that stage as plain values and
//! are persisted after it, so a timeout can never drop an event whose cooldown
//! was already consumed. Escalation to the decision core happens outside the
//! semaphore and after the instrument lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decision::DecisionCore;
use super::health::HealthStats;
use super::indicators::compute_snapshot;
use super::trigger_detector::TriggerDetector;
use crate::config::{SchedulerConfig, SignalConfig};
use crate::errors::SentinelError;
use crate::market::MarketDataGateway;
use crate::store::{record_best_effort, Store, Table};
use crate::types::{
    DecisionRequest, DecisionResult, FetchRange, Instrument, InstrumentClass, MarketSnapshot,
    TriggerEvent,
};

/// What happened to one instrument in one cycle.
#[derive(Debug)]
pub enum TickOutcome {
    /// Previous tick for the instrument still running.
    Busy,
    /// Data stage exceeded the tick timeout.
    TimedOut,
    /// Not enough history for the indicators yet.
    Skipped,
    DataFailure(SentinelError),
    /// Snapshot evaluated, nothing to escalate.
    Quiet,
    Escalated(Box<DecisionResult>),
}

#[derive(Default)]
struct InstrumentState {
    last_analyzed: Option<Instant>,
}

pub struct HeartbeatScheduler {
    instruments: Vec<Instrument>,
    gateway: Arc<MarketDataGateway>,
    detector: Arc<TriggerDetector>,
    decision: Arc<DecisionCore>,
    store: Arc<dyn Store>,
    health: Arc<HealthStats>,
    signals: Arc<SignalConfig>,
    config: SchedulerConfig,
    permits: Semaphore,
    states: HashMap<String, Mutex<InstrumentState>>,
}

impl HeartbeatScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instruments: Vec<Instrument>,
        gateway: Arc<MarketDataGateway>,
        detector: Arc<TriggerDetector>,
        decision: Arc<DecisionCore>,
        store: Arc<dyn Store>,
        health: Arc<HealthStats>,
        signals: Arc<SignalConfig>,
        config: SchedulerConfig,
    ) -> Self {
        let states = instruments
            .iter()
            .map(|i| (i.symbol.clone(), Mutex::new(InstrumentState::default())))
            .collect();
        Self {
            permits: Semaphore::new(config.max_concurrency.max(1)),
            instruments,
            gateway,
            detector,
            decision,
            store,
            health,
            signals,
            config,
            states,
        }
    }

    /// Instruments grouped by class and effective cadence (seconds).
    pub fn groups(&self) -> Vec<(InstrumentClass, u64, Vec<Instrument>)> {
        let mut groups: HashMap<(InstrumentClass, u64), Vec<Instrument>> = HashMap::new();
        for instrument in &self.instruments {
            let secs = self.config.interval_for(instrument);
            groups
                .entry((instrument.class, secs))
                .or_default()
                .push(instrument.clone());
        }
        let mut out: Vec<_> = groups
            .into_iter()
            .map(|((class, secs), instruments)| (class, secs, instruments))
            .collect();
        out.sort_by_key(|(class, secs, _)| (class.as_str(), *secs));
        out
    }

    /// Drive every group's timer until cancelled. Cycles still running at
    /// cancellation are awaited.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut timers = JoinSet::new();
        for (class, secs, group) in self.groups() {
            info!(
                class = %class,
                interval_secs = secs,
                instruments = group.len(),
                "heartbeat timer started"
            );
            let scheduler = Arc::clone(&self);
            let cancel = cancel.clone();
            timers.spawn(async move { scheduler.run_group(group, secs, cancel).await });
        }

        while timers.join_next().await.is_some() {}
        info!("heartbeat scheduler stopped");
    }

    async fn run_group(self: Arc<Self>, group: Vec<Instrument>, secs: u64, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();
        let group = Arc::new(group);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    while cycles.try_join_next().is_some() {}
                    let scheduler = Arc::clone(&self);
                    let group = Arc::clone(&group);
                    cycles.spawn(async move { scheduler.run_cycle(&group).await });
                }
            }
        }

        while cycles.join_next().await.is_some() {}
    }

    /// Process a set of instruments concurrently. Failures stay per instrument.
    pub async fn run_cycle(&self, instruments: &[Instrument]) -> Vec<(String, TickOutcome)> {
        let ticks = instruments.iter().map(|instrument| async move {
            if self.config.jitter_ms > 0 {
                let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
                sleep(Duration::from_millis(jitter)).await;
            }
            (instrument.symbol.clone(), self.tick(instrument).await)
        });
        let outcomes = join_all(ticks).await;

        let failed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TickOutcome::DataFailure(_) | TickOutcome::TimedOut))
            .count();
        debug!(instruments = outcomes.len(), failed, "heartbeat cycle finished");
        outcomes
    }

    /// One heartbeat for one instrument.
    pub async fn tick(&self, instrument: &Instrument) -> TickOutcome {
        let Some(state) = self.states.get(&instrument.symbol) else {
            warn!(symbol = %instrument.symbol, "tick for unscheduled instrument ignored");
            return TickOutcome::Skipped;
        };
        let Ok(mut state) = state.try_lock() else {
            warn!(symbol = %instrument.symbol, "previous tick still running, cycle missed");
            self.health.record_missed_cycle();
            return TickOutcome::Busy;
        };

        let observed = {
            let Ok(_permit) = self.permits.acquire().await else {
                return TickOutcome::Skipped;
            };
            self.health.record_cycle();
            let limit = Duration::from_secs(self.config.tick_timeout_seconds);
            timeout(limit, self.observe(instrument, Instant::now() + limit)).await
        };

        let (snapshot, events) = match observed {
            Ok(Ok(observed)) => observed,
            Err(_)
            | Ok(Err(SentinelError::Timeout { .. }))
            | Ok(Err(SentinelError::RateLimitTimeout { .. })) => {
                warn!(symbol = %instrument.symbol, "heartbeat tick timed out, cycle missed");
                self.health.record_missed_cycle();
                return TickOutcome::TimedOut;
            }
            Ok(Err(e @ SentinelError::InsufficientData { .. })) => {
                info!(symbol = %instrument.symbol, reason = %e, "not enough history, skipping");
                self.health.record_skip();
                return TickOutcome::Skipped;
            }
            Ok(Err(e)) => {
                warn!(symbol = %instrument.symbol, error = %e, "market data failure");
                self.health.record_data_failure();
                return TickOutcome::DataFailure(e);
            }
        };

        self.health.record_triggers(events.len());
        let reason = self.escalation_reason(&events, state.last_analyzed);
        if reason.is_some() {
            state.last_analyzed = Some(Instant::now());
        }
        // Ordering only matters up to trigger evaluation.
        drop(state);

        for event in &events {
            let record = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
            record_best_effort(self.store.as_ref(), Table::TriggerEvents, record).await;
        }

        let Some(reason) = reason else {
            debug!(symbol = %instrument.symbol, as_of = snapshot.as_of, "heartbeat quiet");
            return TickOutcome::Quiet;
        };
        info!(symbol = %instrument.symbol, %reason, "escalating to decision core");
        let result = self
            .decision
            .decide(DecisionRequest::heartbeat(snapshot, events, reason))
            .await;
        TickOutcome::Escalated(Box::new(result))
    }

    /// Fetch, compute, detect. No suspension point follows the detector, so
    /// events it records are always returned.
    async fn observe(
        &self,
        instrument: &Instrument,
        deadline: Instant,
    ) -> Result<(MarketSnapshot, Vec<TriggerEvent>), SentinelError> {
        let range = FetchRange::new(&self.signals.interval, self.signals.history_bars);
        let bars = self.gateway.fetch(instrument, &range, deadline).await?;
        let snapshot = compute_snapshot(
            instrument,
            &bars,
            &self.signals.indicators,
            self.signals.snapshot_history,
        )?;

        let events = self.detector.evaluate(&snapshot);
        Ok((snapshot, events))
    }

    fn escalation_reason(&self, events: &[TriggerEvent], last_analyzed: Option<Instant>) -> Option<String> {
        if !events.is_empty() {
            let ids: Vec<&str> = events.iter().map(|e| e.condition_id.as_str()).collect();
            return Some(format!("{} trigger(s): {}", events.len(), ids.join(", ")));
        }
        let every = self.config.always_analyze_seconds;
        if every == 0 {
            return None;
        }
        let due = last_analyzed.map_or(true, |t| t.elapsed() >= Duration::from_secs(every));
        due.then(|| format!("periodic analysis (every {every}s)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::config::IndicatorParams;
    use crate::core::decision::tests::{stub_registry, ScriptedOracle};
    use crate::core::indicators::tests::bars;
    use crate::market::gateway::tests::ScriptedProvider;
    use crate::market::{MarketDataProvider, RetryPolicy, TokenBucket};
    use crate::store::tests::MemoryStore;
    use crate::store::{Filter, SortOrder, StoredRecord};
    use crate::types::{ConditionKind, MovingAverageKind, Proposal, RequestPayload, TriggerRule};
    use async_trait::async_trait;
    use serde_json::Value;

    /// Memory store whose every call first sleeps for `delay`.
    struct SlowStore {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl Store for SlowStore {
        async fn insert(&self, table: Table, record: Value) -> Result<i64, SentinelError> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.inner.insert(table, record).await
        }

        async fn query(
            &self,
            table: Table,
            filter: &Filter,
            limit: u32,
            order: SortOrder,
        ) -> Result<Vec<StoredRecord>, SentinelError> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.inner.query(table, filter, limit, order).await
        }
    }

    struct Setup {
        always_analyze_seconds: u64,
        primary_interval_seconds: u64,
        oracle: ScriptedOracle,
        oracle_timeout: Duration,
        store_delay: Duration,
    }

    impl Setup {
        fn analyzing_every(always_analyze_seconds: u64) -> Self {
            Self {
                always_analyze_seconds,
                primary_interval_seconds: 60,
                oracle: ScriptedOracle::proposing(vec![Proposal::new("get_system_status", json!({}))]),
                oracle_timeout: Duration::from_secs(5),
                store_delay: Duration::ZERO,
            }
        }
    }

    struct Fixture {
        scheduler: Arc<HeartbeatScheduler>,
        oracle: Arc<ScriptedOracle>,
        store: Arc<MemoryStore>,
        health: Arc<HealthStats>,
    }

    fn instrument(symbol: &str, provider: &str) -> Instrument {
        Instrument {
            symbol: symbol.into(),
            class: InstrumentClass::Primary,
            poll_interval_seconds: None,
            providers: vec![provider.into()],
        }
    }

    fn rising(n: usize) -> Vec<Decimal> {
        (0..n).map(|i| Decimal::from(100 + i as u64)).collect()
    }

    fn fixture(
        providers: Vec<Arc<ScriptedProvider>>,
        instruments: Vec<Instrument>,
        always_analyze_seconds: u64,
    ) -> Fixture {
        fixture_with(providers, instruments, Setup::analyzing_every(always_analyze_seconds))
    }

    fn fixture_with(
        providers: Vec<Arc<ScriptedProvider>>,
        instruments: Vec<Instrument>,
        setup: Setup,
    ) -> Fixture {
        let gateway = providers.into_iter().fold(MarketDataGateway::new(), |g, p| {
            let name = p.name().to_string();
            g.with_provider(
                p,
                TokenBucket::new(name, 100, 100.0),
                Duration::ZERO,
                RetryPolicy {
                    max_attempts: 1,
                    base_backoff: Duration::from_millis(10),
                    max_backoff: Duration::from_millis(10),
                },
            )
        });
        let signals = Arc::new(SignalConfig {
            interval: "1m".into(),
            history_bars: 20,
            snapshot_history: 5,
            indicators: IndicatorParams {
                rsi_period: 3,
                ma_kind: MovingAverageKind::Sma,
                ma_fast: 2,
                ma_slow: 3,
                macd_fast: 2,
                macd_slow: 3,
                macd_signal: 2,
            },
            triggers: vec![TriggerRule {
                id: "rsi_overbought".into(),
                kind: ConditionKind::RsiOverbought { line: dec!(70) },
                cooldown_seconds: 600,
            }],
        });
        let oracle = Arc::new(setup.oracle);
        let store = Arc::new(MemoryStore::default());
        let audit: Arc<dyn Store> = Arc::new(SlowStore {
            inner: store.clone(),
            delay: setup.store_delay,
        });
        let health = Arc::new(HealthStats::new());
        let (registry, _, _) = stub_registry();
        let decision = Arc::new(DecisionCore::new(
            registry,
            oracle.clone(),
            audit.clone(),
            health.clone(),
            setup.oracle_timeout,
            Duration::from_secs(5),
        ));
        let scheduler = Arc::new(HeartbeatScheduler::new(
            instruments,
            Arc::new(gateway),
            Arc::new(TriggerDetector::new(signals.triggers.clone())),
            decision,
            audit,
            health.clone(),
            signals,
            SchedulerConfig {
                primary_interval_seconds: setup.primary_interval_seconds,
                secondary_interval_seconds: 300,
                always_analyze_seconds: setup.always_analyze_seconds,
                max_concurrency: 2,
                tick_timeout_seconds: 10,
                jitter_ms: 0,
            },
        ));
        Fixture {
            scheduler,
            oracle,
            store,
            health,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_escalates_once_per_cooldown() {
        let provider = Arc::new(ScriptedProvider::ok("stub", bars(&rising(20))));
        let btc = instrument("BTCUSDT", "stub");
        let f = fixture(vec![provider], vec![btc.clone()], 0);

        let outcome = f.scheduler.tick(&btc).await;
        let TickOutcome::Escalated(result) = outcome else {
            panic!("expected escalation, got {outcome:?}");
        };
        assert!(result.is_completed());

        let requests = f.oracle.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        match &requests[0].payload {
            RequestPayload::Heartbeat { triggers, reason, .. } => {
                assert_eq!(triggers.len(), 1);
                assert_eq!(triggers[0].condition_id, "rsi_overbought");
                assert!(reason.contains("rsi_overbought"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(f.store.records(Table::TriggerEvents).len(), 1);

        // Same condition inside its cooldown: evaluated, not escalated.
        assert!(matches!(f.scheduler.tick(&btc).await, TickOutcome::Quiet));
        assert_eq!(f.oracle.propose_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.health.snapshot().triggers_fired, 1);
        assert_eq!(f.health.snapshot().cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_analyze_interval() {
        let flat = vec![dec!(100); 20];
        let provider = Arc::new(ScriptedProvider::ok("stub", bars(&flat)));
        let btc = instrument("BTCUSDT", "stub");
        let f = fixture(vec![provider], vec![btc.clone()], 3600);

        assert!(matches!(f.scheduler.tick(&btc).await, TickOutcome::Escalated(_)));
        assert!(matches!(f.scheduler.tick(&btc).await, TickOutcome::Quiet));

        tokio::time::advance(Duration::from_secs(3600)).await;
        let outcome = f.scheduler.tick(&btc).await;
        let TickOutcome::Escalated(_) = outcome else {
            panic!("expected periodic escalation, got {outcome:?}");
        };
        let requests = f.oracle.requests.lock().unwrap().clone();
        match &requests[1].payload {
            RequestPayload::Heartbeat { triggers, reason, .. } => {
                assert!(triggers.is_empty());
                assert!(reason.starts_with("periodic analysis"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_history_is_skipped() {
        let provider = Arc::new(ScriptedProvider::ok("stub", bars(&[dec!(1), dec!(2)])));
        let btc = instrument("BTCUSDT", "stub");
        let f = fixture(vec![provider], vec![btc.clone()], 60);

        assert!(matches!(f.scheduler.tick(&btc).await, TickOutcome::Skipped));
        assert_eq!(f.health.snapshot().skipped, 1);
        assert_eq!(f.oracle.propose_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_instrument_does_not_affect_others() {
        let good = Arc::new(ScriptedProvider::ok("good", bars(&rising(20))));
        let bad = Arc::new(ScriptedProvider::new(
            "bad",
            vec![Err(SentinelError::data_unavailable("ETHUSDT", "HTTP 500"))],
        ));
        let instruments = vec![
            instrument("BTCUSDT", "good"),
            instrument("ETHUSDT", "bad"),
            instrument("SOLUSDT", "good"),
        ];
        let f = fixture(vec![good, bad], instruments.clone(), 0);

        let outcomes = f.scheduler.run_cycle(&instruments).await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], (ref s, TickOutcome::Escalated(_)) if s == "BTCUSDT"));
        assert!(matches!(outcomes[1], (ref s, TickOutcome::DataFailure(_)) if s == "ETHUSDT"));
        assert!(matches!(outcomes[2], (ref s, TickOutcome::Escalated(_)) if s == "SOLUSDT"));
        assert_eq!(f.health.snapshot().data_failures, 1);
        assert_eq!(f.oracle.propose_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_times_out_as_missed_cycle() {
        let provider = Arc::new(
            ScriptedProvider::ok("stub", bars(&rising(20))).slow(Duration::from_secs(60)),
        );
        let btc = instrument("BTCUSDT", "stub");
        let f = fixture(vec![provider], vec![btc.clone()], 0);

        assert!(matches!(f.scheduler.tick(&btc).await, TickOutcome::TimedOut));
        assert_eq!(f.health.snapshot().missed_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_missed_not_queued() {
        let provider = Arc::new(
            ScriptedProvider::ok("stub", bars(&rising(20))).slow(Duration::from_secs(5)),
        );
        let btc = instrument("BTCUSDT", "stub");
        let f = fixture(vec![provider.clone()], vec![btc.clone()], 0);

        let first = {
            let scheduler = Arc::clone(&f.scheduler);
            let btc = btc.clone();
            tokio::spawn(async move { scheduler.tick(&btc).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(f.scheduler.tick(&btc).await, TickOutcome::Busy));
        assert!(matches!(first.await.unwrap(), TickOutcome::Escalated(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_groups_by_class_and_cadence() {
        let mut slow = instrument("SOLUSDT", "stub");
        slow.class = InstrumentClass::Secondary;
        let mut custom = instrument("ETHUSDT", "stub");
        custom.poll_interval_seconds = Some(15);
        let f = fixture(vec![], vec![instrument("BTCUSDT", "stub"), slow, custom], 0);

        let groups: Vec<(InstrumentClass, u64, usize)> = f
            .scheduler
            .groups()
            .into_iter()
            .map(|(c, s, i)| (c, s, i.len()))
            .collect();
        assert_eq!(
            groups,
            vec![
                (InstrumentClass::Primary, 15, 1),
                (InstrumentClass::Primary, 60, 1),
                (InstrumentClass::Secondary, 300, 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let provider = Arc::new(ScriptedProvider::ok("stub", bars(&rising(20))));
        let btc = instrument("BTCUSDT", "stub");
        let f = fixture(vec![provider.clone()], vec![btc], 0);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&f.scheduler).run(cancel.clone()));
        // Immediate first tick, then one per 60s.
        tokio::time::sleep(Duration::from_secs(130)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.health.snapshot().cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_does_not_lose_fired_trigger() {
        let provider = Arc::new(ScriptedProvider::ok("stub", bars(&rising(20))));
        let btc = instrument("BTCUSDT", "stub");
        let mut setup = Setup::analyzing_every(0);
        setup.store_delay = Duration::from_secs(30);
        let f = fixture_with(vec![provider], vec![btc.clone()], setup);

        let outcome = f.scheduler.tick(&btc).await;
        let TickOutcome::Escalated(result) = outcome else {
            panic!("expected escalation, got {outcome:?}");
        };
        assert!(result.is_completed());
        assert_eq!(f.oracle.propose_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.records(Table::TriggerEvents).len(), 1);
        assert_eq!(f.health.snapshot().missed_cycles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_decision_does_not_block_next_tick() {
        let provider = Arc::new(ScriptedProvider::ok("stub", bars(&rising(20))));
        let btc = instrument("BTCUSDT", "stub");
        let mut setup = Setup::analyzing_every(3600);
        setup.primary_interval_seconds = 30;
        setup.oracle_timeout = Duration::from_secs(60);
        setup.oracle = ScriptedOracle::proposing(vec![]).slow(Duration::from_secs(59));
        let f = fixture_with(vec![provider.clone()], vec![btc], setup);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&f.scheduler).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Ticks at 0s, 30s and 60s all ran while the first decision was pending.
        assert_eq!(f.health.snapshot().missed_cycles, 0);
        assert_eq!(f.health.snapshot().cycles, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.oracle.propose_calls.load(Ordering::SeqCst), 1);
    }
}
