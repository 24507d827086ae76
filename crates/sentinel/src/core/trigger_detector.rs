//! Trigger detection with per-(instrument, condition) cooldowns.
//!
//! Predicates are pure functions of a [`MarketSnapshot`]. The cooldown table
//! and the per-instrument ordering watermark live behind one `Mutex`, and an
//! evaluation checks and records every condition inside a single critical
//! section, so concurrent evaluations of the same instrument cannot both emit.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::types::{ConditionKind, MarketSnapshot, TriggerCondition, TriggerEvent, TriggerRule};

#[derive(Default)]
struct CooldownTable {
    /// (symbol, condition id) → unix seconds of the firing that opened the window.
    last_fired: HashMap<(String, String), i64>,
    /// symbol → `as_of` of the newest snapshot evaluated.
    last_evaluated: HashMap<String, i64>,
}

pub struct TriggerDetector {
    rules: Vec<TriggerRule>,
    table: Mutex<CooldownTable>,
}

impl TriggerDetector {
    pub fn new(rules: Vec<TriggerRule>) -> Self {
        Self {
            rules,
            table: Mutex::new(CooldownTable::default()),
        }
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// Rules bound to one instrument.
    pub fn conditions_for(&self, symbol: &str) -> Vec<TriggerCondition> {
        self.rules
            .iter()
            .map(|r| TriggerCondition::bind(symbol, r))
            .collect()
    }

    /// Conditions whose predicate holds on the snapshot, as `(rule id, detail)`.
    /// Ignores cooldowns and records nothing.
    pub fn matching(&self, snapshot: &MarketSnapshot) -> Vec<(String, String)> {
        self.rules
            .iter()
            .filter_map(|rule| predicate(&rule.kind, snapshot).map(|detail| (rule.id.clone(), detail)))
            .collect()
    }

    /// Evaluate all conditions against the snapshot at the current wall clock.
    pub fn evaluate(&self, snapshot: &MarketSnapshot) -> Vec<TriggerEvent> {
        self.evaluate_at(snapshot, chrono::Utc::now().timestamp())
    }

    /// Evaluate all conditions as of `now` (unix seconds).
    ///
    /// A snapshot older than the last one evaluated for the same instrument is
    /// rejected with no events. A condition that fired at `t` stays silent until
    /// `t + cooldown`, regardless of how its predicate moves in between.
    pub fn evaluate_at(&self, snapshot: &MarketSnapshot, now: i64) -> Vec<TriggerEvent> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(&seen) = table.last_evaluated.get(&snapshot.symbol) {
            if snapshot.as_of < seen {
                warn!(
                    symbol = %snapshot.symbol,
                    as_of = snapshot.as_of,
                    last_evaluated = seen,
                    "out-of-order snapshot rejected"
                );
                return Vec::new();
            }
        }
        table
            .last_evaluated
            .insert(snapshot.symbol.clone(), snapshot.as_of);

        let mut digest: Option<String> = None;
        let mut events = Vec::new();

        for rule in &self.rules {
            let Some(detail) = predicate(&rule.kind, snapshot) else {
                continue;
            };

            let key = (snapshot.symbol.clone(), rule.id.clone());
            if let Some(&fired_at) = table.last_fired.get(&key) {
                let elapsed = now.saturating_sub(fired_at);
                let cooldown = i64::try_from(rule.cooldown_seconds).unwrap_or(i64::MAX);
                if elapsed < cooldown {
                    debug!(
                        symbol = %snapshot.symbol,
                        condition = %rule.id,
                        remaining_secs = cooldown.saturating_sub(elapsed),
                        "trigger suppressed by cooldown"
                    );
                    continue;
                }
            }

            table.last_fired.insert(key, now);
            let digest = digest.get_or_insert_with(|| snapshot.digest()).clone();
            info!(symbol = %snapshot.symbol, condition = %rule.id, %detail, "trigger fired");
            events.push(TriggerEvent {
                symbol: snapshot.symbol.clone(),
                condition_id: rule.id.clone(),
                fired_at: now,
                bar_timestamp: snapshot.as_of,
                snapshot_digest: digest,
                detail,
            });
        }

        events
    }
}

/// Evaluate one predicate; `Some(detail)` when it holds.
fn predicate(kind: &ConditionKind, snap: &MarketSnapshot) -> Option<String> {
    let r = &snap.readings;
    match kind {
        ConditionKind::RsiOverbought { line } => (r.rsi.value > *line)
            .then(|| format!("RSI {} above {line}", r.rsi.value.round_dp(2))),
        ConditionKind::RsiOversold { line } => (r.rsi.value < *line)
            .then(|| format!("RSI {} below {line}", r.rsi.value.round_dp(2))),
        ConditionKind::MaCrossUp => {
            let (pf, ps) = (r.ma_fast_prev?, r.ma_slow_prev?);
            (pf.value <= ps.value && r.ma_fast.value > r.ma_slow.value).then(|| {
                format!(
                    "fast MA {} crossed above slow MA {}",
                    r.ma_fast.value.round_dp(4),
                    r.ma_slow.value.round_dp(4)
                )
            })
        }
        ConditionKind::MaCrossDown => {
            let (pf, ps) = (r.ma_fast_prev?, r.ma_slow_prev?);
            (pf.value >= ps.value && r.ma_fast.value < r.ma_slow.value).then(|| {
                format!(
                    "fast MA {} crossed below slow MA {}",
                    r.ma_fast.value.round_dp(4),
                    r.ma_slow.value.round_dp(4)
                )
            })
        }
        ConditionKind::MacdCrossUp => {
            let prev = r.macd_prev?;
            (prev.macd <= prev.signal && r.macd.macd > r.macd.signal)
                .then(|| format!("MACD crossed above signal (histogram {})", r.macd.histogram.round_dp(6)))
        }
        ConditionKind::MacdCrossDown => {
            let prev = r.macd_prev?;
            (prev.macd >= prev.signal && r.macd.macd < r.macd.signal)
                .then(|| format!("MACD crossed below signal (histogram {})", r.macd.histogram.round_dp(6)))
        }
        ConditionKind::PriceChange { percent, lookback } => {
            let past = snap.close_back(*lookback)?;
            if past <= Decimal::ZERO {
                return None;
            }
            let change = snap.latest.close / past - Decimal::ONE;
            (change.abs() >= *percent).then(|| {
                format!(
                    "close moved {}% over {lookback} bars",
                    (change * Decimal::ONE_HUNDRED).round_dp(2)
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorParams;
    use crate::core::indicators::{compute_snapshot, tests::bars};
    use crate::types::{
        IndicatorReadings, IndicatorValue, Instrument, InstrumentClass, MacdValue,
        MovingAverageKind, PricePoint,
    };
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_000;

    fn iv(ts: i64, value: Decimal) -> IndicatorValue {
        IndicatorValue { timestamp: ts, value }
    }

    fn mv(ts: i64, macd: Decimal, signal: Decimal) -> MacdValue {
        MacdValue {
            timestamp: ts,
            macd,
            signal,
            histogram: macd - signal,
        }
    }

    fn point(ts: i64, close: Decimal) -> PricePoint {
        PricePoint {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    /// Snapshot with a given RSI and neutral everything else.
    fn snap(as_of: i64, rsi: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "SYM/USD".into(),
            class: InstrumentClass::Primary,
            as_of,
            latest: point(as_of, dec!(100)),
            history: vec![point(as_of, dec!(100))],
            readings: IndicatorReadings {
                rsi: iv(as_of, rsi),
                rsi_prev: None,
                ma_fast: iv(as_of, dec!(100)),
                ma_fast_prev: None,
                ma_slow: iv(as_of, dec!(100)),
                ma_slow_prev: None,
                macd: mv(as_of, Decimal::ZERO, Decimal::ZERO),
                macd_prev: None,
            },
        }
    }

    fn overbought(cooldown: u64) -> TriggerRule {
        TriggerRule {
            id: "rsi_overbought".into(),
            kind: ConditionKind::RsiOverbought { line: dec!(70) },
            cooldown_seconds: cooldown,
        }
    }

    #[test]
    fn test_rsi_overbought_scenario() {
        // 14-point warm-up then a point driving RSI(14) to exactly 75:
        // seven +3 moves and seven -1 moves → avg gain 1.5, avg loss 0.5.
        let mut closes = vec![dec!(100)];
        for _ in 0..7 {
            let next = *closes.last().unwrap() + dec!(3);
            closes.push(next);
        }
        for _ in 0..7 {
            let next = *closes.last().unwrap() - dec!(1);
            closes.push(next);
        }
        assert_eq!(closes.len(), 15);

        let inst = Instrument {
            symbol: "SYM/USD".into(),
            class: InstrumentClass::Primary,
            poll_interval_seconds: None,
            providers: vec!["stub".into()],
        };
        let params = IndicatorParams {
            rsi_period: 14,
            ma_kind: MovingAverageKind::Sma,
            ma_fast: 2,
            ma_slow: 3,
            macd_fast: 2,
            macd_slow: 3,
            macd_signal: 2,
        };
        let detector = TriggerDetector::new(vec![overbought(600)]);

        let warmup = bars(&closes[..14]);
        assert!(compute_snapshot(&inst, &warmup, &params, 5).is_err());

        let first = compute_snapshot(&inst, &bars(&closes), &params, 5).unwrap();
        assert_eq!(first.readings.rsi.value, dec!(75));
        let events = detector.evaluate_at(&first, T0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].condition_id, "rsi_overbought");
        assert_eq!(events[0].snapshot_digest, first.digest());

        // Five more one-minute ticks, RSI keeps climbing.
        for minute in 1..=5 {
            let next = *closes.last().unwrap() + dec!(3);
            closes.push(next);
            let s = compute_snapshot(&inst, &bars(&closes), &params, 5).unwrap();
            assert!(s.readings.rsi.value > dec!(70));
            assert!(detector.evaluate_at(&s, T0 + 60 * minute).is_empty());
        }

        // Cooldown elapsed.
        let s = compute_snapshot(&inst, &bars(&closes), &params, 5).unwrap();
        assert_eq!(detector.evaluate_at(&s, T0 + 600).len(), 1);
    }

    #[test]
    fn test_false_excursion_does_not_rearm() {
        let detector = TriggerDetector::new(vec![overbought(600)]);
        assert_eq!(detector.evaluate_at(&snap(T0, dec!(75)), T0).len(), 1);
        assert!(detector.evaluate_at(&snap(T0 + 60, dec!(60)), T0 + 60).is_empty());
        assert!(detector.evaluate_at(&snap(T0 + 120, dec!(80)), T0 + 120).is_empty());
        assert!(detector.evaluate_at(&snap(T0 + 599, dec!(80)), T0 + 599).is_empty());
        assert_eq!(detector.evaluate_at(&snap(T0 + 600, dec!(80)), T0 + 600).len(), 1);
    }

    #[test]
    fn test_cooldowns_are_per_instrument() {
        let detector = TriggerDetector::new(vec![overbought(600)]);
        let mut other = snap(T0, dec!(75));
        other.symbol = "OTHER/USD".into();
        assert_eq!(detector.evaluate_at(&snap(T0, dec!(75)), T0).len(), 1);
        assert_eq!(detector.evaluate_at(&other, T0).len(), 1);
    }

    #[test]
    fn test_huge_cooldown_never_rearms() {
        let detector = TriggerDetector::new(vec![overbought(u64::MAX)]);
        assert_eq!(detector.evaluate_at(&snap(T0, dec!(75)), T0).len(), 1);
        assert!(detector.evaluate_at(&snap(T0 + 60, dec!(75)), T0 + 60).is_empty());
        assert!(detector
            .evaluate_at(&snap(T0 + 120, dec!(75)), i64::MAX)
            .is_empty());
    }

    #[test]
    fn test_matching_ignores_and_keeps_cooldowns() {
        let detector = TriggerDetector::new(vec![overbought(600)]);
        assert_eq!(detector.evaluate_at(&snap(T0, dec!(75)), T0).len(), 1);

        let hits = detector.matching(&snap(T0 + 60, dec!(75)));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "rsi_overbought");
        assert!(detector.matching(&snap(T0 + 60, dec!(50))).is_empty());

        // Still inside the window opened at T0.
        assert!(detector.evaluate_at(&snap(T0 + 120, dec!(75)), T0 + 120).is_empty());
    }

    #[test]
    fn test_out_of_order_snapshot_rejected() {
        let detector = TriggerDetector::new(vec![overbought(0)]);
        assert_eq!(detector.evaluate_at(&snap(T0 + 120, dec!(75)), T0).len(), 1);
        assert!(detector.evaluate_at(&snap(T0 + 60, dec!(75)), T0 + 1).is_empty());
        // Same bar again is fine.
        assert_eq!(detector.evaluate_at(&snap(T0 + 120, dec!(75)), T0 + 2).len(), 1);
    }

    #[test]
    fn test_rsi_oversold_strictly_below_line() {
        let rule = TriggerRule {
            id: "oversold".into(),
            kind: ConditionKind::RsiOversold { line: dec!(30) },
            cooldown_seconds: 0,
        };
        let detector = TriggerDetector::new(vec![rule]);
        assert!(detector.evaluate_at(&snap(T0, dec!(30)), T0).is_empty());
        assert_eq!(detector.evaluate_at(&snap(T0 + 60, dec!(29.9)), T0 + 60).len(), 1);
    }

    #[test]
    fn test_ma_cross_up_needs_previous_reading() {
        let rule = TriggerRule {
            id: "golden".into(),
            kind: ConditionKind::MaCrossUp,
            cooldown_seconds: 0,
        };
        let detector = TriggerDetector::new(vec![rule]);

        let mut s = snap(T0, dec!(50));
        s.readings.ma_fast = iv(T0, dec!(101));
        s.readings.ma_slow = iv(T0, dec!(100));
        assert!(detector.evaluate_at(&s, T0).is_empty());

        s.readings.ma_fast_prev = Some(iv(T0 - 60, dec!(99)));
        s.readings.ma_slow_prev = Some(iv(T0 - 60, dec!(100)));
        let events = detector.evaluate_at(&s, T0);
        assert_eq!(events.len(), 1);
        assert!(events[0].detail.contains("crossed above"));

        // Already above on both readings: no cross.
        s.readings.ma_fast_prev = Some(iv(T0 - 60, dec!(100.5)));
        assert!(detector.evaluate_at(&s, T0).is_empty());
    }

    #[test]
    fn test_macd_cross_down() {
        let rule = TriggerRule {
            id: "macd_down".into(),
            kind: ConditionKind::MacdCrossDown,
            cooldown_seconds: 0,
        };
        let detector = TriggerDetector::new(vec![rule]);
        let mut s = snap(T0, dec!(50));
        s.readings.macd_prev = Some(mv(T0 - 60, dec!(0.5), dec!(0.4)));
        s.readings.macd = mv(T0, dec!(0.3), dec!(0.4));
        assert_eq!(detector.evaluate_at(&s, T0).len(), 1);
    }

    #[test]
    fn test_price_change_breach() {
        let rule = TriggerRule {
            id: "move".into(),
            kind: ConditionKind::PriceChange {
                percent: dec!(0.05),
                lookback: 2,
            },
            cooldown_seconds: 0,
        };
        let detector = TriggerDetector::new(vec![rule]);

        let mut s = snap(T0 + 120, dec!(50));
        s.history = vec![point(T0, dec!(100)), point(T0 + 60, dec!(97)), point(T0 + 120, dec!(94))];
        s.latest = point(T0 + 120, dec!(94));
        let events = detector.evaluate_at(&s, T0 + 120);
        assert_eq!(events.len(), 1);
        assert!(events[0].detail.contains("-6"));

        s.latest.close = dec!(96);
        s.history[2].close = dec!(96);
        assert!(detector.evaluate_at(&s, T0 + 180).is_empty());

        // Lookback beyond history never fires.
        s.history.truncate(2);
        s.latest.close = dec!(50);
        assert!(detector.evaluate_at(&s, T0 + 240).is_empty());
    }

    #[test]
    fn test_concurrent_evaluation_emits_once() {
        let detector = TriggerDetector::new(vec![overbought(600)]);
        let s = snap(T0, dec!(90));
        let total: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| detector.evaluate_at(&s, T0).len()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(total, 1);
    }

    #[test]
    fn test_conditions_bound_per_symbol() {
        let detector = TriggerDetector::new(vec![overbought(600)]);
        let conds = detector.conditions_for("BTCUSDT");
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].symbol, "BTCUSDT");
        assert_eq!(conds[0].cooldown_seconds, 600);
    }

    proptest! {
        #[test]
        fn fired_events_respect_cooldown(
            steps in prop::collection::vec((0i64..400, 40u32..100u32), 1..60),
            cooldown in 0u64..1200,
        ) {
            let detector = TriggerDetector::new(vec![overbought(cooldown)]);
            let mut now = T0;
            let mut fired = Vec::new();
            for (dt, rsi) in steps {
                now += dt;
                for e in detector.evaluate_at(&snap(now, Decimal::from(rsi)), now) {
                    fired.push(e.fired_at);
                }
            }
            for pair in fired.windows(2) {
                prop_assert!(pair[1] - pair[0] >= cooldown as i64);
            }
        }
    }
}
