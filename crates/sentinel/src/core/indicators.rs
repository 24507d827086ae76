//! Pure indicator computations over OHLCV close prices.
//!
//! No I/O, no shared state: every function is safe to call concurrently for
//! different instruments. All arithmetic is `Decimal`, so identical inputs
//! give bit-for-bit identical outputs.
//!
//! Output series are aligned to input timestamps and shorter than the input
//! by the warm-up length:
//!
//! | indicator | first output index      | minimum input        |
//! |-----------|-------------------------|----------------------|
//! | SMA / EMA | `window - 1`            | `window`             |
//! | RSI       | `period`                | `period + 1`         |
//! | MACD      | `slow + signal - 2`     | `slow + signal - 1`  |
//!
//! Seeding follows Wilder (1978) and Appel's MACD definition: every
//! exponential average starts from the simple mean of its first window.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::IndicatorParams;
use crate::constants::{RSI_MAX, RSI_NEUTRAL};
use crate::errors::SentinelError;
use crate::types::{
    IndicatorReadings, IndicatorValue, Instrument, MacdValue, MarketSnapshot, MovingAverageKind,
    PricePoint,
};

type Result<T> = std::result::Result<T, SentinelError>;

// ═══════════════════════════════════════════════════════════════════════════
// Moving averages
// ═══════════════════════════════════════════════════════════════════════════

/// Simple moving average of closes over `window` bars.
pub fn sma(points: &[PricePoint], window: usize) -> Result<Vec<IndicatorValue>> {
    require_positive("sma", "window", window)?;
    require_len("sma", points, window)?;
    let closes = closes(points);
    Ok(align(points, window - 1, sma_series(&closes, window)))
}

/// Exponential moving average of closes.
///
/// Multiplier `k = 2 / (window + 1)`. First value seeded with the SMA of the
/// first `window` closes.
pub fn ema(points: &[PricePoint], window: usize) -> Result<Vec<IndicatorValue>> {
    require_positive("ema", "window", window)?;
    require_len("ema", points, window)?;
    let closes = closes(points);
    Ok(align(points, window - 1, ema_series(&closes, window)))
}

pub fn moving_average(
    kind: MovingAverageKind,
    points: &[PricePoint],
    window: usize,
) -> Result<Vec<IndicatorValue>> {
    match kind {
        MovingAverageKind::Sma => sma(points, window),
        MovingAverageKind::Ema => ema(points, window),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Oscillators
// ═══════════════════════════════════════════════════════════════════════════

/// Relative Strength Index with Wilder's smoothing (factor `1/period`).
///
/// Seeded with simple means of the first `period` gains and losses. A window
/// with no losses reads 100, a completely flat window reads 50. Always within
/// `[0, 100]`.
pub fn rsi(points: &[PricePoint], period: usize) -> Result<Vec<IndicatorValue>> {
    require_positive("rsi", "period", period)?;
    require_len("rsi", points, period + 1)?;

    let closes = closes(points);
    let changes: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_d = Decimal::from(period as u64);
    let period_minus_1 = period_d - Decimal::ONE;

    let mut avg_gain = changes[..period]
        .iter()
        .map(|&c| c.max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_d;
    let mut avg_loss = changes[..period]
        .iter()
        .map(|&c| (-c).max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_d;

    let mut values = Vec::with_capacity(changes.len() - period + 1);
    values.push(rsi_from_averages(avg_gain, avg_loss));

    for &c in &changes[period..] {
        avg_gain = (avg_gain * period_minus_1 + c.max(Decimal::ZERO)) / period_d;
        avg_loss = (avg_loss * period_minus_1 + (-c).max(Decimal::ZERO)) / period_d;
        values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    Ok(align(points, period, values))
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss == Decimal::ZERO {
        return if avg_gain == Decimal::ZERO {
            RSI_NEUTRAL
        } else {
            RSI_MAX
        };
    }
    let rs = avg_gain / avg_loss;
    let value = RSI_MAX - (RSI_MAX / (Decimal::ONE + rs));
    value.clamp(Decimal::ZERO, RSI_MAX)
}

/// Moving Average Convergence Divergence.
///
/// Line = EMA(fast) − EMA(slow), defined from the slow EMA's first value.
/// Signal = EMA(signal) of the line, seeded the same way. Histogram =
/// line − signal.
pub fn macd(
    points: &[PricePoint],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<Vec<MacdValue>> {
    require_positive("macd", "fast", fast)?;
    require_positive("macd", "slow", slow)?;
    require_positive("macd", "signal", signal)?;
    if fast >= slow {
        return Err(SentinelError::Config(format!(
            "macd: fast ({fast}) must be < slow ({slow})"
        )));
    }
    require_len("macd", points, slow + signal - 1)?;

    let closes = closes(points);
    let fast_ema = ema_series(&closes, fast);
    let slow_ema = ema_series(&closes, slow);

    let offset = slow - fast;
    let line: Vec<Decimal> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[i + offset] - s)
        .collect();

    let signal_line = ema_series(&line, signal);
    let start = slow + signal - 2;

    Ok(signal_line
        .iter()
        .enumerate()
        .map(|(j, &sig)| {
            let m = line[j + signal - 1];
            MacdValue {
                timestamp: points[start + j].timestamp,
                macd: m,
                signal: sig,
                histogram: m - sig,
            }
        })
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════

/// Build the per-heartbeat snapshot consumed by the trigger detector.
///
/// Any indicator short of its warm-up fails the whole snapshot with
/// `InsufficientData`; the caller treats that as a skipped cycle.
pub fn compute_snapshot(
    instrument: &Instrument,
    points: &[PricePoint],
    params: &IndicatorParams,
    history_len: usize,
) -> Result<MarketSnapshot> {
    let latest = points
        .last()
        .cloned()
        .ok_or_else(|| SentinelError::InsufficientData {
            indicator: "snapshot".into(),
            needed: 1,
            got: 0,
        })?;

    let rsi_series = rsi(points, params.rsi_period)?;
    let fast = moving_average(params.ma_kind, points, params.ma_fast)?;
    let slow = moving_average(params.ma_kind, points, params.ma_slow)?;
    let macd_series = macd(points, params.macd_fast, params.macd_slow, params.macd_signal)?;

    // All series end at the latest bar, so `last` is always present here.
    let (rsi, rsi_prev) = last_two(&rsi_series, "rsi")?;
    let (ma_fast, ma_fast_prev) = last_two(&fast, "ma_fast")?;
    let (ma_slow, ma_slow_prev) = last_two(&slow, "ma_slow")?;
    let (macd, macd_prev) = last_two(&macd_series, "macd")?;

    let keep = history_len.max(1).min(points.len());
    let history = points[points.len() - keep..].to_vec();

    Ok(MarketSnapshot {
        symbol: instrument.symbol.clone(),
        class: instrument.class,
        as_of: latest.timestamp,
        latest,
        history,
        readings: IndicatorReadings {
            rsi,
            rsi_prev,
            ma_fast,
            ma_fast_prev,
            ma_slow,
            ma_slow_prev,
            macd,
            macd_prev,
        },
    })
}

fn last_two<T: Copy>(series: &[T], name: &str) -> Result<(T, Option<T>)> {
    match series {
        [] => Err(SentinelError::InsufficientData {
            indicator: name.to_string(),
            needed: 1,
            got: 0,
        }),
        [.., prev, last] => Ok((*last, Some(*prev))),
        [only] => Ok((*only, None)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn closes(points: &[PricePoint]) -> Vec<Decimal> {
    points.iter().map(|p| p.close).collect()
}

fn sma_series(values: &[Decimal], window: usize) -> Vec<Decimal> {
    let n = Decimal::from(window as u64);
    values
        .windows(window)
        .map(|w| w.iter().copied().sum::<Decimal>() / n)
        .collect()
}

/// Caller guarantees `values.len() >= window > 0`.
fn ema_series(values: &[Decimal], window: usize) -> Vec<Decimal> {
    let k = dec!(2) / Decimal::from(window as u64 + 1);
    let one_minus_k = Decimal::ONE - k;

    let seed = values[..window].iter().copied().sum::<Decimal>() / Decimal::from(window as u64);

    let mut result = Vec::with_capacity(values.len() - window + 1);
    let mut prev = seed;
    result.push(seed);
    for &v in &values[window..] {
        prev = v * k + prev * one_minus_k;
        result.push(prev);
    }
    result
}

fn align(points: &[PricePoint], start: usize, values: Vec<Decimal>) -> Vec<IndicatorValue> {
    points[start..]
        .iter()
        .zip(values)
        .map(|(p, value)| IndicatorValue {
            timestamp: p.timestamp,
            value,
        })
        .collect()
}

fn require_positive(indicator: &str, param: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(SentinelError::Config(format!(
            "{indicator}: {param} must be > 0"
        )));
    }
    Ok(())
}

fn require_len(indicator: &str, points: &[PricePoint], needed: usize) -> Result<()> {
    if points.len() < needed {
        return Err(SentinelError::InsufficientData {
            indicator: indicator.to_string(),
            needed,
            got: points.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::InstrumentClass;
    use proptest::prelude::*;

    /// Bars one minute apart with the given closes.
    pub(crate) fn bars(closes: &[Decimal]) -> Vec<PricePoint> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PricePoint {
                timestamp: 1_700_000_000 + 60 * i as i64,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: dec!(1),
            })
            .collect()
    }

    fn ints(range: std::ops::RangeInclusive<i64>) -> Vec<Decimal> {
        range.map(Decimal::from).collect()
    }

    fn params() -> IndicatorParams {
        IndicatorParams {
            rsi_period: 14,
            ma_kind: MovingAverageKind::Ema,
            ma_fast: 3,
            ma_slow: 7,
            macd_fast: 3,
            macd_slow: 7,
            macd_signal: 3,
        }
    }

    // -- SMA / EMA ---------------------------------------------------------

    #[test]
    fn test_sma_basic() {
        let pts = bars(&ints(1..=5));
        let out = sma(&pts, 3).unwrap();
        let values: Vec<Decimal> = out.iter().map(|v| v.value).collect();
        assert_eq!(values, vec![dec!(2), dec!(3), dec!(4)]);
        assert_eq!(out[0].timestamp, pts[2].timestamp);
        assert_eq!(out[2].timestamp, pts[4].timestamp);
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let pts = bars(&ints(1..=10));
        let out = ema(&pts, 3).unwrap();
        // First value = SMA of [1,2,3] = 2; with k = 0.5 a linear series lags by one.
        assert_eq!(out.len(), 8);
        assert_eq!(out[0].value, dec!(2));
        assert_eq!(out[1].value, dec!(3));
        assert_eq!(out[7].value, dec!(9));
        assert_eq!(out[7].timestamp, pts[9].timestamp);
    }

    #[test]
    fn test_ema_exact_window_gives_single_value() {
        let pts = bars(&ints(1..=4));
        let out = ema(&pts, 4).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, dec!(2.5));
    }

    #[test]
    fn test_ema_insufficient_data() {
        let pts = bars(&[dec!(1), dec!(2)]);
        let err = ema(&pts, 5).unwrap_err();
        assert!(matches!(
            err,
            SentinelError::InsufficientData { needed: 5, got: 2, .. }
        ));
    }

    #[test]
    fn test_zero_window_is_config_error() {
        let pts = bars(&ints(1..=3));
        assert!(matches!(sma(&pts, 0), Err(SentinelError::Config(_))));
        assert!(matches!(ema(&pts, 0), Err(SentinelError::Config(_))));
        assert!(matches!(rsi(&pts, 0), Err(SentinelError::Config(_))));
    }

    // -- RSI ---------------------------------------------------------------

    #[test]
    fn test_rsi_all_gains() {
        let pts = bars(&ints(1..=20));
        let out = rsi(&pts, 14).unwrap();
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|v| v.value == dec!(100)));
    }

    #[test]
    fn test_rsi_all_losses() {
        let pts = bars(&ints(1..=20).into_iter().rev().collect::<Vec<_>>());
        let out = rsi(&pts, 14).unwrap();
        assert!(out.iter().all(|v| v.value == Decimal::ZERO));
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let pts = bars(&vec![dec!(100); 16]);
        let out = rsi(&pts, 14).unwrap();
        assert!(out.iter().all(|v| v.value == dec!(50)));
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // Changes +1, -1 seed 0.5/0.5 → 50; then +1 → gain 0.75, loss 0.25 → 75.
        let pts = bars(&[dec!(1), dec!(2), dec!(1), dec!(2)]);
        let out = rsi(&pts, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value, dec!(50));
        assert_eq!(out[1].value, dec!(75));
        assert_eq!(out[0].timestamp, pts[2].timestamp);
    }

    #[test]
    fn test_rsi_needs_period_plus_one() {
        let pts = bars(&ints(1..=14));
        let err = rsi(&pts, 14).unwrap_err();
        assert!(matches!(
            err,
            SentinelError::InsufficientData { needed: 15, got: 14, .. }
        ));
    }

    // -- MACD --------------------------------------------------------------

    #[test]
    fn test_macd_alignment() {
        let pts = bars(&ints(1..=40));
        let out = macd(&pts, 12, 26, 9).unwrap();
        assert_eq!(out.len(), 40 - 26 - 9 + 2);
        assert_eq!(out[0].timestamp, pts[26 + 9 - 2].timestamp);
        assert_eq!(out.last().unwrap().timestamp, pts[39].timestamp);
    }

    #[test]
    fn test_macd_linear_series_constant_line() {
        // For a linear series each EMA lags by (window - 1) / 2. Windows 3 and 7
        // keep k exact in decimal.
        let pts = bars(&ints(1..=30));
        let out = macd(&pts, 3, 7, 3).unwrap();
        assert_eq!(out.len(), 30 - 7 - 3 + 2);
        for v in &out {
            assert_eq!(v.macd, dec!(2));
            assert_eq!(v.signal, dec!(2));
            assert_eq!(v.histogram, Decimal::ZERO);
        }
    }

    #[test]
    fn test_macd_flat_prices() {
        let pts = bars(&vec![dec!(100); 50]);
        let out = macd(&pts, 12, 26, 9).unwrap();
        assert!(out.iter().all(|v| v.macd.is_zero() && v.signal.is_zero()));
    }

    #[test]
    fn test_macd_insufficient_data() {
        let pts = bars(&ints(1..=33));
        let err = macd(&pts, 12, 26, 9).unwrap_err();
        assert!(err.to_string().contains("need 34 points, got 33"));
    }

    #[test]
    fn test_macd_fast_not_below_slow() {
        let pts = bars(&ints(1..=40));
        assert!(matches!(macd(&pts, 26, 12, 9), Err(SentinelError::Config(_))));
    }

    // -- Snapshot ----------------------------------------------------------

    #[test]
    fn test_compute_snapshot_readings() {
        let inst = Instrument {
            symbol: "SYMUSD".into(),
            class: InstrumentClass::Primary,
            poll_interval_seconds: None,
            providers: vec!["stub".into()],
        };
        let pts = bars(&ints(1..=20));
        let snap = compute_snapshot(&inst, &pts, &params(), 5).unwrap();

        assert_eq!(snap.symbol, "SYMUSD");
        assert_eq!(snap.as_of, pts[19].timestamp);
        assert_eq!(snap.history.len(), 5);
        assert_eq!(snap.history.last().unwrap().close, dec!(20));
        assert_eq!(snap.readings.rsi.value, dec!(100));
        assert!(snap.readings.rsi_prev.is_some());
        // EMA(3) lags by 1, EMA(7) by 3.
        assert_eq!(snap.readings.ma_fast.value, dec!(19));
        assert_eq!(snap.readings.ma_slow.value, dec!(17));
        assert_eq!(snap.readings.macd.macd, dec!(2));
        assert_eq!(snap.readings.ma_fast_prev.unwrap().value, dec!(18));
    }

    #[test]
    fn test_compute_snapshot_propagates_insufficient_data() {
        let inst = Instrument {
            symbol: "SYMUSD".into(),
            class: InstrumentClass::Secondary,
            poll_interval_seconds: None,
            providers: vec![],
        };
        let pts = bars(&ints(1..=10));
        let err = compute_snapshot(&inst, &pts, &params(), 5).unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }

    // -- Properties --------------------------------------------------------

    proptest! {
        #[test]
        fn ema_is_deterministic(
            raw in prop::collection::vec(1u32..1_000_000u32, 20..80),
            window in 1usize..20,
        ) {
            let closes: Vec<Decimal> = raw.iter().map(|&c| Decimal::new(c as i64, 2)).collect();
            let pts = bars(&closes);
            let a = ema(&pts, window).unwrap();
            let b = ema(&pts, window).unwrap();
            prop_assert_eq!(a.len(), pts.len() - window + 1);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn rsi_stays_in_bounds(
            raw in prop::collection::vec(1u32..1_000_000u32, 16..80),
            period in 1usize..15,
        ) {
            let closes: Vec<Decimal> = raw.iter().map(|&c| Decimal::new(c as i64, 2)).collect();
            let pts = bars(&closes);
            let out = rsi(&pts, period).unwrap();
            prop_assert_eq!(out.len(), pts.len() - period);
            for v in out {
                prop_assert!(v.value >= Decimal::ZERO && v.value <= dec!(100));
            }
        }
    }
}
