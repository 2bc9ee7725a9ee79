//! Momentum signal generation

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::Config;
use crate::market::{PriceHistory, Tenths};

/// Direction of a detected momentum signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Bullish,
    Bearish,
    Neutral,
}

/// Output of one analysis pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    /// [0, 1]
    pub confidence: f64,
    pub gap_change_tenths: Tenths,
    pub yes_change_tenths: Tenths,
}

impl Signal {
    pub const NEUTRAL: Signal = Signal {
        kind: SignalKind::Neutral,
        confidence: 0.0,
        gap_change_tenths: 0,
        yes_change_tenths: 0,
    };

    fn neutral(gap_change: Tenths, yes_change: Tenths) -> Signal {
        Signal {
            kind: SignalKind::Neutral,
            confidence: 0.0,
            gap_change_tenths: gap_change,
            yes_change_tenths: yes_change,
        }
    }
}

/// Strategy thresholds, lifted out of the full config
#[derive(Debug, Clone, Copy)]
pub struct StrategyParams {
    pub window: Duration,
    /// Minimum |yes mid move| in cents
    pub entry_threshold_cents: i64,
    /// Minimum gap shrink in percent; the comparison is strict
    pub convergence_threshold_pct: i64,
}

impl StrategyParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: config.momentum_window(),
            entry_threshold_cents: config.entry_threshold_cents,
            convergence_threshold_pct: config.convergence_threshold_pct,
        }
    }
}

/// Analyze the price history at `t_now`.
///
/// Pure and deterministic: same history, time, and params give the same
/// signal. Returns Neutral whenever the window holds fewer than two
/// samples or either endpoint lacks a gap.
pub fn analyze(history: &PriceHistory, t_now: DateTime<Utc>, params: &StrategyParams) -> Signal {
    let Some((old, cur)) = history.window_at(t_now, params.window) else {
        return Signal::NEUTRAL;
    };
    let (Some(old_gap), Some(cur_gap)) = (old.gap_tenths, cur.gap_tenths) else {
        return Signal::NEUTRAL;
    };
    let (Some(old_yes), Some(cur_yes)) = (old.yes_mid_tenths, cur.yes_mid_tenths) else {
        return Signal::NEUTRAL;
    };

    let gap_change = cur_gap - old_gap;
    let yes_change = cur_yes - old_yes;

    // Shrink relative to the old gap, in tenths of a percent.
    let shrink_pct_x10 = (-gap_change) * 1000 / old_gap.abs().max(1);
    let threshold_x10 = params.convergence_threshold_pct * 10;
    if shrink_pct_x10 <= threshold_x10 {
        return Signal::neutral(gap_change, yes_change);
    }

    let entry_tenths = params.entry_threshold_cents * 10;
    let bullish = yes_change >= entry_tenths;
    let bearish = yes_change <= -entry_tenths;

    let kind = match (bullish, bearish) {
        (true, false) => SignalKind::Bullish,
        (false, true) => SignalKind::Bearish,
        // Both fire only with a zero entry threshold; no direction to pick.
        _ => return Signal::neutral(gap_change, yes_change),
    };

    let confidence =
        (shrink_pct_x10 as f64 / (2 * threshold_x10.max(1)) as f64).clamp(0.0, 1.0);

    Signal {
        kind,
        confidence,
        gap_change_tenths: gap_change,
        yes_change_tenths: yes_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Sample;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn params() -> StrategyParams {
        StrategyParams {
            window: Duration::from_secs(5),
            entry_threshold_cents: 2,
            convergence_threshold_pct: 3,
        }
    }

    fn quote(secs: i64, yes_bid: i64, yes_ask: i64, no_bid: i64, no_ask: i64) -> Sample {
        Sample::from_quotes(ts(secs), Some(yes_bid), Some(yes_ask), Some(no_bid), Some(no_ask))
            .unwrap()
    }

    #[test]
    fn empty_history_is_neutral() {
        let history = PriceHistory::with_capacity(16);
        assert_eq!(analyze(&history, ts(10), &params()).kind, SignalKind::Neutral);
    }

    #[test]
    fn single_sample_is_neutral() {
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(10, 29, 31, 59, 61));
        assert_eq!(analyze(&history, ts(10), &params()).kind, SignalKind::Neutral);
    }

    #[test]
    fn bullish_convergence_with_rising_yes() {
        // t=0: yes_mid=30, no_mid=60, gap=10c
        // t=5: yes_mid=35, no_mid=58, gap=7c -> shrink 30%, yes +5c
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 59, 61));
        history.insert(quote(5, 34, 36, 57, 59));

        let signal = analyze(&history, ts(5), &params());
        assert_eq!(signal.kind, SignalKind::Bullish);
        assert_eq!(signal.gap_change_tenths, -30);
        assert_eq!(signal.yes_change_tenths, 50);
        assert!((signal.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bearish_convergence_with_falling_yes() {
        // gap 10c -> 7c while yes mid falls 5c (no side rallies)
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 59, 61));
        history.insert(quote(5, 24, 26, 67, 69));

        let signal = analyze(&history, ts(5), &params());
        assert_eq!(signal.kind, SignalKind::Bearish);
        assert!(signal.confidence > 0.5);
    }

    #[test]
    fn shrink_exactly_at_threshold_is_neutral() {
        // old gap 500 tenths; cur gap 485 -> exactly 3.0% shrink, yes +5c
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 19, 21)); // yes 300, no 200, gap 500
        history.insert(quote(5, 34, 36, 16, 17)); // yes 350, no 165, gap 485
        assert_eq!(analyze(&history, ts(5), &params()).kind, SignalKind::Neutral);

        // one more tenth of shrink crosses the strict threshold
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 19, 21)); // gap 500
        history.insert(quote(5, 34, 36, 16, 18)); // yes 350, no 170, gap 480 -> 4%
        assert_eq!(analyze(&history, ts(5), &params()).kind, SignalKind::Bullish);
    }

    #[test]
    fn zero_entry_threshold_tie_is_neutral() {
        // with no entry threshold an unchanged yes mid satisfies both
        // directions at once; the tie resolves to Neutral
        let params = StrategyParams {
            entry_threshold_cents: 0,
            ..params()
        };
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 59, 61)); // yes 300, gap 100
        history.insert(quote(5, 29, 31, 61, 63)); // yes 300, no 620, gap 80
        assert_eq!(analyze(&history, ts(5), &params).kind, SignalKind::Neutral);
    }

    #[test]
    fn gap_widening_is_neutral() {
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 49, 51)); // gap 200
        history.insert(quote(5, 34, 36, 44, 45)); // yes 350, no 445 -> gap 205
        assert_eq!(analyze(&history, ts(5), &params()).kind, SignalKind::Neutral);
    }

    #[test]
    fn convergence_without_price_move_is_neutral() {
        // gap shrinks but yes mid moves under the entry threshold
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 59, 61));
        history.insert(quote(5, 30, 32, 61, 63)); // yes +1c, no +2c, gap 10->7c
        let signal = analyze(&history, ts(5), &params());
        assert_eq!(signal.kind, SignalKind::Neutral);
    }

    #[test]
    fn deterministic_over_identical_inputs() {
        let mut a = PriceHistory::with_capacity(16);
        let mut b = PriceHistory::with_capacity(16);
        for h in [&mut a, &mut b] {
            h.insert(quote(0, 29, 31, 59, 61));
            h.insert(quote(2, 31, 33, 58, 60));
            h.insert(quote(5, 34, 36, 57, 59));
        }
        assert_eq!(analyze(&a, ts(5), &params()), analyze(&b, ts(5), &params()));
    }

    #[test]
    fn stale_window_after_refill_is_neutral() {
        let mut history = PriceHistory::with_capacity(16);
        history.insert(quote(0, 29, 31, 59, 61));
        history.insert(quote(1, 34, 36, 57, 59));
        // ten minutes later only one fresh sample exists
        history.insert(quote(600, 40, 42, 52, 54));
        assert_eq!(
            analyze(&history, ts(600), &params()).kind,
            SignalKind::Neutral
        );
    }
}
