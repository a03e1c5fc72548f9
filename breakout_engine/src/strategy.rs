/// strategy.rs — Breakout state machine
///
/// ─────────────────────────────────────────────────────────────────────────
/// STATES
/// ─────────────────────────────────────────────────────────────────────────
///
///   Idle ──levels──▶ Armed ──price crosses entry──▶ PullbackCheck{side, extreme}
///                      │                                   │          │
///                      └── no cross: "no breakout"         │          └─ retrace > max
///                                                          │             or back through
///                                                          │             the level:
///                                                          │             "pullback exceeded" → Idle
///                                                          ▼
///                                          path ends beyond entry → Signaled
///
/// The price path is the closes of the last `breakout_path_bars` candles
/// followed by the ticker price.  Levels come from the bars before the path.
/// Every evaluation restarts from Idle.  A signal whose reward/risk falls
/// short of `min_rr_ratio` is suppressed with "RR too low".
/// ─────────────────────────────────────────────────────────────────────────
use tracing::debug;

use crate::config::StrategyParams;
use crate::levels::{BreakoutLevels, LevelCalculator};
use crate::models::{Candle, Evaluation, NoSignalReason, Side, Ticker};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakoutState {
    Idle,
    Armed,
    PullbackCheck { side: Side, extreme: f64 },
    Signaled { side: Side },
}

pub struct BreakoutStrategy {
    params:     StrategyParams,
    calculator: LevelCalculator,
    state:      BreakoutState,
    levels:     Option<BreakoutLevels>,
}

impl BreakoutStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            calculator: LevelCalculator::new(params.clone()),
            params,
            state:      BreakoutState::Idle,
            levels:     None,
        }
    }

    /// State the last evaluation ended in.
    pub fn state(&self) -> BreakoutState {
        self.state
    }

    /// Levels used by the last evaluation.
    pub fn levels(&self) -> Option<&BreakoutLevels> {
        self.levels.as_ref()
    }

    /// Price between the support and resistance of the last computed levels.
    pub fn in_chop_zone(&self, price: f64) -> bool {
        self.levels()
            .is_some_and(|lv| lv.support.price <= price && price <= lv.resistance.price)
    }

    /// Evaluate the latest candle window and price.
    pub fn evaluate(&mut self, candles: &[Candle], ticker: &Ticker) -> Evaluation {
        let path_len = self.params.breakout_path_bars.min(candles.len());
        let (level_bars, path_bars) = candles.split_at(candles.len() - path_len);

        let Some(levels) = self.calculator.compute(level_bars) else {
            self.state = BreakoutState::Idle;
            self.levels = None;
            debug!(bars = candles.len(), "not enough bars for levels");
            return Evaluation::NoSignal { reason: NoSignalReason::NoBreakout };
        };

        let mut path: Vec<f64> = path_bars.iter().map(|c| c.close).collect();
        path.push(ticker.last_price);
        self.evaluate_path(&levels, &path)
    }

    /// Run the state machine over `path` against precomputed levels.
    pub fn evaluate_path(&mut self, levels: &BreakoutLevels, path: &[f64]) -> Evaluation {
        self.levels = Some(*levels);
        self.state = BreakoutState::Armed;

        for &price in path {
            self.state = match self.state {
                BreakoutState::Armed => match breakout_side(levels, price) {
                    Some(side) => BreakoutState::PullbackCheck { side, extreme: price },
                    None       => BreakoutState::Armed,
                },
                BreakoutState::PullbackCheck { side, extreme } => {
                    let extreme = match side {
                        Side::Long  => extreme.max(price),
                        Side::Short => extreme.min(price),
                    };
                    if self.pullback_exceeded(levels, side, extreme, price) {
                        debug!(%side, extreme, price, "pullback exceeded");
                        self.state = BreakoutState::Idle;
                        return Evaluation::NoSignal { reason: NoSignalReason::PullbackExceeded };
                    }
                    BreakoutState::PullbackCheck { side, extreme }
                }
                other => other,
            };
        }

        let last = path.last().copied().unwrap_or(f64::NAN);
        let (side, extreme) = match self.state {
            BreakoutState::PullbackCheck { side, extreme } if holds(levels, side, last) => (side, extreme),
            _ => {
                self.state = BreakoutState::Armed;
                return Evaluation::NoSignal { reason: NoSignalReason::NoBreakout };
            }
        };

        let level = levels.broken_level(side);
        let reason = format!(
            "{side} breakout through {:.2} (trigger {:.2}, extreme {:.2}, last {:.2})",
            level.price,
            level.trigger(),
            extreme,
            last
        );
        let signal = levels.signal(side, reason);
        let rr = signal.rr_ratio();
        if !signal.is_well_formed() || rr < self.params.min_rr_ratio {
            debug!(%side, rr, min = self.params.min_rr_ratio, "signal suppressed");
            self.state = BreakoutState::Idle;
            return Evaluation::NoSignal { reason: NoSignalReason::RrTooLow };
        }

        self.state = BreakoutState::Signaled { side };
        Evaluation::Signal(signal)
    }

    fn pullback_exceeded(&self, levels: &BreakoutLevels, side: Side, extreme: f64, price: f64) -> bool {
        match side {
            Side::Long => {
                extreme - price > self.params.long_pullback_max || price < levels.resistance.price
            }
            Side::Short => {
                price - extreme > self.params.short_pullback_max || price > levels.support.price
            }
        }
    }
}

/// Side whose entry `price` has reached.  When both have, the larger excess wins.
fn breakout_side(levels: &BreakoutLevels, price: f64) -> Option<Side> {
    let long_excess = price - levels.long_entry;
    let short_excess = levels.short_entry - price;
    match (long_excess >= 0.0, short_excess >= 0.0) {
        (true, true)   => Some(if long_excess >= short_excess { Side::Long } else { Side::Short }),
        (true, false)  => Some(Side::Long),
        (false, true)  => Some(Side::Short),
        (false, false) => None,
    }
}

/// The breakout is still in force at `price`.
fn holds(levels: &BreakoutLevels, side: Side, price: f64) -> bool {
    match side {
        Side::Long  => price >= levels.long_entry,
        Side::Short => price <= levels.short_entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> BreakoutStrategy {
        BreakoutStrategy::new(StrategyParams::default())
    }

    fn levels(resistance: f64, support: f64) -> BreakoutLevels {
        LevelCalculator::new(StrategyParams::default()).from_swings(resistance, support)
    }

    #[test]
    fn retrace_back_below_resistance_is_pullback_exceeded() {
        let mut s = strategy();
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[65_038.0, 65_041.0, 64_900.0, 65_045.0]);
        assert_eq!(eval, Evaluation::NoSignal { reason: NoSignalReason::PullbackExceeded });
        assert_eq!(s.state(), BreakoutState::Idle);
    }

    #[test]
    fn held_breakout_signals_at_entry() {
        let mut s = strategy();
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[65_038.0, 65_045.0, 65_050.0]);
        let Evaluation::Signal(sig) = eval else { panic!("expected signal") };
        assert_eq!(sig.side, Side::Long);
        assert_eq!(sig.entry, 65_040.0);
        assert_eq!(sig.stop_loss, 64_400.0);
        assert!(sig.rr_ratio() >= 1.5);
        assert_eq!(s.state(), BreakoutState::Signaled { side: Side::Long });
    }

    #[test]
    fn deep_retrace_above_level_is_pullback_exceeded() {
        let mut s = BreakoutStrategy::new(StrategyParams { long_pullback_max: 100.0, ..StrategyParams::default() });
        // 65_300 → 65_150 is 150 deep but still above resistance
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[65_300.0, 65_150.0, 65_200.0]);
        assert_eq!(eval, Evaluation::NoSignal { reason: NoSignalReason::PullbackExceeded });
    }

    #[test]
    fn quiet_path_stays_armed() {
        let mut s = strategy();
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[64_500.0, 64_600.0]);
        assert_eq!(eval, Evaluation::NoSignal { reason: NoSignalReason::NoBreakout });
        assert_eq!(s.state(), BreakoutState::Armed);
    }

    #[test]
    fn short_breakout() {
        let mut s = strategy();
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[63_990.0, 63_940.0, 63_900.0]);
        let Evaluation::Signal(sig) = eval else { panic!("expected signal") };
        assert_eq!(sig.side, Side::Short);
        assert_eq!(sig.entry, 63_950.0);
        assert_eq!(sig.stop_loss, 64_600.0);
        assert_eq!(sig.take_profit_1, 62_600.0);
    }

    #[test]
    fn rr_below_minimum_is_suppressed() {
        let mut s = BreakoutStrategy::new(StrategyParams { min_rr_ratio: 3.0, ..StrategyParams::default() });
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[65_045.0, 65_050.0]);
        assert_eq!(eval, Evaluation::NoSignal { reason: NoSignalReason::RrTooLow });
    }

    #[test]
    fn short_bounce_back_above_support_is_pullback_exceeded() {
        let mut s = strategy();
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[63_940.0, 63_900.0, 64_050.0]);
        assert_eq!(eval, Evaluation::NoSignal { reason: NoSignalReason::PullbackExceeded });
        assert_eq!(s.state(), BreakoutState::Idle);
    }

    #[test]
    fn deep_short_bounce_below_support_is_pullback_exceeded() {
        let mut s = BreakoutStrategy::new(StrategyParams { short_pullback_max: 100.0, ..StrategyParams::default() });
        // 63_700 → 63_850 is 150 deep but still below support
        let eval = s.evaluate_path(&levels(65_000.0, 64_000.0), &[63_700.0, 63_850.0, 63_800.0]);
        assert_eq!(eval, Evaluation::NoSignal { reason: NoSignalReason::PullbackExceeded });
    }

    #[test]
    fn both_sides_firing_picks_larger_excess() {
        // resistance under support: long_entry 64_040, short_entry 64_950,
        // so every price in between has reached both entries
        let lv = levels(64_000.0, 65_000.0);

        let mut s = strategy();
        let Evaluation::Signal(sig) = s.evaluate_path(&lv, &[64_900.0]) else { panic!("expected signal") };
        assert_eq!(sig.side, Side::Long);
        assert_eq!((sig.entry, sig.stop_loss, sig.take_profit_1), (64_040.0, 63_400.0, 65_400.0));

        let mut s = strategy();
        let Evaluation::Signal(sig) = s.evaluate_path(&lv, &[64_100.0]) else { panic!("expected signal") };
        assert_eq!(sig.side, Side::Short);
        assert_eq!((sig.entry, sig.stop_loss, sig.take_profit_1), (64_950.0, 65_600.0, 63_600.0));
    }

    #[test]
    fn chop_zone_follows_the_last_levels() {
        let mut s = strategy();
        assert!(!s.in_chop_zone(64_500.0));
        s.evaluate_path(&levels(65_000.0, 64_000.0), &[64_500.0]);
        assert!(s.in_chop_zone(64_500.0));
        assert!(s.in_chop_zone(65_000.0));
        assert!(!s.in_chop_zone(65_020.0));
        assert!(!s.in_chop_zone(63_990.0));
    }

    #[test]
    fn evaluate_splits_levels_and_path() {
        let mut candles: Vec<Candle> = (0..24)
            .map(|i| Candle {
                open_time: i * 3_600_000,
                open:      64_500.0,
                high:      if i == 10 { 65_000.0 } else { 64_800.0 },
                low:       if i == 5 { 64_000.0 } else { 64_200.0 },
                close:     64_500.0,
                volume:    1.0,
            })
            .collect();
        // path bars: highs above resistance must not move the level
        for (k, close) in [65_038.0, 65_045.0, 65_048.0].into_iter().enumerate() {
            candles.push(Candle {
                open_time: (24 + k as i64) * 3_600_000,
                open:      close,
                high:      close + 5.0,
                low:       close - 5.0,
                close,
                volume:    1.0,
            });
        }
        let mut s = strategy();
        let eval = s.evaluate(&candles, &Ticker { last_price: 65_050.0, timestamp: 0 });
        assert!(matches!(eval, Evaluation::Signal(ref sig) if sig.entry == 65_040.0));
        assert_eq!(s.levels().map(|l| l.resistance.price), Some(65_000.0));
    }
}
