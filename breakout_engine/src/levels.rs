/// levels.rs — Dynamic support / resistance
///
///   resistance  = max(high) over the lookback window
///   support     = min(low)  over the lookback window
///
///   long_entry  = resistance + LONG_ENTRY_OFFSET     long_sl  = long_entry  − LONG_SL_OFFSET
///   short_entry = support    − SHORT_ENTRY_OFFSET    short_sl = short_entry + SHORT_SL_OFFSET
///
///   long_tp1  = ⌈resistance + LONG_TP1_OFFSET⌉_step   long_tp2  = resistance + LONG_TP2_OFFSET
///   short_tp1 = ⌊support − SHORT_TP1_OFFSET⌋_step     short_tp2 = support − SHORT_TP2_OFFSET
///
/// where ⌈·⌉_step / ⌊·⌋_step snap to the ROUND_LEVEL_STEP grid.  Pure.
use crate::config::StrategyParams;
use crate::models::{Candle, Level, LevelKind, Side, Signal};

/// Every price the strategy needs for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutLevels {
    pub resistance:  Level,
    pub support:     Level,

    pub long_entry:  f64,
    pub long_sl:     f64,
    pub long_tp1:    f64,
    pub long_tp2:    f64,

    pub short_entry: f64,
    pub short_sl:    f64,
    pub short_tp1:   f64,
    pub short_tp2:   f64,
}

impl BreakoutLevels {
    pub fn entry(&self, side: Side) -> f64 {
        match side {
            Side::Long  => self.long_entry,
            Side::Short => self.short_entry,
        }
    }

    /// The swing level a breakout on `side` crossed.
    pub fn broken_level(&self, side: Side) -> &Level {
        match side {
            Side::Long  => &self.resistance,
            Side::Short => &self.support,
        }
    }

    /// Signal priced off these levels.
    pub fn signal(&self, side: Side, reason: String) -> Signal {
        match side {
            Side::Long => Signal {
                side,
                entry:         self.long_entry,
                stop_loss:     self.long_sl,
                take_profit_1: self.long_tp1,
                take_profit_2: Some(self.long_tp2),
                reason,
            },
            Side::Short => Signal {
                side,
                entry:         self.short_entry,
                stop_loss:     self.short_sl,
                take_profit_1: self.short_tp1,
                take_profit_2: Some(self.short_tp2),
                reason,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct LevelCalculator {
    params: StrategyParams,
}

impl LevelCalculator {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    /// Levels over the last `level_lookback` bars of `window`.
    /// `None` when the window is shorter than the lookback.
    pub fn compute(&self, window: &[Candle]) -> Option<BreakoutLevels> {
        let lookback = self.params.level_lookback;
        if lookback == 0 || window.len() < lookback {
            return None;
        }
        let bars = &window[window.len() - lookback..];
        let resistance = bars.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let support = bars.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        Some(self.from_swings(resistance, support))
    }

    /// Derive every price from a known swing high / low.
    pub fn from_swings(&self, resistance: f64, support: f64) -> BreakoutLevels {
        let p = &self.params;
        let long_entry = resistance + p.long_entry_offset;
        let short_entry = support - p.short_entry_offset;

        BreakoutLevels {
            resistance:  Level { price: resistance, kind: LevelKind::Resistance, offset_applied: p.long_entry_offset },
            support:     Level { price: support, kind: LevelKind::Support, offset_applied: p.short_entry_offset },
            long_entry,
            long_sl:     long_entry - p.long_sl_offset,
            long_tp1:    ceil_to_step(resistance + p.long_tp1_offset, p.round_level_step),
            long_tp2:    resistance + p.long_tp2_offset,
            short_entry,
            short_sl:    short_entry + p.short_sl_offset,
            short_tp1:   floor_to_step(support - p.short_tp1_offset, p.round_level_step),
            short_tp2:   support - p.short_tp2_offset,
        }
    }
}

/// Smallest multiple of `step` ≥ `value`.  A zero step leaves the value alone.
pub fn ceil_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).ceil() * step
}

/// Largest multiple of `step` ≤ `value`.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64) -> Candle {
        Candle { open_time: 0, open: low, high, low, close: high, volume: 1.0 }
    }

    #[test]
    fn swing_extremes_over_lookback_only() {
        let calc = LevelCalculator::new(StrategyParams { level_lookback: 3, ..StrategyParams::default() });
        // the 70_000 bar falls outside the lookback
        let window = vec![candle(70_000.0, 60_000.0), candle(64_800.0, 64_100.0), candle(65_000.0, 64_000.0), candle(64_900.0, 64_200.0)];
        let lv = calc.compute(&window).unwrap();
        assert_eq!(lv.resistance.price, 65_000.0);
        assert_eq!(lv.support.price, 64_000.0);
    }

    #[test]
    fn default_offsets() {
        let lv = LevelCalculator::new(StrategyParams::default()).from_swings(65_000.0, 64_000.0);
        assert_eq!(lv.long_entry, 65_040.0);
        assert_eq!(lv.long_sl, 64_400.0);
        assert_eq!(lv.long_tp1, 66_400.0);
        assert_eq!(lv.long_tp2, 67_800.0);
        assert_eq!(lv.short_entry, 63_950.0);
        assert_eq!(lv.short_sl, 64_600.0);
        assert_eq!(lv.short_tp1, 62_600.0);
        assert_eq!(lv.short_tp2, 61_200.0);
        assert_eq!(lv.resistance.trigger(), lv.long_entry);
        assert_eq!(lv.support.trigger(), lv.short_entry);
    }

    #[test]
    fn tp1_snaps_outward_to_round_grid() {
        let lv = LevelCalculator::new(StrategyParams::default()).from_swings(65_030.0, 64_010.0);
        // 66_430 → 66_600, 62_610 → 62_600
        assert_eq!(lv.long_tp1, 66_600.0);
        assert_eq!(lv.short_tp1, 62_600.0);
    }

    #[test]
    fn short_window_has_no_levels() {
        let calc = LevelCalculator::new(StrategyParams::default());
        assert!(calc.compute(&[candle(1.0, 1.0)]).is_none());
    }

    #[test]
    fn zero_step_disables_rounding() {
        assert_eq!(ceil_to_step(66_430.0, 0.0), 66_430.0);
        assert_eq!(floor_to_step(62_610.0, 200.0), 62_600.0);
    }
}
