/// sim.rs — Bar-by-bar trade simulation
///
/// Shared by the paper executor and the backtester.  A trade opens at the
/// signal entry, closes `tp1_close_pct` of the quantity at TP1 and moves the
/// stop to entry, then exits the rest at TP2 or at the breakeven stop.
///
/// Within one bar the stop is checked before any target (pessimistic: the
/// bar's low is assumed to print first for longs, its high for shorts).
use std::fmt;

use serde::Serialize;

use crate::models::{Side, Signal};

const QTY_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TradeOutcome {
    /// Full size stopped out at the original stop
    StopLoss,
    /// TP1 taken, remainder stopped at entry
    Breakeven,
    /// Every target reached
    TakeProfit,
    /// Closed at market after the holding limit
    Timeout,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeOutcome::StopLoss   => "SL",
            TradeOutcome::Breakeven  => "TP1+BE",
            TradeOutcome::TakeProfit => "TP",
            TradeOutcome::Timeout    => "TIMEOUT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// Partial close at TP1; the stop now sits at entry
    TakeProfit1 { price: f64, quantity: f64, pnl: f64 },
    Closed { outcome: TradeOutcome, price: f64, quantity: f64, pnl: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct SimTrade {
    pub side:          Side,
    pub entry:         f64,
    pub stop:          f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
    pub quantity:      f64,
    pub remaining:     f64,
    pub tp1_close_pct: f64,
    pub tp1_done:      bool,
    pub realized_pnl:  f64,
    pub bars_held:     usize,
    /// Unix milliseconds
    pub opened_at:     i64,
    pub outcome:       Option<TradeOutcome>,
}

impl SimTrade {
    pub fn open(signal: &Signal, quantity: f64, tp1_close_pct: f64, opened_at: i64) -> Self {
        Self {
            side:          signal.side,
            entry:         signal.entry,
            stop:          signal.stop_loss,
            take_profit_1: signal.take_profit_1,
            take_profit_2: signal.take_profit_2,
            quantity,
            remaining:     quantity,
            tp1_close_pct: tp1_close_pct.clamp(0.0, 1.0),
            tp1_done:      false,
            realized_pnl:  0.0,
            bars_held:     0,
            opened_at,
            outcome:       None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Advance one bar.  Returns what happened on it, in order.
    pub fn on_bar(&mut self, high: f64, low: f64) -> Vec<SimEvent> {
        let mut events = Vec::new();
        if self.is_closed() {
            return events;
        }
        self.bars_held += 1;

        if self.stop_hit(high, low) {
            let outcome = if self.tp1_done { TradeOutcome::Breakeven } else { TradeOutcome::StopLoss };
            events.push(self.close(self.stop, outcome));
            return events;
        }

        if !self.tp1_done && self.reached(self.take_profit_1, high, low) {
            let close_qty = match self.take_profit_2 {
                Some(_) => self.quantity * self.tp1_close_pct,
                None    => self.remaining,
            };
            let pnl = self.pnl(self.take_profit_1, close_qty);
            self.remaining -= close_qty;
            self.realized_pnl += pnl;
            self.tp1_done = true;
            self.stop = self.entry;
            events.push(SimEvent::TakeProfit1 { price: self.take_profit_1, quantity: close_qty, pnl });

            if self.remaining <= QTY_EPS {
                self.remaining = 0.0;
                self.outcome = Some(TradeOutcome::TakeProfit);
                return events;
            }
        }

        if self.tp1_done {
            if let Some(tp2) = self.take_profit_2 {
                if self.reached(tp2, high, low) {
                    events.push(self.close(tp2, TradeOutcome::TakeProfit));
                }
            }
        }
        events
    }

    /// Close whatever is left at `price`.
    pub fn close(&mut self, price: f64, outcome: TradeOutcome) -> SimEvent {
        let quantity = self.remaining;
        let pnl = self.pnl(price, quantity);
        self.realized_pnl += pnl;
        self.remaining = 0.0;
        self.outcome = Some(outcome);
        SimEvent::Closed { outcome, price, quantity, pnl }
    }

    fn pnl(&self, price: f64, quantity: f64) -> f64 {
        (price - self.entry) * quantity * self.side.sign()
    }

    fn stop_hit(&self, high: f64, low: f64) -> bool {
        match self.side {
            Side::Long  => low <= self.stop,
            Side::Short => high >= self.stop,
        }
    }

    fn reached(&self, target: f64, high: f64, low: f64) -> bool {
        match self.side {
            Side::Long  => high >= target,
            Side::Short => low <= target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long() -> SimTrade {
        let signal = Signal {
            side:          Side::Long,
            entry:         65_040.0,
            stop_loss:     64_400.0,
            take_profit_1: 66_400.0,
            take_profit_2: Some(67_800.0),
            reason:        String::new(),
        };
        SimTrade::open(&signal, 0.02, 0.5, 0)
    }

    #[test]
    fn stop_loss_closes_everything() {
        let mut t = long();
        let ev = t.on_bar(65_100.0, 64_300.0);
        assert_eq!(ev.len(), 1);
        assert_eq!(t.outcome, Some(TradeOutcome::StopLoss));
        assert!((t.realized_pnl - (-640.0 * 0.02)).abs() < 1e-9);
    }

    #[test]
    fn tp1_then_breakeven() {
        let mut t = long();
        assert!(t.on_bar(66_500.0, 65_000.0).iter().any(|e| matches!(e, SimEvent::TakeProfit1 { .. })));
        assert_eq!(t.stop, 65_040.0);
        assert!((t.remaining - 0.01).abs() < 1e-12);
        t.on_bar(65_500.0, 65_000.0);
        assert_eq!(t.outcome, Some(TradeOutcome::Breakeven));
        assert!((t.realized_pnl - 1_360.0 * 0.01).abs() < 1e-9);
    }

    #[test]
    fn tp1_and_tp2_on_one_bar() {
        let mut t = long();
        let ev = t.on_bar(68_000.0, 65_100.0);
        assert_eq!(ev.len(), 2);
        assert_eq!(t.outcome, Some(TradeOutcome::TakeProfit));
    }

    #[test]
    fn closed_trade_ignores_further_bars() {
        let mut t = long();
        t.on_bar(65_100.0, 64_000.0);
        assert!(t.on_bar(70_000.0, 60_000.0).is_empty());
        assert_eq!(t.bars_held, 1);
    }
}
