/// backtest.rs — Historical replay of the breakout pipeline
///
/// Walks a candle series with a sliding window and runs the live components
/// unchanged: LevelCalculator + BreakoutStrategy + RiskManager.  A signal is
/// assumed filled at its entry and is simulated on the following bars by
/// `sim::SimTrade` (same exits as the paper executor).
///
/// ARCHITECTURE
/// ┌──────────────────────────────────────────────────────┐
/// │  candles[i − window .. i]   ticker = candles[i].close│
/// │        │                                             │
/// │        ▼                                             │
/// │  BreakoutStrategy.evaluate → Signal?                 │
/// │        │                                             │
/// │  RiskManager.validate_trade → quantity?              │
/// │        │                                             │
/// │  SimTrade.on_bar(high, low) for i+1 .. i+max_hold    │
/// │        │   SL │ TP1 → stop to entry │ TP2 │ timeout   │
/// │        ▼                                             │
/// │  resume after the last bar the trade occupied        │
/// └──────────────────────────────────────────────────────┘
use serde::Serialize;
use tracing::info;

use crate::config::StrategyParams;
use crate::models::{Candle, Evaluation, RiskDecision, Side, Ticker};
use crate::risk::RiskManager;
use crate::sim::{SimTrade, TradeOutcome};
use crate::strategy::BreakoutStrategy;

/// Run parameters (separate from strategy config).
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Bars after which an open trade is closed at market
    pub max_hold_bars: usize,
    /// Fraction closed at TP1
    pub tp1_close_pct: f64,
    /// Log every trade (true) or only the summary (false)
    pub verbose:       bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { max_hold_bars: 48, tp1_close_pct: 0.5, verbose: false }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestTrade {
    pub side:          Side,
    /// Open time of the bar the signal fired on
    pub signal_time:   i64,
    pub entry:         f64,
    pub stop_loss:     f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
    pub quantity:      f64,
    pub outcome:       TradeOutcome,
    pub pnl:           f64,
    pub bars_held:     usize,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestRun {
    pub trades:   Vec<BacktestTrade>,
    /// Signals the risk manager turned down
    pub rejected: usize,
}

pub fn run_backtest(
    candles:  &[Candle],
    params:   StrategyParams,
    risk:     &RiskManager,
    bt_cfg:   &BacktestConfig,
) -> BacktestRun {
    let window = params.window_len();
    let mut strategy = BreakoutStrategy::new(params);
    let mut run = BacktestRun::default();

    if candles.len() <= window {
        info!(bars = candles.len(), window, "not enough bars to backtest");
        return run;
    }

    info!("═══════════════════════════════════════════════");
    info!("  BREAKOUT BACKTEST  — {} bars", candles.len());
    info!("═══════════════════════════════════════════════");

    let mut i = window;
    while i < candles.len() - 1 {
        let bar = &candles[i];
        let ticker = Ticker { last_price: bar.close, timestamp: bar.open_time };

        let Evaluation::Signal(signal) = strategy.evaluate(&candles[i - window..i], &ticker) else {
            i += 1;
            continue;
        };
        let quantity = match risk.validate_trade(&signal) {
            RiskDecision::Valid { quantity, .. } => quantity,
            RiskDecision::Rejected { .. } => {
                run.rejected += 1;
                i += 1;
                continue;
            }
        };

        let mut trade = SimTrade::open(&signal, quantity, bt_cfg.tp1_close_pct, bar.open_time);
        let last = (i + bt_cfg.max_hold_bars).min(candles.len() - 1);
        let mut j = i;
        while j < last && !trade.is_closed() {
            j += 1;
            trade.on_bar(candles[j].high, candles[j].low);
        }
        if !trade.is_closed() {
            trade.close(candles[j].close, TradeOutcome::Timeout);
        }

        let outcome = trade.outcome.unwrap_or(TradeOutcome::Timeout);
        if bt_cfg.verbose {
            info!(
                "  [Bar {:>5}] {:>5} @ {:.2}  SL {:.2}  TP1 {:.2}  → {:<8} {:+.2} USDT in {} bars",
                i, signal.side, signal.entry, signal.stop_loss, signal.take_profit_1,
                outcome, trade.realized_pnl, trade.bars_held
            );
        }
        run.trades.push(BacktestTrade {
            side:          signal.side,
            signal_time:   bar.open_time,
            entry:         signal.entry,
            stop_loss:     signal.stop_loss,
            take_profit_1: signal.take_profit_1,
            take_profit_2: signal.take_profit_2,
            quantity,
            outcome,
            pnl:           trade.realized_pnl,
            bars_held:     trade.bars_held,
        });

        // skip the bars the trade occupied
        i = j.max(i + 1);
    }

    info!(trades = run.trades.len(), rejected = run.rejected, "backtest finished");
    run
}

/// Print the first `top_n` trades as a table.
pub fn print_trade_log(trades: &[BacktestTrade], top_n: usize) {
    println!(
        "\n{:<5} {:<6} {:<10} {:<10} {:<10} {:<9} {:<10} {:<5}",
        "N", "SIDE", "ENTRY", "SL", "TP1", "QTY", "PNL", "EXIT"
    );
    println!("{}", "─".repeat(70));

    for (n, t) in trades.iter().enumerate().take(top_n) {
        println!(
            "{:<5} {:<6} {:<10.2} {:<10.2} {:<10.2} {:<9.4} {:<+10.2} {:<5}",
            n + 1,
            t.side.to_string(),
            t.entry,
            t.stop_loss,
            t.take_profit_1,
            t.quantity,
            t.pnl,
            t.outcome.to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstrumentRules, RiskParams};

    const H: i64 = 3_600_000;

    fn flat(i: i64) -> Candle {
        Candle { open_time: i * H, open: 64_500.0, high: 64_700.0, low: 64_300.0, close: 64_500.0, volume: 1.0 }
    }

    fn point(i: i64, price: f64) -> Candle {
        Candle { open_time: i * H, open: price, high: price, low: price, close: price, volume: 1.0 }
    }

    /// Range 64_000 .. 65_000 for 24 bars, then a clean long breakout.
    fn series(after: &[(f64, f64)]) -> Vec<Candle> {
        let mut v: Vec<Candle> = (0..24).map(flat).collect();
        v[5].high = 65_000.0;
        v[9].low = 64_000.0;
        for (k, price) in [65_038.0, 65_045.0, 65_048.0, 65_050.0].into_iter().enumerate() {
            v.push(point(24 + k as i64, price));
        }
        for (k, (high, low)) in after.iter().enumerate() {
            let mut c = point(28 + k as i64, (high + low) / 2.0);
            c.high = *high;
            c.low = *low;
            v.push(c);
        }
        v
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskParams::default(), InstrumentRules::default())
    }

    #[test]
    fn breakout_to_tp2() {
        let candles = series(&[(66_500.0, 65_100.0), (67_900.0, 66_000.0), (67_000.0, 66_900.0)]);
        let run = run_backtest(&candles, StrategyParams::default(), &manager(), &BacktestConfig::default());
        assert_eq!(run.trades.len(), 1);
        let t = &run.trades[0];
        assert_eq!(t.side, Side::Long);
        assert_eq!(t.outcome, TradeOutcome::TakeProfit);
        // 0.015 @ +1_360 and 0.015 @ +2_760
        assert!((t.pnl - (0.015 * 1_360.0 + 0.015 * 2_760.0)).abs() < 1e-6, "pnl = {}", t.pnl);
    }

    #[test]
    fn breakout_to_stop() {
        let candles = series(&[(65_100.0, 64_300.0), (64_500.0, 64_400.0)]);
        let run = run_backtest(&candles, StrategyParams::default(), &manager(), &BacktestConfig::default());
        assert_eq!(run.trades[0].outcome, TradeOutcome::StopLoss);
        assert!((run.trades[0].pnl + 0.03 * 640.0).abs() < 1e-6);
    }

    #[test]
    fn open_trade_times_out_at_hold_limit() {
        let quiet = vec![(65_100.0, 65_000.0); 6];
        let candles = series(&quiet);
        let cfg = BacktestConfig { max_hold_bars: 3, ..BacktestConfig::default() };
        let run = run_backtest(&candles, StrategyParams::default(), &manager(), &cfg);
        assert_eq!(run.trades[0].outcome, TradeOutcome::Timeout);
        assert_eq!(run.trades[0].bars_held, 3);
    }

    #[test]
    fn too_few_bars_is_empty() {
        let candles: Vec<Candle> = (0..10).map(flat).collect();
        let run = run_backtest(&candles, StrategyParams::default(), &manager(), &BacktestConfig::default());
        assert!(run.trades.is_empty());
    }
}
