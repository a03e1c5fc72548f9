/// metrics.rs — Backtest performance report
///
/// ─────────────────────────────────────────────────────────────────────────
/// DEFINITIONS
/// ─────────────────────────────────────────────────────────────────────────
///
/// WIN RATE
///   P_win = count(pnl > 0) / N_trades
///
/// PROFIT FACTOR
///   PF = Σ pnl⁺ / |Σ pnl⁻|          (∞ when there are no losing trades)
///
/// EXPECTANCY
///   E = Σ pnl / N_trades             (USDT per trade)
///
/// MAXIMUM DRAWDOWN
///   Equity after trade t: E_t = capital + Σ_{s ≤ t} pnl_s
///   Running peak:         peak_t = max_{s ≤ t}(E_s)
///   MaxDD = min_t (E_t − peak_t) / peak_t      (most negative)
///
/// BY OUTCOME
///   Trades and PnL grouped by exit: SL, TP1+BE, TP, TIMEOUT
/// ─────────────────────────────────────────────────────────────────────────
use std::fmt;

use ahash::AHashMap;

use crate::backtest::BacktestTrade;
use crate::models::Side;
use crate::sim::TradeOutcome;

const OUTCOME_ORDER: [TradeOutcome; 4] = [
    TradeOutcome::StopLoss,
    TradeOutcome::Breakeven,
    TradeOutcome::TakeProfit,
    TradeOutcome::Timeout,
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutcomeStats {
    pub count: usize,
    pub pnl:   f64,
}

/// Complete backtest performance report.
#[derive(Debug, Clone)]
pub struct PerfReport {
    pub n_trades:        usize,
    pub winners:         usize,
    pub losers:          usize,
    pub win_rate:        f64,
    pub longs:           usize,
    pub shorts:          usize,
    pub total_pnl:       f64,
    pub avg_pnl:         f64,
    pub best_trade:      f64,
    pub worst_trade:     f64,
    pub profit_factor:   f64,
    pub max_drawdown:    f64,  // fraction (negative)
    pub rejected:        usize,
    pub initial_capital: f64,
    pub final_equity:    f64,
    pub by_outcome:      Vec<(TradeOutcome, OutcomeStats)>,
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  BREAKOUT BOT — BACKTEST REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        if self.n_trades == 0 {
            writeln!(f, "  No signals in the period.")?;
            writeln!(f, "  Rejected by risk : {}", self.rejected)?;
            return writeln!(f, "════════════════════════════════════════════");
        }
        writeln!(f, "  Trades         : {}", self.n_trades)?;
        writeln!(f, "  Winners        : {} ({:.1}%)", self.winners, self.win_rate * 100.0)?;
        writeln!(f, "  Losers         : {}", self.losers)?;
        writeln!(f, "  Longs / Shorts : {} / {}", self.longs, self.shorts)?;
        writeln!(f, "  Total PnL      : {:+.2} USDT", self.total_pnl)?;
        writeln!(f, "  Avg PnL/trade  : {:+.2} USDT", self.avg_pnl)?;
        writeln!(f, "  Best trade     : {:+.2} USDT", self.best_trade)?;
        writeln!(f, "  Worst trade    : {:+.2} USDT", self.worst_trade)?;
        writeln!(f, "  Profit Factor  : {:.3}", self.profit_factor)?;
        writeln!(f, "  Max Drawdown   : {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Rejected       : {}", self.rejected)?;
        writeln!(f, "  Initial Equity : ${:.2}", self.initial_capital)?;
        writeln!(f, "  Final Equity   : ${:.2}", self.final_equity)?;
        writeln!(f, "────────────────────────────────────────────")?;
        for (outcome, stats) in &self.by_outcome {
            writeln!(f, "  {:<8} : {:>4} trades  {:>+10.2} USDT", outcome.to_string(), stats.count, stats.pnl)?;
        }
        writeln!(f, "════════════════════════════════════════════")
    }
}

/// Summarise closed backtest trades against the starting capital.
pub fn compute_metrics(trades: &[BacktestTrade], rejected: usize, initial_capital: f64) -> PerfReport {
    let n = trades.len();
    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();

    let winners = pnls.iter().filter(|&&p| p > 0.0).count();
    let gross_win: f64 = pnls.iter().filter(|&&p| p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();
    let total_pnl: f64 = pnls.iter().sum();

    let profit_factor = if gross_loss < 1e-10 {
        if gross_win > 0.0 { f64::INFINITY } else { 0.0 }
    } else {
        gross_win / gross_loss
    };

    // ── Equity curve and drawdown ─────────────────────────────────────────
    let mut equity_curve = Vec::with_capacity(n + 1);
    equity_curve.push(initial_capital);
    let mut equity = initial_capital;
    for p in &pnls {
        equity += p;
        equity_curve.push(equity);
    }

    // ── Grouping by exit ──────────────────────────────────────────────────
    let mut groups: AHashMap<TradeOutcome, OutcomeStats> = AHashMap::new();
    for t in trades {
        let g = groups.entry(t.outcome).or_default();
        g.count += 1;
        g.pnl += t.pnl;
    }
    let by_outcome = OUTCOME_ORDER
        .into_iter()
        .filter_map(|o| groups.get(&o).map(|s| (o, *s)))
        .collect();

    PerfReport {
        n_trades:        n,
        winners,
        losers:          n - winners,
        win_rate:        if n == 0 { 0.0 } else { winners as f64 / n as f64 },
        longs:           trades.iter().filter(|t| t.side == Side::Long).count(),
        shorts:          trades.iter().filter(|t| t.side == Side::Short).count(),
        total_pnl,
        avg_pnl:         mean(&pnls).unwrap_or(0.0),
        best_trade:      pnls.iter().copied().reduce(f64::max).unwrap_or(0.0),
        worst_trade:     pnls.iter().copied().reduce(f64::min).unwrap_or(0.0),
        profit_factor,
        max_drawdown:    max_drawdown(&equity_curve),
        rejected,
        initial_capital,
        final_equity:    equity,
        by_outcome,
    }
}

/// Maximum drawdown from an equity curve.
/// Returns a negative value (e.g. −0.15 = −15% drawdown).
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0f64;

    for &e in equity_curve {
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            max_dd = max_dd.min((e - peak) / peak);
        }
    }
    max_dd
}

fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}
