/// engine.rs — Cycle orchestration
///
/// ONE CYCLE
///   1. executor.reconcile()   stale entries, late protection, breakeven, paper exits
///   2. open position?         → skip evaluation
///      entry still resting?   → skip evaluation, it fills or goes stale
///   3. candles + ticker       MarketDataFeed
///   4. strategy.evaluate      → Signal | NoSignal (inside the range: chop notice)
///   5. risk.validate_trade    → Valid | Rejected
///   6. executor.execute       only with a Valid decision for this signal
///   7. notify                 signal, rejection, execution or error
///
/// A cycle always completes or is skipped; errors are logged, notified and
/// left for the next cycle to re-query.  Cancellation is checked between
/// cycles and during the inter-cycle sleep, never inside one.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::data::MarketDataFeed;
use crate::error::BotError;
use crate::executor::{ExecutionReport, OrderExecutor};
use crate::models::{Evaluation, NoSignalReason, Order, Position, RiskDecision, Signal};
use crate::notifier::Notifier;
use crate::risk::RiskManager;
use crate::strategy::BreakoutStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Once,
    Continuous,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    PositionOpen(Position),
    EntryResting(Order),
    NoSignal(NoSignalReason),
    Rejected(String),
    Executed(ExecutionReport),
    Failed(String),
}

pub struct Orchestrator {
    feed:      Arc<MarketDataFeed>,
    strategy:  BreakoutStrategy,
    risk:      RiskManager,
    executor:  Arc<dyn OrderExecutor>,
    notifier:  Arc<dyn Notifier>,
    clock:     Arc<dyn Clock>,
    timeframe: String,
    window:    usize,
    interval:  Duration,
    cycles:    u64,
}

impl Orchestrator {
    pub fn new(
        config:   &AppConfig,
        feed:     Arc<MarketDataFeed>,
        executor: Arc<dyn OrderExecutor>,
        notifier: Arc<dyn Notifier>,
        clock:    Arc<dyn Clock>,
    ) -> Self {
        Self {
            feed,
            strategy:  BreakoutStrategy::new(config.strategy.clone()),
            risk:      RiskManager::new(config.risk, config.instrument),
            executor,
            notifier,
            clock,
            timeframe: config.strategy.timeframe.clone(),
            window:    config.strategy.window_len(),
            interval:  config.loop_interval,
            cycles:    0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one cycle.  Never fails; errors come back as `CycleOutcome::Failed`.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        match self.cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(cycle = self.cycles, "cycle failed: {e}");
                self.notifier.send(&format!("❌ Cycle error: {e}")).await;
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, BotError> {
        let reconciled = self.executor.reconcile().await?;
        for action in &reconciled.actions {
            info!("{action}");
            self.notifier.send(&format!("📊 {action}")).await;
        }
        if let Some(position) = reconciled.position {
            info!(
                side = %position.side, qty = position.quantity, entry = position.entry_price,
                upnl = position.unrealized_pnl, "position open, monitoring"
            );
            return Ok(CycleOutcome::PositionOpen(position));
        }
        if let Some(entry) = reconciled.resting_entry {
            info!(id = %entry.id, side = ?entry.side, price = ?entry.price, "entry still resting, no new signal");
            return Ok(CycleOutcome::EntryResting(entry));
        }

        let candles = self.feed.get_candles(&self.timeframe, self.window).await?;
        let ticker = self.feed.get_ticker().await?;
        info!(cycle = self.cycles, price = ticker.last_price, mode = self.executor.mode(), "─── cycle ───");

        let signal = match self.strategy.evaluate(&candles, &ticker) {
            Evaluation::NoSignal { reason } => {
                if let Some(lv) = self.strategy.levels() {
                    debug!(
                        resistance = lv.resistance.price, support = lv.support.price,
                        long_entry = lv.long_entry, short_entry = lv.short_entry, "levels"
                    );
                }
                info!("no signal ({reason})");
                let chop = self
                    .strategy
                    .levels()
                    .filter(|_| reason == NoSignalReason::NoBreakout && self.strategy.in_chop_zone(ticker.last_price))
                    .map(|lv| {
                        format!(
                            "🔶 Price {:.2} inside range {:.2} – {:.2}, no trade",
                            ticker.last_price, lv.support.price, lv.resistance.price
                        )
                    });
                if let Some(note) = chop {
                    self.notifier.send(&note).await;
                }
                return Ok(CycleOutcome::NoSignal(reason));
            }
            Evaluation::Signal(signal) => signal,
        };
        info!("signal: {}", signal.reason);
        self.notifier.send(&signal_message(&signal)).await;

        let decision = self.risk.validate_trade(&signal);
        if let RiskDecision::Rejected { reason } = decision {
            self.notifier.send(&format!("⚠️ Rejected: {reason}")).await;
            return Ok(CycleOutcome::Rejected(reason));
        }
        info!("{}", decision.message());
        let quantity = decision.quantity();

        let report = self.executor.execute(&signal, quantity).await?;
        info!("{report}");
        self.notifier
            .send(&format!("✅ Order placed [{}]: {report}", self.executor.mode()))
            .await;
        Ok(CycleOutcome::Executed(report))
    }

    /// Run cycles until `shutdown` flips to true (or once, in `RunMode::Once`).
    /// Returns the number of cycles run.
    pub async fn run(&mut self, mode: RunMode, mut shutdown: watch::Receiver<bool>) -> u64 {
        let first = self.cycles;
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested");
                break;
            }

            let started = self.clock.now_ms();
            let outcome = self.run_cycle().await;
            debug!(?outcome, "cycle done");
            if mode == RunMode::Once {
                break;
            }

            let elapsed = Duration::from_millis((self.clock.now_ms() - started).max(0) as u64);
            let wait = self.interval.saturating_sub(elapsed);
            info!("next cycle in {}s", wait.as_secs());
            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                changed = shutdown.changed() => {
                    // sender gone: nobody can stop us early, finish the wait
                    if changed.is_err() {
                        self.clock.sleep(wait).await;
                    }
                }
            }
        }
        let ran = self.cycles - first;
        info!(cycles = ran, "orchestrator stopped");
        ran
    }
}

fn signal_message(signal: &Signal) -> String {
    let tp2 = signal
        .take_profit_2
        .map(|p| format!("{p:.2}"))
        .unwrap_or_else(|| "-".into());
    format!(
        "🔍 Signal: {}\nEntry: {:.2} | SL: {:.2}\nTP1: {:.2} | TP2: {}\nR:R {:.2}",
        signal.side,
        signal.entry,
        signal.stop_loss,
        signal.take_profit_1,
        tp2,
        signal.rr_ratio()
    )
}
