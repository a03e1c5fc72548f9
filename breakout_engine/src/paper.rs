/// paper.rs — Simulated execution
///
/// Nothing is sent to the exchange.  An accepted signal fills at once at its
/// entry price and is then walked forward on every reconcile: closed bars
/// since the last look first, then the current price as a single point.  The
/// exits follow `sim::SimTrade`, the same rules the backtester uses.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{ExecutionSettings, StrategyParams};
use crate::data::MarketDataFeed;
use crate::error::BotError;
use crate::executor::{
    ClientOrderIds, ExecutionReport, ExecutionStatus, OrderExecutor, Protection, ReconcileAction,
    Reconciliation, ENTRY_TAG, STOP_TAG, TP1_TAG, TP2_TAG,
};
use crate::models::{Order, OrderSide, OrderStatus, OrderType, Position, Signal};
use crate::sim::{SimEvent, SimTrade};

/// Fewest bars fetched per reconcile to catch up on what closed since the last look.
const CATCH_UP_BARS: usize = 3;
/// One page on every supported venue.
const MAX_CATCH_UP_BARS: usize = 300;

#[derive(Debug, Default)]
struct PaperBook {
    open:         Option<SimTrade>,
    /// Bars opening before this (Unix ms) are already accounted for
    cursor_ms:    i64,
    closed:       Vec<SimTrade>,
    realized_pnl: f64,
}

pub struct PaperExecutor {
    feed:          Arc<MarketDataFeed>,
    timeframe:     String,
    step_ms:       i64,
    tp1_close_pct: f64,
    clock:         Arc<dyn Clock>,
    book:          Mutex<PaperBook>,
}

impl PaperExecutor {
    pub fn new(
        feed:      Arc<MarketDataFeed>,
        strategy:  &StrategyParams,
        execution: &ExecutionSettings,
        clock:     Arc<dyn Clock>,
    ) -> Self {
        Self {
            feed,
            timeframe:     strategy.timeframe.clone(),
            step_ms:       strategy.timeframe_step_ms().unwrap_or(3_600_000),
            tp1_close_pct: execution.tp1_close_pct,
            clock,
            book:          Mutex::new(PaperBook::default()),
        }
    }

    /// Realized PnL of every paper trade closed so far.
    pub async fn realized_pnl(&self) -> f64 {
        self.book.lock().await.realized_pnl
    }

    pub async fn closed_trades(&self) -> Vec<SimTrade> {
        self.book.lock().await.closed.clone()
    }

    /// Bars closed since `cursor` plus the one in progress, never fewer
    /// than `CATCH_UP_BARS`.
    fn catch_up_bars(&self, cursor: i64, now: i64) -> usize {
        let closed = (now - cursor).max(0) / self.step_ms;
        let wanted = usize::try_from(closed).unwrap_or(usize::MAX).saturating_add(1).max(CATCH_UP_BARS);
        if wanted > MAX_CATCH_UP_BARS {
            warn!(wanted, max = MAX_CATCH_UP_BARS, "paper book far behind, older bars skipped");
        }
        wanted.min(MAX_CATCH_UP_BARS)
    }

    fn order(&self, id: String, side: OrderSide, kind: OrderType, quantity: f64, price: f64, reduce_only: bool) -> Order {
        let (price, stop_price) = match kind {
            OrderType::StopMarket => (None, Some(price)),
            _                     => (Some(price), None),
        };
        Order {
            id:              id.clone(),
            client_order_id: Some(id),
            side,
            order_type:      kind,
            quantity,
            filled_quantity: 0.0,
            price,
            stop_price,
            reduce_only,
            status:          OrderStatus::Pending,
            created_at:      self.clock.now_ms(),
        }
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    fn mode(&self) -> &'static str {
        "paper"
    }

    async fn reconcile(&self) -> Result<Reconciliation, BotError> {
        let mut guard = self.book.lock().await;
        let book = &mut *guard;
        let Some(trade) = book.open.as_mut() else {
            return Ok(Reconciliation::default());
        };

        let now = self.clock.now_ms();
        let cursor = book.cursor_ms;
        let candles = self.feed.get_candles(&self.timeframe, self.catch_up_bars(cursor, now)).await?;
        let ticker = self.feed.get_ticker().await?;

        let mut events = Vec::new();
        for bar in candles
            .iter()
            .filter(|c| c.open_time >= cursor && c.open_time + self.step_ms <= now)
        {
            events.extend(trade.on_bar(bar.high, bar.low));
            book.cursor_ms = bar.open_time + self.step_ms;
            if trade.is_closed() {
                break;
            }
        }
        if !trade.is_closed() {
            events.extend(trade.on_bar(ticker.last_price, ticker.last_price));
        }

        let side = trade.side;
        let actions = events
            .into_iter()
            .map(|ev| match ev {
                SimEvent::TakeProfit1 { price, pnl, .. } => ReconcileAction::TakeProfit1Filled { side, price, pnl },
                SimEvent::Closed { outcome, price, .. } => ReconcileAction::PositionClosed {
                    side,
                    outcome,
                    price,
                    pnl: trade.realized_pnl,
                },
            })
            .collect::<Vec<_>>();

        let position = if trade.is_closed() {
            book.realized_pnl += trade.realized_pnl;
            info!(
                %side, outcome = ?trade.outcome, pnl = trade.realized_pnl,
                total = book.realized_pnl, "paper trade closed"
            );
            if let Some(done) = book.open.take() {
                book.closed.push(done);
            }
            None
        } else {
            Some(Position {
                side,
                quantity:       trade.remaining,
                entry_price:    trade.entry,
                unrealized_pnl: (ticker.last_price - trade.entry) * trade.remaining * side.sign(),
            })
        };

        Ok(Reconciliation { position, resting_entry: None, actions })
    }

    async fn execute(&self, signal: &Signal, quantity: f64) -> Result<ExecutionReport, BotError> {
        let mut book = self.book.lock().await;
        if book.open.is_some() {
            return Err(BotError::InvalidOrder("paper position already open".into()));
        }

        let now = self.clock.now_ms();
        let trade = SimTrade::open(signal, quantity, self.tp1_close_pct, now);
        // the bar in progress is covered by ticker points from here on
        book.cursor_ms = (now.div_euclid(self.step_ms) + 1) * self.step_ms;

        let ids = ClientOrderIds::generate();
        let entry_side = signal.side.entry_side();
        let exit = signal.side.exit_side();

        let mut entry = self.order(ids.id(ENTRY_TAG), entry_side, OrderType::Limit, quantity, signal.entry, false);
        entry.filled_quantity = quantity;
        entry.status = OrderStatus::Filled;

        let stop = self.order(ids.id(STOP_TAG), exit, OrderType::StopMarket, quantity, signal.stop_loss, true);

        let tp1_qty = match signal.take_profit_2 {
            Some(_) => quantity * trade.tp1_close_pct,
            None    => quantity,
        };
        let mut take_profits = vec![self.order(ids.id(TP1_TAG), exit, OrderType::Limit, tp1_qty, signal.take_profit_1, true)];
        if let Some(tp2) = signal.take_profit_2.filter(|_| quantity - tp1_qty > 0.0) {
            take_profits.push(self.order(ids.id(TP2_TAG), exit, OrderType::Limit, quantity - tp1_qty, tp2, true));
        }

        info!(
            side = %signal.side, quantity, entry = signal.entry, stop = signal.stop_loss,
            tp1 = signal.take_profit_1, tp2 = ?signal.take_profit_2, "paper fill"
        );
        book.open = Some(trade);

        Ok(ExecutionReport {
            side:            signal.side,
            entry,
            filled_quantity: quantity,
            status:          ExecutionStatus::Filled,
            protection:      Some(Protection { stop, take_profits }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetrySettings;
    use crate::exchange::MockExchangeClient;
    use crate::models::{Candle, Side, Ticker};
    use crate::retry::RetryPolicy;
    use crate::sim::TradeOutcome;

    const HOUR: i64 = 3_600_000;
    const T0: i64 = 1_700_000_000_000 - 1_700_000_000_000 % HOUR;

    fn signal() -> Signal {
        Signal {
            side:          Side::Long,
            entry:         65_040.0,
            stop_loss:     64_400.0,
            take_profit_1: 66_400.0,
            take_profit_2: Some(67_800.0),
            reason:        String::new(),
        }
    }

    fn bar(open_time: i64, high: f64, low: f64) -> Candle {
        Candle { open_time, open: low, high, low, close: high, volume: 1.0 }
    }

    fn paper(mock: MockExchangeClient, clock: Arc<ManualClock>) -> PaperExecutor {
        let retry = RetryPolicy::new(RetrySettings { jitter: 0.0, ..RetrySettings::default() });
        let feed = Arc::new(MarketDataFeed::new(Arc::new(mock), retry, clock.clone()));
        PaperExecutor::new(feed, &StrategyParams::default(), &ExecutionSettings::default(), clock)
    }

    #[tokio::test]
    async fn flat_book_reconciles_without_exchange_calls() {
        let clock = Arc::new(ManualClock::new(T0));
        let rec = paper(MockExchangeClient::new(), clock).reconcile().await.unwrap();
        assert_eq!(rec, Reconciliation::default());
    }

    #[tokio::test]
    async fn fill_then_tp1_then_breakeven() {
        let clock = Arc::new(ManualClock::new(T0 + 60_000));
        let mut mock = MockExchangeClient::new();
        mock.expect_fetch_ohlcv().returning(|_, _| {
            Ok(vec![
                bar(T0, 65_100.0, 65_000.0),
                bar(T0 + HOUR, 66_500.0, 65_100.0),
                bar(T0 + 2 * HOUR, 65_200.0, 65_000.0),
            ])
        });
        mock.expect_fetch_ticker().returning(|| Ok(Ticker { last_price: 65_100.0, timestamp: 0 }));

        let exec = paper(mock, clock.clone());
        let report = exec.execute(&signal(), 0.02).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Filled);
        assert_eq!(report.protection.as_ref().map(|p| p.take_profits.len()), Some(2));
        assert!(exec.execute(&signal(), 0.02).await.is_err());

        // bar T0 was in progress at the fill and is skipped, T0+1h hits TP1,
        // T0+2h trades back through the entry
        clock.advance(std::time::Duration::from_millis((3 * HOUR) as u64));
        let rec = exec.reconcile().await.unwrap();
        assert!(rec.position.is_none());
        assert!(matches!(rec.actions[0], ReconcileAction::TakeProfit1Filled { .. }));
        assert!(matches!(
            rec.actions[1],
            ReconcileAction::PositionClosed { outcome: TradeOutcome::Breakeven, .. }
        ));
        assert!((exec.realized_pnl().await - 1_360.0 * 0.01).abs() < 1e-9);
        assert_eq!(exec.closed_trades().await.len(), 1);
    }

    #[tokio::test]
    async fn long_gap_replays_every_closed_bar() {
        let clock = Arc::new(ManualClock::new(T0 + 60_000));
        let mut mock = MockExchangeClient::new();
        // five bars close during the gap; the stop trades in the first one
        // and TP1 only later, so a 3-bar window would report TP1 instead
        mock.expect_fetch_ohlcv()
            .withf(|_, limit| *limit == 6)
            .times(1)
            .returning(|_, limit| {
                let highs_lows = [
                    (65_100.0, 64_300.0),
                    (65_200.0, 65_000.0),
                    (65_300.0, 65_100.0),
                    (66_500.0, 65_200.0),
                    (65_500.0, 65_300.0),
                    (65_600.0, 65_400.0),
                ];
                Ok((0..limit)
                    .map(|k| bar(T0 + (k as i64 + 1) * HOUR, highs_lows[k].0, highs_lows[k].1))
                    .collect())
            });
        mock.expect_fetch_ticker().returning(|| Ok(Ticker { last_price: 65_500.0, timestamp: 0 }));

        let exec = paper(mock, clock.clone());
        exec.execute(&signal(), 0.02).await.unwrap();
        clock.advance(std::time::Duration::from_millis((6 * HOUR) as u64));

        let rec = exec.reconcile().await.unwrap();
        assert!(rec.position.is_none());
        assert!(matches!(
            rec.actions.as_slice(),
            [ReconcileAction::PositionClosed { outcome: TradeOutcome::StopLoss, price, .. }] if *price == 64_400.0
        ));
        assert!((exec.realized_pnl().await + 640.0 * 0.02).abs() < 1e-9);
    }

    #[test]
    fn catch_up_window_covers_the_gap() {
        let exec = paper(MockExchangeClient::new(), Arc::new(ManualClock::new(T0)));
        assert_eq!(exec.catch_up_bars(T0 + HOUR, T0 + 60_000), 3);
        assert_eq!(exec.catch_up_bars(T0, T0 + 2 * HOUR), 3);
        assert_eq!(exec.catch_up_bars(T0, T0 + 10 * HOUR + 5), 11);
        assert_eq!(exec.catch_up_bars(0, i64::MAX), 300);
    }

    #[tokio::test]
    async fn open_trade_reports_position_at_ticker() {
        let clock = Arc::new(ManualClock::new(T0 + 60_000));
        let mut mock = MockExchangeClient::new();
        mock.expect_fetch_ohlcv().returning(|_, _| {
            Ok(vec![
                bar(T0 - 2 * HOUR, 65_000.0, 64_900.0),
                bar(T0 - HOUR, 65_000.0, 64_900.0),
                bar(T0, 65_100.0, 65_000.0),
            ])
        });
        mock.expect_fetch_ticker().returning(|| Ok(Ticker { last_price: 65_140.0, timestamp: 0 }));

        let exec = paper(mock, clock);
        exec.execute(&signal(), 0.02).await.unwrap();
        let rec = exec.reconcile().await.unwrap();
        let pos = rec.position.unwrap();
        assert_eq!(pos.side, Side::Long);
        assert!((pos.unrealized_pnl - 100.0 * 0.02).abs() < 1e-9);
        assert!(rec.actions.is_empty());
    }
}
