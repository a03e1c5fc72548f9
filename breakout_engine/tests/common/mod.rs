//! Shared doubles for the end-to-end cycle tests: an in-memory venue that
//! behaves like a futures account, and a notifier that keeps every message.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use breakout_engine::clock::{Clock, ManualClock};
use breakout_engine::config::AppConfig;
use breakout_engine::error::ExchangeError;
use breakout_engine::exchange::{ExchangeClient, OrderParams};
use breakout_engine::models::{Candle, Order, OrderSide, OrderStatus, OrderType, Position, Side, Ticker};
use breakout_engine::notifier::Notifier;

pub const H: i64 = 3_600_000;

// ── Market fixtures ───────────────────────────────────────────────────────

fn point(open_time: i64, price: f64) -> Candle {
    Candle { open_time, open: price, high: price, low: price, close: price, volume: 1.0 }
}

/// 24 quiet bars with resistance 65_000 / support 64_000, then three bars
/// breaking above resistance without pulling back.  Last bar opens at 26h.
/// With the default parameters this is a LONG at 65_040, SL 64_400,
/// TP1 66_400, TP2 67_800, sized to 0.03.
pub fn breakout_window() -> Vec<Candle> {
    let mut bars: Vec<Candle> = (0..24)
        .map(|i| Candle {
            open_time: i * H,
            open:      64_500.0,
            high:      if i == 7 { 65_000.0 } else { 64_700.0 },
            low:       if i == 3 { 64_000.0 } else { 64_300.0 },
            close:     64_500.0,
            volume:    1.0,
        })
        .collect();
    for (k, close) in [65_038.0, 65_045.0, 65_048.0].into_iter().enumerate() {
        bars.push(point((24 + k as i64) * H, close));
    }
    bars
}

pub fn bar(open_time: i64, high: f64, low: f64) -> Candle {
    Candle { open_time, open: low, high, low, close: high, volume: 1.0 }
}

/// Config with no credentials; the tests pick the executor themselves.
pub fn config() -> AppConfig {
    AppConfig::from_lookup(|k| (k == "PAPER_TRADING").then(|| "true".to_owned()))
        .expect("default config is valid")
}

// ── Notifier ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<String>>);

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn any(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_owned());
    }
}

// ── Venue ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Account {
    candles:      Vec<Candle>,
    last_price:   f64,
    /// Every order ever accepted, by venue id
    orders:       Vec<Order>,
    positions:    Vec<Position>,
    next_id:      u64,
    /// Entry limits fill on arrival instead of resting
    fill_entries: bool,
    /// Entries that reach the book but answer with a timeout
    lost_replies: u32,
    submissions:  Vec<String>,
    cancels:      Vec<String>,
}

/// In-memory futures account on one symbol.
pub struct FakeExchange {
    clock: Arc<ManualClock>,
    acct:  Mutex<Account>,
}

impl FakeExchange {
    pub fn new(clock: Arc<ManualClock>, candles: Vec<Candle>, last_price: f64) -> Self {
        let acct = Account { candles, last_price, fill_entries: true, ..Account::default() };
        Self { clock, acct: Mutex::new(acct) }
    }

    pub fn set_fill_entries(&self, fill: bool) {
        self.acct.lock().unwrap().fill_entries = fill;
    }

    pub fn lose_next_replies(&self, n: u32) {
        self.acct.lock().unwrap().lost_replies = n;
    }

    pub fn set_market(&self, candles: Vec<Candle>, last_price: f64) {
        let mut a = self.acct.lock().unwrap();
        a.candles = candles;
        a.last_price = last_price;
    }

    /// Client ids of every accepted submission, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.acct.lock().unwrap().submissions.clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.acct.lock().unwrap().cancels.clone()
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.acct.lock().unwrap().orders.iter().filter(|o| o.status.is_open()).cloned().collect()
    }

    pub fn open_order_tagged(&self, tag: &str) -> Option<Order> {
        self.open_orders()
            .into_iter()
            .find(|o| o.client_order_id.as_deref().is_some_and(|id| id.starts_with(tag)))
    }

    pub fn position(&self) -> Option<Position> {
        self.acct.lock().unwrap().positions.first().cloned()
    }

    pub fn set_last_price(&self, price: f64) {
        self.acct.lock().unwrap().last_price = price;
    }

    /// The rest of the resting entry trades.
    pub fn fill_resting_entry(&self) {
        let mut a = self.acct.lock().unwrap();
        let Some(idx) = a.orders.iter().position(|o| o.status.is_open() && !o.reduce_only) else {
            return;
        };
        let order = a.orders[idx].clone();
        a.orders[idx].status = OrderStatus::Filled;
        a.orders[idx].filled_quantity = order.quantity;
        add_fill(&mut a, &order, order.quantity - order.filled_quantity);
    }

    /// `qty` of the resting entry trades; the order stays on the book.
    pub fn partially_fill_entry(&self, qty: f64) {
        let mut a = self.acct.lock().unwrap();
        let Some(idx) = a.orders.iter().position(|o| o.status.is_open() && !o.reduce_only) else {
            return;
        };
        a.orders[idx].status = OrderStatus::PartiallyFilled;
        a.orders[idx].filled_quantity += qty;
        let order = a.orders[idx].clone();
        add_fill(&mut a, &order, qty);
    }

    /// A reduce-only target with `tag` trades in full.
    pub fn fill_target(&self, tag: &str) {
        let mut a = self.acct.lock().unwrap();
        let Some(idx) = a.orders.iter().position(|o| {
            o.status.is_open() && o.client_order_id.as_deref().is_some_and(|id| id.starts_with(tag))
        }) else {
            return;
        };
        a.orders[idx].status = OrderStatus::Filled;
        let qty = a.orders[idx].quantity;
        a.orders[idx].filled_quantity = qty;
        if let Some(p) = a.positions.first_mut() {
            p.quantity = ((p.quantity - qty) * 1e6).round() / 1e6;
        }
        a.positions.retain(|p| p.quantity > 0.0);
    }

    fn accept(&self, order_type: OrderType, side: OrderSide, quantity: f64, price: Option<f64>, stop: Option<f64>, params: &OrderParams) -> Result<Order, ExchangeError> {
        let mut a = self.acct.lock().unwrap();
        a.next_id += 1;
        let client_id = params.client_order_id.clone();
        let mut order = Order {
            id:              a.next_id.to_string(),
            client_order_id: client_id.clone(),
            side,
            order_type,
            quantity,
            filled_quantity: 0.0,
            price,
            stop_price:      stop,
            reduce_only:     params.reduce_only,
            status:          OrderStatus::Pending,
            created_at:      self.clock.now_ms(),
        };
        let fills_now = !params.reduce_only && (order_type == OrderType::Market || a.fill_entries);
        if fills_now {
            order.status = OrderStatus::Filled;
            order.filled_quantity = quantity;
            add_fill(&mut a, &order, quantity);
        }
        a.orders.push(order.clone());
        a.submissions.push(client_id.unwrap_or_default());

        if !params.reduce_only && a.lost_replies > 0 {
            a.lost_replies -= 1;
            return Err(ExchangeError::Timeout("reply lost".into()));
        }
        Ok(order)
    }
}

fn add_fill(a: &mut Account, order: &Order, qty: f64) {
    let side = match order.side {
        OrderSide::Buy  => Side::Long,
        OrderSide::Sell => Side::Short,
    };
    let price = order.price.unwrap_or(a.last_price);
    match a.positions.iter_mut().find(|p| p.side == side) {
        Some(p) => p.quantity = ((p.quantity + qty) * 1e6).round() / 1e6,
        None => a.positions.push(Position {
            side,
            quantity:       qty,
            entry_price:    price,
            unrealized_pnl: 0.0,
        }),
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_ohlcv(&self, _timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let a = self.acct.lock().unwrap();
        let skip = a.candles.len().saturating_sub(limit);
        Ok(a.candles[skip..].to_vec())
    }

    async fn fetch_ticker(&self) -> Result<Ticker, ExchangeError> {
        let a = self.acct.lock().unwrap();
        Ok(Ticker { last_price: a.last_price, timestamp: self.clock.now_ms() })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.acct.lock().unwrap().positions.clone())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        Ok(self.open_orders())
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order, ExchangeError> {
        let a = self.acct.lock().unwrap();
        a.orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(order_id.to_owned()))
    }

    async fn create_limit_order(&self, side: OrderSide, amount: f64, price: f64, params: &OrderParams) -> Result<Order, ExchangeError> {
        self.accept(OrderType::Limit, side, amount, Some(price), None, params)
    }

    async fn create_market_order(&self, side: OrderSide, amount: f64, params: &OrderParams) -> Result<Order, ExchangeError> {
        self.accept(OrderType::Market, side, amount, None, None, params)
    }

    async fn create_stop_market_order(&self, side: OrderSide, amount: f64, stop_price: f64, params: &OrderParams) -> Result<Order, ExchangeError> {
        self.accept(OrderType::StopMarket, side, amount, None, Some(stop_price), params)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut a = self.acct.lock().unwrap();
        let order = a
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.status.is_open())
            .ok_or_else(|| ExchangeError::NotFound(order_id.to_owned()))?;
        order.status = OrderStatus::Cancelled;
        a.cancels.push(order_id.to_owned());
        Ok(())
    }

    async fn set_leverage(&self, _leverage: u32) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_position_mode(&self, _hedge: bool) -> Result<(), ExchangeError> {
        Ok(())
    }
}
