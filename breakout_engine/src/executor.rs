/// executor.rs — Order execution against a live venue
///
/// FLOW (one signal):
///   1. GTC limit entry at signal.entry, tagged with a fresh client order id
///   2. Poll until filled or ENTRY_FILL_TIMEOUT_SECONDS; optionally fall back to market
///   3. Reduce-only stop-market at the stop, TP1 limit for TP1_CLOSE_PCT, TP2 limit for the rest
///
/// FLOW (start of every cycle, `reconcile`):
///   - cancel non-reduce-only entries older than one loop interval,
///     report any younger one so no second entry joins it
///   - protect a position whose entry filled after its cycle ended, and
///     re-size that protection while a partly filled entry keeps filling
///   - once TP1 is gone but TP2 still rests, move the stop to the entry price
///   - past TP1 · (1 ± TRAILING_ACTIVATION_PCT), trail the stop behind price
///   - cancel reduce-only leftovers when the position is flat
///
/// Client order ids are `tag + 24 hex` and stay the same across retries.
/// When an attempt may have landed (timeout, dropped connection) the open
/// orders and positions are checked for that id before anything is resent.
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{ExecutionSettings, InstrumentRules};
use crate::error::{BotError, ExchangeError};
use crate::exchange::{ExchangeClient, OrderParams};
use crate::models::{Order, OrderSide, OrderStatus, OrderType, Position, Side, Signal};
use crate::retry::{Attempt, RetryPolicy};
use crate::risk::round_down_to_step;
use crate::sim::TradeOutcome;

pub const ENTRY_TAG: &str = "en";
pub const MARKET_TAG: &str = "mk";
pub const STOP_TAG: &str = "sl";
pub const BREAKEVEN_TAG: &str = "be";
pub const TP1_TAG: &str = "tp1";
pub const TP2_TAG: &str = "tp2";
pub const TRAIL_TAG: &str = "tr";

const TAGS: [&str; 7] = [TP1_TAG, TP2_TAG, TRAIL_TAG, STOP_TAG, BREAKEVEN_TAG, ENTRY_TAG, MARKET_TAG];
const FILL_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PRICE_EPS: f64 = 1e-6;
const QTY_EPS: f64 = 1e-9;

// ── Client order ids ──────────────────────────────────────────────────────

/// Id family for the orders of one signal: entry, stop and targets share a suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrderIds {
    suffix: String,
}

impl ClientOrderIds {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self { suffix: hex[..24].to_owned() }
    }

    pub fn id(&self, tag: &str) -> String {
        format!("{tag}{}", self.suffix)
    }
}

/// Tag an order was submitted with, if it is one of ours.
pub fn order_tag(order: &Order) -> Option<&'static str> {
    let id = order.client_order_id.as_deref()?;
    TAGS.into_iter().find(|t| id.starts_with(t))
}

// ── Reports ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Protection {
    pub stop:         Order,
    pub take_profits: Vec<Order>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Entry filled and protective orders resting
    Filled,
    /// Entry still on the book; protection follows once it fills
    Resting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub side:            Side,
    pub entry:           Order,
    pub filled_quantity: f64,
    pub status:          ExecutionStatus,
    pub protection:      Option<Protection>,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price = self.entry.price.unwrap_or(0.0);
        match self.status {
            ExecutionStatus::Filled => write!(
                f,
                "{} entry filled: {:.6} @ {:.2} (order {})",
                self.side, self.filled_quantity, price, self.entry.id
            )?,
            ExecutionStatus::Resting => write!(
                f,
                "{} entry resting: {:.6} @ {:.2} (order {}, filled {:.6})",
                self.side, self.entry.quantity, price, self.entry.id, self.filled_quantity
            )?,
        }
        if let Some(p) = &self.protection {
            write!(f, " | SL {:.2}", p.stop.stop_price.unwrap_or(0.0))?;
            for tp in &p.take_profits {
                write!(f, " | TP {:.6} @ {:.2}", tp.quantity, tp.price.unwrap_or(0.0))?;
            }
        }
        Ok(())
    }
}

/// Something reconciliation did or found.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    StaleEntryCancelled { order_id: String, age_secs: i64 },
    ProtectionPlaced { side: Side, quantity: f64, stop: f64 },
    BreakevenMoved { side: Side, stop: f64 },
    StopResized { side: Side, quantity: f64, stop: f64 },
    StopTrailed { side: Side, stop: f64, price: f64 },
    /// Open position without a stop order and nothing known to place
    Unprotected { side: Side, quantity: f64 },
    OrphansCancelled { count: usize },
    /// Paper book events
    TakeProfit1Filled { side: Side, price: f64, pnl: f64 },
    PositionClosed { side: Side, outcome: TradeOutcome, price: f64, pnl: f64 },
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::StaleEntryCancelled { order_id, age_secs } => {
                write!(f, "stale entry {order_id} cancelled after {age_secs}s")
            }
            ReconcileAction::ProtectionPlaced { side, quantity, stop } => {
                write!(f, "{side} position {quantity:.6} protected, SL {stop:.2}")
            }
            ReconcileAction::BreakevenMoved { side, stop } => {
                write!(f, "TP1 filled, {side} stop moved to breakeven {stop:.2}")
            }
            ReconcileAction::StopResized { side, quantity, stop } => {
                write!(f, "{side} stop re-sized to {quantity:.6} @ {stop:.2}")
            }
            ReconcileAction::StopTrailed { side, stop, price } => {
                write!(f, "{side} stop trailed to {stop:.2} (price {price:.2})")
            }
            ReconcileAction::Unprotected { side, quantity } => {
                write!(f, "{side} position {quantity:.6} has NO stop order")
            }
            ReconcileAction::OrphansCancelled { count } => {
                write!(f, "position flat, {count} leftover order(s) cancelled")
            }
            ReconcileAction::TakeProfit1Filled { side, price, pnl } => {
                write!(f, "{side} TP1 @ {price:.2}, PnL {pnl:+.2} USDT, stop at breakeven")
            }
            ReconcileAction::PositionClosed { side, outcome, price, pnl } => {
                write!(f, "{side} closed ({outcome}) @ {price:.2}, trade PnL {pnl:+.2} USDT")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub position:      Option<Position>,
    /// Entry from an earlier cycle still on the book, not yet stale
    pub resting_entry: Option<Order>,
    pub actions:       Vec<ReconcileAction>,
}

// ── Executor seam ─────────────────────────────────────────────────────────

/// Where validated signals go.  Live and paper trading implement it.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn mode(&self) -> &'static str;

    /// Start-of-cycle housekeeping; reports the open position, if any.
    async fn reconcile(&self) -> Result<Reconciliation, BotError>;

    async fn execute(&self, signal: &Signal, quantity: f64) -> Result<ExecutionReport, BotError>;
}

// ── Live execution ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct OrderRequest {
    order_type: OrderType,
    side:       OrderSide,
    quantity:   f64,
    price:      Option<f64>,
    stop_price: Option<f64>,
    params:     OrderParams,
}

impl OrderRequest {
    fn limit(side: OrderSide, quantity: f64, price: f64, params: OrderParams) -> Self {
        Self { order_type: OrderType::Limit, side, quantity, price: Some(price), stop_price: None, params }
    }

    fn market(side: OrderSide, quantity: f64, params: OrderParams) -> Self {
        Self { order_type: OrderType::Market, side, quantity, price: None, stop_price: None, params }
    }

    fn stop(side: OrderSide, quantity: f64, stop_price: f64, params: OrderParams) -> Self {
        Self { order_type: OrderType::StopMarket, side, quantity, price: None, stop_price: Some(stop_price), params }
    }
}

/// Prices and ids of the protective orders still owed to a filled entry.
#[derive(Debug, Clone, PartialEq)]
struct ProtectionPlan {
    side:          Side,
    stop_loss:     f64,
    take_profit_1: f64,
    take_profit_2: Option<f64>,
    entry_id:      String,
    /// Family of the stop and targets; replaced when they are re-sized
    ids:           ClientOrderIds,
}

/// Price past which the stop of the current position starts trailing.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrailPlan {
    side:       Side,
    activation: f64,
}

fn find_by_client_id<'a>(open: &'a [Order], id: &str) -> Option<&'a Order> {
    open.iter().find(|o| o.client_order_id.as_deref() == Some(id))
}

fn stop_at_or_past_entry(pos: &Position, stop_px: f64) -> bool {
    match pos.side {
        Side::Long  => stop_px >= pos.entry_price - PRICE_EPS,
        Side::Short => stop_px <= pos.entry_price + PRICE_EPS,
    }
}

fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}

fn load<T: Clone>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().ok().and_then(|g| g.clone())
}

fn store<T>(slot: &Mutex<Option<T>>, value: Option<T>) {
    if let Ok(mut g) = slot.lock() {
        *g = value;
    }
}

pub struct ExecutionClient {
    exchange: Arc<dyn ExchangeClient>,
    retry:    RetryPolicy,
    clock:    Arc<dyn Clock>,
    settings: ExecutionSettings,
    rules:    InstrumentRules,
    /// Plan of the last entry whose protection is not final yet
    pending:  Mutex<Option<ProtectionPlan>>,
    trail:    Mutex<Option<TrailPlan>>,
}

impl ExecutionClient {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        retry:    RetryPolicy,
        clock:    Arc<dyn Clock>,
        settings: ExecutionSettings,
        rules:    InstrumentRules,
    ) -> Self {
        Self {
            exchange,
            retry,
            clock,
            settings,
            rules,
            pending: Mutex::new(None),
            trail:   Mutex::new(None),
        }
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, BotError>
    where
        F:   FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        self.retry
            .run(self.clock.as_ref(), operation, op)
            .await
            .map_err(|e| BotError::from_exchange(operation, e.attempts, e.last))
    }

    async fn open_orders(&self) -> Result<Vec<Order>, BotError> {
        self.call("fetch_open_orders", |_| self.exchange.fetch_open_orders()).await
    }

    async fn position(&self) -> Result<Option<Position>, BotError> {
        let positions = self.call("fetch_positions", |_| self.exchange.fetch_positions()).await?;
        Ok(positions.into_iter().find(|p| p.quantity > 0.0))
    }

    /// Cancel, treating an already-gone order as cancelled.
    async fn cancel(&self, order_id: &str) -> Result<(), BotError> {
        match self
            .retry
            .run(self.clock.as_ref(), "cancel_order", |_| self.exchange.cancel_order(order_id))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.last, ExchangeError::NotFound(_)) => {
                debug!(order_id, "cancel: order already gone");
                Ok(())
            }
            Err(e) => Err(BotError::from_exchange("cancel_order", e.attempts, e.last)),
        }
    }

    /// Submit `req`, adopting the order placed by an earlier attempt instead
    /// of resending once an attempt has ended with an unknown outcome.
    async fn submit(&self, operation: &'static str, req: &OrderRequest) -> Result<Order, BotError> {
        let uncertain = AtomicBool::new(false);
        let uncertain = &uncertain;
        self.call(operation, move |attempt| async move {
            if attempt.after_unknown_outcome() {
                uncertain.store(true, Ordering::Relaxed);
            }
            if uncertain.load(Ordering::Relaxed) {
                if let Some(existing) = self.find_submitted(req).await? {
                    warn!(
                        id = %existing.id,
                        client_order_id = ?existing.client_order_id,
                        "earlier attempt reached the book, adopting it"
                    );
                    return Ok(existing);
                }
            }
            self.place(req).await
        })
        .await
    }

    async fn find_submitted(&self, req: &OrderRequest) -> Result<Option<Order>, ExchangeError> {
        let Some(id) = req.params.client_order_id.as_deref() else {
            return Ok(None);
        };
        let open = self.exchange.fetch_open_orders().await?;
        if let Some(order) = open.into_iter().find(|o| o.client_order_id.as_deref() == Some(id)) {
            return Ok(Some(order));
        }
        if req.params.reduce_only {
            return Ok(None);
        }
        // an entry that filled at once leaves a position instead of an order
        let positions = self.exchange.fetch_positions().await?;
        Ok(positions
            .into_iter()
            .find(|p| p.quantity > 0.0 && p.side.entry_side() == req.side)
            .map(|p| Order {
                id:              id.to_owned(),
                client_order_id: Some(id.to_owned()),
                side:            req.side,
                order_type:      req.order_type,
                quantity:        req.quantity,
                filled_quantity: p.quantity.min(req.quantity),
                price:           req.price,
                stop_price:      req.stop_price,
                reduce_only:     false,
                status:          OrderStatus::Filled,
                created_at:      self.clock.now_ms(),
            }))
    }

    async fn place(&self, req: &OrderRequest) -> Result<Order, ExchangeError> {
        match req.order_type {
            OrderType::Limit => {
                let price = req
                    .price
                    .ok_or_else(|| ExchangeError::InvalidOrder("limit order without price".into()))?;
                self.exchange.create_limit_order(req.side, req.quantity, price, &req.params).await
            }
            OrderType::Market => self.exchange.create_market_order(req.side, req.quantity, &req.params).await,
            OrderType::StopMarket => {
                let stop = req
                    .stop_price
                    .ok_or_else(|| ExchangeError::InvalidOrder("stop order without trigger".into()))?;
                self.exchange.create_stop_market_order(req.side, req.quantity, stop, &req.params).await
            }
        }
    }

    /// Poll the entry until it fills, dies, or the fill timeout runs out.
    async fn await_fill(&self, entry: Order) -> Result<Order, BotError> {
        let deadline = self.clock.now_ms() + self.settings.entry_fill_timeout.as_millis() as i64;
        let mut current = entry;
        while current.status.is_open() {
            let left = deadline - self.clock.now_ms();
            if left <= 0 {
                break;
            }
            self.clock.sleep(FILL_POLL_INTERVAL.min(Duration::from_millis(left as u64))).await;
            let id = current.id.clone();
            current = self.call("fetch_order", |_| self.exchange.fetch_order(&id)).await?;
        }
        Ok(current)
    }

    /// Cancel the unfilled rest of the entry and take it at market.  The
    /// top-up is sized from the entry as read after the cancel; when that
    /// read fails nothing is bought and the error surfaces, leaving the
    /// pending plan to protect whatever filled.
    async fn fallback_to_market(&self, entry: Order, quantity: f64, ids: &ClientOrderIds) -> Result<Order, BotError> {
        self.cancel(&entry.id).await?;
        let id = entry.id.clone();
        let latest = self.call("fetch_order", |_| self.exchange.fetch_order(&id)).await?;
        let rest = round_down_to_step(quantity - latest.filled_quantity, self.rules.qty_step);
        if rest < self.rules.min_qty || rest <= 0.0 {
            return Ok(latest);
        }
        info!(rest, "entry not filled in time, falling back to market");
        let req = OrderRequest::market(latest.side, rest, OrderParams::entry(ids.id(MARKET_TAG)));
        self.submit("create_market_order", &req).await?;
        Ok(Order {
            filled_quantity: latest.filled_quantity + rest,
            status:          OrderStatus::Filled,
            ..latest
        })
    }

    /// (tp1, tp2) quantities.  Everything goes to TP1 when a split would
    /// leave either leg under the exchange minimum.
    fn split_targets(&self, quantity: f64, has_tp2: bool) -> (f64, f64) {
        if !has_tp2 {
            return (quantity, 0.0);
        }
        let tp1 = round_down_to_step(quantity * self.settings.tp1_close_pct, self.rules.qty_step);
        let tp2 = round_down_to_step(quantity - tp1, self.rules.qty_step);
        if tp1 < self.rules.min_qty || tp2 < self.rules.min_qty || tp2 <= 0.0 {
            (quantity, 0.0)
        } else {
            (tp1, tp2)
        }
    }

    /// Place whichever protective orders of `plan` are not already resting.
    /// A resting stop smaller than `quantity` (the entry kept filling) has
    /// its whole set replaced under a fresh id family, new stop first.
    /// The flag is true when anything was submitted.
    async fn protect(&self, plan: &mut ProtectionPlan, quantity: f64, open: &[Order]) -> Result<(Protection, bool), BotError> {
        let exit = plan.side.exit_side();
        let mut replaced = Vec::new();
        if let Some(stop) = find_by_client_id(open, &plan.ids.id(STOP_TAG)) {
            if stop.quantity + QTY_EPS < quantity {
                info!(side = %plan.side, covered = stop.quantity, quantity, "position grew, re-sizing protection");
                replaced = [STOP_TAG, TP1_TAG, TP2_TAG]
                    .iter()
                    .filter_map(|tag| find_by_client_id(open, &plan.ids.id(tag)))
                    .map(|o| o.id.clone())
                    .collect();
                plan.ids = ClientOrderIds::generate();
            }
        }
        let open: &[Order] = if replaced.is_empty() { open } else { &[] };
        let mut submitted = false;
        let resting = |tag: &str| find_by_client_id(open, &plan.ids.id(tag)).cloned();

        let stop = match resting(STOP_TAG) {
            Some(o) => o,
            None => {
                let req = OrderRequest::stop(exit, quantity, plan.stop_loss, OrderParams::reduce_only(plan.ids.id(STOP_TAG)));
                submitted = true;
                self.submit("create_stop_market_order", &req).await?
            }
        };
        // old set goes once the new stop rests, before the new targets
        for id in &replaced {
            self.cancel(id).await?;
        }

        let (tp1_qty, tp2_qty) = self.split_targets(quantity, plan.take_profit_2.is_some());
        let mut take_profits = Vec::with_capacity(2);
        let mut legs = vec![(TP1_TAG, tp1_qty, plan.take_profit_1)];
        if let Some(tp2) = plan.take_profit_2.filter(|_| tp2_qty > 0.0) {
            legs.push((TP2_TAG, tp2_qty, tp2));
        }
        for (tag, qty, price) in legs {
            let order = match resting(tag) {
                Some(o) => o,
                None => {
                    let req = OrderRequest::limit(exit, qty, price, OrderParams::reduce_only(plan.ids.id(tag)));
                    submitted = true;
                    self.submit("create_limit_order", &req).await?
                }
            };
            take_profits.push(order);
        }

        if submitted {
            info!(
                side = %plan.side, quantity, stop = plan.stop_loss,
                tp1 = plan.take_profit_1, tp2 = ?plan.take_profit_2,
                "protective orders in place"
            );
        }
        Ok((Protection { stop, take_profits }, submitted))
    }

    /// Replace the stop with one at the entry price once TP1 has filled.
    async fn maybe_breakeven(&self, pos: &Position, stop: &Order, open: &[Order]) -> Result<Option<ReconcileAction>, BotError> {
        let has = |tag: &str| open.iter().any(|o| order_tag(o) == Some(tag));
        let Some(stop_px) = stop.stop_price else {
            return Ok(None);
        };
        if has(TP1_TAG) || !has(TP2_TAG) || stop_at_or_past_entry(pos, stop_px) {
            return Ok(None);
        }

        let ids = ClientOrderIds::generate();
        let req = OrderRequest::stop(
            pos.side.exit_side(),
            pos.quantity,
            pos.entry_price,
            OrderParams::reduce_only(ids.id(BREAKEVEN_TAG)),
        );
        // new stop first, so the position is never without one
        self.submit("create_stop_market_order", &req).await?;
        self.cancel(&stop.id).await?;
        info!(side = %pos.side, stop = pos.entry_price, "stop moved to breakeven");
        Ok(Some(ReconcileAction::BreakevenMoved { side: pos.side, stop: pos.entry_price }))
    }

    /// Replace a stop that covers less than the position, same trigger.
    async fn resize_stop(&self, pos: &Position, stop: &Order) -> Result<Option<ReconcileAction>, BotError> {
        let Some(stop_px) = stop.stop_price else {
            return Ok(None);
        };
        if stop.quantity + QTY_EPS >= pos.quantity {
            return Ok(None);
        }
        let tag = order_tag(stop).filter(|t| [STOP_TAG, BREAKEVEN_TAG, TRAIL_TAG].contains(t)).unwrap_or(STOP_TAG);
        let ids = ClientOrderIds::generate();
        let req = OrderRequest::stop(pos.side.exit_side(), pos.quantity, stop_px, OrderParams::reduce_only(ids.id(tag)));
        self.submit("create_stop_market_order", &req).await?;
        self.cancel(&stop.id).await?;
        info!(side = %pos.side, from = stop.quantity, to = pos.quantity, "stop re-sized to the position");
        Ok(Some(ReconcileAction::StopResized { side: pos.side, quantity: pos.quantity, stop: stop_px }))
    }

    /// After TP1, ratchet the stop to `price · (1 ∓ offset)` once price is
    /// past the activation level.  The stop only ever moves toward profit.
    async fn maybe_trail(&self, pos: &Position, stop: &Order, open: &[Order]) -> Result<Option<ReconcileAction>, BotError> {
        let offset = self.settings.trailing_offset_pct;
        let Some(trail) = self.trail_plan().filter(|t| t.side == pos.side) else {
            return Ok(None);
        };
        let Some(stop_px) = stop.stop_price else {
            return Ok(None);
        };
        let tp1_resting = open.iter().any(|o| order_tag(o) == Some(TP1_TAG));
        if offset <= 0.0 || tp1_resting || !stop_at_or_past_entry(pos, stop_px) {
            return Ok(None);
        }

        let price = self.call("fetch_ticker", |_| self.exchange.fetch_ticker()).await?.last_price;
        let (activated, candidate) = match pos.side {
            Side::Long  => (price >= trail.activation, round_cents(price * (1.0 - offset))),
            Side::Short => (price <= trail.activation, round_cents(price * (1.0 + offset))),
        };
        let tighter = match pos.side {
            Side::Long  => candidate > stop_px + PRICE_EPS,
            Side::Short => candidate < stop_px - PRICE_EPS,
        };
        if !activated || !tighter {
            debug!(price, activation = trail.activation, stop = stop_px, "trailing: stop unchanged");
            return Ok(None);
        }

        let ids = ClientOrderIds::generate();
        let req = OrderRequest::stop(pos.side.exit_side(), pos.quantity, candidate, OrderParams::reduce_only(ids.id(TRAIL_TAG)));
        self.submit("create_stop_market_order", &req).await?;
        self.cancel(&stop.id).await?;
        info!(side = %pos.side, price, from = stop_px, to = candidate, "stop trailed");
        Ok(Some(ReconcileAction::StopTrailed { side: pos.side, stop: candidate, price }))
    }

    fn pending_plan(&self) -> Option<ProtectionPlan> {
        load(&self.pending)
    }

    fn set_pending(&self, plan: Option<ProtectionPlan>) {
        store(&self.pending, plan);
    }

    fn trail_plan(&self) -> Option<TrailPlan> {
        load(&self.trail)
    }

    fn set_trail(&self, trail: Option<TrailPlan>) {
        store(&self.trail, trail);
    }
}

#[async_trait]
impl OrderExecutor for ExecutionClient {
    fn mode(&self) -> &'static str {
        "live"
    }

    async fn reconcile(&self) -> Result<Reconciliation, BotError> {
        let mut actions = Vec::new();
        let now = self.clock.now_ms();
        let stale_ms = self.settings.stale_after.as_millis() as i64;

        let mut live = Vec::new();
        for order in self.open_orders().await? {
            let age = now - order.created_at;
            if !order.reduce_only && order.status.is_open() && age >= stale_ms {
                info!(id = %order.id, age_secs = age / 1_000, "cancelling stale entry");
                self.cancel(&order.id).await?;
                actions.push(ReconcileAction::StaleEntryCancelled { order_id: order.id, age_secs: age / 1_000 });
            } else {
                live.push(order);
            }
        }

        let resting_entry = live.iter().find(|o| !o.reduce_only).cloned();
        if let Some(entry) = &resting_entry {
            debug!(id = %entry.id, age_secs = (now - entry.created_at) / 1_000, "entry still resting");
        }

        let position = self.position().await?;
        match &position {
            None => {
                if resting_entry.is_none() {
                    self.set_pending(None);
                    self.set_trail(None);
                }
                let orphans: Vec<&Order> = live.iter().filter(|o| o.reduce_only).collect();
                for o in &orphans {
                    self.cancel(&o.id).await?;
                }
                if !orphans.is_empty() {
                    info!(count = orphans.len(), "position flat, leftover orders cancelled");
                    actions.push(ReconcileAction::OrphansCancelled { count: orphans.len() });
                }
            }
            Some(pos) => {
                let stop = live
                    .iter()
                    .find(|o| o.reduce_only && o.order_type == OrderType::StopMarket)
                    .cloned();
                match (self.pending_plan().filter(|p| p.side == pos.side), stop) {
                    (Some(mut plan), _) => {
                        let (_, placed) = self.protect(&mut plan, pos.quantity, &live).await?;
                        if placed {
                            actions.push(ReconcileAction::ProtectionPlaced {
                                side:     pos.side,
                                quantity: pos.quantity,
                                stop:     plan.stop_loss,
                            });
                        }
                        // a partly filled entry may still add to the position
                        let entry_open = find_by_client_id(&live, &plan.entry_id).is_some();
                        self.set_pending(entry_open.then_some(plan));
                    }
                    (None, Some(stop)) => {
                        let action = match self.maybe_breakeven(pos, &stop, &live).await? {
                            Some(a) => Some(a),
                            None => match self.resize_stop(pos, &stop).await? {
                                Some(a) => Some(a),
                                None => self.maybe_trail(pos, &stop, &live).await?,
                            },
                        };
                        actions.extend(action);
                    }
                    (None, None) => {
                        warn!(side = %pos.side, qty = pos.quantity, "open position without stop order");
                        actions.push(ReconcileAction::Unprotected { side: pos.side, quantity: pos.quantity });
                    }
                }
            }
        }

        Ok(Reconciliation { position, resting_entry, actions })
    }

    async fn execute(&self, signal: &Signal, quantity: f64) -> Result<ExecutionReport, BotError> {
        let ids = ClientOrderIds::generate();
        let plan = ProtectionPlan {
            side:          signal.side,
            stop_loss:     signal.stop_loss,
            take_profit_1: signal.take_profit_1,
            take_profit_2: signal.take_profit_2,
            entry_id:      ids.id(ENTRY_TAG),
            ids:           ids.clone(),
        };
        let act = self.settings.trailing_activation_pct;
        let trail = TrailPlan {
            side:       signal.side,
            activation: match signal.side {
                Side::Long  => signal.take_profit_1 * (1.0 + act),
                Side::Short => signal.take_profit_1 * (1.0 - act),
            },
        };

        info!(
            side = %signal.side, quantity, entry = signal.entry,
            client_order_id = %ids.id(ENTRY_TAG), "placing entry"
        );
        let req = OrderRequest::limit(signal.side.entry_side(), quantity, signal.entry, OrderParams::entry(ids.id(ENTRY_TAG)));
        let entry = self.submit("create_limit_order", &req).await?;
        self.set_pending(Some(plan.clone()));
        self.set_trail(Some(trail));

        let mut entry = self.await_fill(entry).await?;
        if entry.status.is_open() && self.settings.market_fallback {
            entry = self.fallback_to_market(entry, quantity, &ids).await?;
        }

        match entry.status {
            OrderStatus::Filled => {}
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                info!(id = %entry.id, filled = entry.filled_quantity, "entry resting, protection deferred");
                return Ok(ExecutionReport {
                    side:            signal.side,
                    filled_quantity: entry.filled_quantity,
                    entry,
                    status:          ExecutionStatus::Resting,
                    protection:      None,
                });
            }
            OrderStatus::Cancelled | OrderStatus::Rejected if entry.filled_quantity <= 0.0 => {
                self.set_pending(None);
                self.set_trail(None);
                return Err(BotError::InvalidOrder(format!("entry {} ended {:?} unfilled", entry.id, entry.status)));
            }
            OrderStatus::Cancelled | OrderStatus::Rejected => {}
        }

        // size protection from what the venue reports, not from the request
        let held = self
            .position()
            .await?
            .filter(|p| p.side == signal.side)
            .map(|p| p.quantity)
            .unwrap_or(entry.filled_quantity);
        let open = self.open_orders().await?;
        let mut plan = plan;
        let (protection, _) = self.protect(&mut plan, held, &open).await?;
        self.set_pending(None);

        Ok(ExecutionReport {
            side:            signal.side,
            filled_quantity: held,
            entry,
            status:          ExecutionStatus::Filled,
            protection:      Some(protection),
        })
    }
}
