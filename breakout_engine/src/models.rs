/// models.rs — Value types shared by the pipeline
///
/// Candles and tickers come in from the exchange, signals and risk decisions
/// are produced once per cycle and discarded, orders and positions are owned
/// by the exchange and only ever mirrored here.
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Market data ──────────────────────────────────────────────────────────

/// One OHLCV bar.  `open_time` is the bar open in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open:      f64,
    pub high:      f64,
    pub low:       f64,
    pub close:     f64,
    pub volume:    f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last_price: f64,
    /// Unix milliseconds
    pub timestamp:  i64,
}

// ── Direction ────────────────────────────────────────────────────────────

/// Direction of a trade or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction.
    pub fn entry_side(self) -> OrderSide {
        match self {
            Side::Long  => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces / closes a position in this direction.
    pub fn exit_side(self) -> OrderSide {
        match self {
            Side::Long  => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// +1 for long, −1 for short.  Multiplies price moves into PnL.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long  => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long  => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy  => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Levels ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

/// A swing level and the absolute offset applied to reach its trigger price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price:          f64,
    pub kind:           LevelKind,
    pub offset_applied: f64,
}

impl Level {
    /// Price at which a breakout through this level is triggered.
    pub fn trigger(&self) -> f64 {
        match self.kind {
            LevelKind::Resistance => self.price + self.offset_applied,
            LevelKind::Support    => self.price - self.offset_applied,
        }
    }
}

// ── Signal ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side:          Side,
    pub entry:         f64,
    pub stop_loss:     f64,
    pub take_profit_1: f64,
    pub take_profit_2: Option<f64>,
    pub reason:        String,
}

impl Signal {
    /// Distance between entry and stop, always positive for a well-formed signal.
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Reward-to-risk against TP1.  Zero when the geometry is inverted.
    pub fn rr_ratio(&self) -> f64 {
        if !self.is_well_formed() {
            return 0.0;
        }
        (self.take_profit_1 - self.entry).abs() / self.stop_distance()
    }

    /// long: stop < entry < tp1, short: tp1 < entry < stop
    pub fn is_well_formed(&self) -> bool {
        match self.side {
            Side::Long  => self.stop_loss < self.entry && self.entry < self.take_profit_1,
            Side::Short => self.take_profit_1 < self.entry && self.entry < self.stop_loss,
        }
    }
}

/// Outcome of one strategy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Signal(Signal),
    NoSignal { reason: NoSignalReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSignalReason {
    NoBreakout,
    PullbackExceeded,
    RrTooLow,
}

impl fmt::Display for NoSignalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NoSignalReason::NoBreakout       => "no breakout",
            NoSignalReason::PullbackExceeded => "pullback exceeded",
            NoSignalReason::RrTooLow         => "RR too low",
        };
        f.write_str(s)
    }
}

// ── Risk ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Valid {
        quantity:  f64,
        notional:  f64,
        risk_usdt: f64,
        rr:        f64,
    },
    Rejected {
        reason: String,
    },
}

impl RiskDecision {
    pub fn is_valid(&self) -> bool {
        matches!(self, RiskDecision::Valid { .. })
    }

    /// Sized quantity, zero when rejected.
    pub fn quantity(&self) -> f64 {
        match self {
            RiskDecision::Valid { quantity, .. } => *quantity,
            RiskDecision::Rejected { .. }        => 0.0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RiskDecision::Valid { quantity, risk_usdt, rr, .. } => format!(
                "validation OK: R:R {rr:.2} | qty {quantity:.6} | risk {risk_usdt:.2} USDT"
            ),
            RiskDecision::Rejected { reason } => reason.clone(),
        }
    }
}

// ── Orders & positions (exchange-owned) ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Still resting on the book.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id:              String,
    pub client_order_id: Option<String>,
    pub side:            OrderSide,
    pub order_type:      OrderType,
    pub quantity:        f64,
    pub filled_quantity: f64,
    pub price:           Option<f64>,
    pub stop_price:      Option<f64>,
    pub reduce_only:     bool,
    pub status:          OrderStatus,
    /// Unix milliseconds
    pub created_at:      i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side:           Side,
    pub quantity:       f64,
    pub entry_price:    f64,
    pub unrealized_pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_signal(entry: f64, sl: f64, tp1: f64) -> Signal {
        Signal {
            side: Side::Long,
            entry,
            stop_loss: sl,
            take_profit_1: tp1,
            take_profit_2: None,
            reason: String::new(),
        }
    }

    #[test]
    fn rr_ratio_long() {
        let s = long_signal(65_040.0, 64_400.0, 66_320.0);
        assert!((s.rr_ratio() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn inverted_geometry_has_zero_rr() {
        let s = long_signal(65_040.0, 65_100.0, 66_000.0);
        assert!(!s.is_well_formed());
        assert_eq!(s.rr_ratio(), 0.0);
    }

    #[test]
    fn level_trigger_direction() {
        let r = Level { price: 65_000.0, kind: LevelKind::Resistance, offset_applied: 40.0 };
        let s = Level { price: 64_000.0, kind: LevelKind::Support, offset_applied: 50.0 };
        assert_eq!(r.trigger(), 65_040.0);
        assert_eq!(s.trigger(), 63_950.0);
    }
}
