/// risk.rs — Fixed-budget position sizing
///
/// ─────────────────────────────────────────────────────────────────────────
/// SIZING
/// ─────────────────────────────────────────────────────────────────────────
///
///   notional = margin_pct × capital_total × leverage
///   qty      = notional / entry
///   if qty × |entry − stop| > max_risk_usdt:
///       qty  = max_risk_usdt / |entry − stop|
///   qty      = ⌊qty / qty_step⌋ × qty_step          (qty_step > 0)
///
/// Rejected when reward/risk is below the minimum or the rounded quantity
/// falls under the exchange minimum.  Pure and deterministic: the same
/// signal always yields the same decision.
/// ─────────────────────────────────────────────────────────────────────────
use tracing::info;

use crate::config::{InstrumentRules, RiskParams};
use crate::models::{RiskDecision, Signal};

#[derive(Debug, Clone, Copy)]
pub struct RiskManager {
    params: RiskParams,
    rules:  InstrumentRules,
}

impl RiskManager {
    pub fn new(params: RiskParams, rules: InstrumentRules) -> Self {
        Self { params, rules }
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    pub fn validate_trade(&self, signal: &Signal) -> RiskDecision {
        let p = &self.params;

        if !signal.is_well_formed() {
            return reject(format!(
                "invalid signal geometry: {} entry {:.2} stop {:.2} tp1 {:.2}",
                signal.side, signal.entry, signal.stop_loss, signal.take_profit_1
            ));
        }

        let rr = signal.rr_ratio();
        if rr < p.min_rr_ratio {
            return reject(format!("RR too low: {rr:.2} < {:.2}", p.min_rr_ratio));
        }

        let stop_distance = signal.stop_distance();
        let max_notional = p.margin_pct * p.capital_total * p.leverage as f64;
        let mut quantity = max_notional / signal.entry;

        if quantity * stop_distance > p.max_risk_usdt {
            quantity = p.max_risk_usdt / stop_distance;
            info!(quantity, max_risk = p.max_risk_usdt, "size capped by max risk");
        }

        quantity = round_down_to_step(quantity, self.rules.qty_step);
        if quantity <= 0.0 || quantity < self.rules.min_qty {
            return reject(format!(
                "quantity {quantity:.6} below exchange minimum {:.6}",
                self.rules.min_qty
            ));
        }

        RiskDecision::Valid {
            quantity,
            notional:  quantity * signal.entry,
            risk_usdt: quantity * stop_distance,
            rr,
        }
    }
}

fn reject(reason: String) -> RiskDecision {
    info!("risk rejected: {reason}");
    RiskDecision::Rejected { reason }
}

/// Floor to the quantity grid.  The epsilon keeps 0.03 / 0.001 from landing on 29.999….
pub fn round_down_to_step(quantity: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return quantity;
    }
    let steps = (quantity / step + 1e-9).floor();
    // re-derive through the step's decimal count to shed float noise
    let decimals = step_decimals(step);
    let factor = 10f64.powi(decimals);
    (steps * step * factor).round() / factor
}

fn step_decimals(step: f64) -> i32 {
    let mut d = 0;
    let mut s = step;
    while d < 12 && (s - s.round()).abs() > 1e-9 {
        s *= 10.0;
        d += 1;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn signal(entry: f64, stop: f64, tp1: f64) -> Signal {
        let side = if stop < entry { Side::Long } else { Side::Short };
        Signal {
            side,
            entry,
            stop_loss:     stop,
            take_profit_1: tp1,
            take_profit_2: None,
            reason:        String::new(),
        }
    }

    fn manager(rules: InstrumentRules) -> RiskManager {
        RiskManager::new(RiskParams::default(), rules)
    }

    fn no_step() -> InstrumentRules {
        InstrumentRules { min_qty: 0.001, qty_step: 0.0 }
    }

    #[test]
    fn sizing_example_is_valid_and_uncapped() {
        let d = manager(no_step()).validate_trade(&signal(65_040.0, 64_400.0, 66_400.0));
        let RiskDecision::Valid { quantity, notional, risk_usdt, .. } = d else { panic!("rejected") };
        assert!((notional - 2_000.0).abs() < 1e-6);
        assert!((quantity - 0.03076).abs() < 1e-4, "qty = {quantity}");
        assert!((risk_usdt - 19.68).abs() < 0.05, "risk = {risk_usdt}");
    }

    #[test]
    fn max_risk_caps_quantity() {
        let m = RiskManager::new(RiskParams { max_risk_usdt: 10.0, ..RiskParams::default() }, no_step());
        let d = m.validate_trade(&signal(65_040.0, 64_400.0, 66_400.0));
        assert!((d.quantity() - 10.0 / 640.0).abs() < 1e-12);
    }

    #[test]
    fn low_rr_rejected() {
        let d = manager(no_step()).validate_trade(&signal(65_040.0, 64_400.0, 65_500.0));
        assert!(!d.is_valid());
        assert!(d.message().starts_with("RR too low"));
    }

    #[test]
    fn below_min_qty_rejected() {
        let rules = InstrumentRules { min_qty: 1.0, qty_step: 0.001 };
        let d = manager(rules).validate_trade(&signal(65_040.0, 64_400.0, 66_400.0));
        assert!(!d.is_valid());
        assert!(d.message().contains("minimum"));
    }

    #[test]
    fn step_rounding_is_downward() {
        let d = manager(InstrumentRules::default()).validate_trade(&signal(65_040.0, 64_400.0, 66_400.0));
        assert_eq!(d.quantity(), 0.03);
        assert_eq!(round_down_to_step(0.03, 0.001), 0.03);
        assert_eq!(round_down_to_step(0.0309, 0.001), 0.03);
    }

    #[test]
    fn valid_decisions_respect_margin_and_risk() {
        let m = manager(InstrumentRules::default());
        let p = RiskParams::default();
        for (entry, stop, tp1) in [
            (65_040.0, 64_400.0, 66_400.0),
            (63_950.0, 64_600.0, 62_600.0),
            (30_000.0, 29_000.0, 33_000.0),
            (100_000.0, 90_000.0, 130_000.0),
        ] {
            let s = signal(entry, stop, tp1);
            if let RiskDecision::Valid { quantity, rr, .. } = m.validate_trade(&s) {
                assert!(quantity * entry / p.leverage as f64 <= p.margin_pct * p.capital_total + 1e-9);
                assert!(quantity * (entry - stop).abs() <= p.max_risk_usdt + 1e-9);
                assert!(rr >= p.min_rr_ratio);
            }
        }
    }

    #[test]
    fn idempotent() {
        let m = manager(InstrumentRules::default());
        let s = signal(65_040.0, 64_400.0, 66_400.0);
        assert_eq!(m.validate_trade(&s), m.validate_trade(&s));
    }
}
