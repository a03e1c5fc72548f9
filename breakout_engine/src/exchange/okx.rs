/// exchange/okx.rs — OKX v5 USDT-margined swap REST client
///
/// Signature: base64(HMAC-SHA256(secret, iso_ts + METHOD + request_path + body)),
/// sent with OK-ACCESS-KEY / -SIGN / -TIMESTAMP / -PASSPHRASE.  Demo trading
/// adds `x-simulated-trading: 1`.
///
/// OKX sizes swaps in contracts.  The client converts to and from base-asset
/// quantity using the instrument's contract value, so callers never see
/// contracts.  Stop orders live in the algo book; their ids are returned
/// with an `algo:` prefix so cancel / fetch can route them.
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    candle_from_row, de_bool, de_f64, de_i64, de_opt_f64, fmt_decimal, hmac_sha256, http_client,
    status_error, ExchangeClient, OrderParams,
};
use crate::config::ExchangeSettings;
use crate::error::ExchangeError;
use crate::models::{Candle, Order, OrderSide, OrderStatus, OrderType, Position, Side, Ticker};
use crate::time_sync::TimeSync;

const BASE_URL: &str = "https://www.okx.com";
const ALGO_PREFIX: &str = "algo:";
const TD_MODE: &str = "cross";
const MAX_CANDLES: usize = 300;

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct Envelope {
    #[serde(deserialize_with = "de_i64")]
    code: i64,
    #[serde(default)]
    msg:  String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize, Debug)]
struct ServerTime {
    #[serde(deserialize_with = "de_i64")]
    ts: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    #[serde(deserialize_with = "de_f64")]
    ct_val: f64,
    #[serde(deserialize_with = "de_f64")]
    lot_sz: f64,
}

#[derive(Deserialize, Debug)]
struct TickerRow {
    #[serde(deserialize_with = "de_f64")]
    last: f64,
    #[serde(deserialize_with = "de_i64")]
    ts:   i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    #[serde(default)]
    pos_side: String,
    #[serde(deserialize_with = "de_f64")]
    pos:      f64,
    #[serde(default, deserialize_with = "de_f64")]
    avg_px:   f64,
    #[serde(default, deserialize_with = "de_f64")]
    upl:      f64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OrderRow {
    ord_id:      String,
    #[serde(default)]
    cl_ord_id:   String,
    side:        String,
    ord_type:    String,
    #[serde(deserialize_with = "de_f64")]
    sz:          f64,
    #[serde(default, deserialize_with = "de_f64")]
    acc_fill_sz: f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    px:          Option<f64>,
    #[serde(default, deserialize_with = "de_bool")]
    reduce_only: bool,
    state:       String,
    #[serde(default, deserialize_with = "de_i64")]
    c_time:      i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AlgoRow {
    algo_id:        String,
    #[serde(default)]
    algo_cl_ord_id: String,
    side:           String,
    #[serde(deserialize_with = "de_f64")]
    sz:             f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    sl_trigger_px:  Option<f64>,
    #[serde(default, deserialize_with = "de_bool")]
    reduce_only:    bool,
    state:          String,
    #[serde(default, deserialize_with = "de_i64")]
    c_time:         i64,
}

/// Ack row from order placement / cancellation; failures are per row.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Ack {
    #[serde(default)]
    ord_id:  String,
    #[serde(default)]
    algo_id: String,
    #[serde(default, deserialize_with = "de_i64")]
    s_code:  i64,
    #[serde(default)]
    s_msg:   String,
}

impl Ack {
    fn check(self) -> Result<Self, ExchangeError> {
        if self.s_code == 0 {
            Ok(self)
        } else {
            Err(map_error_code(self.s_code, self.s_msg))
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────

pub struct OkxClient {
    client:     Client,
    api_key:    String,
    api_secret: String,
    passphrase: String,
    demo:       bool,
    inst_id:    String,
    /// Base asset per contract
    ct_val:     f64,
    /// Contract increment
    lot_sz:     f64,
    time_sync:  TimeSync,
}

impl OkxClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        Ok(Self {
            client:     http_client(settings.request_timeout)?,
            api_key:    settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            passphrase: settings.api_passphrase.clone(),
            demo:       settings.okx_demo,
            inst_id:    format!("{}-{}-SWAP", settings.symbol.base, settings.symbol.quote),
            ct_val:     0.01,
            lot_sz:     0.01,
            time_sync:  TimeSync::new(),
        })
    }

    /// Sync the clock and load the contract details.
    pub async fn connect(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let mut client = Self::new(settings)?;
        if let Err(e) = client.sync_time().await {
            warn!("OKX time sync failed, using local clock: {e}");
        }
        let instruments: Vec<Instrument> = client
            .request(
                Method::GET,
                "/api/v5/public/instruments",
                &[("instType", "SWAP".into()), ("instId", client.inst_id.clone())],
                None,
                false,
            )
            .await?;
        let inst = instruments
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("unknown instrument {}", client.inst_id)))?;
        if inst.ct_val > 0.0 {
            client.ct_val = inst.ct_val;
        }
        if inst.lot_sz > 0.0 {
            client.lot_sz = inst.lot_sz;
        }
        info!(inst_id = %client.inst_id, ct_val = client.ct_val, lot_sz = client.lot_sz, demo = client.demo, "OKX instrument loaded");
        Ok(client)
    }

    pub async fn sync_time(&self) -> Result<i64, ExchangeError> {
        let before = TimeSync::local_ms();
        let rows: Vec<ServerTime> = self
            .request(Method::GET, "/api/v5/public/time", &[], None, false)
            .await?;
        let after = TimeSync::local_ms();
        let st = rows
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode("empty server time".into()))?;
        Ok(self.time_sync.record(st.ts, before, after))
    }

    fn iso_timestamp(&self) -> Result<String, ExchangeError> {
        let ms = self.time_sync.timestamp_ms();
        DateTime::from_timestamp_millis(ms)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .ok_or_else(|| ExchangeError::Decode(format!("timestamp out of range: {ms}")))
    }

    fn sign(&self, prehash: &str) -> Result<String, ExchangeError> {
        Ok(BASE64.encode(hmac_sha256(&self.api_secret, prehash)?))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path:   &str,
        query:  &[(&str, String)],
        body:   Option<&Value>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let mut request_path = path.to_owned();
        if !query.is_empty() {
            let qs = query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
            request_path = format!("{path}?{qs}");
        }
        let body = match body {
            Some(b) => serde_json::to_string(b)?,
            None    => String::new(),
        };

        let mut req = self
            .client
            .request(method.clone(), format!("{BASE_URL}{request_path}"))
            .header("Content-Type", "application/json");
        if self.demo {
            req = req.header("x-simulated-trading", "1");
        }
        if signed {
            let ts = self.iso_timestamp()?;
            let sign = self.sign(&format!("{ts}{}{request_path}{body}", method.as_str()))?;
            req = req
                .header("OK-ACCESS-KEY", &self.api_key)
                .header("OK-ACCESS-SIGN", sign)
                .header("OK-ACCESS-TIMESTAMP", ts)
                .header("OK-ACCESS-PASSPHRASE", &self.passphrase);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        debug!(%method, path, "okx request");
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        // OKX answers most errors with 200 or 4xx plus an envelope
        let env: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(_) if !status.is_success() => return Err(status_error(status, &text)),
            Err(e) => return Err(e.into()),
        };
        if env.code != 0 {
            // code 1 = "operation failed", details sit in data[].sCode
            if let Some(first) = env.data.as_array().and_then(|a| a.first()) {
                if let Ok(ack) = serde_json::from_value::<Ack>(first.clone()) {
                    if ack.s_code != 0 {
                        return Err(map_error_code(ack.s_code, ack.s_msg));
                    }
                }
            }
            return Err(map_error_code(env.code, env.msg));
        }
        let data = if env.data.is_null() { json!([]) } else { env.data };
        Ok(serde_json::from_value(data)?)
    }

    fn to_contracts(&self, amount: f64) -> f64 {
        let contracts = amount / self.ct_val;
        ((contracts / self.lot_sz) + 1e-9).floor() * self.lot_sz
    }

    fn from_contracts(&self, contracts: f64) -> f64 {
        contracts * self.ct_val
    }

    async fn place(&self, body: Value, side: OrderSide, order_type: OrderType, amount: f64, price: Option<f64>, params: &OrderParams) -> Result<Order, ExchangeError> {
        let acks: Vec<Ack> = self
            .request(Method::POST, "/api/v5/trade/order", &[], Some(&body), true)
            .await?;
        let ack = acks
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode("empty order ack".into()))?
            .check()?;
        info!(id = %ack.ord_id, %side, kind = ?order_type, qty = amount, "okx order accepted");
        Ok(Order {
            id:              ack.ord_id,
            client_order_id: params.client_order_id.clone(),
            side,
            order_type,
            quantity:        amount,
            filled_quantity: 0.0,
            price,
            stop_price:      None,
            reduce_only:     params.reduce_only,
            status:          OrderStatus::Pending,
            created_at:      self.time_sync.timestamp_ms(),
        })
    }

    fn order_body(&self, side: OrderSide, ord_type: &str, amount: f64, params: &OrderParams) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("instId".into(), json!(self.inst_id));
        body.insert("tdMode".into(), json!(TD_MODE));
        body.insert("side".into(), json!(side.as_str()));
        body.insert("ordType".into(), json!(ord_type));
        body.insert("sz".into(), json!(fmt_decimal(self.to_contracts(amount))));
        if params.reduce_only {
            body.insert("reduceOnly".into(), json!(true));
        }
        body
    }

    fn order_from_row(&self, r: OrderRow) -> Order {
        Order {
            id:              r.ord_id,
            client_order_id: Some(r.cl_ord_id).filter(|s| !s.is_empty()),
            side:            parse_side(&r.side),
            order_type:      if r.ord_type == "market" { OrderType::Market } else { OrderType::Limit },
            quantity:        self.from_contracts(r.sz),
            filled_quantity: self.from_contracts(r.acc_fill_sz),
            price:           r.px.filter(|p| *p > 0.0),
            stop_price:      None,
            reduce_only:     r.reduce_only,
            status:          match r.state.as_str() {
                "partially_filled" => OrderStatus::PartiallyFilled,
                "filled" => OrderStatus::Filled,
                "canceled" | "mmp_canceled" => OrderStatus::Cancelled,
                _ => OrderStatus::Pending,
            },
            created_at:      r.c_time,
        }
    }

    fn order_from_algo(&self, r: AlgoRow) -> Order {
        Order {
            id:              format!("{ALGO_PREFIX}{}", r.algo_id),
            client_order_id: Some(r.algo_cl_ord_id).filter(|s| !s.is_empty()),
            side:            parse_side(&r.side),
            order_type:      OrderType::StopMarket,
            quantity:        self.from_contracts(r.sz),
            filled_quantity: 0.0,
            price:           None,
            stop_price:      r.sl_trigger_px.filter(|p| *p > 0.0),
            reduce_only:     r.reduce_only,
            status:          match r.state.as_str() {
                "effective" => OrderStatus::Filled,
                "partially_effective" => OrderStatus::PartiallyFilled,
                "canceled" => OrderStatus::Cancelled,
                "order_failed" => OrderStatus::Rejected,
                _ => OrderStatus::Pending,
            },
            created_at:      r.c_time,
        }
    }
}

#[async_trait]
impl ExchangeClient for OkxClient {
    fn name(&self) -> &'static str {
        "okx"
    }

    async fn fetch_ohlcv(&self, timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let bar = candle_bar(timeframe)
            .ok_or_else(|| ExchangeError::InvalidOrder(format!("unsupported timeframe {timeframe:?}")))?;
        let rows: Vec<Vec<Value>> = self
            .request(
                Method::GET,
                "/api/v5/market/candles",
                &[
                    ("instId", self.inst_id.clone()),
                    ("bar", bar.to_owned()),
                    ("limit", limit.min(MAX_CANDLES).to_string()),
                ],
                None,
                false,
            )
            .await?;
        rows.iter().map(|r| candle_from_row(r)).collect()
    }

    async fn fetch_ticker(&self) -> Result<Ticker, ExchangeError> {
        let rows: Vec<TickerRow> = self
            .request(Method::GET, "/api/v5/market/ticker", &[("instId", self.inst_id.clone())], None, false)
            .await?;
        let t = rows
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("no ticker for {}", self.inst_id)))?;
        Ok(Ticker { last_price: t.last, timestamp: t.ts })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let rows: Vec<PositionRow> = self
            .request(
                Method::GET,
                "/api/v5/account/positions",
                &[("instType", "SWAP".into()), ("instId", self.inst_id.clone())],
                None,
                true,
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|p| p.pos.abs() > 0.0)
            .map(|p| {
                // net mode: sign of pos is the direction; long/short mode: posSide
                let side = match p.pos_side.as_str() {
                    "long"  => Side::Long,
                    "short" => Side::Short,
                    _ if p.pos > 0.0 => Side::Long,
                    _ => Side::Short,
                };
                Position {
                    side,
                    quantity:       self.from_contracts(p.pos.abs()),
                    entry_price:    p.avg_px,
                    unrealized_pnl: p.upl,
                }
            })
            .collect())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        let regular: Vec<OrderRow> = self
            .request(
                Method::GET,
                "/api/v5/trade/orders-pending",
                &[("instType", "SWAP".into()), ("instId", self.inst_id.clone())],
                None,
                true,
            )
            .await?;
        let algos: Vec<AlgoRow> = self
            .request(
                Method::GET,
                "/api/v5/trade/orders-algo-pending",
                &[
                    ("ordType", "conditional".into()),
                    ("instType", "SWAP".into()),
                    ("instId", self.inst_id.clone()),
                ],
                None,
                true,
            )
            .await?;
        let mut orders: Vec<Order> = regular.into_iter().map(|r| self.order_from_row(r)).collect();
        orders.extend(algos.into_iter().map(|r| self.order_from_algo(r)));
        Ok(orders)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order, ExchangeError> {
        if let Some(algo_id) = order_id.strip_prefix(ALGO_PREFIX) {
            let rows: Vec<AlgoRow> = self
                .request(Method::GET, "/api/v5/trade/order-algo", &[("algoId", algo_id.to_owned())], None, true)
                .await?;
            return rows
                .into_iter()
                .next()
                .map(|r| self.order_from_algo(r))
                .ok_or_else(|| ExchangeError::NotFound(format!("okx algo order {algo_id}")));
        }
        let rows: Vec<OrderRow> = self
            .request(
                Method::GET,
                "/api/v5/trade/order",
                &[("instId", self.inst_id.clone()), ("ordId", order_id.to_owned())],
                None,
                true,
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|r| self.order_from_row(r))
            .ok_or_else(|| ExchangeError::NotFound(format!("okx order {order_id}")))
    }

    async fn create_limit_order(
        &self,
        side:   OrderSide,
        amount: f64,
        price:  f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        let mut body = self.order_body(side, "limit", amount, params);
        body.insert("px".into(), json!(fmt_decimal(price)));
        if let Some(id) = &params.client_order_id {
            body.insert("clOrdId".into(), json!(id));
        }
        self.place(Value::Object(body), side, OrderType::Limit, amount, Some(price), params).await
    }

    async fn create_market_order(
        &self,
        side:   OrderSide,
        amount: f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        let mut body = self.order_body(side, "market", amount, params);
        if let Some(id) = &params.client_order_id {
            body.insert("clOrdId".into(), json!(id));
        }
        self.place(Value::Object(body), side, OrderType::Market, amount, None, params).await
    }

    async fn create_stop_market_order(
        &self,
        side:       OrderSide,
        amount:     f64,
        stop_price: f64,
        params:     &OrderParams,
    ) -> Result<Order, ExchangeError> {
        let mut body = self.order_body(side, "conditional", amount, params);
        body.insert("slTriggerPx".into(), json!(fmt_decimal(stop_price)));
        body.insert("slTriggerPxType".into(), json!("mark"));
        // -1 = execute at market once triggered
        body.insert("slOrdPx".into(), json!("-1"));
        if let Some(id) = &params.client_order_id {
            body.insert("algoClOrdId".into(), json!(id));
        }
        let acks: Vec<Ack> = self
            .request(Method::POST, "/api/v5/trade/order-algo", &[], Some(&Value::Object(body)), true)
            .await?;
        let ack = acks
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode("empty algo ack".into()))?
            .check()?;
        info!(algo_id = %ack.algo_id, %side, stop_price, qty = amount, "okx stop accepted");
        Ok(Order {
            id:              format!("{ALGO_PREFIX}{}", ack.algo_id),
            client_order_id: params.client_order_id.clone(),
            side,
            order_type:      OrderType::StopMarket,
            quantity:        amount,
            filled_quantity: 0.0,
            price:           None,
            stop_price:      Some(stop_price),
            reduce_only:     params.reduce_only,
            status:          OrderStatus::Pending,
            created_at:      self.time_sync.timestamp_ms(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let acks: Vec<Ack> = if let Some(algo_id) = order_id.strip_prefix(ALGO_PREFIX) {
            let body = json!([{ "instId": self.inst_id, "algoId": algo_id }]);
            self.request(Method::POST, "/api/v5/trade/cancel-algos", &[], Some(&body), true).await?
        } else {
            let body = json!({ "instId": self.inst_id, "ordId": order_id });
            self.request(Method::POST, "/api/v5/trade/cancel-order", &[], Some(&body), true).await?
        };
        for ack in acks {
            ack.check()?;
        }
        info!(order_id, "okx order cancelled");
        Ok(())
    }

    async fn set_leverage(&self, leverage: u32) -> Result<(), ExchangeError> {
        let body = json!({ "instId": self.inst_id, "lever": leverage.to_string(), "mgnMode": TD_MODE });
        let _: Value = self
            .request(Method::POST, "/api/v5/account/set-leverage", &[], Some(&body), true)
            .await?;
        info!("Set leverage {}x for {}", leverage, self.inst_id);
        Ok(())
    }

    async fn set_position_mode(&self, hedge: bool) -> Result<(), ExchangeError> {
        let pos_mode = if hedge { "long_short_mode" } else { "net_mode" };
        let body = json!({ "posMode": pos_mode });
        let _: Value = self
            .request(Method::POST, "/api/v5/account/set-position-mode", &[], Some(&body), true)
            .await?;
        info!("Position mode set to {pos_mode}");
        Ok(())
    }
}

fn parse_side(s: &str) -> OrderSide {
    if s.eq_ignore_ascii_case("buy") { OrderSide::Buy } else { OrderSide::Sell }
}

/// "1h" → "1H".  Daily and weekly bars use the UTC-anchored variants.
fn candle_bar(timeframe: &str) -> Option<&'static str> {
    Some(match timeframe {
        "1m"  => "1m",
        "3m"  => "3m",
        "5m"  => "5m",
        "15m" => "15m",
        "30m" => "30m",
        "1h"  => "1H",
        "2h"  => "2H",
        "4h"  => "4H",
        "6h"  => "6Hutc",
        "12h" => "12Hutc",
        "1d"  => "1Dutc",
        "1w"  => "1Wutc",
        _     => return None,
    })
}

fn map_error_code(code: i64, msg: String) -> ExchangeError {
    let text = format!("{code}: {msg}");
    match code {
        50001                      => ExchangeError::Maintenance(text),
        50011 | 50061              => ExchangeError::RateLimited(text),
        50004                      => ExchangeError::Timeout(text),
        50013 | 50026 | 50102      => ExchangeError::TransientNetwork(text),
        50100..=50199              => ExchangeError::Auth(text),
        51400 | 51401 | 51402 | 51603 => ExchangeError::NotFound(text),
        51000..=51999              => ExchangeError::InvalidOrder(text),
        _                          => ExchangeError::Venue { code, msg },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeKind, MarketSymbol};
    use std::time::Duration;

    fn client() -> OkxClient {
        OkxClient::new(&ExchangeSettings {
            kind:            ExchangeKind::Okx,
            api_key:         "k".into(),
            api_secret:      "s".into(),
            api_passphrase:  "p".into(),
            okx_demo:        true,
            testnet:         false,
            symbol:          MarketSymbol { base: "BTC".into(), quote: "USDT".into() },
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn contract_conversion() {
        let c = client();
        assert_eq!(c.inst_id, "BTC-USDT-SWAP");
        assert!((c.to_contracts(0.03) - 3.0).abs() < 1e-9);
        // below one lot rounds down to zero
        assert_eq!(c.to_contracts(0.00005), 0.0);
        assert!((c.from_contracts(3.0) - 0.03).abs() < 1e-12);
    }

    #[test]
    fn algo_rows_carry_prefix() {
        let row: AlgoRow = serde_json::from_value(json!({
            "algoId": "681096944655273984",
            "algoClOrdId": "sl1a2b",
            "side": "sell",
            "sz": "3",
            "slTriggerPx": "64400",
            "reduceOnly": "true",
            "state": "live",
            "cTime": "1700000000000"
        }))
        .unwrap();
        let order = client().order_from_algo(row);
        assert_eq!(order.id, "algo:681096944655273984");
        assert_eq!(order.order_type, OrderType::StopMarket);
        assert!((order.quantity - 0.03).abs() < 1e-12);
        assert!(order.reduce_only);
    }

    #[test]
    fn error_codes() {
        assert!(matches!(map_error_code(50001, "unavailable".into()), ExchangeError::Maintenance(_)));
        assert!(matches!(map_error_code(51008, "insufficient margin".into()), ExchangeError::InvalidOrder(_)));
        assert!(matches!(map_error_code(51603, "order does not exist".into()), ExchangeError::NotFound(_)));
        assert!(matches!(map_error_code(50113, "invalid sign".into()), ExchangeError::Auth(_)));
    }
}
