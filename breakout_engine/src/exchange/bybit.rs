/// exchange/bybit.rs — Bybit v5 linear perpetual REST client
///
/// Private requests carry X-BAPI-* headers.  The signature is
///   hex(HMAC-SHA256(secret, timestamp + api_key + recv_window + payload))
/// where payload is the query string for GET and the JSON body for POST.
/// Every reply is wrapped in `{retCode, retMsg, result}`.
use async_trait::async_trait;
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

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW_MS: u64 = 5_000;
const CATEGORY: &str = "linear";
const MAX_KLINES: usize = 1_000;
/// "leverage not modified"
const LEVERAGE_UNCHANGED: i64 = 110_043;
/// "Position mode is not modified"
const POSITION_MODE_UNCHANGED: i64 = 110_025;

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg:  String,
    #[serde(default)]
    result:   Value,
}

#[derive(Deserialize, Debug)]
struct List<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    time_nano: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TickerRow {
    #[serde(deserialize_with = "de_f64")]
    last_price: f64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    #[serde(default)]
    side:           String,
    #[serde(deserialize_with = "de_f64")]
    size:           f64,
    #[serde(default, deserialize_with = "de_f64")]
    avg_price:      f64,
    #[serde(default, deserialize_with = "de_f64")]
    unrealised_pnl: f64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OrderRow {
    order_id:      String,
    #[serde(default)]
    order_link_id: String,
    side:          String,
    order_type:    String,
    #[serde(deserialize_with = "de_f64")]
    qty:           f64,
    #[serde(default, deserialize_with = "de_f64")]
    cum_exec_qty:  f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    price:         Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    trigger_price: Option<f64>,
    #[serde(default, deserialize_with = "de_bool")]
    reduce_only:   bool,
    order_status:  String,
    #[serde(default, deserialize_with = "de_i64")]
    created_time:  i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreatedOrder {
    order_id:      String,
    #[serde(default)]
    order_link_id: String,
}

// ── Client ────────────────────────────────────────────────────────────────

pub struct BybitClient {
    client:     Client,
    api_key:    String,
    api_secret: String,
    base_url:   String,
    symbol:     String,
    time_sync:  TimeSync,
}

impl BybitClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let base_url = if settings.testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(Self {
            client:     http_client(settings.request_timeout)?,
            api_key:    settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            base_url:   base_url.to_owned(),
            symbol:     format!("{}{}", settings.symbol.base, settings.symbol.quote),
            time_sync:  TimeSync::new(),
        })
    }

    pub async fn connect(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let client = Self::new(settings)?;
        if let Err(e) = client.sync_time().await {
            warn!("Bybit time sync failed, using local clock: {e}");
        }
        Ok(client)
    }

    pub async fn sync_time(&self) -> Result<i64, ExchangeError> {
        let before = TimeSync::local_ms();
        let st: ServerTime = self.public_get("/v5/market/time", &[]).await?;
        let after = TimeSync::local_ms();
        let server_ms = st
            .time_nano
            .parse::<i128>()
            .map(|ns| (ns / 1_000_000) as i64)
            .map_err(|e| ExchangeError::Decode(format!("server time {:?}: {e}", st.time_nano)))?;
        Ok(self.time_sync.record(server_ms, before, after))
    }

    fn sign(&self, timestamp: i64, payload: &str) -> Result<String, ExchangeError> {
        let pre = format!("{timestamp}{}{RECV_WINDOW_MS}{payload}", self.api_key);
        Ok(hex::encode(hmac_sha256(&self.api_secret, &pre)?))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path:  &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).query(query).send().await?;
        Self::read(resp, &[]).await
    }

    async fn private_get<T: DeserializeOwned>(
        &self,
        path:  &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let qs = query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        let ts = self.time_sync.timestamp_ms();
        let sign = self.sign(ts, &qs)?;
        let url = format!("{}{}?{}", self.base_url, path, qs);
        debug!(path, "bybit GET");
        let resp = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string())
            .header("X-BAPI-SIGN", sign)
            .send()
            .await?;
        Self::read(resp, &[]).await
    }

    /// POST with a JSON body.  `accept` lists ret codes treated as success.
    async fn private_post<T: DeserializeOwned>(
        &self,
        path:   &str,
        body:   &Value,
        accept: &[i64],
    ) -> Result<T, ExchangeError> {
        let body = serde_json::to_string(body)?;
        let ts = self.time_sync.timestamp_ms();
        let sign = self.sign(ts, &body)?;
        debug!(path, "bybit POST");
        let resp = self
            .client
            .request(Method::POST, format!("{}{}", self.base_url, path))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS.to_string())
            .header("X-BAPI-SIGN", sign)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        Self::read(resp, accept).await
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response, accept: &[i64]) -> Result<T, ExchangeError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let env: Envelope = serde_json::from_str(&body)?;
        if env.ret_code != 0 && !accept.contains(&env.ret_code) {
            return Err(map_error_code(env.ret_code, env.ret_msg));
        }
        let result = if env.result.is_null() { json!({}) } else { env.result };
        Ok(serde_json::from_value(result)?)
    }

    async fn query_orders(&self, path: &str, order_id: Option<&str>) -> Result<Vec<Order>, ExchangeError> {
        let mut query = vec![("category", CATEGORY.to_owned()), ("symbol", self.symbol.clone())];
        if let Some(id) = order_id {
            query.push(("orderId", id.to_owned()));
        }
        let rows: List<OrderRow> = self.private_get(path, &query).await?;
        Ok(rows.list.into_iter().map(OrderRow::into_order).collect())
    }

    async fn place(
        &self,
        mut body:   serde_json::Map<String, Value>,
        side:       OrderSide,
        order_type: OrderType,
        amount:     f64,
        price:      Option<f64>,
        stop_price: Option<f64>,
        params:     &OrderParams,
    ) -> Result<Order, ExchangeError> {
        body.insert("category".into(), json!(CATEGORY));
        body.insert("symbol".into(), json!(self.symbol));
        body.insert("side".into(), json!(side_str(side)));
        body.insert("qty".into(), json!(fmt_decimal(amount)));
        if let Some(id) = &params.client_order_id {
            body.insert("orderLinkId".into(), json!(id));
        }
        if params.reduce_only {
            body.insert("reduceOnly".into(), json!(true));
        }
        let created: CreatedOrder = self.private_post("/v5/order/create", &Value::Object(body), &[]).await?;
        info!(id = %created.order_id, %side, kind = ?order_type, qty = amount, "bybit order accepted");

        // create only echoes ids; mirror the request
        Ok(Order {
            id:              created.order_id,
            client_order_id: Some(created.order_link_id).filter(|s| !s.is_empty()),
            side,
            order_type,
            quantity:        amount,
            filled_quantity: 0.0,
            price,
            stop_price,
            reduce_only:     params.reduce_only,
            status:          OrderStatus::Pending,
            created_at:      self.time_sync.timestamp_ms(),
        })
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn name(&self) -> &'static str {
        "bybit"
    }

    async fn fetch_ohlcv(&self, timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let interval = kline_interval(timeframe)
            .ok_or_else(|| ExchangeError::InvalidOrder(format!("unsupported timeframe {timeframe:?}")))?;
        let rows: List<Vec<Value>> = self
            .public_get(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY.to_owned()),
                    ("symbol", self.symbol.clone()),
                    ("interval", interval.to_owned()),
                    ("limit", limit.min(MAX_KLINES).to_string()),
                ],
            )
            .await?;
        // newest first on the wire
        rows.list.iter().map(|r| candle_from_row(r)).collect()
    }

    async fn fetch_ticker(&self) -> Result<Ticker, ExchangeError> {
        let rows: List<TickerRow> = self
            .public_get(
                "/v5/market/tickers",
                &[("category", CATEGORY.to_owned()), ("symbol", self.symbol.clone())],
            )
            .await?;
        let row = rows
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("no ticker for {}", self.symbol)))?;
        Ok(Ticker { last_price: row.last_price, timestamp: self.time_sync.timestamp_ms() })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let rows: List<PositionRow> = self
            .private_get(
                "/v5/position/list",
                &[("category", CATEGORY.to_owned()), ("symbol", self.symbol.clone())],
            )
            .await?;
        Ok(rows
            .list
            .into_iter()
            .filter(|p| p.size > 0.0 && !p.side.is_empty())
            .map(|p| Position {
                side:           if p.side.eq_ignore_ascii_case("Buy") { Side::Long } else { Side::Short },
                quantity:       p.size,
                entry_price:    p.avg_price,
                unrealized_pnl: p.unrealised_pnl,
            })
            .collect())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        // realtime with default openOnly lists active and untriggered conditional orders
        let orders = self.query_orders("/v5/order/realtime", None).await?;
        Ok(orders.into_iter().filter(|o| o.status.is_open()).collect())
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order, ExchangeError> {
        if let Some(o) = self.query_orders("/v5/order/realtime", Some(order_id)).await?.into_iter().next() {
            return Ok(o);
        }
        self.query_orders("/v5/order/history", Some(order_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::NotFound(format!("bybit order {order_id}")))
    }

    async fn create_limit_order(
        &self,
        side:   OrderSide,
        amount: f64,
        price:  f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        let mut body = serde_json::Map::new();
        body.insert("orderType".into(), json!("Limit"));
        body.insert("price".into(), json!(fmt_decimal(price)));
        body.insert("timeInForce".into(), json!("GTC"));
        self.place(body, side, OrderType::Limit, amount, Some(price), None, params).await
    }

    async fn create_market_order(
        &self,
        side:   OrderSide,
        amount: f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        let mut body = serde_json::Map::new();
        body.insert("orderType".into(), json!("Market"));
        self.place(body, side, OrderType::Market, amount, None, None, params).await
    }

    async fn create_stop_market_order(
        &self,
        side:       OrderSide,
        amount:     f64,
        stop_price: f64,
        params:     &OrderParams,
    ) -> Result<Order, ExchangeError> {
        // sell stops trigger on a fall (2), buy stops on a rise (1)
        let direction = match side {
            OrderSide::Buy  => 1,
            OrderSide::Sell => 2,
        };
        let mut body = serde_json::Map::new();
        body.insert("orderType".into(), json!("Market"));
        body.insert("triggerPrice".into(), json!(fmt_decimal(stop_price)));
        body.insert("triggerDirection".into(), json!(direction));
        body.insert("triggerBy".into(), json!("MarkPrice"));
        self.place(body, side, OrderType::StopMarket, amount, None, Some(stop_price), params).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let body = json!({ "category": CATEGORY, "symbol": self.symbol, "orderId": order_id });
        let _: Value = self.private_post("/v5/order/cancel", &body, &[]).await?;
        info!(order_id, "bybit order cancelled");
        Ok(())
    }

    async fn set_leverage(&self, leverage: u32) -> Result<(), ExchangeError> {
        let lev = leverage.to_string();
        let body = json!({
            "category": CATEGORY,
            "symbol": self.symbol,
            "buyLeverage": lev,
            "sellLeverage": lev,
        });
        let _: Value = self
            .private_post("/v5/position/set-leverage", &body, &[LEVERAGE_UNCHANGED])
            .await?;
        info!("Set leverage {}x for {}", leverage, self.symbol);
        Ok(())
    }

    /// mode 0 = merged single (one-way), 3 = both sides.
    async fn set_position_mode(&self, hedge: bool) -> Result<(), ExchangeError> {
        let body = json!({
            "category": CATEGORY,
            "symbol": self.symbol,
            "mode": if hedge { 3 } else { 0 },
        });
        let _: Value = self
            .private_post("/v5/position/switch-mode", &body, &[POSITION_MODE_UNCHANGED])
            .await?;
        info!("Position mode set to {} for {}", if hedge { "hedge" } else { "one-way" }, self.symbol);
        Ok(())
    }
}

impl OrderRow {
    fn into_order(self) -> Order {
        let is_stop = self.trigger_price.is_some_and(|p| p > 0.0);
        Order {
            id:              self.order_id,
            client_order_id: Some(self.order_link_id).filter(|s| !s.is_empty()),
            side:            if self.side.eq_ignore_ascii_case("Buy") { OrderSide::Buy } else { OrderSide::Sell },
            order_type:      match (self.order_type.as_str(), is_stop) {
                ("Market", true) => OrderType::StopMarket,
                ("Market", false) => OrderType::Market,
                _ => OrderType::Limit,
            },
            quantity:        self.qty,
            filled_quantity: self.cum_exec_qty,
            price:           self.price.filter(|p| *p > 0.0),
            stop_price:      self.trigger_price.filter(|p| *p > 0.0),
            reduce_only:     self.reduce_only,
            status:          match self.order_status.as_str() {
                "PartiallyFilled" => OrderStatus::PartiallyFilled,
                "Filled" => OrderStatus::Filled,
                "Cancelled" | "Deactivated" | "PartiallyFilledCanceled" => OrderStatus::Cancelled,
                "Rejected" => OrderStatus::Rejected,
                _ => OrderStatus::Pending,
            },
            created_at:      self.created_time,
        }
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy  => "Buy",
        OrderSide::Sell => "Sell",
    }
}

/// "1h" → "60", "1d" → "D".
fn kline_interval(timeframe: &str) -> Option<&'static str> {
    Some(match timeframe {
        "1m"  => "1",
        "3m"  => "3",
        "5m"  => "5",
        "15m" => "15",
        "30m" => "30",
        "1h"  => "60",
        "2h"  => "120",
        "4h"  => "240",
        "6h"  => "360",
        "12h" => "720",
        "1d"  => "D",
        "1w"  => "W",
        _     => return None,
    })
}

fn map_error_code(code: i64, msg: String) -> ExchangeError {
    if msg.to_lowercase().contains("maintenance") {
        return ExchangeError::Maintenance(format!("{code}: {msg}"));
    }
    let text = format!("{code}: {msg}");
    match code {
        10006 | 10018                     => ExchangeError::RateLimited(text),
        10000                             => ExchangeError::Timeout(text),
        10002 | 10016                     => ExchangeError::TransientNetwork(text),
        10003 | 10004 | 10005 | 10007 | 33004 => ExchangeError::Auth(text),
        110001                            => ExchangeError::NotFound(text),
        10001 | 110003 | 110004 | 110007 | 110012 | 110017 | 110094 => ExchangeError::InvalidOrder(text),
        _                                 => ExchangeError::Venue { code, msg },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_order_row_is_stop_market() {
        let row = r#"{
            "orderId": "1321003749386327552",
            "orderLinkId": "sl5d1e7a",
            "side": "Sell",
            "orderType": "Market",
            "qty": "0.030",
            "cumExecQty": "0",
            "price": "0",
            "triggerPrice": "64400",
            "reduceOnly": true,
            "orderStatus": "Untriggered",
            "createdTime": "1700000000000"
        }"#;
        let order = serde_json::from_str::<OrderRow>(row).unwrap().into_order();
        assert_eq!(order.order_type, OrderType::StopMarket);
        assert_eq!(order.stop_price, Some(64_400.0));
        assert_eq!(order.price, None);
        assert!(order.reduce_only);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.created_at, 1_700_000_000_000);
    }

    #[test]
    fn intervals() {
        assert_eq!(kline_interval("1h"), Some("60"));
        assert_eq!(kline_interval("1d"), Some("D"));
        assert_eq!(kline_interval("7m"), None);
    }

    #[test]
    fn error_codes() {
        assert!(matches!(map_error_code(10006, "too many visits".into()), ExchangeError::RateLimited(_)));
        assert!(matches!(map_error_code(110007, "insufficient balance".into()), ExchangeError::InvalidOrder(_)));
        assert!(matches!(map_error_code(10016, "system under maintenance".into()), ExchangeError::Maintenance(_)));
        assert!(matches!(map_error_code(110001, "order not exists".into()), ExchangeError::NotFound(_)));
    }
}
