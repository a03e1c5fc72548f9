/// exchange/binance.rs — Binance USDⓈ-M Futures REST client
///
/// SIGNED REQUEST FLOW:
///   1. Build query string with required params
///   2. Append recvWindow + server-synced timestamp
///   3. Sign query string with HMAC-SHA256 using API secret (hex)
///   4. Send with X-MBX-APIKEY header
///
/// One-way position mode is assumed (positionSide = BOTH).
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    candle_from_row, de_f64, de_opt_f64, fmt_decimal, hmac_sha256, http_client, status_error,
    ExchangeClient, OrderParams,
};
use crate::config::ExchangeSettings;
use crate::error::ExchangeError;
use crate::models::{Candle, Order, OrderSide, OrderStatus, OrderType, Position, Side, Ticker};
use crate::time_sync::TimeSync;

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";
const RECV_WINDOW_MS: u64 = 5_000;
/// Largest page /fapi/v1/klines serves
const MAX_KLINES: usize = 1_500;
/// "No need to change position side."
const POSITION_MODE_UNCHANGED: i64 = -4_059;

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct ServerTime {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Deserialize, Debug)]
struct TickerPrice {
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    #[serde(default)]
    time:  i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id:        i64,
    #[serde(default)]
    client_order_id: String,
    side:            String,
    #[serde(rename = "type")]
    order_type:      String,
    #[serde(deserialize_with = "de_f64")]
    orig_qty:        f64,
    #[serde(default, deserialize_with = "de_f64")]
    executed_qty:    f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    price:           Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    stop_price:      Option<f64>,
    #[serde(default)]
    reduce_only:     bool,
    status:          String,
    #[serde(default)]
    time:            i64,
    #[serde(default)]
    update_time:     i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    #[serde(deserialize_with = "de_f64")]
    position_amt:       f64,
    #[serde(deserialize_with = "de_f64")]
    entry_price:        f64,
    #[serde(default, deserialize_with = "de_f64")]
    un_realized_profit: f64,
}

#[derive(Deserialize, Debug)]
struct BinanceError {
    code: i64,
    msg:  String,
}

// ── Client ────────────────────────────────────────────────────────────────

pub struct BinanceClient {
    client:     Client,
    api_key:    String,
    api_secret: String,
    base_url:   String,
    symbol:     String,
    time_sync:  TimeSync,
}

impl BinanceClient {
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

    /// Build and sync the server clock.  A failed sync is not fatal.
    pub async fn connect(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let client = Self::new(settings)?;
        if let Err(e) = client.sync_time().await {
            warn!("Binance time sync failed, using local clock: {e}");
        }
        Ok(client)
    }

    pub async fn sync_time(&self) -> Result<i64, ExchangeError> {
        let before = TimeSync::local_ms();
        let st: ServerTime = self.public_get("/fapi/v1/time", &[]).await?;
        let after = TimeSync::local_ms();
        Ok(self.time_sync.record(st.server_time, before, after))
    }

    /// Sign a query string with HMAC-SHA256.
    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        Ok(hex::encode(hmac_sha256(&self.api_secret, query)?))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path:  &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).query(query).send().await?;
        Self::read(resp).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path:   &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        query.push(format!("recvWindow={RECV_WINDOW_MS}"));
        query.push(format!("timestamp={}", self.time_sync.timestamp_ms()));
        let query = query.join("&");
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        debug!(%method, path, "binance signed request");
        let resp = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn read<T: DeserializeOwned>(resp: Response) -> Result<T, ExchangeError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            if matches!(status.as_u16(), 418 | 429) {
                return Err(ExchangeError::RateLimited(body));
            }
            return Err(match serde_json::from_str::<BinanceError>(&body) {
                Ok(e)  => map_error_code(e.code, e.msg),
                Err(_) => status_error(status, &body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn place(&self, mut params: Vec<(&'static str, String)>, order: &OrderParams) -> Result<Order, ExchangeError> {
        params.push(("symbol", self.symbol.clone()));
        params.push(("newOrderRespType", "RESULT".into()));
        if let Some(id) = &order.client_order_id {
            params.push(("newClientOrderId", id.clone()));
        }
        if order.reduce_only {
            params.push(("reduceOnly", "true".into()));
        }
        let resp: OrderResponse = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        let order = resp.into_order();
        info!(
            id = %order.id, side = %order.side, kind = ?order.order_type,
            qty = order.quantity, status = ?order.status, "binance order accepted"
        );
        Ok(order)
    }

    /// Page forward through history from `start_ms` until `total` bars are
    /// collected or the venue runs out.  Public endpoint, used by the backtester.
    pub async fn fetch_klines_range(
        &self,
        interval: &str,
        start_ms: i64,
        total:    usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut out: Vec<Candle> = Vec::with_capacity(total);
        let mut cursor = start_ms;
        while out.len() < total {
            let page = (total - out.len()).min(MAX_KLINES);
            let rows: Vec<Vec<serde_json::Value>> = self
                .public_get(
                    "/fapi/v1/klines",
                    &[
                        ("symbol", self.symbol.clone()),
                        ("interval", interval.to_owned()),
                        ("startTime", cursor.to_string()),
                        ("limit", page.to_string()),
                    ],
                )
                .await?;
            if rows.is_empty() {
                break;
            }
            let candles = rows.iter().map(|r| candle_from_row(r)).collect::<Result<Vec<_>, _>>()?;
            let last_open = candles.last().map(|c| c.open_time).unwrap_or(cursor);
            out.extend(candles);
            if rows.len() < page {
                break;
            }
            cursor = last_open + 1;
        }
        Ok(out)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &'static str {
        "binanceusdm"
    }

    async fn fetch_ohlcv(&self, timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/fapi/v1/klines",
                &[
                    ("symbol", self.symbol.clone()),
                    ("interval", timeframe.to_owned()),
                    ("limit", limit.min(MAX_KLINES).to_string()),
                ],
            )
            .await?;
        rows.iter().map(|r| candle_from_row(r)).collect()
    }

    async fn fetch_ticker(&self) -> Result<Ticker, ExchangeError> {
        let t: TickerPrice = self
            .public_get("/fapi/v1/ticker/price", &[("symbol", self.symbol.clone())])
            .await?;
        let timestamp = if t.time > 0 { t.time } else { self.time_sync.timestamp_ms() };
        Ok(Ticker { last_price: t.price, timestamp })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let rows: Vec<PositionRisk> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &[("symbol", self.symbol.clone())])
            .await?;
        Ok(rows
            .into_iter()
            .filter(|p| p.position_amt.abs() > 0.0)
            .map(|p| Position {
                side:           if p.position_amt > 0.0 { Side::Long } else { Side::Short },
                quantity:       p.position_amt.abs(),
                entry_price:    p.entry_price,
                unrealized_pnl: p.un_realized_profit,
            })
            .collect())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        let rows: Vec<OrderResponse> = self
            .signed(Method::GET, "/fapi/v1/openOrders", &[("symbol", self.symbol.clone())])
            .await?;
        Ok(rows.into_iter().map(OrderResponse::into_order).collect())
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order, ExchangeError> {
        let resp: OrderResponse = self
            .signed(
                Method::GET,
                "/fapi/v1/order",
                &[("symbol", self.symbol.clone()), ("orderId", order_id.to_owned())],
            )
            .await?;
        Ok(resp.into_order())
    }

    async fn create_limit_order(
        &self,
        side:   OrderSide,
        amount: f64,
        price:  f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        self.place(
            vec![
                ("side", side_str(side).into()),
                ("type", "LIMIT".into()),
                ("timeInForce", "GTC".into()),
                ("quantity", fmt_decimal(amount)),
                ("price", fmt_decimal(price)),
            ],
            params,
        )
        .await
    }

    async fn create_market_order(
        &self,
        side:   OrderSide,
        amount: f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        self.place(
            vec![
                ("side", side_str(side).into()),
                ("type", "MARKET".into()),
                ("quantity", fmt_decimal(amount)),
            ],
            params,
        )
        .await
    }

    async fn create_stop_market_order(
        &self,
        side:       OrderSide,
        amount:     f64,
        stop_price: f64,
        params:     &OrderParams,
    ) -> Result<Order, ExchangeError> {
        self.place(
            vec![
                ("side", side_str(side).into()),
                ("type", "STOP_MARKET".into()),
                ("quantity", fmt_decimal(amount)),
                ("stopPrice", fmt_decimal(stop_price)),
                ("workingType", "MARK_PRICE".into()),
            ],
            params,
        )
        .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let _: OrderResponse = self
            .signed(
                Method::DELETE,
                "/fapi/v1/order",
                &[("symbol", self.symbol.clone()), ("orderId", order_id.to_owned())],
            )
            .await?;
        info!(order_id, "binance order cancelled");
        Ok(())
    }

    /// Set leverage for the symbol (required before first trade).
    async fn set_leverage(&self, leverage: u32) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[("symbol", self.symbol.clone()), ("leverage", leverage.to_string())],
            )
            .await?;
        info!("Set leverage {}x for {}", leverage, self.symbol);
        Ok(())
    }

    async fn set_position_mode(&self, hedge: bool) -> Result<(), ExchangeError> {
        let res: Result<serde_json::Value, _> = self
            .signed(Method::POST, "/fapi/v1/positionSide/dual", &[("dualSidePosition", hedge.to_string())])
            .await;
        match res {
            Ok(_) => info!("Position mode set to {}", if hedge { "hedge" } else { "one-way" }),
            Err(ExchangeError::Venue { code: POSITION_MODE_UNCHANGED, .. }) => {
                debug!("position mode already {}", if hedge { "hedge" } else { "one-way" });
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl OrderResponse {
    fn into_order(self) -> Order {
        let created_at = if self.time > 0 { self.time } else { self.update_time };
        Order {
            id:              self.order_id.to_string(),
            client_order_id: Some(self.client_order_id).filter(|s| !s.is_empty()),
            side:            if self.side.eq_ignore_ascii_case("BUY") { OrderSide::Buy } else { OrderSide::Sell },
            order_type:      match self.order_type.as_str() {
                "MARKET" => OrderType::Market,
                "STOP_MARKET" | "TAKE_PROFIT_MARKET" => OrderType::StopMarket,
                _ => OrderType::Limit,
            },
            quantity:        self.orig_qty,
            filled_quantity: self.executed_qty,
            price:           self.price.filter(|p| *p > 0.0),
            stop_price:      self.stop_price.filter(|p| *p > 0.0),
            reduce_only:     self.reduce_only,
            status:          match self.status.as_str() {
                "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
                "FILLED" => OrderStatus::Filled,
                "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Cancelled,
                "REJECTED" => OrderStatus::Rejected,
                _ => OrderStatus::Pending,
            },
            created_at,
        }
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy  => "BUY",
        OrderSide::Sell => "SELL",
    }
}

/// Binance error codes → taxonomy.
fn map_error_code(code: i64, msg: String) -> ExchangeError {
    let text = format!("{code}: {msg}");
    match code {
        -1003 | -1015                 => ExchangeError::RateLimited(text),
        // backend did not answer, execution status unknown
        -1001 | -1006 | -1007         => ExchangeError::Timeout(text),
        -1000 | -1008 | -1016 | -1021 => ExchangeError::TransientNetwork(text),
        -1002 | -1022 | -2014 | -2015 => ExchangeError::Auth(text),
        -2011 | -2013                 => ExchangeError::NotFound(text),
        -1013 | -1111 | -1116 | -1117 | -2010 | -2019 | -2021 | -2022 | -4003 | -4131 | -4164 => {
            ExchangeError::InvalidOrder(text)
        }
        _ => ExchangeError::Venue { code, msg },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_response_maps_to_model() {
        let body = r#"{
            "orderId": 8389765,
            "clientOrderId": "en0f3c2a9b",
            "side": "BUY",
            "type": "LIMIT",
            "origQty": "0.030",
            "executedQty": "0.010",
            "price": "65040.0",
            "stopPrice": "0",
            "reduceOnly": false,
            "status": "PARTIALLY_FILLED",
            "updateTime": 1700000000123
        }"#;
        let order = serde_json::from_str::<OrderResponse>(body).unwrap().into_order();
        assert_eq!(order.id, "8389765");
        assert_eq!(order.client_order_id.as_deref(), Some("en0f3c2a9b"));
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.price, Some(65_040.0));
        assert_eq!(order.stop_price, None);
        assert_eq!(order.created_at, 1_700_000_000_123);
    }

    #[test]
    fn error_codes() {
        assert!(matches!(map_error_code(-1003, "too many".into()), ExchangeError::RateLimited(_)));
        assert!(matches!(map_error_code(-1007, "timeout".into()), ExchangeError::Timeout(_)));
        assert!(matches!(map_error_code(-2019, "margin".into()), ExchangeError::InvalidOrder(_)));
        assert!(matches!(map_error_code(-2011, "unknown".into()), ExchangeError::NotFound(_)));
        assert!(matches!(map_error_code(-9999, "?".into()), ExchangeError::Venue { code: -9999, .. }));
    }
}
