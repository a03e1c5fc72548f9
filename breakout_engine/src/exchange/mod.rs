/// exchange — Unified futures exchange client
///
/// `ExchangeClient` is the only way the bot talks to a venue.  The three
/// implementations speak signed REST (Binance USDⓈ-M, Bybit v5 linear,
/// OKX v5 swap) and translate venue replies into the shared models and the
/// `ExchangeError` taxonomy.  Market data and execution share one handle.
pub mod binance;
pub mod bybit;
pub mod okx;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use sha2::Sha256;
use tracing::{info, warn};

use crate::config::{ExchangeKind, ExchangeSettings};
use crate::error::ExchangeError;
use crate::models::{Candle, Order, OrderSide, Position, Ticker};

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use okx::OkxClient;

/// Optional order flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderParams {
    /// Caller-chosen id, stable across retries of the same submission
    pub client_order_id: Option<String>,
    pub reduce_only:     bool,
}

impl OrderParams {
    pub fn entry(client_order_id: impl Into<String>) -> Self {
        Self { client_order_id: Some(client_order_id.into()), reduce_only: false }
    }

    pub fn reduce_only(client_order_id: impl Into<String>) -> Self {
        Self { client_order_id: Some(client_order_id.into()), reduce_only: true }
    }
}

/// Semantic contract the pipeline needs from a venue.  Every call may fail
/// with a transient or a permanent `ExchangeError`; retries are the caller's
/// business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Most recent `limit` bars, in whatever order the venue returns them.
    async fn fetch_ohlcv(&self, timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError>;

    async fn fetch_ticker(&self) -> Result<Ticker, ExchangeError>;

    /// Non-empty positions on the configured symbol.
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    /// Resting orders on the configured symbol, conditional orders included.
    async fn fetch_open_orders(&self) -> Result<Vec<Order>, ExchangeError>;

    async fn fetch_order(&self, order_id: &str) -> Result<Order, ExchangeError>;

    async fn create_limit_order(
        &self,
        side:   OrderSide,
        amount: f64,
        price:  f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError>;

    async fn create_market_order(
        &self,
        side:   OrderSide,
        amount: f64,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError>;

    /// Stop-market triggered at `stop_price`; used for the protective stop.
    async fn create_stop_market_order(
        &self,
        side:       OrderSide,
        amount:     f64,
        stop_price: f64,
        params:     &OrderParams,
    ) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;

    async fn set_leverage(&self, leverage: u32) -> Result<(), ExchangeError>;

    /// One-way (`hedge == false`) or hedge position mode for the account.
    /// The bot trades one-way: a single net position per symbol.
    async fn set_position_mode(&self, hedge: bool) -> Result<(), ExchangeError>;
}

/// Build the client selected in the configuration.
pub async fn connect(settings: &ExchangeSettings) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
    let client: Arc<dyn ExchangeClient> = match settings.kind {
        ExchangeKind::Binance => Arc::new(BinanceClient::connect(settings).await?),
        ExchangeKind::Bybit   => Arc::new(BybitClient::connect(settings).await?),
        ExchangeKind::Okx     => Arc::new(OkxClient::connect(settings).await?),
    };
    info!(exchange = client.name(), symbol = %settings.symbol, "exchange client ready");
    Ok(client)
}

/// Live-account setup before the first cycle: one-way position mode, then
/// leverage.  Failures are logged; the account may already be configured.
pub async fn prepare_account(exchange: &dyn ExchangeClient, leverage: u32) {
    if let Err(e) = exchange.set_position_mode(false).await {
        warn!("set_position_mode(one-way) failed: {e}");
    }
    if let Err(e) = exchange.set_leverage(leverage).await {
        warn!("set_leverage({leverage}) failed: {e}");
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────

pub(crate) fn http_client(timeout: Duration) -> Result<Client, ExchangeError> {
    Client::builder()
        .user_agent("breakout_engine/0.1")
        .timeout(timeout)
        .build()
        .map_err(|e| ExchangeError::TransientNetwork(format!("HTTP client build failed: {e}")))
}

pub(crate) fn hmac_sha256(secret: &str, payload: &str) -> Result<Vec<u8>, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Auth(format!("bad API secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Plain decimal without exponent or trailing zeros: 0.030 → "0.03".
pub(crate) fn fmt_decimal(v: f64) -> String {
    let s = format!("{v:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" { "0".into() } else { s.to_owned() }
}

/// Classification of a bare HTTP status when the body carries no venue code.
pub(crate) fn status_error(status: StatusCode, body: &str) -> ExchangeError {
    let msg = format!("HTTP {status}: {}", truncate(body, 200));
    match status.as_u16() {
        418 | 429       => ExchangeError::RateLimited(msg),
        401 | 403       => ExchangeError::Auth(msg),
        404             => ExchangeError::NotFound(msg),
        // gateway answered but the matching engine state is unknown
        503 | 504       => ExchangeError::Timeout(msg),
        500..=599       => ExchangeError::TransientNetwork(msg),
        _               => ExchangeError::Venue { code: status.as_u16() as i64, msg },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None         => s,
    }
}

/// Venue numbers arrive as JSON strings ("65040.1"), numbers, or "" for unset.
pub(crate) fn de_f64<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_opt_f64(d)?.unwrap_or(0.0))
}

pub(crate) fn de_opt_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        F(f64),
        S(String),
        B(bool),
    }
    match Option::<Num>::deserialize(d)? {
        None | Some(Num::B(_)) => Ok(None),
        Some(Num::F(v)) => Ok(Some(v)),
        Some(Num::S(s)) if s.trim().is_empty() => Ok(None),
        Some(Num::S(s)) => s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Booleans that some venues send as "true" / "false".
pub(crate) fn de_bool<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        B(bool),
        S(String),
    }
    match Option::<Flag>::deserialize(d)? {
        Some(Flag::B(b)) => Ok(b),
        Some(Flag::S(s)) => Ok(s.eq_ignore_ascii_case("true")),
        None => Ok(false),
    }
}

/// Millisecond timestamps sent either as numbers or numeric strings.
pub(crate) fn de_i64<'de, D>(d: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int {
        I(i64),
        S(String),
    }
    match Option::<Int>::deserialize(d)? {
        Some(Int::I(v)) => Ok(v),
        Some(Int::S(s)) if s.trim().is_empty() => Ok(0),
        Some(Int::S(s)) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}

/// Parse one `[ts, open, high, low, close, volume, ...]` row.
pub(crate) fn candle_from_row(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    fn num(v: Option<&serde_json::Value>) -> Result<f64, ExchangeError> {
        match v {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| ExchangeError::Decode(format!("bad candle field {v:?}")))
    }
    Ok(Candle {
        open_time: num(row.first())? as i64,
        open:      num(row.get(1))?,
        high:      num(row.get(2))?,
        low:       num(row.get(3))?,
        close:     num(row.get(4))?,
        volume:    num(row.get(5))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use serde_json::json;

    #[tokio::test]
    async fn account_is_switched_to_one_way_before_leverage() {
        let mut mock = MockExchangeClient::new();
        let mut seq = Sequence::new();
        mock.expect_set_position_mode()
            .withf(|hedge| !*hedge)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ExchangeError::Venue { code: -4068, msg: "open orders".into() }));
        mock.expect_set_leverage()
            .withf(|lev| *lev == 20)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        prepare_account(&mock, 20).await;
    }

    #[test]
    fn decimal_formatting() {
        assert_eq!(fmt_decimal(0.030), "0.03");
        assert_eq!(fmt_decimal(65_040.0), "65040");
        assert_eq!(fmt_decimal(0.0), "0");
        assert_eq!(fmt_decimal(64_400.25), "64400.25");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), ExchangeError::RateLimited(_)));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, ""), ExchangeError::TransientNetwork(_)));
        assert!(matches!(status_error(StatusCode::SERVICE_UNAVAILABLE, ""), ExchangeError::Timeout(_)));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, ""), ExchangeError::Auth(_)));
    }

    #[test]
    fn candle_rows_accept_strings_and_numbers() {
        let row = vec![json!(1_700_000_000_000i64), json!("65000.5"), json!("65100"), json!(64900.0), json!("65050"), json!("12.5")];
        let c = candle_from_row(&row).unwrap();
        assert_eq!(c.open_time, 1_700_000_000_000);
        assert_eq!(c.high, 65_100.0);
        assert_eq!(c.low, 64_900.0);

        let short = vec![json!(1), json!("1")];
        assert!(candle_from_row(&short).is_err());
    }

    #[test]
    fn hmac_matches_binance_doc_vector() {
        // Example from the Binance API documentation (SIGNED endpoint security)
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let sig = hex::encode(hmac_sha256(secret, query).unwrap());
        assert_eq!(sig, "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71");
    }
}
