/// data.rs — Market data feed
///
/// Pulls candles and the last price through the shared exchange handle,
/// wrapped in the retry policy.  Candles leave here sorted oldest → newest,
/// de-duplicated by open time and free of gaps, or not at all.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::timeframe_ms;
use crate::error::BotError;
use crate::exchange::ExchangeClient;
use crate::models::{Candle, Ticker};
use crate::retry::RetryPolicy;

pub struct MarketDataFeed {
    exchange: Arc<dyn ExchangeClient>,
    retry:    RetryPolicy,
    clock:    Arc<dyn Clock>,
}

impl MarketDataFeed {
    pub fn new(exchange: Arc<dyn ExchangeClient>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { exchange, retry, clock }
    }

    /// The most recent `limit` candles, newest last.
    pub async fn get_candles(&self, timeframe: &str, limit: usize) -> Result<Vec<Candle>, BotError> {
        let step_ms = timeframe_ms(timeframe)
            .ok_or_else(|| BotError::DataUnavailable(format!("unsupported timeframe {timeframe:?}")))?;

        let raw = self
            .retry
            .run(self.clock.as_ref(), "fetch_ohlcv", |_| self.exchange.fetch_ohlcv(timeframe, limit))
            .await
            .map_err(|e| {
                BotError::DataUnavailable(format!("fetch_ohlcv failed after {} attempt(s): {}", e.attempts, e.last))
            })?;

        let candles = normalize_candles(raw, step_ms, limit).map_err(BotError::DataUnavailable)?;
        debug!(
            timeframe,
            bars  = candles.len(),
            first = candles.first().map(|c| c.open_time),
            last  = candles.last().map(|c| c.open_time),
            "candles loaded"
        );
        Ok(candles)
    }

    pub async fn get_ticker(&self) -> Result<Ticker, BotError> {
        let ticker = self
            .retry
            .run(self.clock.as_ref(), "fetch_ticker", |_| self.exchange.fetch_ticker())
            .await
            .map_err(|e| {
                BotError::DataUnavailable(format!("fetch_ticker failed after {} attempt(s): {}", e.attempts, e.last))
            })?;

        if !(ticker.last_price.is_finite() && ticker.last_price > 0.0) {
            return Err(BotError::DataUnavailable(format!("bad ticker price {}", ticker.last_price)));
        }
        Ok(ticker)
    }
}

/// Sort, de-duplicate and gap-check a raw candle batch, keeping the newest
/// `limit` bars.  Fails unless exactly `limit` contiguous bars remain.
pub fn normalize_candles(mut raw: Vec<Candle>, step_ms: i64, limit: usize) -> Result<Vec<Candle>, String> {
    raw.sort_by_key(|c| c.open_time);
    let before = raw.len();
    raw.dedup_by_key(|c| c.open_time);
    if raw.len() < before {
        warn!(dropped = before - raw.len(), "duplicate candles dropped");
    }

    if raw.len() < limit {
        return Err(format!("incomplete window: {} of {} candles", raw.len(), limit));
    }
    let window = raw.split_off(raw.len() - limit);

    for c in &window {
        let finite = [c.open, c.high, c.low, c.close].iter().all(|v| v.is_finite() && *v > 0.0);
        if !finite || c.high < c.low {
            return Err(format!("malformed candle at {}", c.open_time));
        }
    }
    if let Some(w) = window.windows(2).find(|w| w[1].open_time - w[0].open_time > step_ms) {
        return Err(format!(
            "gap in candles between {} and {} (step {} ms)",
            w[0].open_time, w[1].open_time, step_ms
        ));
    }
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetrySettings;
    use crate::error::ExchangeError;
    use crate::exchange::MockExchangeClient;
    use std::time::Duration;

    const H: i64 = 3_600_000;

    fn bar(i: i64, close: f64) -> Candle {
        Candle { open_time: i * H, open: close, high: close + 10.0, low: close - 10.0, close, volume: 1.0 }
    }

    fn feed(mock: MockExchangeClient) -> MarketDataFeed {
        let retry = RetryPolicy::new(RetrySettings {
            max_retries: 2,
            base_delay:  Duration::from_millis(10),
            jitter:      0.0,
            ..RetrySettings::default()
        });
        MarketDataFeed::new(Arc::new(mock), retry, Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn unordered_input_is_sorted_and_deduplicated() {
        let raw = vec![bar(3, 103.0), bar(1, 101.0), bar(2, 102.0), bar(2, 102.0), bar(4, 104.0)];
        let out = normalize_candles(raw, H, 3).unwrap();
        let times: Vec<i64> = out.iter().map(|c| c.open_time / H).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn gap_fails() {
        let raw = vec![bar(1, 1.0), bar(2, 1.0), bar(4, 1.0)];
        assert!(normalize_candles(raw, H, 3).unwrap_err().contains("gap"));
    }

    #[test]
    fn gap_outside_window_is_ignored() {
        let raw = vec![bar(1, 1.0), bar(5, 1.0), bar(6, 1.0)];
        assert_eq!(normalize_candles(raw, H, 2).unwrap().len(), 2);
    }

    #[test]
    fn short_window_fails() {
        let raw = vec![bar(1, 1.0), bar(2, 1.0)];
        assert!(normalize_candles(raw, H, 3).unwrap_err().contains("incomplete"));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mut mock = MockExchangeClient::new();
        let mut calls = 0;
        mock.expect_fetch_ohlcv().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(ExchangeError::TransientNetwork("reset".into()))
            } else {
                Ok(vec![bar(2, 2.0), bar(1, 1.0)])
            }
        });
        let candles = feed(mock).get_candles("1h", 2).await.unwrap();
        assert_eq!(candles[0].open_time, H);
    }

    #[tokio::test]
    async fn exhausted_retries_are_data_unavailable() {
        let mut mock = MockExchangeClient::new();
        mock.expect_fetch_ticker()
            .times(3)
            .returning(|| Err(ExchangeError::Timeout("slow".into())));
        let err = feed(mock).get_ticker().await.unwrap_err();
        assert!(matches!(err, BotError::DataUnavailable(_)));
    }
}
