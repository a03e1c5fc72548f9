/// retry.rs — Retry policy for exchange calls
///
/// Wraps a single operation.  Retryable failures (network, timeout, rate
/// limit, maintenance) are retried up to `max_retries` times:
///
///   delay_n = min(base · multiplier^(n−1), max_backoff) · (1 ± jitter)
///
/// Maintenance windows wait `maintenance_pause` instead.  Anything else
/// returns immediately.  State lives only for the duration of one `run`.
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::clock::Clock;
use crate::config::RetrySettings;
use crate::error::ExchangeError;

/// Context handed to the operation on every attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based
    pub number:   u32,
    /// Error returned by the previous attempt, `None` on the first one
    pub previous: Option<ExchangeError>,
}

impl Attempt {
    /// The previous attempt may have taken effect on the exchange.
    pub fn after_unknown_outcome(&self) -> bool {
        self.previous.as_ref().is_some_and(ExchangeError::is_unknown_outcome)
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError {
    pub attempts: u32,
    pub last:     ExchangeError,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_retries.saturating_add(1)
    }

    /// Un-jittered delay before retry number `retry` (1-based), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.settings.multiplier.powi(retry.saturating_sub(1) as i32);
        let raw_ms = self.settings.base_delay.as_millis() as f64 * exp;
        let cap_ms = self.settings.max_backoff.as_millis() as f64;
        Duration::from_millis(raw_ms.min(cap_ms).max(0.0).round() as u64)
    }

    fn delay_for(&self, retry: u32, err: &ExchangeError) -> Duration {
        if matches!(err, ExchangeError::Maintenance(_)) {
            return self.settings.maintenance_pause;
        }
        let base = self.backoff(retry);
        let j = self.settings.jitter;
        if j <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-j..=j);
        let cap_ms = self.settings.max_backoff.as_millis() as f64;
        let ms = (base.as_millis() as f64 * factor).clamp(0.0, cap_ms);
        Duration::from_millis(ms.round() as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(
        &self,
        clock:     &dyn Clock,
        operation: &str,
        mut op:    F,
    ) -> Result<T, RetryError>
    where
        F:   FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let max_attempts = self.max_attempts();
        let mut previous: Option<ExchangeError> = None;
        let mut number = 1;

        loop {
            let attempt = Attempt { number, previous: previous.take() };
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && number < max_attempts => {
                    let wait = self.delay_for(number, &err);
                    warn!(
                        operation,
                        attempt = number,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "exchange call failed, retrying"
                    );
                    clock.sleep(wait).await;
                    previous = Some(err);
                    number += 1;
                }
                Err(err) => return Err(RetryError { attempts: number, last: err }),
            }
        }
    }
}
