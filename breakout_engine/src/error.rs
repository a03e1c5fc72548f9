/// error.rs — Error taxonomy
///
/// `ExchangeError` is what a venue client returns.  The retry policy decides
/// from its classification whether to try again.  `BotError` is what a cycle
/// surfaces to the orchestrator; none of its variants stop the loop.
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    /// Connection reset, 5xx, DNS...  The request never reached a matching engine.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// No answer in time.  The request may or may not have been executed.
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("exchange under maintenance: {0}")]
    Maintenance(String),

    /// The venue refused the order shape (size, price precision, margin...).
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("exchange error {code}: {msg}")]
    Venue { code: i64, msg: String },
}

impl ExchangeError {
    /// Errors worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::TransientNetwork(_)
                | ExchangeError::RateLimited(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::Maintenance(_)
        )
    }

    /// A submission that failed this way may still have reached the book.
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, ExchangeError::Timeout(_) | ExchangeError::TransientNetwork(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExchangeError::Timeout(e.to_string())
        } else if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else {
            ExchangeError::TransientNetwork(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Decode(e.to_string())
    }
}

/// Failures a trading cycle can end with.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("order rejected by exchange: {0}")]
    InvalidOrder(String),

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    ExecutionFailed {
        operation: String,
        attempts:  u32,
        #[source]
        source:    ExchangeError,
    },
}

impl BotError {
    /// Map a terminal exchange error for `operation` onto the cycle taxonomy.
    pub fn from_exchange(operation: &str, attempts: u32, err: ExchangeError) -> Self {
        match err {
            ExchangeError::InvalidOrder(msg) => BotError::InvalidOrder(msg),
            source => BotError::ExecutionFailed {
                operation: operation.to_owned(),
                attempts,
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ExchangeError::RateLimited("429".into()).is_retryable());
        assert!(ExchangeError::Timeout("10s".into()).is_unknown_outcome());
        assert!(!ExchangeError::InvalidOrder("min notional".into()).is_retryable());
        assert!(!ExchangeError::RateLimited("429".into()).is_unknown_outcome());
    }

    #[test]
    fn invalid_order_is_not_execution_failure() {
        let e = BotError::from_exchange(
            "create_limit_order",
            1,
            ExchangeError::InvalidOrder("qty too small".into()),
        );
        assert!(matches!(e, BotError::InvalidOrder(_)));
    }
}
