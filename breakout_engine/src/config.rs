/// config.rs — Centralised configuration loaded from .env
///
/// Every parameter consumed by the bot is defined here.  Loading happens
/// once at startup into an immutable `AppConfig`; components receive the
/// sub-structs they need by value or through an `Arc<AppConfig>`.
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Malformed or missing configuration.  Aborts the process before any cycle.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("config key {key}: cannot parse {value:?}: {reason}")]
    Parse { key: String, value: String, reason: String },

    #[error("config key {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("config key {0} is required")]
    Missing(String),
}

/// Upper bound on MAX_RETRIES; a cycle must not stall for hours on one call.
pub const MAX_RETRIES_LIMIT: u32 = 20;

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key: key.to_owned(), reason: reason.into() }
}

// ── Exchange selection ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Binance,
    Bybit,
    Okx,
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binanceusdm" | "binance" => Ok(ExchangeKind::Binance),
            "bybit"                   => Ok(ExchangeKind::Bybit),
            "okx"                     => Ok(ExchangeKind::Okx),
            other => Err(format!("unsupported exchange {other:?}, use binanceusdm | bybit | okx")),
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Binance => write!(f, "binanceusdm"),
            ExchangeKind::Bybit   => write!(f, "bybit"),
            ExchangeKind::Okx     => write!(f, "okx"),
        }
    }
}

/// Unified `BASE/QUOTE` market symbol; each venue renders its own id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSymbol {
    pub base:  String,
    pub quote: String,
}

impl FromStr for MarketSymbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| format!("expected BASE/QUOTE, got {s:?}"))?;
        let (base, quote) = (base.trim().to_uppercase(), quote.trim().to_uppercase());
        if base.is_empty() || quote.is_empty() {
            return Err(format!("expected BASE/QUOTE, got {s:?}"));
        }
        Ok(Self { base, quote })
    }
}

impl fmt::Display for MarketSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[derive(Clone)]
pub struct ExchangeSettings {
    pub kind:           ExchangeKind,
    pub api_key:        String,
    pub api_secret:     String,
    /// OKX only
    pub api_passphrase: String,
    /// OKX demo trading (`x-simulated-trading: 1`)
    pub okx_demo:       bool,
    /// Binance / Bybit testnet endpoints
    pub testnet:        bool,
    pub symbol:         MarketSymbol,
    pub request_timeout: Duration,
}

impl fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("kind", &self.kind)
            .field("api_key", &mask(&self.api_key))
            .field("okx_demo", &self.okx_demo)
            .field("testnet", &self.testnet)
            .field("symbol", &self.symbol)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(4).collect();
    if head.len() == secret.len() {
        "****".into()
    } else {
        format!("{head}****")
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    /// Bar timeframe for level computation, e.g. "1h"
    pub timeframe:          String,
    /// Bars used for swing high / swing low
    pub level_lookback:     usize,
    /// Most recent bars replayed as the breakout price path (excluded from levels)
    pub breakout_path_bars: usize,
    /// Round-number grid used for TP1 levels
    pub round_level_step:   f64,

    pub long_entry_offset:  f64,
    pub long_sl_offset:     f64,
    pub long_tp1_offset:    f64,
    pub long_tp2_offset:    f64,
    pub long_pullback_max:  f64,

    pub short_entry_offset: f64,
    pub short_sl_offset:    f64,
    pub short_tp1_offset:   f64,
    pub short_tp2_offset:   f64,
    pub short_pullback_max: f64,

    pub min_rr_ratio:       f64,
}

impl StrategyParams {
    /// Candles the feed must deliver for one evaluation.
    pub fn window_len(&self) -> usize {
        self.level_lookback + self.breakout_path_bars
    }
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            timeframe:          "1h".into(),
            level_lookback:     24,
            breakout_path_bars: 3,
            round_level_step:   200.0,
            long_entry_offset:  40.0,
            long_sl_offset:     640.0,
            long_tp1_offset:    1_400.0,
            long_tp2_offset:    2_800.0,
            long_pullback_max:  300.0,
            short_entry_offset: 50.0,
            short_sl_offset:    650.0,
            short_tp1_offset:   1_400.0,
            short_tp2_offset:   2_800.0,
            short_pullback_max: 300.0,
            min_rr_ratio:       1.5,
        }
    }
}

// ── Risk ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskParams {
    /// Account capital in USDT
    pub capital_total: f64,
    /// Fraction of capital committed as margin per trade
    pub margin_pct:    f64,
    pub leverage:      u32,
    /// Hard cap on loss at the stop, USDT
    pub max_risk_usdt: f64,
    pub min_rr_ratio:  f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            capital_total: 500.0,
            margin_pct:    0.20,
            leverage:      20,
            max_risk_usdt: 250.0,
            min_rr_ratio:  1.5,
        }
    }
}

/// Exchange-side sizing constraints for the traded contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentRules {
    pub min_qty:  f64,
    /// Quantity increment; 0 disables rounding
    pub qty_step: f64,
}

impl Default for InstrumentRules {
    fn default() -> Self {
        Self { min_qty: 0.001, qty_step: 0.001 }
    }
}

// ── Retry / execution ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    pub max_retries:       u32,
    pub base_delay:        Duration,
    pub multiplier:        f64,
    pub max_backoff:       Duration,
    /// ± fraction of the computed delay, in [0, 1]
    pub jitter:            f64,
    pub maintenance_pause: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries:       3,
            base_delay:        Duration::from_millis(2_000),
            multiplier:        2.0,
            max_backoff:       Duration::from_secs(30),
            jitter:            0.2,
            maintenance_pause: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionSettings {
    /// Entry orders older than this are cancelled at the next cycle
    pub stale_after:             Duration,
    /// How long to wait for the entry limit before falling back to market
    pub entry_fill_timeout:      Duration,
    pub market_fallback:         bool,
    /// Fraction of the position closed at TP1
    pub tp1_close_pct:           f64,
    /// Trailing starts once price is this far beyond TP1 (0.005 = 0.5 %)
    pub trailing_activation_pct: f64,
    /// Distance kept between price and the trailed stop, 0 disables trailing
    pub trailing_offset_pct:     f64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            stale_after:             Duration::from_secs(300),
            entry_fill_timeout:      Duration::from_secs(30),
            market_fallback:         false,
            tp1_close_pct:           0.5,
            trailing_activation_pct: 0.005,
            trailing_offset_pct:     0.004,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramSettings {
    pub token:   String,
    pub chat_id: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub exchange:      ExchangeSettings,
    pub strategy:      StrategyParams,
    pub risk:          RiskParams,
    pub instrument:    InstrumentRules,
    pub retry:         RetrySettings,
    pub execution:     ExecutionSettings,
    pub paper_trading: bool,
    pub loop_interval: Duration,
    pub telegram:      Option<TelegramSettings>,
    pub log_dir:       String,
    pub log_utc_offset_hours: i32,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // ignore missing .env
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.  Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let kind: ExchangeKind = env.parse_str("EXCHANGE_NAME", "binanceusdm")?;
        let symbol: MarketSymbol = env.parse_str("SYMBOL", "BTC/USDT")?;
        let paper_trading = env.flag("PAPER_TRADING", false)?;

        let exchange = ExchangeSettings {
            kind,
            api_key:         env.string("API_KEY", ""),
            api_secret:      env.string("API_SECRET", ""),
            api_passphrase:  env.string("API_PASSPHRASE", ""),
            okx_demo:        env.flag("OKX_DEMO", false)?,
            testnet:         env.flag("EXCHANGE_TESTNET", false)?,
            symbol,
            request_timeout: Duration::from_secs(env.parse("REQUEST_TIMEOUT_SECONDS", 10u64)?),
        };

        let d = StrategyParams::default();
        let min_rr_ratio = env.parse("MIN_RR_RATIO", d.min_rr_ratio)?;
        let strategy = StrategyParams {
            timeframe:          env.string("TIMEFRAME", &d.timeframe),
            level_lookback:     env.parse("LEVEL_LOOKBACK", d.level_lookback)?,
            breakout_path_bars: env.parse("BREAKOUT_PATH_BARS", d.breakout_path_bars)?,
            round_level_step:   env.parse("ROUND_LEVEL_STEP", d.round_level_step)?,
            long_entry_offset:  env.parse("LONG_ENTRY_OFFSET", d.long_entry_offset)?,
            long_sl_offset:     env.parse("LONG_SL_OFFSET", d.long_sl_offset)?,
            long_tp1_offset:    env.parse("LONG_TP1_OFFSET", d.long_tp1_offset)?,
            long_tp2_offset:    env.parse("LONG_TP2_OFFSET", d.long_tp2_offset)?,
            long_pullback_max:  env.parse("LONG_PULLBACK_MAX", d.long_pullback_max)?,
            short_entry_offset: env.parse("SHORT_ENTRY_OFFSET", d.short_entry_offset)?,
            short_sl_offset:    env.parse("SHORT_SL_OFFSET", d.short_sl_offset)?,
            short_tp1_offset:   env.parse("SHORT_TP1_OFFSET", d.short_tp1_offset)?,
            short_tp2_offset:   env.parse("SHORT_TP2_OFFSET", d.short_tp2_offset)?,
            short_pullback_max: env.parse("SHORT_PULLBACK_MAX", d.short_pullback_max)?,
            min_rr_ratio,
        };

        let r = RiskParams::default();
        let risk = RiskParams {
            capital_total: env.parse("CAPITAL_TOTAL", r.capital_total)?,
            margin_pct:    env.parse("MARGIN_PCT", r.margin_pct)?,
            leverage:      env.parse("LEVERAGE", r.leverage)?,
            max_risk_usdt: env.parse("MAX_RISK_USDT", r.max_risk_usdt)?,
            min_rr_ratio,
        };

        let i = InstrumentRules::default();
        let instrument = InstrumentRules {
            min_qty:  env.parse("MIN_ORDER_QTY", i.min_qty)?,
            qty_step: env.parse("QTY_STEP", i.qty_step)?,
        };

        let rt = RetrySettings::default();
        let retry = RetrySettings {
            max_retries:       env.parse("MAX_RETRIES", rt.max_retries)?,
            base_delay:        Duration::from_millis(env.parse("RETRY_BASE_DELAY_MS", 2_000u64)?),
            multiplier:        env.parse("RETRY_MULTIPLIER", rt.multiplier)?,
            max_backoff:       Duration::from_millis(env.parse("MAX_BACKOFF_MS", 30_000u64)?),
            jitter:            env.parse("RETRY_JITTER", rt.jitter)?,
            maintenance_pause: Duration::from_secs(env.parse("MAINTENANCE_PAUSE_SECONDS", 600u64)?),
        };

        let loop_interval = Duration::from_secs(env.parse("LOOP_INTERVAL_SECONDS", 300u64)?);

        let ex = ExecutionSettings::default();
        let execution = ExecutionSettings {
            stale_after:             loop_interval,
            entry_fill_timeout:      Duration::from_secs(env.parse("ENTRY_FILL_TIMEOUT_SECONDS", 30u64)?),
            market_fallback:         env.flag("MARKET_FALLBACK", ex.market_fallback)?,
            tp1_close_pct:           env.parse("TP1_CLOSE_PCT", ex.tp1_close_pct)?,
            trailing_activation_pct: env.parse("TRAILING_ACTIVATION_PCT", ex.trailing_activation_pct)?,
            trailing_offset_pct:     env.parse("TRAILING_OFFSET_PCT", ex.trailing_offset_pct)?,
        };

        let telegram = match (lookup("TELEGRAM_TOKEN"), lookup("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat)) if !token.trim().is_empty() && !chat.trim().is_empty() => {
                let chat_id = chat.trim().parse::<i64>().map_err(|e| ConfigError::Parse {
                    key:    "TELEGRAM_CHAT_ID".into(),
                    value:  chat.clone(),
                    reason: e.to_string(),
                })?;
                Some(TelegramSettings { token: token.trim().to_owned(), chat_id })
            }
            _ => None,
        };

        let cfg = Self {
            exchange,
            strategy,
            risk,
            instrument,
            retry,
            execution,
            paper_trading,
            loop_interval,
            telegram,
            log_dir:              env.string("LOG_DIR", "logs"),
            log_utc_offset_hours: env.parse("LOG_UTC_OFFSET_HOURS", -5i32)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.risk;
        if !(r.capital_total > 0.0) {
            return Err(invalid("CAPITAL_TOTAL", "must be > 0"));
        }
        if !(r.margin_pct > 0.0 && r.margin_pct <= 1.0) {
            return Err(invalid("MARGIN_PCT", "must be in (0, 1]"));
        }
        if r.leverage == 0 {
            return Err(invalid("LEVERAGE", "must be >= 1"));
        }
        if !(r.max_risk_usdt > 0.0) {
            return Err(invalid("MAX_RISK_USDT", "must be > 0"));
        }
        if !(r.min_rr_ratio >= 0.0) {
            return Err(invalid("MIN_RR_RATIO", "must be >= 0"));
        }

        let s = &self.strategy;
        if s.level_lookback < 2 {
            return Err(invalid("LEVEL_LOOKBACK", "must be >= 2"));
        }
        let offsets = [
            ("LONG_ENTRY_OFFSET", s.long_entry_offset),
            ("LONG_TP1_OFFSET", s.long_tp1_offset),
            ("LONG_TP2_OFFSET", s.long_tp2_offset),
            ("LONG_PULLBACK_MAX", s.long_pullback_max),
            ("SHORT_ENTRY_OFFSET", s.short_entry_offset),
            ("SHORT_TP1_OFFSET", s.short_tp1_offset),
            ("SHORT_TP2_OFFSET", s.short_tp2_offset),
            ("SHORT_PULLBACK_MAX", s.short_pullback_max),
            ("ROUND_LEVEL_STEP", s.round_level_step),
        ];
        for (key, value) in offsets {
            if !(value >= 0.0) {
                return Err(invalid(key, "must be >= 0"));
            }
        }
        if !(s.long_sl_offset > 0.0) {
            return Err(invalid("LONG_SL_OFFSET", "must be > 0"));
        }
        if !(s.short_sl_offset > 0.0) {
            return Err(invalid("SHORT_SL_OFFSET", "must be > 0"));
        }
        if s.timeframe_step_ms().is_none() {
            return Err(invalid("TIMEFRAME", format!("unsupported timeframe {:?}", s.timeframe)));
        }

        if !(self.instrument.min_qty >= 0.0) || !(self.instrument.qty_step >= 0.0) {
            return Err(invalid("MIN_ORDER_QTY", "quantity constraints must be >= 0"));
        }

        let rt = &self.retry;
        if rt.max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid("MAX_RETRIES", format!("must be <= {MAX_RETRIES_LIMIT}")));
        }
        if !(rt.multiplier >= 1.0) {
            return Err(invalid("RETRY_MULTIPLIER", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&rt.jitter) {
            return Err(invalid("RETRY_JITTER", "must be in [0, 1]"));
        }

        if self.loop_interval.is_zero() {
            return Err(invalid("LOOP_INTERVAL_SECONDS", "must be > 0"));
        }
        let tp1 = self.execution.tp1_close_pct;
        if !(tp1 > 0.0 && tp1 <= 1.0) {
            return Err(invalid("TP1_CLOSE_PCT", "must be in (0, 1]"));
        }
        let ex = &self.execution;
        if !(ex.trailing_activation_pct >= 0.0) {
            return Err(invalid("TRAILING_ACTIVATION_PCT", "must be >= 0"));
        }
        if !(ex.trailing_offset_pct >= 0.0 && ex.trailing_offset_pct < 1.0) {
            return Err(invalid("TRAILING_OFFSET_PCT", "must be in [0, 1)"));
        }

        if !self.paper_trading {
            if self.exchange.api_key.is_empty() {
                return Err(ConfigError::Missing("API_KEY".into()));
            }
            if self.exchange.api_secret.is_empty() {
                return Err(ConfigError::Missing("API_SECRET".into()));
            }
            if self.exchange.kind == ExchangeKind::Okx && self.exchange.api_passphrase.is_empty() {
                return Err(ConfigError::Missing("API_PASSPHRASE".into()));
            }
        }
        Ok(())
    }
}

impl StrategyParams {
    /// Length of one bar in milliseconds, for gap checks.
    pub fn timeframe_step_ms(&self) -> Option<i64> {
        timeframe_ms(&self.timeframe)
    }
}

/// "15m" → 900_000.  Supports m / h / d / w suffixes.  `None` for
/// anything else, including counts whose length overflows an i64.
pub fn timeframe_ms(tf: &str) -> Option<i64> {
    let tf = tf.trim();
    let unit = tf.chars().last()?;
    let n: i64 = tf[..tf.len() - unit.len_utf8()].parse().ok().filter(|n| *n > 0)?;
    let unit_ms: i64 = match unit {
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _   => return None,
    };
    n.checked_mul(unit_ms)
}

// ── Env helpers ──────────────────────────────────────────────────────────

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(key) {
            Some(v) => v.parse::<T>().map_err(|e| ConfigError::Parse {
                key:    key.to_owned(),
                value:  v.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn parse_str<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let v = self.string(key, default);
        v.parse::<T>().map_err(|e| ConfigError::Parse {
            key:    key.to_owned(),
            value:  v.clone(),
            reason: e.to_string(),
        })
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Parse {
                    key:    key.to_owned(),
                    value:  v.clone(),
                    reason: "expected true / false".into(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn paper_defaults_load() {
        let cfg = load(&[("PAPER_TRADING", "true")]).unwrap();
        assert_eq!(cfg.exchange.kind, ExchangeKind::Binance);
        assert_eq!(cfg.exchange.symbol.to_string(), "BTC/USDT");
        assert_eq!(cfg.risk.leverage, 20);
        assert_eq!(cfg.strategy.long_entry_offset, 40.0);
        assert_eq!(cfg.loop_interval, Duration::from_secs(300));
        assert_eq!(cfg.execution.stale_after, cfg.loop_interval);
        assert!(cfg.telegram.is_none());
    }

    #[test]
    fn live_requires_credentials() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("API_KEY".into()));
        let okx = load(&[("EXCHANGE_NAME", "okx"), ("API_KEY", "k"), ("API_SECRET", "s")]);
        assert_eq!(okx.unwrap_err(), ConfigError::Missing("API_PASSPHRASE".into()));
    }

    #[test]
    fn malformed_number_is_fatal() {
        let err = load(&[("PAPER_TRADING", "true"), ("LEVERAGE", "twenty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref key, .. } if key == "LEVERAGE"));
    }

    #[test]
    fn out_of_range_margin_rejected() {
        let err = load(&[("PAPER_TRADING", "true"), ("MARGIN_PCT", "1.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "MARGIN_PCT"));
    }

    #[test]
    fn unknown_exchange_rejected() {
        let err = load(&[("PAPER_TRADING", "true"), ("EXCHANGE_NAME", "kraken")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref key, .. } if key == "EXCHANGE_NAME"));
    }

    #[test]
    fn telegram_chat_id_must_be_numeric() {
        let err = load(&[
            ("PAPER_TRADING", "true"),
            ("TELEGRAM_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "me"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref key, .. } if key == "TELEGRAM_CHAT_ID"));
    }

    #[test]
    fn timeframe_parsing() {
        assert_eq!(timeframe_ms("1h"), Some(3_600_000));
        assert_eq!(timeframe_ms("15m"), Some(900_000));
        assert_eq!(timeframe_ms("1x"), None);
        assert_eq!(timeframe_ms("h"), None);
    }

    #[test]
    fn multibyte_or_oversized_timeframe_is_rejected_not_panicking() {
        assert_eq!(timeframe_ms("1µ"), None);
        assert_eq!(timeframe_ms("µ"), None);
        assert_eq!(timeframe_ms(""), None);
        assert_eq!(timeframe_ms("9223372036854775807w"), None);

        let err = load(&[("PAPER_TRADING", "true"), ("TIMEFRAME", "5µ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "TIMEFRAME"));
        let err = load(&[("PAPER_TRADING", "true"), ("TIMEFRAME", "99999999999999999d")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "TIMEFRAME"));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let ok = load(&[("PAPER_TRADING", "true"), ("MAX_RETRIES", "20")]).unwrap();
        assert_eq!(ok.retry.max_retries, 20);
        let err = load(&[("PAPER_TRADING", "true"), ("MAX_RETRIES", "4294967295")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "MAX_RETRIES"));
    }

    #[test]
    fn trailing_settings_load_and_validate() {
        let cfg = load(&[("PAPER_TRADING", "true"), ("TRAILING_OFFSET_PCT", "0.01")]).unwrap();
        assert_eq!(cfg.execution.trailing_offset_pct, 0.01);
        assert_eq!(cfg.execution.trailing_activation_pct, 0.005);
        let err = load(&[("PAPER_TRADING", "true"), ("TRAILING_OFFSET_PCT", "1.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "TRAILING_OFFSET_PCT"));
    }
}
