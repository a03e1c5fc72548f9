/// main.rs — Backtesting Entry Point
///
/// Runs the breakout backtest:
///   1. Load config from .env (credentials not needed)
///   2. Page historical klines from Binance USDⓈ-M public REST
///   3. Replay them through levels → strategy → risk → trade simulator
///   4. Print the trade log and the report grouped by outcome
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use breakout_engine::backtest::{print_trade_log, run_backtest, BacktestConfig};
use breakout_engine::config::{timeframe_ms, AppConfig};
use breakout_engine::exchange::BinanceClient;
use breakout_engine::metrics::compute_metrics;
use breakout_engine::risk::RiskManager;

#[derive(Debug, Parser)]
#[command(name = "backtest", about = "Replay the breakout strategy over historical candles")]
struct Args {
    /// Days of history to replay
    #[arg(long, default_value_t = 90)]
    days: u32,

    /// Bars before an open trade is closed at market
    #[arg(long, default_value_t = 48)]
    max_hold_bars: usize,

    /// Trades shown in the log table
    #[arg(long, default_value_t = 50)]
    show: usize,

    /// Log every simulated trade
    #[arg(long)]
    verbose: bool,
}

fn fmt_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("╔══════════════════════════════════════════════╗");
    info!("║      BREAKOUT BOT  —  BACKTEST MODE          ║");
    info!("║  swing levels · pullback filter · TP1/BE/TP2 ║");
    info!("╚══════════════════════════════════════════════╝");

    // ── Config ───────────────────────────────────────────────────────────
    dotenv::dotenv().ok();
    let cfg = AppConfig::from_lookup(|key| match key {
        // public market data only
        "PAPER_TRADING" => Some("true".to_owned()),
        _ => std::env::var(key).ok(),
    })
    .context("invalid configuration")?;

    let tf = cfg.strategy.timeframe.clone();
    let step_ms = timeframe_ms(&tf).context("unsupported TIMEFRAME")?;
    info!(
        "Config: symbol={} timeframe={} lookback={} path_bars={} days={}",
        cfg.exchange.symbol, tf, cfg.strategy.level_lookback, cfg.strategy.breakout_path_bars, args.days
    );
    info!(
        "Risk:   capital={:.0} margin={:.0}% leverage={}x max_risk={:.0} min_rr={:.2}",
        cfg.risk.capital_total, cfg.risk.margin_pct * 100.0, cfg.risk.leverage,
        cfg.risk.max_risk_usdt, cfg.risk.min_rr_ratio
    );

    // ── Fetch Data ───────────────────────────────────────────────────────
    let client = BinanceClient::new(&cfg.exchange).context("building HTTP client")?;
    let bars = (args.days as i64 * 86_400_000 / step_ms) as usize + cfg.strategy.window_len();
    let start = Utc::now().timestamp_millis() - bars as i64 * step_ms;

    info!("Fetching {} {} klines from {}...", bars, tf, fmt_ms(start));
    let candles = client
        .fetch_klines_range(&tf, start, bars)
        .await
        .context("fetching historical klines")?;

    if candles.is_empty() {
        anyhow::bail!("No kline data received.  Check symbol, timeframe, and connectivity.");
    }
    info!(
        "Loaded {} bars  ({} → {})",
        candles.len(),
        candles.first().map(|c| fmt_ms(c.open_time)).unwrap_or_default(),
        candles.last().map(|c| fmt_ms(c.open_time)).unwrap_or_default()
    );

    // ── Run Backtest ──────────────────────────────────────────────────────
    let bt_cfg = BacktestConfig {
        max_hold_bars: args.max_hold_bars,
        tp1_close_pct: cfg.execution.tp1_close_pct,
        verbose:       args.verbose,
    };
    let risk = RiskManager::new(cfg.risk, cfg.instrument);
    let run = run_backtest(&candles, cfg.strategy.clone(), &risk, &bt_cfg);

    // ── Print Report ──────────────────────────────────────────────────────
    print_trade_log(&run.trades, args.show);
    let report = compute_metrics(&run.trades, run.rejected, cfg.risk.capital_total);
    println!("\n{}", report);

    Ok(())
}
