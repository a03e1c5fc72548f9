/// live_main.rs — Trading Bot Entry Point
///
/// FLOW:
///   1. Load config from .env (exchange, credentials, risk, Telegram)
///   2. Install stdout + daily-rotated file logging
///   3. Connect the venue client (server-time sync, symbol check)
///   4. Build feed → executor (paper or live) → notifier → orchestrator
///   5. Run one cycle (--once) or loop every LOOP_INTERVAL until Ctrl-C
///
/// PAPER_TRADING=true keeps every order in memory; market data still comes
/// from the configured exchange.
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use breakout_engine::clock::{Clock, SystemClock};
use breakout_engine::config::AppConfig;
use breakout_engine::data::MarketDataFeed;
use breakout_engine::engine::{Orchestrator, RunMode};
use breakout_engine::exchange;
use breakout_engine::executor::{ExecutionClient, OrderExecutor};
use breakout_engine::notifier::{LogNotifier, Notifier, TelegramNotifier};
use breakout_engine::paper::PaperExecutor;
use breakout_engine::retry::RetryPolicy;
use breakout_engine::telemetry;

#[derive(Debug, Parser)]
#[command(name = "bot", about = "Breakout futures trading bot")]
struct Args {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = AppConfig::from_env().context("invalid configuration")?;
    let _log_guard = telemetry::init(&cfg.log_dir, cfg.log_utc_offset_hours)?;

    info!("╔══════════════════════════════════════════════╗");
    info!("║      BREAKOUT BOT  —  TRADING MODE           ║");
    info!("╚══════════════════════════════════════════════╝");
    info!(
        exchange = %cfg.exchange.kind, symbol = %cfg.exchange.symbol,
        timeframe = %cfg.strategy.timeframe, interval_s = cfg.loop_interval.as_secs(),
        "configuration loaded"
    );
    info!(
        "Risk: capital={:.0} margin={:.0}% leverage={}x max_risk={:.0} min_rr={:.2}",
        cfg.risk.capital_total, cfg.risk.margin_pct * 100.0, cfg.risk.leverage,
        cfg.risk.max_risk_usdt, cfg.risk.min_rr_ratio
    );
    if cfg.paper_trading {
        info!("📝 PAPER TRADING — orders are simulated, no funds at risk");
    } else if cfg.exchange.testnet || cfg.exchange.okx_demo {
        info!("🧪 Testnet / demo account");
    } else {
        warn!("⚠️  LIVE MODE — REAL MONEY — ensure all parameters are correct!");
    }

    // ── Wiring ───────────────────────────────────────────────────────────
    let exchange = exchange::connect(&cfg.exchange)
        .await
        .context("connecting to exchange")?;
    if !cfg.paper_trading {
        exchange::prepare_account(exchange.as_ref(), cfg.risk.leverage).await;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let feed = Arc::new(MarketDataFeed::new(
        exchange.clone(),
        RetryPolicy::new(cfg.retry),
        clock.clone(),
    ));

    let executor: Arc<dyn OrderExecutor> = if cfg.paper_trading {
        Arc::new(PaperExecutor::new(feed.clone(), &cfg.strategy, &cfg.execution, clock.clone()))
    } else {
        Arc::new(ExecutionClient::new(
            exchange.clone(),
            RetryPolicy::new(cfg.retry),
            clock.clone(),
            cfg.execution,
            cfg.instrument,
        ))
    };

    let notifier: Arc<dyn Notifier> = match &cfg.telegram {
        Some(tg) => Arc::new(TelegramNotifier::new(tg)),
        None => {
            info!("Telegram not configured; notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    // ── Shutdown ─────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let mode = if args.once { RunMode::Once } else { RunMode::Continuous };
    notifier
        .send(&format!("🚀 Bot started [{}] {} {}", executor.mode(), cfg.exchange.kind, cfg.exchange.symbol))
        .await;

    let mut orchestrator = Orchestrator::new(&cfg, feed, executor, notifier.clone(), clock);
    let cycles = orchestrator.run(mode, shutdown_rx).await;

    notifier.send(&format!("🛑 Bot stopped after {cycles} cycles")).await;
    info!(cycles, "bot stopped");
    Ok(())
}
