/// telemetry.rs — Log sinks for the bot binary
///
///   stdout : RUST_LOG filter, default `info`
///   file   : `<LOG_DIR>/bot.log.YYYY-MM-DD`, rotated daily, debug and up
///
/// Both render timestamps at the fixed LOG_UTC_OFFSET_HOURS offset.
use std::fmt;

use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{prelude::*, EnvFilter};

const FILE_PREFIX: &str = "bot.log";
const FILE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,h2=info,rustls=info";

#[derive(Debug, Clone, Copy)]
struct OffsetTime(FixedOffset);

impl FormatTime for OffsetTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Utc::now().with_timezone(&self.0).format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Install the global subscriber.  Keep the guard alive for the life of the
/// process or buffered file lines are lost on exit.
pub fn init(log_dir: &str, utc_offset_hours: i32) -> Result<WorkerGuard> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3_600)
        .ok_or_else(|| anyhow!("LOG_UTC_OFFSET_HOURS {utc_offset_hours} out of range"))?;
    std::fs::create_dir_all(log_dir).with_context(|| format!("cannot create log dir {log_dir}"))?;

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, FILE_PREFIX));

    let stdout = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(OffsetTime(offset))
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_timer(OffsetTime(offset))
        .with_filter(EnvFilter::new(FILE_FILTER));

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {e}"))?;
    Ok(guard)
}
