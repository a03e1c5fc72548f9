pub mod backtest;
pub mod clock;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod levels;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod paper;
pub mod retry;
pub mod risk;
pub mod sim;
pub mod strategy;
pub mod telemetry;
pub mod time_sync;
