//! ExitLab Runner: backtest orchestration over historical bars and signals.
//!
//! This crate builds on `exitlab-core` to provide:
//! - CSV loading of bars and signals with ordering/sanity validation
//! - The parallel backtest driver (one independent lifecycle per signal)
//! - Summary metrics broken down by regime, exit reason and TP level
//! - Report export to JSON, CSV and Markdown with config fingerprinting

pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod runner;

pub use config::{BacktestConfig, ConfigError, ConfigFingerprint};
pub use data_loader::{load_bars, load_signals, LoadError};
pub use export::{load_report, save_report};
pub use metrics::{BacktestSummary, TradeStats};
pub use runner::{
    run_backtest, run_backtest_from_files, simulate_signal, BacktestReport, DroppedSignal,
    RunError, SignalOutcome,
};
