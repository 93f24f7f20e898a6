//! Backtest runner: wires loaded data, the exit engine and summary metrics.
//!
//! Two entry points:
//! - `run_backtest_from_files()`: loads bar/signal CSVs, then runs. Used by the CLI.
//! - `run_backtest()`: takes pre-loaded data, no I/O.
//!
//! Each accepted signal is an independent simulation over an immutable bar
//! slice, so signals are spread across rayon workers. Outcomes are re-sorted by
//! (entry timestamp, input index) before aggregation; the report does not
//! depend on scheduling order.

use std::path::Path;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use exitlab_core::domain::{Bar, ClosedTrade, ExitKind, SignalInput, SignalRejected};
use exitlab_core::regime::window_ending_at;
use exitlab_core::{ExitEngine, LifecycleError};

use crate::config::{BacktestConfig, ConfigError, ConfigFingerprint};
use crate::data_loader::{load_bars, load_signals, LoadError};
use crate::metrics::{BacktestSummary, Dropped};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
}

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

/// What happened to one input signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Closed(ClosedTrade),
    Rejected(SignalRejected),
    /// Accepted, but no bars exist after the entry timestamp.
    NoData,
    /// Fatal to this position only.
    InvariantViolation(LifecycleError),
}

/// A rejected or failed signal, kept in the report for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedSignal {
    pub index: usize,
    pub entry_timestamp: DateTime<Utc>,
    pub label: String,
    pub detail: String,
}

/// Complete result of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub config_fingerprint: ConfigFingerprint,
    pub config: BacktestConfig,
    pub bar_count: usize,
    pub summary: BacktestSummary,
    /// Closed trades ordered by entry timestamp, then input order.
    pub trades: Vec<ClosedTrade>,
    pub dropped: Vec<DroppedSignal>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Load CSV inputs and run.
pub fn run_backtest_from_files(
    config: &BacktestConfig,
    bars_path: &Path,
    signals_path: &Path,
) -> Result<BacktestReport, RunError> {
    let bars = load_bars(bars_path)?;
    let signals = load_signals(signals_path)?;
    info!(
        bars = bars.len(),
        signals = signals.len(),
        "loaded backtest inputs"
    );
    run_backtest(config, &bars, &signals)
}

/// Run every signal against pre-loaded bars (sorted, strictly increasing).
pub fn run_backtest(
    config: &BacktestConfig,
    bars: &[Bar],
    signals: &[SignalInput],
) -> Result<BacktestReport, RunError> {
    config.validate()?;
    let fingerprint = config.fingerprint()?;
    let engine = ExitEngine::new(config.engine.clone());

    info!(
        fingerprint = %&fingerprint[..12],
        signals = signals.len(),
        max_bars = config.max_bars,
        "starting backtest"
    );

    let mut outcomes: Vec<(usize, DateTime<Utc>, SignalOutcome)> = signals
        .par_iter()
        .enumerate()
        .map(|(index, input)| {
            let outcome = simulate_signal(&engine, config, bars, input.clone());
            (index, input.entry_timestamp, outcome)
        })
        .collect();
    outcomes.sort_by_key(|(index, ts, _)| (*ts, *index));

    let mut trades = Vec::new();
    let mut dropped = Vec::new();
    let mut no_data = 0;
    let mut invariant_violations = 0;
    for (index, entry_timestamp, outcome) in outcomes {
        match outcome {
            SignalOutcome::Closed(trade) => trades.push(trade),
            SignalOutcome::Rejected(rejection) => dropped.push(DroppedSignal {
                index,
                entry_timestamp,
                label: rejection.reason.label().to_string(),
                detail: rejection.reason.to_string(),
            }),
            SignalOutcome::NoData => no_data += 1,
            SignalOutcome::InvariantViolation(err) => {
                invariant_violations += 1;
                dropped.push(DroppedSignal {
                    index,
                    entry_timestamp,
                    label: "invariant_violation".to_string(),
                    detail: err.to_string(),
                });
            }
        }
    }

    let rejection_labels = dropped
        .iter()
        .filter(|d| d.label != "invariant_violation")
        .map(|d| d.label.as_str())
        .collect();
    let summary = BacktestSummary::compute(
        &trades,
        &Dropped {
            rejection_labels,
            no_data,
            invariant_violations,
        },
    );

    info!(
        trades = summary.overall.trades,
        rejected = summary.rejected,
        no_data = summary.no_data,
        total_pnl = summary.overall.total_pnl,
        win_rate = summary.overall.win_rate,
        "backtest complete"
    );

    Ok(BacktestReport {
        schema_version: SCHEMA_VERSION,
        config_fingerprint: fingerprint,
        config: config.clone(),
        bar_count: bars.len(),
        summary,
        trades,
        dropped,
    })
}

/// Simulate one signal: accept, replay up to `max_bars` bars, force-close if
/// the window runs out.
pub fn simulate_signal(
    engine: &ExitEngine,
    config: &BacktestConfig,
    bars: &[Bar],
    input: SignalInput,
) -> SignalOutcome {
    let entry_ts = input.entry_timestamp;
    let history = window_ending_at(bars, entry_ts, engine.config().classifier.window);

    let mut position = match engine.accept(input, history, config.unit_kind) {
        Ok(position) => position,
        Err(rejection) => {
            warn!(entry = %entry_ts, reason = %rejection.reason, "signal rejected");
            return SignalOutcome::Rejected(rejection);
        }
    };

    let start = bars.partition_point(|b| b.timestamp <= entry_ts);
    let end = (start + config.max_bars).min(bars.len());
    let window = &bars[start..end];
    let Some(last) = window.last() else {
        warn!(entry = %entry_ts, "no bars after signal, skipping");
        return SignalOutcome::NoData;
    };

    let tolerance = config.gap_tolerance();
    if let Some(pair) = window
        .windows(2)
        .find(|pair| pair[1].timestamp - pair[0].timestamp > tolerance)
    {
        warn!(
            entry = %entry_ts,
            from = %pair[0].timestamp,
            to = %pair[1].timestamp,
            "data gap in simulation window, trade flagged low-confidence"
        );
        position.mark_low_confidence();
    }

    for bar in window {
        if let Err(err) = engine.step(&mut position, bar) {
            error!(entry = %entry_ts, bar = %bar.timestamp, error = %err, "position aborted");
            return SignalOutcome::InvariantViolation(err);
        }
        if position.is_closed() {
            break;
        }
    }

    if !position.is_closed() {
        if let Err(err) = position.force_close(ExitKind::Timeout, last.close, last.timestamp) {
            error!(entry = %entry_ts, error = %err, "force close failed");
            return SignalOutcome::InvariantViolation(err);
        }
    }

    match position.to_closed_trade() {
        Some(trade) => SignalOutcome::Closed(trade),
        None => SignalOutcome::InvariantViolation(LifecycleError::AlreadyClosed),
    }
}
