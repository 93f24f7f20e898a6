//! Summary metrics: pure functions over closed trades.
//!
//! No dependency on the driver or on I/O; everything here is trade list in,
//! numbers out. Maps are `BTreeMap` so serialized summaries are stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use exitlab_core::domain::ClosedTrade;
use exitlab_core::profile::TARGET_LEVELS;

/// Aggregate over one slice of trades (everything, or one regime).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub trades: usize,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
}

impl TradeStats {
    pub fn compute<'a>(trades: impl IntoIterator<Item = &'a ClosedTrade>) -> Self {
        let trades: Vec<&ClosedTrade> = trades.into_iter().collect();
        let total_pnl: f64 = trades.iter().map(|t| t.total_pnl).sum();
        Self {
            trades: trades.len(),
            total_pnl,
            avg_pnl: if trades.is_empty() {
                0.0
            } else {
                total_pnl / trades.len() as f64
            },
            win_rate: win_rate(&trades),
            profit_factor: profit_factor(&trades),
        }
    }
}

/// Everything the backtest reports besides the trades themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub signals: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub no_data: usize,
    pub invariant_violations: usize,
    pub low_confidence: usize,
    pub overall: TradeStats,
    /// Rejection label → count.
    pub rejection_reasons: BTreeMap<String, usize>,
    /// Final exit reason label → count.
    pub exit_reasons: BTreeMap<String, usize>,
    /// Share of closed trades that reached TP1, TP2, TP3.
    pub tp_hit_rates: [f64; TARGET_LEVELS],
    /// Regime label → stats.
    pub by_regime: BTreeMap<String, TradeStats>,
}

/// Counts of signals that never produced a trade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dropped<'a> {
    pub rejection_labels: Vec<&'a str>,
    pub no_data: usize,
    pub invariant_violations: usize,
}

impl BacktestSummary {
    pub fn compute(trades: &[ClosedTrade], dropped: &Dropped<'_>) -> Self {
        let mut rejection_reasons = BTreeMap::new();
        for label in &dropped.rejection_labels {
            *rejection_reasons.entry((*label).to_string()).or_insert(0) += 1;
        }

        let mut grouped: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();
        for trade in trades {
            grouped.entry(trade.regime.to_string()).or_default().push(trade);
        }
        let by_regime = grouped
            .into_iter()
            .map(|(regime, group)| (regime, TradeStats::compute(group)))
            .collect();

        let rejected = dropped.rejection_labels.len();
        Self {
            signals: trades.len() + rejected + dropped.no_data + dropped.invariant_violations,
            accepted: trades.len() + dropped.no_data + dropped.invariant_violations,
            rejected,
            no_data: dropped.no_data,
            invariant_violations: dropped.invariant_violations,
            low_confidence: trades.iter().filter(|t| t.low_confidence).count(),
            overall: TradeStats::compute(trades),
            rejection_reasons,
            exit_reasons: exit_reason_counts(trades),
            tp_hit_rates: tp_hit_rates(trades),
            by_regime,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Fraction of trades with positive pnl.
pub fn win_rate(trades: &[&ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64
}

/// Gross profits / gross losses.
///
/// Capped at 100.0 for edge cases (all winners, zero losses).
pub fn profit_factor(trades: &[&ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.total_pnl > 0.0)
        .map(|t| t.total_pnl)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.total_pnl < 0.0)
        .map(|t| t.total_pnl.abs())
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

pub fn exit_reason_counts(trades: &[ClosedTrade]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for trade in trades {
        *counts.entry(trade.exit_reason.label().to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn tp_hit_rates(trades: &[ClosedTrade]) -> [f64; TARGET_LEVELS] {
    let mut rates = [0.0; TARGET_LEVELS];
    if trades.is_empty() {
        return rates;
    }
    for (level, rate) in rates.iter_mut().enumerate() {
        let hits = trades.iter().filter(|t| t.tp_hit[level]).count();
        *rate = hits as f64 / trades.len() as f64;
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use exitlab_core::domain::{Direction, ExitKind, UnitKind};
    use exitlab_core::Regime;

    fn make_trade(pnl: f64, regime: Regime, reason: ExitKind, tp_hit: [bool; 3]) -> ClosedTrade {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        ClosedTrade {
            tag: None,
            direction: Direction::Long,
            regime,
            unit_kind: UnitKind::Points,
            entry_price: 2000.0,
            initial_stop: 1984.0,
            exit_price: 2000.0 + pnl,
            avg_exit_price: 2000.0 + pnl,
            exit_reason: reason,
            total_pnl: pnl,
            tp_hit,
            opened_at: t,
            closed_at: t,
            duration_secs: 0,
            events: Vec::new(),
            low_confidence: false,
        }
    }

    fn sample() -> Vec<ClosedTrade> {
        vec![
            make_trade(40.0, Regime::Trend, ExitKind::TrailingStop, [true, true, false]),
            make_trade(-16.0, Regime::Trend, ExitKind::StopLoss, [false, false, false]),
            make_trade(25.0, Regime::Range, ExitKind::Tp3, [true, true, true]),
            make_trade(2.0, Regime::Range, ExitKind::Timeout, [true, false, false]),
        ]
    }

    #[test]
    fn overall_stats() {
        let trades = sample();
        let stats = TradeStats::compute(&trades);
        assert_eq!(stats.trades, 4);
        assert!((stats.total_pnl - 51.0).abs() < 1e-10);
        assert!((stats.avg_pnl - 12.75).abs() < 1e-10);
        assert!((stats.win_rate - 0.75).abs() < 1e-10);
        assert!((stats.profit_factor - 67.0 / 16.0).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_all_winners_is_capped() {
        let trades = [make_trade(5.0, Regime::Range, ExitKind::Tp3, [true; 3])];
        let refs: Vec<&ClosedTrade> = trades.iter().collect();
        assert_eq!(profit_factor(&refs), 100.0);
    }

    #[test]
    fn empty_trade_list() {
        let summary = BacktestSummary::compute(&[], &Dropped::default());
        assert_eq!(summary.signals, 0);
        assert_eq!(summary.overall.win_rate, 0.0);
        assert_eq!(summary.tp_hit_rates, [0.0; 3]);
        assert!(summary.by_regime.is_empty());
    }

    #[test]
    fn summary_counts_and_breakdowns() {
        let trades = sample();
        let dropped = Dropped {
            rejection_labels: vec!["stop_wrong_side", "stop_wrong_side", "non_finite_price"],
            no_data: 1,
            invariant_violations: 0,
        };
        let summary = BacktestSummary::compute(&trades, &dropped);

        assert_eq!(summary.signals, 8);
        assert_eq!(summary.accepted, 5);
        assert_eq!(summary.rejected, 3);
        assert_eq!(summary.rejection_reasons["stop_wrong_side"], 2);
        assert_eq!(summary.exit_reasons["TRAILING_SL"], 1);
        assert_eq!(summary.exit_reasons["TIMEOUT"], 1);
        assert_eq!(summary.tp_hit_rates, [0.75, 0.5, 0.25]);

        let trend = &summary.by_regime["TREND"];
        assert_eq!(trend.trades, 2);
        assert!((trend.total_pnl - 24.0).abs() < 1e-10);
        assert_eq!(summary.by_regime["RANGE"].win_rate, 1.0);
    }
}
