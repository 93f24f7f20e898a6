//! Reporting and export: JSON, CSV, and Markdown.
//!
//! - **JSON**: full report round-trip with schema versioning
//! - **CSV**: one row per closed trade, plus an exit-event tape
//! - **Markdown**: human-readable summary
//!
//! Unknown schema versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use exitlab_core::domain::ClosedTrade;

use crate::runner::{BacktestReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &BacktestReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize BacktestReport to JSON")
}

/// Deserialize a report, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestReport> {
    let report: BacktestReport =
        serde_json::from_str(json).context("failed to deserialize BacktestReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

fn flag(hit: bool) -> &'static str {
    if hit {
        "1"
    } else {
        "0"
    }
}

/// One row per closed trade.
///
/// Columns: opened_at, closed_at, direction, regime, unit_kind, tag,
/// entry_price, initial_stop, exit_price, avg_exit_price, exit_reason,
/// total_pnl, tp1_hit, tp2_hit, tp3_hit, duration_secs, low_confidence
pub fn export_trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "opened_at",
        "closed_at",
        "direction",
        "regime",
        "unit_kind",
        "tag",
        "entry_price",
        "initial_stop",
        "exit_price",
        "avg_exit_price",
        "exit_reason",
        "total_pnl",
        "tp1_hit",
        "tp2_hit",
        "tp3_hit",
        "duration_secs",
        "low_confidence",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.opened_at.to_rfc3339(),
            &t.closed_at.to_rfc3339(),
            &t.direction.to_string(),
            &t.regime.to_string(),
            &t.unit_kind.to_string(),
            t.tag.as_deref().unwrap_or(""),
            &format!("{:.6}", t.entry_price),
            &format!("{:.6}", t.initial_stop),
            &format!("{:.6}", t.exit_price),
            &format!("{:.6}", t.avg_exit_price),
            t.exit_reason.label(),
            &format!("{:.6}", t.total_pnl),
            flag(t.tp_hit[0]),
            flag(t.tp_hit[1]),
            flag(t.tp_hit[2]),
            &t.duration_secs.to_string(),
            flag(t.low_confidence),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Every exit event of every trade, keyed by the trade's open time.
pub fn export_events_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["opened_at", "timestamp", "kind", "fraction", "price", "pnl"])?;
    for t in trades {
        for e in &t.events {
            wtr.write_record([
                &t.opened_at.to_rfc3339(),
                &e.timestamp.to_rfc3339(),
                e.kind.label(),
                &format!("{:.6}", e.fraction),
                &format!("{:.6}", e.price),
                &format!("{:.6}", e.pnl),
            ])?;
        }
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Markdown ───────────────────────────────────────────────────────

pub fn generate_report(report: &BacktestReport) -> String {
    let s = &report.summary;
    let mut md = String::with_capacity(1024);

    md.push_str("# Backtest Report\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Config | {} |\n", report.config_fingerprint));
    md.push_str(&format!("| Unit kind | {} |\n", report.config.unit_kind));
    md.push_str(&format!("| Bars | {} |\n", report.bar_count));
    md.push_str(&format!(
        "| Signals | {} ({} accepted, {} rejected, {} without data) |\n",
        s.signals, s.accepted, s.rejected, s.no_data
    ));
    if s.invariant_violations > 0 {
        md.push_str(&format!(
            "| Invariant violations | **{}** |\n",
            s.invariant_violations
        ));
    }
    if s.low_confidence > 0 {
        md.push_str(&format!("| Low-confidence trades | {} |\n", s.low_confidence));
    }
    md.push('\n');

    md.push_str("## Performance\n\n");
    md.push_str("| Slice | Trades | Total PnL | Avg PnL | Win Rate | Profit Factor |\n");
    md.push_str("| --- | --- | --- | --- | --- | --- |\n");
    let rows = std::iter::once(("ALL", &s.overall))
        .chain(s.by_regime.iter().map(|(k, v)| (k.as_str(), v)));
    for (label, stats) in rows {
        md.push_str(&format!(
            "| {} | {} | {:.4} | {:.4} | {:.1}% | {:.2} |\n",
            label,
            stats.trades,
            stats.total_pnl,
            stats.avg_pnl,
            stats.win_rate * 100.0,
            stats.profit_factor
        ));
    }
    md.push('\n');

    md.push_str("## Exits\n\n");
    for (reason, count) in &s.exit_reasons {
        md.push_str(&format!("- {reason}: {count}\n"));
    }
    md.push_str(&format!(
        "- TP hit rates: {:.1}% / {:.1}% / {:.1}%\n",
        s.tp_hit_rates[0] * 100.0,
        s.tp_hit_rates[1] * 100.0,
        s.tp_hit_rates[2] * 100.0
    ));

    if !s.rejection_reasons.is_empty() {
        md.push_str("\n## Rejections\n\n");
        for (reason, count) in &s.rejection_reasons {
            md.push_str(&format!("- {reason}: {count}\n"));
        }
    }

    md
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `report.json`, `trades.csv`, `events.csv` and `report.md` into
/// `output_dir/<fingerprint prefix>/`. Returns the created directory.
pub fn save_report(report: &BacktestReport, output_dir: &Path) -> Result<PathBuf> {
    let prefix: String = report.config_fingerprint.chars().take(12).collect();
    let run_dir = output_dir.join(prefix);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create report dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("report.json"), export_json(report)?)?;
    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(&report.trades)?)?;
    std::fs::write(run_dir.join("events.csv"), export_events_csv(&report.trades)?)?;
    std::fs::write(run_dir.join("report.md"), generate_report(report))?;

    Ok(run_dir)
}

pub fn load_report(dir: &Path) -> Result<BacktestReport> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use exitlab_core::domain::{Direction, ExitEvent, ExitKind, UnitKind};
    use exitlab_core::Regime;

    use crate::config::BacktestConfig;
    use crate::metrics::{BacktestSummary, Dropped};

    fn sample_trade() -> ClosedTrade {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        ClosedTrade {
            tag: Some("sweep".into()),
            direction: Direction::Short,
            regime: Regime::Range,
            unit_kind: UnitKind::Percentage,
            entry_price: 50_000.0,
            initial_stop: 50_300.0,
            exit_price: 50_300.0,
            avg_exit_price: 50_300.0,
            exit_reason: ExitKind::StopLoss,
            total_pnl: -300.0,
            tp_hit: [false; 3],
            opened_at: t,
            closed_at: t + chrono::Duration::hours(3),
            duration_secs: 3 * 3600,
            events: vec![ExitEvent {
                kind: ExitKind::StopLoss,
                fraction: 1.0,
                price: 50_300.0,
                pnl: -300.0,
                timestamp: t + chrono::Duration::hours(3),
            }],
            low_confidence: false,
        }
    }

    fn sample_report() -> BacktestReport {
        let trades = vec![sample_trade()];
        BacktestReport {
            schema_version: SCHEMA_VERSION,
            config_fingerprint: "ab".repeat(32),
            config: BacktestConfig::default(),
            bar_count: 10,
            summary: BacktestSummary::compute(&trades, &Dropped::default()),
            trades,
            dropped: Vec::new(),
        }
    }

    #[test]
    fn trades_csv_has_header_and_row() {
        let csv = export_trades_csv(&[sample_trade()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("opened_at,closed_at,direction"));
        assert!(lines[1].contains(",short,RANGE,percentage,sweep,"));
        assert!(lines[1].contains(",SL,"));
    }

    #[test]
    fn events_csv_one_row_per_event() {
        let csv = export_events_csv(&[sample_trade()]).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn json_round_trip_keeps_trades() {
        let report = sample_report();
        let json = export_json(&report).unwrap();
        let back = import_json(&json).unwrap();
        assert_eq!(back.trades, report.trades);
        assert_eq!(back.summary, report.summary);
    }

    #[test]
    fn future_schema_is_rejected() {
        let mut report = sample_report();
        report.schema_version = SCHEMA_VERSION + 1;
        let json = export_json(&report).unwrap();
        assert!(import_json(&json).is_err());
    }

    #[test]
    fn markdown_mentions_exit_reasons() {
        let md = generate_report(&sample_report());
        assert!(md.contains("# Backtest Report"));
        assert!(md.contains("- SL: 1"));
        assert!(md.contains("| RANGE | 1 |"));
    }
}
