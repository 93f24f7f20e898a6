//! ExitLab CLI: backtest, regime classification, and profile inspection.
//!
//! Commands:
//! - `backtest`: replay a signal CSV against a bar CSV and save the report
//! - `classify`: show the regime votes for the window ending at a timestamp
//! - `profiles`: print the TREND/RANGE exit profiles in effect

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use exitlab_core::domain::UnitKind;
use exitlab_core::regime::window_ending_at;
use exitlab_core::{EngineConfig, ExitEngine, Regime};
use exitlab_runner::{load_bars, run_backtest_from_files, save_report, BacktestConfig, BacktestReport};

#[derive(Parser)]
#[command(
    name = "exitlab",
    about = "ExitLab CLI: regime-adaptive exit management engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    Points,
    Percentage,
}

impl From<UnitArg> for UnitKind {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Points => UnitKind::Points,
            UnitArg::Percentage => UnitKind::Percentage,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Replay signals against historical bars.
    Backtest {
        /// Bar CSV: timestamp,open,high,low,close,volume
        #[arg(long)]
        bars: PathBuf,

        /// Signal CSV: timestamp,direction,entry_price,initial_stop_price,tag
        #[arg(long)]
        signals: PathBuf,

        /// Path to a TOML config file. Defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the config's unit kind.
        #[arg(long, value_enum)]
        unit_kind: Option<UnitArg>,

        /// Output directory for report artifacts.
        #[arg(long, default_value = "results")]
        out: PathBuf,

        /// Print the full report as JSON instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Classify the regime of the bar window ending at a timestamp.
    Classify {
        #[arg(long)]
        bars: PathBuf,

        /// RFC 3339 timestamp. Defaults to the last bar.
        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the exit profiles in effect.
    Profiles {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also show absolute price levels for a long entered at this price.
        #[arg(long)]
        entry: Option<f64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            bars,
            signals,
            config,
            unit_kind,
            out,
            json,
        } => run_backtest_cmd(&bars, &signals, config.as_deref(), unit_kind, &out, json),
        Commands::Classify { bars, at, config } => {
            run_classify(&bars, at.as_deref(), config.as_deref())
        }
        Commands::Profiles { config, entry } => run_profiles(config.as_deref(), entry),
    }
}

fn load_config(path: Option<&Path>) -> Result<BacktestConfig> {
    match path {
        Some(path) => BacktestConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(BacktestConfig::default()),
    }
}

fn run_backtest_cmd(
    bars: &Path,
    signals: &Path,
    config_path: Option<&Path>,
    unit_kind: Option<UnitArg>,
    out: &Path,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(kind) = unit_kind {
        config.unit_kind = kind.into();
    }

    let report = run_backtest_from_files(&config, bars, signals)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    let run_dir = save_report(&report, out)?;
    info!(dir = %run_dir.display(), "artifacts saved");
    Ok(())
}

fn run_classify(bars_path: &Path, at: Option<&str>, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let bars = load_bars(bars_path)?;
    let Some(last) = bars.last() else {
        bail!("{} contains no bars", bars_path.display());
    };

    let at = match at {
        Some(ts) => DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("invalid timestamp '{ts}'"))?
            .with_timezone(&Utc),
        None => last.timestamp,
    };

    let engine = ExitEngine::new(config.engine);
    let window = window_ending_at(&bars, at, engine.config().classifier.window);
    if window.is_empty() {
        bail!("no bars at or before {at}");
    }
    let report = engine.classify(window);
    let votes = &report.votes;

    println!("Window:   {} bars ending {}", window.len(), at.to_rfc3339());
    println!("Regime:   {} ({}/5 votes)", report.regime, report.vote_count());
    println!("  EMA separation:          {}", mark(votes.ema_separation));
    println!("  Volatility expansion:    {}", mark(votes.volatility_expansion));
    println!("  Directional displacement:{}", mark(votes.directional_displacement));
    println!("  Move consistency:        {}", mark(votes.move_consistency));
    println!("  Structural trend:        {}", mark(votes.structural_trend));
    Ok(())
}

fn mark(vote: bool) -> &'static str {
    if vote {
        " yes"
    } else {
        " no"
    }
}

fn run_profiles(config_path: Option<&Path>, entry: Option<f64>) -> Result<()> {
    let EngineConfig {
        profiles,
        tie_break,
        stop_anchor,
        ..
    } = load_config(config_path)?.engine;

    println!("Tie-break: {tie_break}   Stop anchor: {stop_anchor:?}");
    for (unit_kind, regime, template) in profiles.entries() {
        println!();
        println!("[{unit_kind} / {regime}]");
        let unit = match unit_kind {
            UnitKind::Points => "",
            UnitKind::Percentage => "%",
        };
        for (i, level) in template.take_profits.iter().enumerate() {
            println!(
                "  TP{}:       {}{unit} closes {:.0}%",
                i + 1,
                level.offset,
                level.fraction * 100.0
            );
        }
        println!("  SL:        {}{unit}", template.stop_loss);
        println!("  Trailing:  {}{unit}", template.trailing);
        println!("  Breakeven: {}{unit}", template.breakeven);
        println!("  Timeout:   {}h", template.timeout_minutes as f64 / 60.0);

        if let Some(entry) = entry {
            let resolved = template
                .resolve(entry, unit_kind)
                .with_context(|| format!("cannot resolve {unit_kind}/{regime} at {entry}"))?;
            let levels: Vec<String> = resolved
                .take_profits
                .iter()
                .map(|l| format!("{:.5}", entry + l.offset))
                .collect();
            println!(
                "  Long @ {entry}: SL {:.5}, TP {}",
                entry - resolved.stop_loss,
                levels.join(" / ")
            );
        }
    }
    Ok(())
}

fn print_summary(report: &BacktestReport) {
    let s = &report.summary;
    println!();
    println!("=== Backtest Result ===");
    println!("Config:         {}", &report.config_fingerprint[..12]);
    println!("Bars:           {}", report.bar_count);
    println!(
        "Signals:        {} ({} accepted, {} rejected, {} no data)",
        s.signals, s.accepted, s.rejected, s.no_data
    );
    println!("Trades:         {}", s.overall.trades);
    println!();
    println!("--- Performance ---");
    println!("Total PnL:      {:.4}", s.overall.total_pnl);
    println!("Avg PnL:        {:.4}", s.overall.avg_pnl);
    println!("Win Rate:       {:.1}%", s.overall.win_rate * 100.0);
    println!("Profit Factor:  {:.2}", s.overall.profit_factor);
    println!(
        "TP Hit Rates:   {:.1}% / {:.1}% / {:.1}%",
        s.tp_hit_rates[0] * 100.0,
        s.tp_hit_rates[1] * 100.0,
        s.tp_hit_rates[2] * 100.0
    );
    for regime in [Regime::Trend, Regime::Range] {
        if let Some(stats) = s.by_regime.get(&regime.to_string()) {
            println!(
                "{:<15} {} trades, pnl {:.4}, win {:.1}%",
                format!("{regime}:"),
                stats.trades,
                stats.total_pnl,
                stats.win_rate * 100.0
            );
        }
    }
    if s.invariant_violations > 0 {
        println!();
        println!("WARNING: {} position(s) aborted on invariant violations", s.invariant_violations);
    }
    if s.low_confidence > 0 {
        println!("WARNING: {} trade(s) crossed a data gap", s.low_confidence);
    }
    println!();
}
