//! CSV loading for bars and signals.
//!
//! Bars: `timestamp,open,high,low,close,volume` (volume optional).
//! Signals: `timestamp,direction,entry_price,initial_stop_price,tag` (tag optional).
//! Timestamps are RFC 3339. Bars must be strictly increasing and sane; gaps
//! are left in place for the backtest driver to flag.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use exitlab_core::domain::{Bar, Direction, SignalInput};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("bar {row} at {timestamp} does not come after the previous bar")]
    NonIncreasingTimestamp {
        row: usize,
        timestamp: DateTime<Utc>,
    },

    #[error("bar {row} at {timestamp} has inconsistent OHLC values")]
    InsaneBar {
        row: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Load and validate a bar series from a CSV file.
pub fn load_bars(path: &Path) -> Result<Vec<Bar>, LoadError> {
    parse_bars(open(path)?)
}

/// Load signal records from a CSV file.
pub fn load_signals(path: &Path) -> Result<Vec<SignalInput>, LoadError> {
    parse_signals(open(path)?)
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn parse_bars<R: Read>(reader: R) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars: Vec<Bar> = Vec::new();

    for (row, record) in rdr.deserialize::<Bar>().enumerate() {
        let bar = record?;
        if !bar.is_sane() {
            return Err(LoadError::InsaneBar {
                row,
                timestamp: bar.timestamp,
            });
        }
        if let Some(prev) = bars.last() {
            if bar.timestamp <= prev.timestamp {
                return Err(LoadError::NonIncreasingTimestamp {
                    row,
                    timestamp: bar.timestamp,
                });
            }
        }
        bars.push(bar);
    }

    Ok(bars)
}

/// Row layout of the signal CSV.
#[derive(Debug, Deserialize)]
struct SignalRow {
    timestamp: DateTime<Utc>,
    direction: Direction,
    entry_price: f64,
    initial_stop_price: f64,
    #[serde(default)]
    tag: Option<String>,
}

impl From<SignalRow> for SignalInput {
    fn from(row: SignalRow) -> Self {
        Self {
            direction: row.direction,
            entry_price: row.entry_price,
            initial_stop_price: row.initial_stop_price,
            entry_timestamp: row.timestamp,
            tag: row.tag.filter(|t| !t.is_empty()),
        }
    }
}

/// Parse signals. Economic validity is checked later, so that rejections are
/// counted in the summary rather than aborting the load.
pub fn parse_signals<R: Read>(reader: R) -> Result<Vec<SignalInput>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    rdr.deserialize::<SignalRow>()
        .map(|record| Ok(record?.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARS: &str = "\
timestamp,open,high,low,close,volume
2024-03-01T09:00:00Z,2000.0,2010.0,1995.0,2005.0,1200
2024-03-01T10:00:00Z,2005.0,2031.0,2001.0,2025.0,1500
2024-03-01T11:00:00Z,2025.0,2040.0,2020.0,2035.0,900
";

    #[test]
    fn parses_well_formed_bars() {
        let bars = parse_bars(BARS.as_bytes()).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].high, 2031.0);
        assert_eq!(bars[2].volume, 900.0);
    }

    #[test]
    fn volume_column_is_optional() {
        let csv = "timestamp,open,high,low,close\n2024-03-01T09:00:00Z,1,2,0.5,1.5\n";
        let bars = parse_bars(csv.as_bytes()).unwrap();
        assert_eq!(bars[0].volume, 0.0);
    }

    #[test]
    fn repeated_timestamp_is_rejected() {
        let csv = "\
timestamp,open,high,low,close,volume
2024-03-01T09:00:00Z,2000,2010,1995,2005,1
2024-03-01T09:00:00Z,2005,2010,1995,2000,1
";
        let err = parse_bars(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::NonIncreasingTimestamp { row: 1, .. }));
    }

    #[test]
    fn high_below_low_is_rejected() {
        let csv = "timestamp,open,high,low,close,volume\n2024-03-01T09:00:00Z,2000,1990,1995,2000,1\n";
        let err = parse_bars(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::InsaneBar { row: 0, .. }));
    }

    #[test]
    fn bad_timestamp_is_a_csv_error() {
        let csv = "timestamp,open,high,low,close,volume\nyesterday,1,2,0.5,1.5,1\n";
        assert!(matches!(
            parse_bars(csv.as_bytes()),
            Err(LoadError::Csv(_))
        ));
    }

    #[test]
    fn parses_signals_with_and_without_tag() {
        let csv = "\
timestamp,direction,entry_price,initial_stop_price,tag
2024-03-01T09:00:00Z,long,2000,1984,order_block
2024-03-01T12:00:00Z,short,2050,2066,
";
        let signals = parse_signals(csv.as_bytes()).unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].direction, Direction::Long);
        assert_eq!(signals[0].tag.as_deref(), Some("order_block"));
        assert_eq!(signals[1].direction, Direction::Short);
        assert_eq!(signals[1].tag, None);
    }

    #[test]
    fn economically_invalid_signal_still_loads() {
        let csv = "timestamp,direction,entry_price,initial_stop_price,tag\n2024-03-01T09:00:00Z,long,2000,2010,\n";
        let signals = parse_signals(csv.as_bytes()).unwrap();
        assert!(signals[0].validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_bars(Path::new("/nonexistent/bars.csv")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bars.csv"));
    }
}
