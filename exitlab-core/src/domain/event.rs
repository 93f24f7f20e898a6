//! Exit events: one record per fill, partial or full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What caused a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitKind {
    #[serde(rename = "TP1")]
    Tp1,
    #[serde(rename = "TP2")]
    Tp2,
    #[serde(rename = "TP3")]
    Tp3,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TRAILING_SL")]
    TrailingStop,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "EXTERNAL")]
    External,
}

impl ExitKind {
    /// Take-profit kind for a zero-based level index.
    ///
    /// # Panics
    /// Panics if `level > 2`; there are exactly three take-profit levels.
    pub fn take_profit(level: usize) -> Self {
        match level {
            0 => Self::Tp1,
            1 => Self::Tp2,
            2 => Self::Tp3,
            _ => panic!("take-profit level {level} out of range"),
        }
    }

    /// Zero-based level index for take-profit kinds.
    pub fn target_level(self) -> Option<usize> {
        match self {
            Self::Tp1 => Some(0),
            Self::Tp2 => Some(1),
            Self::Tp3 => Some(2),
            _ => None,
        }
    }

    pub fn is_take_profit(self) -> bool {
        self.target_level().is_some()
    }

    pub fn is_stop(self) -> bool {
        matches!(self, Self::StopLoss | Self::TrailingStop)
    }

    /// Stable label matching the serialized form.
    pub fn label(self) -> &'static str {
        match self {
            Self::Tp1 => "TP1",
            Self::Tp2 => "TP2",
            Self::Tp3 => "TP3",
            Self::StopLoss => "SL",
            Self::TrailingStop => "TRAILING_SL",
            Self::Timeout => "TIMEOUT",
            Self::External => "EXTERNAL",
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable record of one fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub kind: ExitKind,
    /// Fraction of the original position closed by this fill.
    pub fraction: f64,
    pub price: f64,
    /// `fraction × signed(price − entry)`.
    pub pnl: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_profit_levels_round_trip() {
        for level in 0..3 {
            assert_eq!(ExitKind::take_profit(level).target_level(), Some(level));
        }
        assert_eq!(ExitKind::StopLoss.target_level(), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn take_profit_level_out_of_range() {
        ExitKind::take_profit(3);
    }

    #[test]
    fn serialized_names_match_labels() {
        for kind in [
            ExitKind::Tp1,
            ExitKind::Tp2,
            ExitKind::Tp3,
            ExitKind::StopLoss,
            ExitKind::TrailingStop,
            ExitKind::Timeout,
            ExitKind::External,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.label()));
        }
    }
}
