//! Tie-break policies: resolve intrabar ambiguity between stop and targets.
//!
//! A single OHLC bar does not say whether the high or the low came first. When
//! one bar touches both the active stop and an unhit take-profit, the policy
//! decides which side is processed first.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Bar, Direction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Adversarial: the stop fills before any take-profit.
    #[default]
    StopFirst,
    /// Optimistic: take-profits first, then the stop is re-checked.
    TargetFirst,
    /// Infer the path from OHLC: the extreme closer to the open came first.
    OhlcPath,
}

impl TieBreakPolicy {
    /// Should take-profits be processed before the stop on this bar?
    pub fn targets_first(self, direction: Direction, bar: &Bar) -> bool {
        match self {
            Self::StopFirst => false,
            Self::TargetFirst => true,
            Self::OhlcPath => {
                let high_first = (bar.open - bar.high).abs() <= (bar.open - bar.low).abs();
                match direction {
                    Direction::Long => high_first,
                    Direction::Short => !high_first,
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StopFirst => "stop_first",
            Self::TargetFirst => "target_first",
            Self::OhlcPath => "ohlc_path",
        }
    }
}

impl fmt::Display for TieBreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn stop_first_never_prefers_targets() {
        let b = bar(100.0, 102.0, 98.0, 101.0);
        assert!(!TieBreakPolicy::StopFirst.targets_first(Direction::Long, &b));
        assert!(!TieBreakPolicy::StopFirst.targets_first(Direction::Short, &b));
    }

    #[test]
    fn target_first_always_prefers_targets() {
        let b = bar(100.0, 102.0, 98.0, 101.0);
        assert!(TieBreakPolicy::TargetFirst.targets_first(Direction::Long, &b));
        assert!(TieBreakPolicy::TargetFirst.targets_first(Direction::Short, &b));
    }

    #[test]
    fn ohlc_path_open_near_high() {
        // Open 101.5 is closer to the high: high came first.
        let b = bar(101.5, 102.0, 98.0, 99.0);
        assert!(TieBreakPolicy::OhlcPath.targets_first(Direction::Long, &b));
        assert!(!TieBreakPolicy::OhlcPath.targets_first(Direction::Short, &b));
    }

    #[test]
    fn ohlc_path_open_near_low() {
        let b = bar(98.5, 102.0, 98.0, 101.0);
        assert!(!TieBreakPolicy::OhlcPath.targets_first(Direction::Long, &b));
        assert!(TieBreakPolicy::OhlcPath.targets_first(Direction::Short, &b));
    }

    #[test]
    fn default_is_stop_first() {
        assert_eq!(TieBreakPolicy::default(), TieBreakPolicy::StopFirst);
    }

    #[test]
    fn parses_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: TieBreakPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"ohlc_path\"").unwrap();
        assert_eq!(w.policy, TieBreakPolicy::OhlcPath);
    }
}
