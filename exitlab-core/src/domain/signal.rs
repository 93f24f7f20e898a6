//! Signals: the strict record handed over by the signal-generation collaborator,
//! and its accepted form once a regime and unit kind are attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::profile::ProfileError;
use crate::regime::Regime;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Multiply a price delta by this to get signed pnl.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// Price `offset` away from `reference` in the favorable direction.
    pub fn favorable(self, reference: f64, offset: f64) -> f64 {
        reference + self.sign() * offset
    }

    /// Price `offset` away from `reference` in the adverse direction.
    pub fn adverse(self, reference: f64, offset: f64) -> f64 {
        reference - self.sign() * offset
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// How an instrument's thresholds are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Fixed absolute price deltas (metals, forex).
    Points,
    /// Percent of entry price (crypto), converted to absolute deltas at acceptance.
    Percentage,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Points => write!(f, "points"),
            Self::Percentage => write!(f, "percentage"),
        }
    }
}

/// Raw signal as produced by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInput {
    pub direction: Direction,
    pub entry_price: f64,
    pub initial_stop_price: f64,
    pub entry_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl SignalInput {
    /// Check the signal is economically valid: finite prices, stop on the
    /// adverse side of entry, non-zero stop distance.
    pub fn validate(&self) -> Result<(), SignalRejected> {
        let reject = |reason| {
            Err(SignalRejected {
                entry_timestamp: self.entry_timestamp,
                reason,
            })
        };

        if !self.entry_price.is_finite() || !self.initial_stop_price.is_finite() {
            return reject(RejectReason::NonFinitePrice);
        }
        if self.entry_price <= 0.0 {
            return reject(RejectReason::NonPositiveEntry {
                entry: self.entry_price,
            });
        }

        let distance = self.direction.sign() * (self.entry_price - self.initial_stop_price);
        if distance < 0.0 {
            return reject(RejectReason::StopWrongSide {
                direction: self.direction,
                entry: self.entry_price,
                stop: self.initial_stop_price,
            });
        }
        if distance <= 0.0 {
            return reject(RejectReason::NonPositiveDistance { distance });
        }
        Ok(())
    }
}

/// An accepted signal: validated, with the regime fixed at signal time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub entry_price: f64,
    pub initial_stop_price: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub regime: Regime,
    pub unit_kind: UnitKind,
    pub tag: Option<String>,
}

impl Signal {
    pub fn new(
        input: SignalInput,
        regime: Regime,
        unit_kind: UnitKind,
    ) -> Result<Self, SignalRejected> {
        input.validate()?;
        Ok(Self {
            direction: input.direction,
            entry_price: input.entry_price,
            initial_stop_price: input.initial_stop_price,
            entry_timestamp: input.entry_timestamp,
            regime,
            unit_kind,
            tag: input.tag,
        })
    }

    /// Absolute distance between entry and the signal's own stop.
    pub fn stop_distance(&self) -> f64 {
        (self.entry_price - self.initial_stop_price).abs()
    }
}

/// Why a signal was refused before any position was created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("entry or stop price is not finite")]
    NonFinitePrice,

    #[error("entry price {entry} is not positive")]
    NonPositiveEntry { entry: f64 },

    #[error("{direction} signal has stop {stop} on the wrong side of entry {entry}")]
    StopWrongSide {
        direction: Direction,
        entry: f64,
        stop: f64,
    },

    #[error("stop distance {distance} is not positive")]
    NonPositiveDistance { distance: f64 },

    #[error("profile cannot be resolved: {0}")]
    Profile(#[from] ProfileError),
}

impl RejectReason {
    /// Short stable label, used as a counter key in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NonFinitePrice => "non_finite_price",
            Self::NonPositiveEntry { .. } => "non_positive_entry",
            Self::StopWrongSide { .. } => "stop_wrong_side",
            Self::NonPositiveDistance { .. } => "non_positive_distance",
            Self::Profile(_) => "invalid_profile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("signal at {entry_timestamp} rejected: {reason}")]
pub struct SignalRejected {
    pub entry_timestamp: DateTime<Utc>,
    pub reason: RejectReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input(direction: Direction, entry: f64, stop: f64) -> SignalInput {
        SignalInput {
            direction,
            entry_price: entry,
            initial_stop_price: stop,
            entry_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            tag: None,
        }
    }

    #[test]
    fn valid_long_and_short() {
        assert!(input(Direction::Long, 2000.0, 1984.0).validate().is_ok());
        assert!(input(Direction::Short, 50000.0, 50300.0).validate().is_ok());
    }

    #[test]
    fn long_with_stop_above_entry_is_rejected() {
        let err = input(Direction::Long, 2000.0, 2010.0).validate().unwrap_err();
        assert!(matches!(err.reason, RejectReason::StopWrongSide { .. }));
        assert_eq!(err.reason.label(), "stop_wrong_side");
    }

    #[test]
    fn short_with_stop_below_entry_is_rejected() {
        let err = input(Direction::Short, 2000.0, 1990.0).validate().unwrap_err();
        assert!(matches!(err.reason, RejectReason::StopWrongSide { .. }));
    }

    #[test]
    fn zero_distance_is_rejected() {
        let err = input(Direction::Long, 2000.0, 2000.0).validate().unwrap_err();
        assert!(matches!(err.reason, RejectReason::NonPositiveDistance { .. }));
    }

    #[test]
    fn nan_price_is_rejected() {
        let err = input(Direction::Long, f64::NAN, 1990.0).validate().unwrap_err();
        assert_eq!(err.reason, RejectReason::NonFinitePrice);
    }

    #[test]
    fn favorable_and_adverse_offsets() {
        assert_eq!(Direction::Long.favorable(2000.0, 30.0), 2030.0);
        assert_eq!(Direction::Long.adverse(2000.0, 16.0), 1984.0);
        assert_eq!(Direction::Short.favorable(50000.0, 500.0), 49500.0);
        assert_eq!(Direction::Short.adverse(50000.0, 300.0), 50300.0);
    }

    #[test]
    fn accepted_signal_keeps_tag() {
        let mut raw = input(Direction::Long, 2000.0, 1984.0);
        raw.tag = Some("order_block".into());
        let signal = Signal::new(raw, Regime::Trend, UnitKind::Points).unwrap();
        assert_eq!(signal.tag.as_deref(), Some("order_block"));
        assert_eq!(signal.stop_distance(), 16.0);
    }
}
