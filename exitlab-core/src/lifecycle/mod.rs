/// Position lifecycle: OPEN → PARTIAL(TPk)* → CLOSED(reason)
///
/// **Per-bar order of checks:**
/// 1. Timeout dominates everything else
/// 2. Stop vs. take-profits, with same-bar ambiguity resolved by a `TieBreakPolicy`
/// 3. Take-profits strictly ascending; TP1 moves the stop to breakeven
/// 4. Trailing ratchet once TP1 has filled
///
/// **Module Structure:**
/// - `machine`: `open_position`, `step`, `preview`
/// - `ratchet`: tighten-only stop
/// - `path_policy`: same-bar stop/target tie-break
pub mod machine;
pub mod path_policy;
pub mod ratchet;

pub use machine::{open_position, preview, step, Transition};
pub use path_policy::TieBreakPolicy;
pub use ratchet::StopRatchet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Signal;
use crate::profile::ParameterProfile;

/// Where the initial stop is placed when a position opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAnchor {
    /// The signal's own `initial_stop_price`.
    #[default]
    Signal,
    /// Entry ∓ the profile's stop-loss offset.
    Profile,
}

impl StopAnchor {
    pub fn initial_stop(self, signal: &Signal, profile: &ParameterProfile) -> f64 {
        match self {
            Self::Signal => signal.initial_stop_price,
            Self::Profile => signal
                .direction
                .adverse(signal.entry_price, profile.stop_loss),
        }
    }
}

/// A bookkeeping rule was about to be broken. Never clamped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("fill of {requested} exceeds remaining fraction {remaining}")]
    FractionUnderflow { requested: f64, remaining: f64 },

    #[error("fill fraction {fraction} is not positive")]
    NonPositiveFraction { fraction: f64 },

    #[error("fill price {price} is not finite")]
    NonFinitePrice { price: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("position is already closed")]
    AlreadyClosed,

    #[error("bar at {bar} precedes the last update at {last}")]
    NonChronologicalBar {
        bar: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, SignalInput, UnitKind};
    use crate::profile::ProfileTable;
    use crate::regime::Regime;
    use chrono::TimeZone;

    #[test]
    fn profile_anchor_uses_sl_offset() {
        let input = SignalInput {
            direction: Direction::Short,
            entry_price: 50_000.0,
            initial_stop_price: 50_450.0,
            entry_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            tag: None,
        };
        let signal = Signal::new(input, Regime::Range, UnitKind::Percentage).unwrap();
        let profile = ProfileTable::default()
            .select(Regime::Range, UnitKind::Percentage)
            .resolve(50_000.0, UnitKind::Percentage)
            .unwrap();

        assert_eq!(StopAnchor::Signal.initial_stop(&signal, &profile), 50_450.0);
        let anchored = StopAnchor::Profile.initial_stop(&signal, &profile);
        assert!((anchored - 50_300.0).abs() < 1e-9);
    }
}
