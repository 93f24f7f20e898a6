//! ClosedTrade: immutable summary of a fully closed position.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::event::{ExitEvent, ExitKind};
use super::signal::{Direction, UnitKind};
use crate::profile::TARGET_LEVELS;
use crate::regime::Regime;

/// What gets handed to persistence once a position reaches CLOSED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    // ── Signal ──
    pub tag: Option<String>,
    pub direction: Direction,
    pub regime: Regime,
    pub unit_kind: UnitKind,

    // ── Prices ──
    pub entry_price: f64,
    pub initial_stop: f64,
    /// Price of the final fill.
    pub exit_price: f64,
    /// Fraction-weighted average over all fills.
    pub avg_exit_price: f64,

    // ── Outcome ──
    pub exit_reason: ExitKind,
    /// Sum of slice pnl, in price units per unit of original size.
    pub total_pnl: f64,
    pub tp_hit: [bool; TARGET_LEVELS],

    // ── Timing ──
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub duration_secs: i64,

    pub events: Vec<ExitEvent>,
    /// Simulated over bars with a data gap.
    pub low_confidence: bool,
}

impl ClosedTrade {
    /// Return as a fraction of entry price.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.total_pnl / self.entry_price
    }

    pub fn is_winner(&self) -> bool {
        self.total_pnl > 0.0
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs)
    }

    pub fn targets_hit(&self) -> usize {
        self.tp_hit.iter().filter(|hit| **hit).count()
    }
}
