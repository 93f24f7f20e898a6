/// Stop ratchet: the stop may tighten, never loosen.
///
/// Both the breakeven move after TP1 and every trailing candidate go through
/// `tighten`, so a wider trailing distance can never pull the stop back.
use serde::{Deserialize, Serialize};

use crate::domain::Direction;

/// Owns the current stop level of one position.
///
/// - Long: the stop can only rise (max of current and proposed)
/// - Short: the stop can only fall (min of current and proposed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRatchet {
    direction: Direction,
    initial: f64,
    current: f64,
}

impl StopRatchet {
    pub fn new(direction: Direction, initial: f64) -> Self {
        Self {
            direction,
            initial,
            current: initial,
        }
    }

    /// Propose a new stop level. Returns `true` if the stop moved.
    ///
    /// # Example
    /// ```
    /// use exitlab_core::domain::Direction;
    /// use exitlab_core::lifecycle::StopRatchet;
    ///
    /// let mut stop = StopRatchet::new(Direction::Long, 1984.0);
    ///
    /// // Tightening: 1984 → 2000 (allowed)
    /// assert!(stop.tighten(2000.0));
    ///
    /// // Loosening: 2000 → 1990 (blocked)
    /// assert!(!stop.tighten(1990.0));
    /// assert_eq!(stop.current(), 2000.0);
    /// ```
    pub fn tighten(&mut self, proposed: f64) -> bool {
        if !proposed.is_finite() {
            return false;
        }
        let tighter = match self.direction {
            Direction::Long => proposed > self.current,
            Direction::Short => proposed < self.current,
        };
        if tighter {
            self.current = proposed;
        }
        tighter
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }

    /// Whether the stop has left its initial level (breakeven or trailing).
    pub fn has_moved(&self) -> bool {
        self.current != self.initial
    }

    /// Has the bar's adverse extreme reached the stop?
    pub fn is_touched(&self, high: f64, low: f64) -> bool {
        match self.direction {
            Direction::Long => low <= self.current,
            Direction::Short => high >= self.current,
        }
    }
}
