//! Position: the mutable record a single signal turns into once accepted.
//!
//! Owned exclusively by whoever drives its lifecycle (a backtest simulation or
//! the live monitor). Bar-driven transitions live in `lifecycle::machine`; this
//! module holds the bookkeeping every transition goes through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::{ExitEvent, ExitKind};
use super::signal::{Direction, Signal};
use super::trade::ClosedTrade;
use super::FRACTION_EPSILON;
use crate::lifecycle::ratchet::StopRatchet;
use crate::lifecycle::{InvariantViolation, LifecycleError};
use crate::profile::{ParameterProfile, TARGET_LEVELS};

/// Lifecycle state. `Partial` and `Closed` carry the kind of the last fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Partial(ExitKind),
    Closed(ExitKind),
}

impl PositionState {
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed(_))
    }

    pub fn exit_reason(self) -> Option<ExitKind> {
        match self {
            Self::Closed(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Partial(kind) => write!(f, "PARTIAL({kind})"),
            Self::Closed(kind) => write!(f, "CLOSED({kind})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub(crate) signal: Signal,
    pub(crate) profile: ParameterProfile,
    pub(crate) stop: StopRatchet,
    pub(crate) remaining_fraction: f64,
    pub(crate) realized_pnl: f64,
    pub(crate) tp_hit: [bool; TARGET_LEVELS],
    /// Highest high (long) or lowest low (short) seen since entry.
    pub(crate) best_extreme: f64,
    pub(crate) opened_at: DateTime<Utc>,
    pub(crate) last_update: DateTime<Utc>,
    pub(crate) state: PositionState,
    pub(crate) events: Vec<ExitEvent>,
    pub(crate) low_confidence: bool,
}

impl Position {
    /// Open a full-size position for an accepted signal.
    pub fn new(signal: Signal, profile: ParameterProfile, initial_stop: f64) -> Self {
        let opened_at = signal.entry_timestamp;
        let best_extreme = signal.entry_price;
        let stop = StopRatchet::new(signal.direction, initial_stop);
        Self {
            signal,
            profile,
            stop,
            remaining_fraction: 1.0,
            realized_pnl: 0.0,
            tp_hit: [false; TARGET_LEVELS],
            best_extreme,
            opened_at,
            last_update: opened_at,
            state: PositionState::Open,
            events: Vec::new(),
            low_confidence: false,
        }
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn profile(&self) -> &ParameterProfile {
        &self.profile
    }

    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    pub fn entry_price(&self) -> f64 {
        self.signal.entry_price
    }

    pub fn current_stop(&self) -> f64 {
        self.stop.current()
    }

    pub fn initial_stop(&self) -> f64 {
        self.stop.initial()
    }

    pub fn remaining_fraction(&self) -> f64 {
        self.remaining_fraction
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn tp_hit(&self) -> [bool; TARGET_LEVELS] {
        self.tp_hit
    }

    pub fn best_extreme(&self) -> f64 {
        self.best_extreme
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn events(&self) -> &[ExitEvent] {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn is_low_confidence(&self) -> bool {
        self.low_confidence
    }

    /// Flag the position as simulated over incomplete data.
    pub fn mark_low_confidence(&mut self) {
        self.low_confidence = true;
    }

    /// Absolute price of take-profit level `level` (zero-based).
    pub fn target_price(&self, level: usize) -> f64 {
        self.signal
            .direction
            .favorable(self.signal.entry_price, self.profile.take_profits[level].offset)
    }

    /// Lowest take-profit level that has not filled yet.
    pub fn next_target(&self) -> Option<usize> {
        self.tp_hit.iter().position(|hit| !hit)
    }

    /// Close `fraction` of the original size at `price`.
    ///
    /// Does not change `state`; callers decide between `Partial` and `Closed`.
    pub(crate) fn record_fill(
        &mut self,
        kind: ExitKind,
        fraction: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<ExitEvent, InvariantViolation> {
        if !price.is_finite() {
            return Err(InvariantViolation::NonFinitePrice { price });
        }
        if !(fraction > 0.0) {
            return Err(InvariantViolation::NonPositiveFraction { fraction });
        }
        if fraction > self.remaining_fraction + FRACTION_EPSILON {
            return Err(InvariantViolation::FractionUnderflow {
                requested: fraction,
                remaining: self.remaining_fraction,
            });
        }

        let pnl = fraction * self.signal.direction.sign() * (price - self.signal.entry_price);
        // Within epsilon of the remainder: snap to zero rather than go negative.
        self.remaining_fraction = (self.remaining_fraction - fraction).max(0.0);
        self.realized_pnl += pnl;

        let event = ExitEvent {
            kind,
            fraction,
            price,
            pnl,
            timestamp,
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Close whatever is left at `price` and finalize with `kind`.
    ///
    /// Emits no event if nothing meaningful remains.
    pub(crate) fn close_remaining(
        &mut self,
        kind: ExitKind,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), InvariantViolation> {
        if self.remaining_fraction > FRACTION_EPSILON {
            self.record_fill(kind, self.remaining_fraction, price, timestamp)?;
        }
        self.remaining_fraction = 0.0;
        self.state = PositionState::Closed(kind);
        Ok(())
    }

    /// Force-close the remainder, e.g. when a backtest window runs out of bars.
    pub fn force_close(
        &mut self,
        kind: ExitKind,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if self.is_closed() {
            return Err(LifecycleError::AlreadyClosed);
        }
        self.close_remaining(kind, price, timestamp)?;
        self.last_update = self.last_update.max(timestamp);
        Ok(())
    }

    /// Record a fill that happened outside the engine (broker-side close).
    ///
    /// Take-profit levels whose cumulative fraction is already covered by the
    /// closed amount are marked consumed; consuming TP1 arms breakeven and
    /// trailing exactly as a TP1 fill would.
    pub fn apply_external(
        &mut self,
        fraction: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<ExitEvent, LifecycleError> {
        if self.is_closed() {
            return Err(LifecycleError::AlreadyClosed);
        }
        let event = self.record_fill(ExitKind::External, fraction, price, timestamp)?;
        self.last_update = self.last_update.max(timestamp);

        if self.remaining_fraction <= FRACTION_EPSILON {
            self.remaining_fraction = 0.0;
            self.state = PositionState::Closed(ExitKind::External);
            return Ok(event);
        }

        self.consume_covered_targets();
        self.state = PositionState::Partial(ExitKind::External);
        Ok(event)
    }

    fn consume_covered_targets(&mut self) {
        let closed = 1.0 - self.remaining_fraction;
        let mut cumulative = 0.0;
        for level in 0..TARGET_LEVELS {
            cumulative += self.profile.take_profits[level].fraction;
            if cumulative > closed + FRACTION_EPSILON {
                break;
            }
            if !self.tp_hit[level] {
                self.tp_hit[level] = true;
                if level == 0 {
                    self.arm_breakeven();
                }
            }
        }
    }

    /// Move the stop to entry ± breakeven offset (tighten-only).
    pub(crate) fn arm_breakeven(&mut self) {
        let breakeven = self
            .signal
            .direction
            .favorable(self.signal.entry_price, self.profile.breakeven);
        self.stop.tighten(breakeven);
    }

    /// Summary of a closed position; `None` while still open.
    pub fn to_closed_trade(&self) -> Option<ClosedTrade> {
        let exit_reason = self.state.exit_reason()?;
        let (exit_price, closed_at) = self
            .events
            .last()
            .map_or((self.signal.entry_price, self.last_update), |e| {
                (e.price, e.timestamp)
            });

        let filled: f64 = self.events.iter().map(|e| e.fraction).sum();
        let avg_exit_price = if filled > 0.0 {
            self.events.iter().map(|e| e.fraction * e.price).sum::<f64>() / filled
        } else {
            exit_price
        };

        Some(ClosedTrade {
            tag: self.signal.tag.clone(),
            direction: self.signal.direction,
            regime: self.signal.regime,
            unit_kind: self.signal.unit_kind,
            entry_price: self.signal.entry_price,
            initial_stop: self.stop.initial(),
            exit_price,
            avg_exit_price,
            exit_reason,
            total_pnl: self.realized_pnl,
            tp_hit: self.tp_hit,
            opened_at: self.opened_at,
            closed_at,
            duration_secs: (closed_at - self.opened_at).num_seconds(),
            events: self.events.clone(),
            low_confidence: self.low_confidence,
        })
    }
}
