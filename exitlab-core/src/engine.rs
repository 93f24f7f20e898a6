//! ExitEngine: the one parameterized engine shared by backtest and live.
//!
//! Acceptance runs validation, classification and profile resolution in that
//! order; `step` forwards to the lifecycle state machine with the configured
//! tie-break policy.

use crate::config::EngineConfig;
use crate::domain::{
    Bar, Position, RejectReason, Signal, SignalInput, SignalRejected, UnitKind,
};
use crate::lifecycle::{self, LifecycleError, Transition};
use crate::regime::{classify_window, Regime, RegimeReport};

#[derive(Debug, Clone, Default)]
pub struct ExitEngine {
    config: EngineConfig,
}

impl ExitEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify a trailing bar window ending at or before signal time.
    pub fn classify(&self, window: &[Bar]) -> RegimeReport {
        classify_window(window, &self.config.classifier)
    }

    /// Validate a raw signal, classify its regime from `window`, and open a position.
    pub fn accept(
        &self,
        input: SignalInput,
        window: &[Bar],
        unit_kind: UnitKind,
    ) -> Result<Position, SignalRejected> {
        input.validate()?;
        let regime = self.classify(window).regime;
        self.accept_with_regime(input, regime, unit_kind)
    }

    /// Open a position with an already-known regime.
    pub fn accept_with_regime(
        &self,
        input: SignalInput,
        regime: Regime,
        unit_kind: UnitKind,
    ) -> Result<Position, SignalRejected> {
        let entry_timestamp = input.entry_timestamp;
        let entry_price = input.entry_price;
        let signal = Signal::new(input, regime, unit_kind)?;

        let profile = self
            .config
            .profiles
            .select(regime, unit_kind)
            .resolve(entry_price, unit_kind)
            .map_err(|e| SignalRejected {
                entry_timestamp,
                reason: RejectReason::from(e),
            })?;

        Ok(lifecycle::open_position(
            signal,
            profile,
            self.config.stop_anchor,
        ))
    }

    pub fn step(&self, position: &mut Position, bar: &Bar) -> Result<Transition, LifecycleError> {
        lifecycle::step(position, bar, self.config.tie_break)
    }

    pub fn preview(
        &self,
        position: &Position,
        bar: &Bar,
    ) -> Result<(Position, Transition), LifecycleError> {
        lifecycle::preview(position, bar, self.config.tie_break)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::{TimeZone, Utc};

    fn raw(direction: Direction, entry: f64, stop: f64) -> SignalInput {
        SignalInput {
            direction,
            entry_price: entry,
            initial_stop_price: stop,
            entry_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            tag: None,
        }
    }

    #[test]
    fn short_window_classifies_as_range() {
        let engine = ExitEngine::default();
        let pos = engine
            .accept(raw(Direction::Long, 2000.0, 1984.0), &[], UnitKind::Points)
            .unwrap();
        assert_eq!(pos.signal().regime, Regime::Range);
        assert_eq!(pos.profile().take_profits[0].offset, 15.0);
    }

    #[test]
    fn wrong_side_stop_is_rejected_before_classification() {
        let engine = ExitEngine::default();
        let err = engine
            .accept(raw(Direction::Long, 2000.0, 2010.0), &[], UnitKind::Points)
            .unwrap_err();
        assert!(matches!(err.reason, RejectReason::StopWrongSide { .. }));
    }

    #[test]
    fn percentage_profile_resolved_at_acceptance() {
        let engine = ExitEngine::default();
        let pos = engine
            .accept_with_regime(
                raw(Direction::Short, 50_000.0, 50_300.0),
                Regime::Range,
                UnitKind::Percentage,
            )
            .unwrap();
        assert!((pos.profile().stop_loss - 300.0).abs() < 1e-9);
        assert!((pos.target_price(0) - 49_500.0).abs() < 1e-9);
    }
}
