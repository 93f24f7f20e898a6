//! Bar-driven state machine for one position.
//!
//! `step` is atomic: the bar is applied to a copy and committed only if every
//! fill succeeded. `preview` exposes the copy without committing, so the live
//! monitor can confirm broker actions before adopting the new state.

use chrono::{DateTime, Utc};

use super::path_policy::TieBreakPolicy;
use super::{InvariantViolation, LifecycleError, StopAnchor};
use crate::domain::{
    Bar, Direction, ExitEvent, ExitKind, Position, PositionState, Signal, FRACTION_EPSILON,
};
use crate::profile::{ParameterProfile, TARGET_LEVELS};

/// Open a full-size position with its initial stop placed per `anchor`.
pub fn open_position(signal: Signal, profile: ParameterProfile, anchor: StopAnchor) -> Position {
    let initial_stop = anchor.initial_stop(&signal, &profile);
    Position::new(signal, profile, initial_stop)
}

/// Outcome of feeding one bar to a position.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State after the bar.
    pub state: PositionState,
    /// Fills emitted by this bar, in order.
    pub events: Vec<ExitEvent>,
    /// New stop level if the stop moved and the position is still open.
    pub stop_moved_to: Option<f64>,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        self.state.is_closed()
    }

    /// Nothing happened: no fill, no stop move.
    pub fn is_quiet(&self) -> bool {
        self.events.is_empty() && self.stop_moved_to.is_none()
    }
}

/// Advance `position` by one bar and commit the result.
pub fn step(
    position: &mut Position,
    bar: &Bar,
    policy: TieBreakPolicy,
) -> Result<Transition, LifecycleError> {
    let (next, transition) = preview(position, bar, policy)?;
    *position = next;
    Ok(transition)
}

/// Compute the position after one bar without touching the original.
pub fn preview(
    position: &Position,
    bar: &Bar,
    policy: TieBreakPolicy,
) -> Result<(Position, Transition), LifecycleError> {
    if position.is_closed() {
        return Err(LifecycleError::AlreadyClosed);
    }
    if bar.timestamp < position.last_update {
        return Err(LifecycleError::NonChronologicalBar {
            bar: bar.timestamp,
            last: position.last_update,
        });
    }

    let mut next = position.clone();
    let events_before = next.events.len();
    let stop_before = next.current_stop();

    advance(&mut next, bar, policy)?;

    let stop_after = next.current_stop();
    let transition = Transition {
        state: next.state,
        events: next.events[events_before..].to_vec(),
        stop_moved_to: (stop_after != stop_before && !next.is_closed()).then_some(stop_after),
    };
    Ok((next, transition))
}

fn advance(
    pos: &mut Position,
    bar: &Bar,
    policy: TieBreakPolicy,
) -> Result<(), InvariantViolation> {
    let ts = bar.timestamp;
    pos.last_update = ts;

    // 1. Timeout dominates.
    if ts - pos.opened_at >= pos.profile.timeout() {
        return pos.close_remaining(ExitKind::Timeout, bar.close, ts);
    }

    // 2. Stop, unless the tie-break sends targets first.
    let stop_touched = pos.stop.is_touched(bar.high, bar.low);
    let target_touched = pos
        .next_target()
        .is_some_and(|level| target_reached(pos, level, bar));
    let targets_first = target_touched && policy.targets_first(pos.direction(), bar);

    if stop_touched && !targets_first {
        return close_at_stop(pos, ts);
    }

    // 3. Take-profits, ascending.
    fill_targets(pos, bar)?;
    if pos.is_closed() {
        return Ok(());
    }

    // Targets went first; the stop (possibly moved to breakeven) still applies.
    if stop_touched && pos.stop.is_touched(bar.high, bar.low) {
        return close_at_stop(pos, ts);
    }

    // 4. Trailing ratchet.
    pos.best_extreme = match pos.direction() {
        Direction::Long => pos.best_extreme.max(bar.high),
        Direction::Short => pos.best_extreme.min(bar.low),
    };
    if pos.tp_hit[0] {
        let candidate = pos
            .direction()
            .adverse(pos.best_extreme, pos.profile.trailing);
        pos.stop.tighten(candidate);
    }

    // 5. Dust left after the last fill.
    if pos.remaining_fraction < FRACTION_EPSILON {
        if let Some(level) = pos.tp_hit.iter().rposition(|hit| *hit) {
            let price = pos.target_price(level);
            return pos.close_remaining(ExitKind::take_profit(level), price, ts);
        }
    }

    Ok(())
}

fn target_reached(pos: &Position, level: usize, bar: &Bar) -> bool {
    let target = pos.target_price(level);
    match pos.direction() {
        Direction::Long => bar.high >= target,
        Direction::Short => bar.low <= target,
    }
}

fn fill_targets(pos: &mut Position, bar: &Bar) -> Result<(), InvariantViolation> {
    let ts = bar.timestamp;
    while let Some(level) = pos.next_target() {
        if !target_reached(pos, level, bar) {
            break;
        }

        let kind = ExitKind::take_profit(level);
        let price = pos.target_price(level);
        // The last level takes whatever is left; earlier levels are capped by
        // the remainder, which an external partial may have shrunk.
        let fraction = if level == TARGET_LEVELS - 1 {
            pos.remaining_fraction
        } else {
            pos.profile.take_profits[level]
                .fraction
                .min(pos.remaining_fraction)
        };

        pos.record_fill(kind, fraction, price, ts)?;
        pos.tp_hit[level] = true;
        if level == 0 {
            pos.arm_breakeven();
        }

        if pos.remaining_fraction < FRACTION_EPSILON {
            return pos.close_remaining(kind, price, ts);
        }
        pos.state = PositionState::Partial(kind);
    }
    Ok(())
}

fn close_at_stop(pos: &mut Position, ts: DateTime<Utc>) -> Result<(), InvariantViolation> {
    let kind = if pos.stop.has_moved() {
        ExitKind::TrailingStop
    } else {
        ExitKind::StopLoss
    };
    let price = pos.stop.current();
    pos.close_remaining(kind, price, ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SignalInput, UnitKind};
    use crate::profile::ProfileTable;
    use crate::regime::Regime;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn bar(hours: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: t0() + Duration::hours(hours),
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    fn gold_long() -> Position {
        let input = SignalInput {
            direction: Direction::Long,
            entry_price: 2000.0,
            initial_stop_price: 1984.0,
            entry_timestamp: t0(),
            tag: None,
        };
        let signal = Signal::new(input, Regime::Trend, UnitKind::Points).unwrap();
        let profile = ProfileTable::default()
            .select(Regime::Trend, UnitKind::Points)
            .resolve(2000.0, UnitKind::Points)
            .unwrap();
        open_position(signal, profile, StopAnchor::Signal)
    }

    #[test]
    fn quiet_bar_changes_nothing_but_time() {
        let mut pos = gold_long();
        let t = step(&mut pos, &bar(1, 2000.0, 2010.0, 1990.0, 2005.0), TieBreakPolicy::StopFirst)
            .unwrap();
        assert!(t.is_quiet());
        assert_eq!(pos.state(), PositionState::Open);
        assert_eq!(pos.best_extreme(), 2010.0);
        assert_eq!(pos.last_update(), t0() + Duration::hours(1));
    }

    #[test]
    fn tp1_moves_stop_to_breakeven_then_trails() {
        let mut pos = gold_long();
        let t = step(&mut pos, &bar(1, 2000.0, 2031.0, 1995.0, 2025.0), TieBreakPolicy::StopFirst)
            .unwrap();
        assert_eq!(t.state, PositionState::Partial(ExitKind::Tp1));
        assert_eq!(t.events.len(), 1);
        // Breakeven at 2000, then trail: 2031 − 20 = 2011.
        assert_eq!(t.stop_moved_to, Some(2011.0));
        assert_eq!(pos.tp_hit(), [true, false, false]);
    }

    #[test]
    fn one_bar_through_all_targets_fills_in_order() {
        let mut pos = gold_long();
        let t = step(&mut pos, &bar(1, 2000.0, 2100.0, 1995.0, 2095.0), TieBreakPolicy::StopFirst)
            .unwrap();
        let kinds: Vec<ExitKind> = t.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ExitKind::Tp1, ExitKind::Tp2, ExitKind::Tp3]);
        assert_eq!(t.state, PositionState::Closed(ExitKind::Tp3));
        assert_eq!(pos.remaining_fraction(), 0.0);
    }

    #[test]
    fn stop_first_wins_same_bar_tie() {
        let mut pos = gold_long();
        let t = step(&mut pos, &bar(1, 2000.0, 2035.0, 1980.0, 2000.0), TieBreakPolicy::StopFirst)
            .unwrap();
        assert_eq!(t.state, PositionState::Closed(ExitKind::StopLoss));
        assert_eq!(t.events.len(), 1);
        assert_eq!(t.events[0].price, 1984.0);
        assert!((pos.realized_pnl() + 16.0).abs() < 1e-9);
    }

    #[test]
    fn target_first_fills_tp1_then_stops_at_breakeven() {
        let mut pos = gold_long();
        let t = step(&mut pos, &bar(1, 2000.0, 2035.0, 1980.0, 2000.0), TieBreakPolicy::TargetFirst)
            .unwrap();
        let kinds: Vec<ExitKind> = t.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ExitKind::Tp1, ExitKind::TrailingStop]);
        assert_eq!(t.events[1].price, 2000.0);
        assert!((pos.realized_pnl() - 0.33 * 30.0).abs() < 1e-9);
    }

    #[test]
    fn timeout_dominates_a_touched_stop() {
        let mut pos = gold_long();
        let t = step(&mut pos, &bar(48, 1990.0, 1995.0, 1970.0, 1975.0), TieBreakPolicy::StopFirst)
            .unwrap();
        assert_eq!(t.state, PositionState::Closed(ExitKind::Timeout));
        assert_eq!(t.events[0].price, 1975.0);
    }

    #[test]
    fn stepping_a_closed_position_fails() {
        let mut pos = gold_long();
        step(&mut pos, &bar(1, 2000.0, 2000.0, 1980.0, 1985.0), TieBreakPolicy::StopFirst)
            .unwrap();
        let err = step(&mut pos, &bar(2, 1985.0, 1990.0, 1980.0, 1985.0), TieBreakPolicy::StopFirst)
            .unwrap_err();
        assert_eq!(err, LifecycleError::AlreadyClosed);
    }

    #[test]
    fn out_of_order_bar_is_rejected_without_side_effects() {
        let mut pos = gold_long();
        step(&mut pos, &bar(2, 2000.0, 2010.0, 1995.0, 2005.0), TieBreakPolicy::StopFirst)
            .unwrap();
        let before = pos.clone();
        let err = step(&mut pos, &bar(1, 2000.0, 2100.0, 1995.0, 2005.0), TieBreakPolicy::StopFirst)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NonChronologicalBar { .. }));
        assert_eq!(pos, before);
    }

    #[test]
    fn preview_does_not_commit() {
        let pos = gold_long();
        let (next, t) = preview(&pos, &bar(1, 2000.0, 2031.0, 1995.0, 2025.0), TieBreakPolicy::StopFirst)
            .unwrap();
        assert_eq!(t.state, PositionState::Partial(ExitKind::Tp1));
        assert_eq!(pos.state(), PositionState::Open);
        assert_eq!(next.state(), PositionState::Partial(ExitKind::Tp1));
    }

    #[test]
    fn targets_after_external_partial_are_capped() {
        let mut pos = gold_long();
        // Broker closed half: TP1 is consumed, 0.5 remains.
        pos.apply_external(0.5, 2020.0, t0() + Duration::minutes(30))
            .unwrap();
        let t = step(&mut pos, &bar(1, 2020.0, 2095.0, 2015.0, 2090.0), TieBreakPolicy::StopFirst)
            .unwrap();
        let kinds: Vec<ExitKind> = t.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ExitKind::Tp2, ExitKind::Tp3]);
        assert!((t.events[0].fraction - 0.33).abs() < 1e-12);
        assert!((t.events[1].fraction - 0.17).abs() < 1e-9);
        assert!(pos.is_closed());
    }
}
