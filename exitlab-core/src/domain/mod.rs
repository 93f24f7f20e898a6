//! Domain types for ExitLab

pub mod bar;
pub mod event;
pub mod position;
pub mod signal;
pub mod trade;

pub use bar::Bar;
pub use event::{ExitEvent, ExitKind};
pub use position::{Position, PositionState};
pub use signal::{Direction, RejectReason, Signal, SignalInput, SignalRejected, UnitKind};
pub use trade::ClosedTrade;

/// Tolerance used for every fraction comparison (sums, "fully closed" checks).
pub const FRACTION_EPSILON: f64 = 1e-6;
