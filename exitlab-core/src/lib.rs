//! ExitLab Core: regime-adaptive exit management for already-open positions.
//!
//! This crate is pure and I/O-free:
//! - Domain types (bars, signals, positions, exit events, closed trades)
//! - Indicators (EMA, ATR) and the five-vote regime classifier
//! - Parameter profiles keyed by (regime, unit kind)
//! - The per-bar position lifecycle state machine with a tighten-only stop ratchet
//! - `ExitEngine`, the single parameterized engine used by backtest and live modes

pub mod config;
pub mod domain;
pub mod engine;
pub mod indicators;
pub mod lifecycle;
pub mod profile;
pub mod regime;

pub use config::{ConfigError, EngineConfig};
pub use engine::ExitEngine;
pub use lifecycle::{LifecycleError, StopAnchor, TieBreakPolicy, Transition};
pub use profile::{ParameterProfile, ProfileTable, ProfileTemplate};
pub use regime::{classify, classify_window, ClassifierConfig, Regime, RegimeReport};
