//! ExitLab Live: drives the exit engine against a real broker.
//!
//! The [`Monitor`] polls the broker for positions and prices, reconciles
//! them with local state, and executes the exits the lifecycle asks for.
//! Broker, signal source and sinks are traits so the loop can run against
//! any venue, or against scripted fakes in tests.

pub mod broker;
pub mod config;
pub mod monitor;
pub mod retry;
pub mod signal_source;
pub mod sink;

pub use broker::{Broker, BrokerError, BrokerPosition, Ticket};
pub use config::{LiveConfig, LiveConfigError};
pub use monitor::{Monitor, MonitorError, MonitorHandle, PollReport, SharedTradeSink};
pub use retry::{RetryExhausted, RetryPolicy};
pub use signal_source::{Candidate, QueuedSignals, ScanError, SignalSource};
pub use sink::{Alert, AlertSink, LogAlertSink, MemoryAlertSink, MemoryTradeSink, SinkError, TradeSink};
