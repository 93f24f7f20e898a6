//! Live monitor settings: intervals, broker timeouts, retry budget, bounds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use exitlab_core::config::read_config;
use exitlab_core::domain::UnitKind;

#[derive(Debug, Error)]
pub enum LiveConfigError {
    #[error(transparent)]
    Read(#[from] exitlab_core::ConfigError),

    #[error("failed to parse live TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid live config: {0}")]
    Invalid(String),
}

/// Configuration for the [`Monitor`](crate::Monitor).
///
/// Durations are stored as whole seconds (milliseconds for backoff) so the
/// TOML form stays flat; getters hand back `Duration`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    unit_kind: UnitKind,
    poll_interval_secs: u64,
    scan_interval_secs: u64,
    broker_timeout_secs: u64,
    broker_max_trials: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    max_tracked_positions: usize,
    signal_queue_capacity: usize,
    shutdown_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            unit_kind: UnitKind::Points,
            poll_interval_secs: 30,
            scan_interval_secs: 60 * 60,
            broker_timeout_secs: 15,
            broker_max_trials: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            max_tracked_positions: 10,
            signal_queue_capacity: 32,
            shutdown_timeout_secs: 20,
        }
    }
}

impl LiveConfig {
    pub fn from_toml(content: &str) -> Result<Self, LiveConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, LiveConfigError> {
        let content = read_config(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), LiveConfigError> {
        let positive = [
            ("poll_interval_secs", self.poll_interval_secs),
            ("scan_interval_secs", self.scan_interval_secs),
            ("broker_timeout_secs", self.broker_timeout_secs),
            ("broker_max_trials", u64::from(self.broker_max_trials)),
            ("backoff_base_ms", self.backoff_base_ms),
            ("max_tracked_positions", self.max_tracked_positions as u64),
            ("signal_queue_capacity", self.signal_queue_capacity as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(LiveConfigError::Invalid(format!("{field} must be positive")));
            }
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(LiveConfigError::Invalid(format!(
                "backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    /// Unit kind of the instrument this monitor manages.
    pub fn unit_kind(&self) -> UnitKind {
        self.unit_kind
    }

    /// Interval between management polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Interval between new-signal scans.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Timeout applied to every individual broker call.
    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }

    /// Attempts per broker operation, first try included.
    pub fn broker_max_trials(&self) -> u32 {
        self.broker_max_trials
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Upper bound on concurrently monitored positions.
    pub fn max_tracked_positions(&self) -> usize {
        self.max_tracked_positions
    }

    pub fn signal_queue_capacity(&self) -> usize {
        self.signal_queue_capacity
    }

    /// How long `shutdown()` waits for the poll and scan tasks to wind down.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Default: [`UnitKind::Points`]
    pub fn with_unit_kind(mut self, unit_kind: UnitKind) -> Self {
        self.unit_kind = unit_kind;
        self
    }

    /// Default: `30` seconds
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Default: `3600` seconds
    pub fn with_scan_interval(mut self, secs: u64) -> Self {
        self.scan_interval_secs = secs;
        self
    }

    /// Default: `15` seconds
    pub fn with_broker_timeout(mut self, secs: u64) -> Self {
        self.broker_timeout_secs = secs;
        self
    }

    /// Default: `3`
    pub fn with_broker_max_trials(mut self, trials: u32) -> Self {
        self.broker_max_trials = trials;
        self
    }

    /// Default: `10`
    pub fn with_max_tracked_positions(mut self, max: usize) -> Self {
        self.max_tracked_positions = max;
        self
    }
}
