//! Serializable backtest configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use exitlab_core::config::read_config;
use exitlab_core::domain::UnitKind;
use exitlab_core::EngineConfig;

/// Content-addressable identifier for a backtest configuration.
pub type ConfigFingerprint = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Engine(#[from] exitlab_core::ConfigError),

    #[error("failed to parse backtest TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config for fingerprinting: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid backtest config: {0}")]
    Invalid(String),
}

/// Everything needed to reproduce a backtest over a given bar/signal set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Hard cap on bars simulated after each signal.
    pub max_bars: usize,
    /// A gap between consecutive simulated bars above this flags the trade low-confidence.
    pub gap_tolerance_minutes: i64,
    /// How the instrument's thresholds are expressed.
    pub unit_kind: UnitKind,
    pub engine: EngineConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            max_bars: 48,
            gap_tolerance_minutes: 120,
            unit_kind: UnitKind::Points,
            engine: EngineConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_config(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bars == 0 {
            return Err(ConfigError::Invalid("max_bars must be at least 1".into()));
        }
        if self.gap_tolerance_minutes <= 0 {
            return Err(ConfigError::Invalid(format!(
                "gap_tolerance_minutes must be positive, got {}",
                self.gap_tolerance_minutes
            )));
        }
        self.engine.validate()?;
        Ok(())
    }

    pub fn gap_tolerance(&self) -> Duration {
        Duration::minutes(self.gap_tolerance_minutes)
    }

    /// Deterministic blake3 hash of the canonical JSON form.
    ///
    /// Two runs with identical configs share a fingerprint, so reports can be
    /// matched to the exact parameters that produced them.
    pub fn fingerprint(&self) -> Result<ConfigFingerprint, ConfigError> {
        let json = serde_json::to_string(self)?;
        let hash = blake3::hash(json.as_bytes());
        Ok(hash.to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exitlab_core::TieBreakPolicy;

    #[test]
    fn defaults_match_documented_values() {
        let config = BacktestConfig::default();
        assert_eq!(config.max_bars, 48);
        assert_eq!(config.gap_tolerance(), Duration::hours(2));
        assert_eq!(config.unit_kind, UnitKind::Points);
        config.validate().unwrap();
    }

    #[test]
    fn parses_nested_engine_section() {
        let config = BacktestConfig::from_toml(
            r#"
max_bars = 24
unit_kind = "percentage"

[engine]
tie_break = "target_first"

[engine.classifier]
window = 60
"#,
        )
        .unwrap();
        assert_eq!(config.max_bars, 24);
        assert_eq!(config.unit_kind, UnitKind::Percentage);
        assert_eq!(config.engine.tie_break, TieBreakPolicy::TargetFirst);
        assert_eq!(config.engine.classifier.window, 60);
    }

    #[test]
    fn shipped_default_file_matches_defaults() {
        let shipped = include_str!("../../config/default.toml");
        assert_eq!(BacktestConfig::from_toml(shipped).unwrap(), BacktestConfig::default());
    }

    #[test]
    fn zero_max_bars_is_invalid() {
        let err = BacktestConfig::from_toml("max_bars = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn engine_errors_propagate() {
        let err = BacktestConfig::from_toml("[engine.classifier]\nema_fast = 60\n").unwrap_err();
        assert!(matches!(err, ConfigError::Engine(_)));
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive() {
        let a = BacktestConfig::default();
        let mut b = BacktestConfig::default();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);

        b.max_bars = 47;
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
