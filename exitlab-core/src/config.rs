//! Engine configuration: everything that turns the one parameterized engine
//! into a concrete strategy variant.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::lifecycle::{StopAnchor, TieBreakPolicy};
use crate::profile::{ProfileError, ProfileTable};
use crate::regime::{ClassifierConfig, ClassifierConfigError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid classifier config: {0}")]
    Classifier(#[from] ClassifierConfigError),

    #[error("invalid profile table: {0}")]
    Profile(#[from] ProfileError),
}

/// Classifier thresholds, profile table, tie-break policy and stop anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub profiles: ProfileTable,
    pub tie_break: TieBreakPolicy,
    pub stop_anchor: StopAnchor,
}

impl EngineConfig {
    /// Parse and validate from a TOML string. Missing sections take defaults.
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
        self.classifier.validate()?;
        self.profiles.validate()?;
        Ok(())
    }
}

/// Read a config file, attaching the path to I/O errors.
pub fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.tie_break, TieBreakPolicy::StopFirst);
        assert_eq!(config.stop_anchor, StopAnchor::Signal);
    }

    #[test]
    fn partial_classifier_section_keeps_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
tie_break = "ohlc_path"

[classifier]
window = 80
min_votes = 4
"#,
        )
        .unwrap();
        assert_eq!(config.classifier.window, 80);
        assert_eq!(config.classifier.min_votes, 4);
        assert_eq!(config.classifier.ema_slow, 50);
        assert_eq!(config.tie_break, TieBreakPolicy::OhlcPath);
    }

    #[test]
    fn invalid_classifier_is_rejected() {
        let err = EngineConfig::from_toml("[classifier]\nmin_votes = 6\n").unwrap_err();
        assert!(matches!(err, ConfigError::Classifier(_)));
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let mut config = EngineConfig::default();
        config.profiles.points.trend.take_profits[0].fraction = 0.9;
        assert!(matches!(config.validate(), Err(ConfigError::Profile(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/exitlab.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/exitlab.toml"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml("tie_break = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
