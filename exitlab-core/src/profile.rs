//! Parameter profiles: regime- and unit-dependent exit thresholds.
//!
//! A `ProfileTemplate` is configuration: offsets are in the instrument's native
//! unit (price points, or percent of entry). `resolve()` turns it into a
//! `ParameterProfile` with absolute price deltas, so the lifecycle state machine
//! never has to know which kind of instrument it is managing.
//!
//! TREND profiles use wider targets and longer timeouts than RANGE profiles.
//! That asymmetry is data in the `ProfileTable`, not branches in code.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{UnitKind, FRACTION_EPSILON};
use crate::regime::Regime;

/// Number of take-profit levels on every profile.
pub const TARGET_LEVELS: usize = 3;

/// One take-profit rung: distance from entry and the fraction it closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub offset: f64,
    pub fraction: f64,
}

impl TakeProfitLevel {
    pub const fn new(offset: f64, fraction: f64) -> Self {
        Self { offset, fraction }
    }
}

/// Errors from profile validation and resolution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("partial-close fractions sum to {sum}, expected 1.0")]
    FractionSum { sum: f64 },

    #[error("TP{level} fraction {fraction} is outside (0, 1]")]
    FractionOutOfRange { level: usize, fraction: f64 },

    #[error("TP{level} offset {offset} does not exceed the previous level")]
    TargetsNotAscending { level: usize, offset: f64 },

    #[error("{field} offset {value} must be positive")]
    NonPositiveOffset { field: &'static str, value: f64 },

    #[error("breakeven offset {value} must be >= 0 and below the TP1 offset")]
    InvalidBreakeven { value: f64 },

    #[error("timeout of {minutes} minutes must be positive")]
    NonPositiveTimeout { minutes: i64 },

    #[error("cannot resolve a profile against entry price {entry}")]
    NonPositiveEntry { entry: f64 },
}

/// Unresolved profile as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTemplate {
    pub take_profits: [TakeProfitLevel; TARGET_LEVELS],
    pub stop_loss: f64,
    pub trailing: f64,
    /// Buffer beyond entry the stop moves to once TP1 fills (0 = exact entry).
    #[serde(default)]
    pub breakeven: f64,
    pub timeout_minutes: i64,
}

impl ProfileTemplate {
    pub fn fraction_sum(&self) -> f64 {
        self.take_profits.iter().map(|l| l.fraction).sum()
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        validate_levels(&self.take_profits)?;
        for (field, value) in [("stop_loss", self.stop_loss), ("trailing", self.trailing)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ProfileError::NonPositiveOffset { field, value });
            }
        }
        if !(self.breakeven >= 0.0 && self.breakeven < self.take_profits[0].offset) {
            return Err(ProfileError::InvalidBreakeven {
                value: self.breakeven,
            });
        }
        if self.timeout_minutes <= 0 {
            return Err(ProfileError::NonPositiveTimeout {
                minutes: self.timeout_minutes,
            });
        }
        Ok(())
    }

    /// Convert to absolute price deltas for a signal entering at `entry_price`.
    pub fn resolve(
        &self,
        entry_price: f64,
        unit_kind: UnitKind,
    ) -> Result<ParameterProfile, ProfileError> {
        self.validate()?;
        if !(entry_price > 0.0 && entry_price.is_finite()) {
            return Err(ProfileError::NonPositiveEntry { entry: entry_price });
        }

        let to_abs = |value: f64| match unit_kind {
            UnitKind::Points => value,
            UnitKind::Percentage => entry_price * value / 100.0,
        };

        Ok(ParameterProfile {
            take_profits: self
                .take_profits
                .map(|l| TakeProfitLevel::new(to_abs(l.offset), l.fraction)),
            stop_loss: to_abs(self.stop_loss),
            trailing: to_abs(self.trailing),
            breakeven: to_abs(self.breakeven),
            timeout_minutes: self.timeout_minutes,
        })
    }
}

fn validate_levels(levels: &[TakeProfitLevel; TARGET_LEVELS]) -> Result<(), ProfileError> {
    let mut previous = 0.0;
    for (i, level) in levels.iter().enumerate() {
        if !(level.fraction > 0.0 && level.fraction <= 1.0) {
            return Err(ProfileError::FractionOutOfRange {
                level: i + 1,
                fraction: level.fraction,
            });
        }
        if !(level.offset > previous && level.offset.is_finite()) {
            return Err(ProfileError::TargetsNotAscending {
                level: i + 1,
                offset: level.offset,
            });
        }
        previous = level.offset;
    }

    let sum: f64 = levels.iter().map(|l| l.fraction).sum();
    if (sum - 1.0).abs() > FRACTION_EPSILON {
        return Err(ProfileError::FractionSum { sum });
    }
    Ok(())
}

/// Resolved profile in absolute price deltas. Created fresh per signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProfile {
    pub take_profits: [TakeProfitLevel; TARGET_LEVELS],
    pub stop_loss: f64,
    pub trailing: f64,
    pub breakeven: f64,
    pub timeout_minutes: i64,
}

impl ParameterProfile {
    pub fn timeout(&self) -> Duration {
        Duration::minutes(self.timeout_minutes)
    }

    pub fn fraction_sum(&self) -> f64 {
        self.take_profits.iter().map(|l| l.fraction).sum()
    }
}

/// TREND and RANGE templates for one unit kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeProfiles {
    pub trend: ProfileTemplate,
    pub range: ProfileTemplate,
}

impl RegimeProfiles {
    pub fn get(&self, regime: Regime) -> &ProfileTemplate {
        match regime {
            Regime::Trend => &self.trend,
            Regime::Range => &self.range,
        }
    }
}

/// Lookup table: (regime, unit kind) → template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTable {
    pub points: RegimeProfiles,
    pub percentage: RegimeProfiles,
}

impl ProfileTable {
    pub fn select(&self, regime: Regime, unit_kind: UnitKind) -> &ProfileTemplate {
        match unit_kind {
            UnitKind::Points => self.points.get(regime),
            UnitKind::Percentage => self.percentage.get(regime),
        }
    }

    /// All four entries, for validation and display.
    pub fn entries(&self) -> [(UnitKind, Regime, &ProfileTemplate); 4] {
        [
            (UnitKind::Points, Regime::Trend, &self.points.trend),
            (UnitKind::Points, Regime::Range, &self.points.range),
            (UnitKind::Percentage, Regime::Trend, &self.percentage.trend),
            (UnitKind::Percentage, Regime::Range, &self.percentage.range),
        ]
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        self.entries()
            .iter()
            .try_for_each(|(_, _, template)| template.validate())
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            points: RegimeProfiles {
                trend: ProfileTemplate {
                    take_profits: [
                        TakeProfitLevel::new(30.0, 0.33),
                        TakeProfitLevel::new(55.0, 0.33),
                        TakeProfitLevel::new(90.0, 0.34),
                    ],
                    stop_loss: 16.0,
                    trailing: 20.0,
                    breakeven: 0.0,
                    timeout_minutes: 48 * 60,
                },
                range: ProfileTemplate {
                    take_profits: [
                        TakeProfitLevel::new(15.0, 0.4),
                        TakeProfitLevel::new(25.0, 0.3),
                        TakeProfitLevel::new(40.0, 0.3),
                    ],
                    stop_loss: 12.0,
                    trailing: 10.0,
                    breakeven: 0.0,
                    timeout_minutes: 24 * 60,
                },
            },
            percentage: RegimeProfiles {
                trend: ProfileTemplate {
                    take_profits: [
                        TakeProfitLevel::new(1.5, 0.33),
                        TakeProfitLevel::new(3.0, 0.33),
                        TakeProfitLevel::new(5.0, 0.34),
                    ],
                    stop_loss: 1.0,
                    trailing: 0.8,
                    breakeven: 0.0,
                    timeout_minutes: 48 * 60,
                },
                range: ProfileTemplate {
                    take_profits: [
                        TakeProfitLevel::new(1.0, 0.4),
                        TakeProfitLevel::new(1.8, 0.3),
                        TakeProfitLevel::new(2.5, 0.3),
                    ],
                    stop_loss: 0.6,
                    trailing: 0.5,
                    breakeven: 0.0,
                    timeout_minutes: 24 * 60,
                },
            },
        }
    }
}
