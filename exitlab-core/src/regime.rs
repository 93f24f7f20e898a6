//! Regime classifier: trailing bar window in, TREND or RANGE out.
//!
//! Five independent votes, each a boolean over the same window:
//! 1. EMA separation: |EMA(fast) − EMA(slow)| / EMA(slow) above a threshold
//! 2. Volatility expansion: ATR at window end above the window's mean ATR × ratio
//! 3. Directional displacement: net close move relative to the window's high-low range
//! 4. Move consistency: share of closes moving in the dominant direction
//! 5. Structural trend: strictly rising highs or strictly falling lows in a recent sub-window
//!
//! TREND iff at least `min_votes` (default 3) are true. A vote that cannot be
//! computed (short window, NaN, zero range) counts as false.
//!
//! Pure and deterministic: identical input always yields a bit-identical report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::Bar;
use crate::indicators::{Atr, Ema, Indicator};

/// Coarse market state, fixed per signal at acceptance time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Trend,
    Range,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trend => write!(f, "TREND"),
            Self::Range => write!(f, "RANGE"),
        }
    }
}

/// Classifier thresholds and periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Trailing window length in bars.
    pub window: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Minimum |EMA(fast) − EMA(slow)| / EMA(slow), as a fraction (0.003 = 0.3%).
    pub ema_separation: f64,
    pub atr_period: usize,
    /// ATR at window end must exceed the window mean ATR times this ratio.
    pub atr_expansion: f64,
    pub displacement: f64,
    pub consistency: f64,
    /// Sub-window length for the rising-highs / falling-lows count.
    pub structure_window: usize,
    pub min_votes: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window: 100,
            ema_fast: 20,
            ema_slow: 50,
            ema_separation: 0.003,
            atr_period: 14,
            atr_expansion: 1.05,
            displacement: 0.35,
            consistency: 0.6,
            structure_window: 20,
            min_votes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierConfigError {
    #[error("window must be at least 2 bars, got {0}")]
    WindowTooShort(usize),
    #[error("ema_fast ({fast}) must be >= 1 and below ema_slow ({slow})")]
    EmaPeriods { fast: usize, slow: usize },
    #[error("atr_period must be >= 1")]
    AtrPeriod,
    #[error("structure_window {structure} must be in 2..={window}")]
    StructureWindow { structure: usize, window: usize },
    #[error("min_votes must be in 1..=5, got {0}")]
    MinVotes(usize),
    #[error("threshold {name} = {value} must be finite and non-negative")]
    Threshold { name: &'static str, value: f64 },
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ClassifierConfigError> {
        if self.window < 2 {
            return Err(ClassifierConfigError::WindowTooShort(self.window));
        }
        if self.ema_fast == 0 || self.ema_fast >= self.ema_slow {
            return Err(ClassifierConfigError::EmaPeriods {
                fast: self.ema_fast,
                slow: self.ema_slow,
            });
        }
        if self.atr_period == 0 {
            return Err(ClassifierConfigError::AtrPeriod);
        }
        if self.structure_window < 2 || self.structure_window > self.window {
            return Err(ClassifierConfigError::StructureWindow {
                structure: self.structure_window,
                window: self.window,
            });
        }
        if !(1..=5).contains(&self.min_votes) {
            return Err(ClassifierConfigError::MinVotes(self.min_votes));
        }
        for (name, value) in [
            ("ema_separation", self.ema_separation),
            ("atr_expansion", self.atr_expansion),
            ("displacement", self.displacement),
            ("consistency", self.consistency),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ClassifierConfigError::Threshold { name, value });
            }
        }
        Ok(())
    }
}

/// The five individual votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeVotes {
    pub ema_separation: bool,
    pub volatility_expansion: bool,
    pub directional_displacement: bool,
    pub move_consistency: bool,
    pub structural_trend: bool,
}

impl RegimeVotes {
    pub fn count(&self) -> usize {
        [
            self.ema_separation,
            self.volatility_expansion,
            self.directional_displacement,
            self.move_consistency,
            self.structural_trend,
        ]
        .iter()
        .filter(|v| **v)
        .count()
    }
}

/// Classification result with the votes that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeReport {
    pub regime: Regime,
    pub votes: RegimeVotes,
}

impl RegimeReport {
    pub fn vote_count(&self) -> usize {
        self.votes.count()
    }
}

/// Classify and return only the regime.
pub fn classify(bars: &[Bar], config: &ClassifierConfig) -> Regime {
    classify_window(bars, config).regime
}

/// Classify the trailing `config.window` bars of `bars`.
pub fn classify_window(bars: &[Bar], config: &ClassifierConfig) -> RegimeReport {
    let start = bars.len().saturating_sub(config.window);
    let window = &bars[start..];

    let votes = RegimeVotes {
        ema_separation: ema_separation(window, config),
        volatility_expansion: volatility_expansion(window, config),
        directional_displacement: directional_displacement(window, config),
        move_consistency: move_consistency(window, config),
        structural_trend: structural_trend(window, config),
    };

    let regime = if votes.count() >= config.min_votes {
        Regime::Trend
    } else {
        Regime::Range
    };

    RegimeReport { regime, votes }
}

/// Bars with `timestamp <= at`, limited to the trailing `len` of them.
///
/// `bars` must be sorted by timestamp.
pub fn window_ending_at(bars: &[Bar], at: DateTime<Utc>, len: usize) -> &[Bar] {
    let end = bars.partition_point(|b| b.timestamp <= at);
    &bars[end.saturating_sub(len)..end]
}

/// Whether `window` is long enough for `indicator` to produce a value.
fn warmed_up(indicator: &impl Indicator, window: &[Bar]) -> bool {
    window.len() > indicator.lookback()
}

fn ema_separation(window: &[Bar], config: &ClassifierConfig) -> bool {
    let (fast, slow) = (Ema::new(config.ema_fast), Ema::new(config.ema_slow));
    if !warmed_up(&slow, window) {
        return false;
    }
    let fast = fast.compute(window);
    let slow = slow.compute(window);
    match (fast.last(), slow.last()) {
        (Some(&f), Some(&s)) if f.is_finite() && s.is_finite() && s > 0.0 => {
            (f - s).abs() / s > config.ema_separation
        }
        _ => false,
    }
}

fn volatility_expansion(window: &[Bar], config: &ClassifierConfig) -> bool {
    let atr = Atr::new(config.atr_period);
    // One ATR value is its own mean; expansion needs at least two.
    if !warmed_up(&atr, window) || window.len() == atr.lookback() + 1 {
        return false;
    }
    let atr = atr.compute(window);
    let Some(&last) = atr.last() else {
        return false;
    };
    if !last.is_finite() {
        return false;
    }

    let valid: Vec<f64> = atr.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return false;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    last > mean * config.atr_expansion
}

fn directional_displacement(window: &[Bar], config: &ClassifierConfig) -> bool {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return false;
    };
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let range = high - low;
    if !(range > 0.0 && range.is_finite()) {
        return false;
    }
    (last.close - first.close).abs() / range > config.displacement
}

fn move_consistency(window: &[Bar], config: &ClassifierConfig) -> bool {
    let (mut up, mut down) = (0usize, 0usize);
    for pair in window.windows(2) {
        if pair[1].close > pair[0].close {
            up += 1;
        } else if pair[1].close < pair[0].close {
            down += 1;
        }
    }
    let moves = up + down;
    if moves == 0 {
        return false;
    }
    up.max(down) as f64 / moves as f64 > config.consistency
}

fn structural_trend(window: &[Bar], config: &ClassifierConfig) -> bool {
    let start = window.len().saturating_sub(config.structure_window);
    let recent = &window[start..];
    let (mut rising_highs, mut falling_lows) = (0usize, 0usize);
    for pair in recent.windows(2) {
        if pair[1].high > pair[0].high {
            rising_highs += 1;
        }
        if pair[1].low < pair[0].low {
            falling_lows += 1;
        }
    }
    rising_highs.max(falling_lows) as f64 > recent.len() as f64 / 2.0
}
