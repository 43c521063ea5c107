// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Groove Layer configuration surface.
//!
//! One immutable [`GrooveConfig`] value is validated once, before any session
//! starts, and then shared by every component. Every knob has a default; a
//! JSON document only needs to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::latent::Dimension;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration faults. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("learning rate {name} = {value} must lie in (0, 1]")]
    AlphaOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be positive")]
    NonPositiveDuration { name: &'static str },

    #[error("{name} = {value} must lie in [0, 1]")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("{name} must be strictly increasing")]
    ThresholdsNotIncreasing { name: &'static str },

    #[error("dead band {name} = {value} must lie in [0, 0.5)")]
    DeadBandOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be at least 1")]
    ZeroCount { name: &'static str },

    #[error("probe duration {duration_ms} ms must be shorter than probe interval {interval_ms} ms")]
    ProbeDurationExceedsInterval { duration_ms: u64, interval_ms: u64 },

    #[error("feature mapping for {dimension:?}: {reason}")]
    InvalidMapping { dimension: Dimension, reason: &'static str },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// GrooveConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GrooveConfig {
    pub window: WindowConfig,
    pub learning: LearningRates,
    pub evidence: EvidenceConfig,
    pub policy: PolicyThresholds,
    pub probe: ProbeConfig,
    pub degradation: DegradationConfig,
}

impl GrooveConfig {
    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: GrooveConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject malformed or out-of-range values with a descriptive error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.learning.validate()?;
        self.evidence.validate()?;
        self.policy.validate()?;
        self.probe.validate()?;
        self.degradation.validate()
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub duration_ms: u64,
    /// Eligibility: minimum events per window.
    pub min_events: usize,
    /// Eligibility: minimum mean confidence per window.
    pub min_confidence: f64,
    /// Events below this confidence count toward density only.
    pub confidence_floor: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_ms: 15_000,
            min_events: 12,
            min_confidence: 0.5,
            confidence_floor: 0.3,
        }
    }
}

impl WindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_ms == 0 {
            return Err(ConfigError::NonPositiveDuration { name: "window.duration_ms" });
        }
        if self.min_events == 0 {
            return Err(ConfigError::ZeroCount { name: "window.min_events" });
        }
        check_unit("window.min_confidence", self.min_confidence)?;
        check_unit("window.confidence_floor", self.confidence_floor)
    }
}

// ---------------------------------------------------------------------------
// Learning rates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningRates {
    pub alpha_fast: f64,
    pub alpha_med: f64,
    pub alpha_slow: f64,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self { alpha_fast: 0.20, alpha_med: 0.08, alpha_slow: 0.02 }
    }
}

impl LearningRates {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("learning.alpha_fast", self.alpha_fast),
            ("learning.alpha_med", self.alpha_med),
            ("learning.alpha_slow", self.alpha_slow),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::AlphaOutOfRange { name, value });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evidence extraction
// ---------------------------------------------------------------------------

/// Window statistic a [`FeatureMapping`] may read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatFeature {
    MeanStrength,
    MeanConfidence,
    LowConfidenceFraction,
    StrengthSpread,
    EventsPerSecond,
    /// Standard deviation of inter-onset grid deviation, in grid units.
    TimingSpread,
}

/// `evidence = clamp01(offset + weight * feature)` for one dimension that
/// a window cannot observe directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureMapping {
    pub dimension: Dimension,
    pub source: StatFeature,
    pub weight: f64,
    #[serde(default)]
    pub offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Grid-relative timing spread (fraction of one grid unit) at which
    /// timing evidence bottoms out at zero.
    pub timing_tolerance: f64,
    /// Strength standard deviation at which dynamic consistency reaches zero.
    pub strength_spread_full_scale: f64,
    pub mappings: Vec<FeatureMapping>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            timing_tolerance: 0.08,
            strength_spread_full_scale: 0.25,
            mappings: Vec::new(),
        }
    }
}

impl EvidenceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timing_tolerance > 0.0 && self.timing_tolerance.is_finite()) {
            return Err(ConfigError::NonPositiveDuration { name: "evidence.timing_tolerance" });
        }
        if !(self.strength_spread_full_scale > 0.0 && self.strength_spread_full_scale.is_finite()) {
            return Err(ConfigError::NonPositiveDuration {
                name: "evidence.strength_spread_full_scale",
            });
        }
        for m in &self.mappings {
            if m.dimension.is_directly_observed() {
                return Err(ConfigError::InvalidMapping {
                    dimension: m.dimension,
                    reason: "dimension is already observed from window statistics",
                });
            }
            if !m.weight.is_finite() || !m.offset.is_finite() {
                return Err(ConfigError::InvalidMapping {
                    dimension: m.dimension,
                    reason: "weight and offset must be finite",
                });
            }
            if self.mappings.iter().filter(|o| o.dimension == m.dimension).count() > 1 {
                return Err(ConfigError::InvalidMapping {
                    dimension: m.dimension,
                    reason: "at most one mapping per dimension",
                });
            }
        }
        Ok(())
    }

    pub fn mapping_for(&self, dimension: Dimension) -> Option<&FeatureMapping> {
        self.mappings.iter().find(|m| m.dimension == dimension)
    }
}

// ---------------------------------------------------------------------------
// Policy thresholds
// ---------------------------------------------------------------------------

/// Per-dimension dead-band margins around policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadBand {
    pub tempo: f64,
    pub density: f64,
    pub loop_policy: f64,
    pub modulation: f64,
}

impl Default for DeadBand {
    fn default() -> Self {
        Self { tempo: 0.05, density: 0.05, loop_policy: 0.05, modulation: 0.05 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyThresholds {
    /// `[steady_clock below, follow_player at or above]`.
    pub tempo_thresholds: [f64; 2],
    /// `[sparse below, full at or above]`.
    pub density_thresholds: [f64; 2],
    /// `[2bars below, 4bars below, 8bars below]`; `none` at or above the last.
    pub loop_thresholds: [f64; 3],
    pub modulation_threshold: f64,
    pub dead_band: DeadBand,
    /// Consecutive stable windows required before support is withdrawn.
    pub windows_to_confirm_stability: u32,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            tempo_thresholds: [0.30, 0.55],
            density_thresholds: [0.35, 0.75],
            loop_thresholds: [0.20, 0.35, 0.50],
            modulation_threshold: 0.70,
            dead_band: DeadBand::default(),
            windows_to_confirm_stability: 2,
        }
    }
}

impl PolicyThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        check_ladder("policy.tempo_thresholds", &self.tempo_thresholds)?;
        check_ladder("policy.density_thresholds", &self.density_thresholds)?;
        check_ladder("policy.loop_thresholds", &self.loop_thresholds)?;
        check_unit("policy.modulation_threshold", self.modulation_threshold)?;
        if self.windows_to_confirm_stability == 0 {
            return Err(ConfigError::ZeroCount { name: "policy.windows_to_confirm_stability" });
        }
        for (name, value) in [
            ("policy.dead_band.tempo", self.dead_band.tempo),
            ("policy.dead_band.density", self.dead_band.density),
            ("policy.dead_band.loop_policy", self.dead_band.loop_policy),
            ("policy.dead_band.modulation", self.dead_band.modulation),
        ] {
            if !(0.0..0.5).contains(&value) {
                return Err(ConfigError::DeadBandOutOfRange { name, value });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Minimum time between probes (and from session start to the first one).
    pub interval_ms: u64,
    pub duration_ms: u64,
    /// Minimum stability metric before a probe may arm.
    pub stability_threshold: f64,
    /// Eligible windows averaged into the stability metric.
    pub stability_history: usize,
    /// Allowed drop of the post-probe metric below baseline before reverting.
    pub tolerance: f64,
    /// Fraction of the distance the slow trait moves on commit.
    pub commit_trait_rate: f64,
    /// How long a reverted (dimension, value) pair is excluded.
    pub revert_cooldown_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: 8 * 60_000,
            duration_ms: 45_000,
            stability_threshold: 0.75,
            stability_history: 4,
            tolerance: 0.05,
            commit_trait_rate: 0.25,
            revert_cooldown_ms: 20 * 60_000,
        }
    }
}

impl ProbeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::NonPositiveDuration { name: "probe.interval_ms" });
        }
        if self.duration_ms == 0 {
            return Err(ConfigError::NonPositiveDuration { name: "probe.duration_ms" });
        }
        if self.duration_ms >= self.interval_ms {
            return Err(ConfigError::ProbeDurationExceedsInterval {
                duration_ms: self.duration_ms,
                interval_ms: self.interval_ms,
            });
        }
        if self.stability_history == 0 {
            return Err(ConfigError::ZeroCount { name: "probe.stability_history" });
        }
        check_unit("probe.stability_threshold", self.stability_threshold)?;
        check_unit("probe.tolerance", self.tolerance)?;
        check_unit("probe.commit_trait_rate", self.commit_trait_rate)
    }
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Consecutive event-quality failures before the stream counts as degraded.
    pub degraded_after_windows: u32,
    /// Consecutive healthy windows before the degraded mode clears.
    pub recover_after_windows: u32,
    /// Trailing windows kept for reporting.
    pub history_len: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self { degraded_after_windows: 2, recover_after_windows: 1, history_len: 8 }
    }
}

impl DegradationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.degraded_after_windows == 0 {
            return Err(ConfigError::ZeroCount { name: "degradation.degraded_after_windows" });
        }
        if self.recover_after_windows == 0 {
            return Err(ConfigError::ZeroCount { name: "degradation.recover_after_windows" });
        }
        if self.history_len == 0 {
            return Err(ConfigError::ZeroCount { name: "degradation.history_len" });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { name, value })
    }
}

fn check_ladder(name: &'static str, ladder: &[f64]) -> Result<(), ConfigError> {
    for &t in ladder {
        check_unit(name, t)?;
    }
    if ladder.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::ThresholdsNotIncreasing { name });
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
