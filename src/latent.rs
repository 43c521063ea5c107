// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Latent State Model
//
// The only memory that survives a window. Fast estimates track the current
// session; slow traits carry across sessions and are persisted by the caller.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EvidenceConfig, LearningRates, StatFeature};
use crate::types::unit;
use crate::window::WindowStats;

// ─── Dimensions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    TimingStability,
    TempoAdherence,
    DynamicConsistency,
    FatigueResilience,
    CognitiveLoad,
    AdaptationSpeed,
    DensityPreference,
    ExplorationAppetite,
}

/// Adaptation speed class of a dimension's fast estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timescale {
    Fast,
    Medium,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::TimingStability,
        Dimension::TempoAdherence,
        Dimension::DynamicConsistency,
        Dimension::FatigueResilience,
        Dimension::CognitiveLoad,
        Dimension::AdaptationSpeed,
        Dimension::DensityPreference,
        Dimension::ExplorationAppetite,
    ];

    /// Time/groove dimensions adapt fast; everything else at medium speed.
    pub fn timescale(&self) -> Timescale {
        match self {
            Self::TimingStability | Self::TempoAdherence => Timescale::Fast,
            _ => Timescale::Medium,
        }
    }

    /// Dimensions with a fixed evidence formula from window statistics.
    pub fn is_directly_observed(&self) -> bool {
        matches!(
            self,
            Self::TimingStability | Self::TempoAdherence | Self::DynamicConsistency | Self::CognitiveLoad
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

// ─── TraitVector ────────────────────────────────────────────────────────────

/// One value in [0, 1] per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitVector {
    pub timing_stability: f64,
    pub tempo_adherence: f64,
    pub dynamic_consistency: f64,
    pub fatigue_resilience: f64,
    pub cognitive_load: f64,
    pub adaptation_speed: f64,
    pub density_preference: f64,
    pub exploration_appetite: f64,
}

/// Cross-session traits as persisted by a [`crate::store::TraitStore`].
pub type SlowTraits = TraitVector;

impl Default for TraitVector {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

impl TraitVector {
    pub fn uniform(v: f64) -> Self {
        let v = unit(v);
        Self {
            timing_stability: v,
            tempo_adherence: v,
            dynamic_consistency: v,
            fatigue_resilience: v,
            cognitive_load: v,
            adaptation_speed: v,
            density_preference: v,
            exploration_appetite: v,
        }
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::TimingStability => self.timing_stability,
            Dimension::TempoAdherence => self.tempo_adherence,
            Dimension::DynamicConsistency => self.dynamic_consistency,
            Dimension::FatigueResilience => self.fatigue_resilience,
            Dimension::CognitiveLoad => self.cognitive_load,
            Dimension::AdaptationSpeed => self.adaptation_speed,
            Dimension::DensityPreference => self.density_preference,
            Dimension::ExplorationAppetite => self.exploration_appetite,
        }
    }

    /// Writes are always clamped into [0, 1].
    pub fn set(&mut self, dim: Dimension, value: f64) {
        let value = unit(value);
        match dim {
            Dimension::TimingStability => self.timing_stability = value,
            Dimension::TempoAdherence => self.tempo_adherence = value,
            Dimension::DynamicConsistency => self.dynamic_consistency = value,
            Dimension::FatigueResilience => self.fatigue_resilience = value,
            Dimension::CognitiveLoad => self.cognitive_load = value,
            Dimension::AdaptationSpeed => self.adaptation_speed = value,
            Dimension::DensityPreference => self.density_preference = value,
            Dimension::ExplorationAppetite => self.exploration_appetite = value,
        }
    }

    /// Copy with every value forced into [0, 1]. Used on traits loaded from
    /// storage, which may have been hand-edited.
    pub fn clamped(&self) -> Self {
        let mut out = *self;
        for dim in Dimension::ALL {
            out.set(dim, self.get(dim));
        }
        out
    }
}

// ─── GrooveState ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GrooveState {
    pub fast: TraitVector,
    pub slow: SlowTraits,
}

impl GrooveState {
    /// Session start: slow traits loaded, fast estimates reset from them.
    pub fn from_slow(slow: SlowTraits) -> Self {
        let slow = slow.clamped();
        Self { fast: slow, slow }
    }
}

// ─── Evidence ───────────────────────────────────────────────────────────────

/// Per-dimension evidence extracted from one window. `None` means the
/// window says nothing about that dimension and it is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evidence {
    values: [Option<f64>; 8],
}

impl Evidence {
    pub fn get(&self, dim: Dimension) -> Option<f64> {
        self.values[dim.index()]
    }

    pub fn set(&mut self, dim: Dimension, value: f64) {
        self.values[dim.index()] = Some(unit(value));
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Map window statistics onto evidence.
    ///
    /// Timing dimensions need grid timing; dynamic consistency and cognitive
    /// load come from every non-empty window. Remaining dimensions only
    /// appear when a [`crate::config::FeatureMapping`] names them.
    pub fn from_window(stats: &WindowStats, cfg: &EvidenceConfig) -> Self {
        let mut ev = Evidence::default();
        if stats.event_count == 0 {
            return ev;
        }

        if let Some(timing) = stats.timing {
            let scale = timing.grid_interval_ms * cfg.timing_tolerance;
            ev.set(
                Dimension::TimingStability,
                1.0 - unit(timing.deviation_spread_ms() / scale),
            );
            ev.set(
                Dimension::TempoAdherence,
                1.0 - unit(timing.mean_deviation_ms.abs() / scale),
            );
        }
        ev.set(
            Dimension::DynamicConsistency,
            1.0 - unit(stats.strength_variance.sqrt() / cfg.strength_spread_full_scale),
        );
        ev.set(Dimension::CognitiveLoad, stats.low_confidence_fraction);

        for mapping in &cfg.mappings {
            if let Some(feature) = read_feature(stats, mapping.source) {
                ev.set(mapping.dimension, mapping.offset + mapping.weight * feature);
            }
        }
        ev
    }
}

/// Timing-stability evidence of a window, as used by the policy deriver and
/// the probe stability metric. Only eligible windows with timing qualify.
pub fn timing_evidence(stats: &WindowStats, cfg: &EvidenceConfig) -> Option<f64> {
    if !stats.eligible {
        return None;
    }
    let timing = stats.timing?;
    let scale = timing.grid_interval_ms * cfg.timing_tolerance;
    Some(1.0 - unit(timing.deviation_spread_ms() / scale))
}

fn read_feature(stats: &WindowStats, feature: StatFeature) -> Option<f64> {
    match feature {
        StatFeature::MeanStrength => Some(stats.mean_strength),
        StatFeature::MeanConfidence => Some(stats.mean_confidence),
        StatFeature::LowConfidenceFraction => Some(stats.low_confidence_fraction),
        StatFeature::StrengthSpread => Some(stats.strength_variance.sqrt()),
        StatFeature::EventsPerSecond => Some(stats.events_per_second),
        StatFeature::TimingSpread => stats
            .timing
            .map(|t| t.deviation_spread_ms() / t.grid_interval_ms),
    }
}

// ─── LatentModel ────────────────────────────────────────────────────────────

/// Sole writer of a session's [`GrooveState`].
#[derive(Debug, Clone)]
pub struct LatentModel {
    state: GrooveState,
    rates: LearningRates,
}

impl LatentModel {
    pub fn new(slow: SlowTraits, rates: LearningRates) -> Self {
        Self { state: GrooveState::from_slow(slow), rates }
    }

    pub fn state(&self) -> &GrooveState {
        &self.state
    }

    pub fn slow_traits(&self) -> SlowTraits {
        self.state.slow
    }

    /// Blend window evidence into both timescales with weight `w`.
    pub fn update(&mut self, evidence: &Evidence, w: f64) {
        self.state = update(&self.state, evidence, w, &self.rates);
    }

    /// Move `dim` toward `target`: the fast estimate all the way, the slow
    /// trait by `slow_rate` of the remaining distance.
    pub fn nudge(&mut self, dim: Dimension, target: f64, slow_rate: f64) {
        let target = unit(target);
        self.state.fast.set(dim, target);
        let slow = self.state.slow.get(dim);
        self.state.slow.set(dim, slow + unit(slow_rate) * (target - slow));
        debug!(dimension = ?dim, target, "latent nudge");
    }
}

/// Pure update rule: `clamp01((1 - a*w) * latent + (a*w) * evidence)` for
/// every dimension the evidence covers.
pub fn update(state: &GrooveState, evidence: &Evidence, w: f64, rates: &LearningRates) -> GrooveState {
    let w = unit(w);
    if w == 0.0 || evidence.is_empty() {
        return *state;
    }

    let mut next = *state;
    for dim in Dimension::ALL {
        let Some(e) = evidence.get(dim) else { continue };
        let alpha_fast = match dim.timescale() {
            Timescale::Fast => rates.alpha_fast,
            Timescale::Medium => rates.alpha_med,
        };
        next.fast.set(dim, blend(state.fast.get(dim), e, alpha_fast * w));
        next.slow.set(dim, blend(state.slow.get(dim), e, rates.alpha_slow * w));
    }
    debug!(
        weight = w,
        timing_stability = next.fast.timing_stability,
        cognitive_load = next.fast.cognitive_load,
        "latent update"
    );
    next
}

fn blend(latent: f64, evidence: f64, k: f64) -> f64 {
    unit((1.0 - k) * latent + k * evidence)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureMapping, WindowConfig};
    use crate::types::{EngineContext, EventType, Grid, PerformanceEvent};
    use crate::window::{evaluate_window, WindowSpan};

    fn full_evidence(v: f64) -> Evidence {
        let mut ev = Evidence::default();
        for dim in Dimension::ALL {
            ev.set(dim, v);
        }
        ev
    }

    fn stable_window(strength_jitter: bool) -> WindowStats {
        let events: Vec<PerformanceEvent> = (0..20u64)
            .map(|i| {
                let s = if strength_jitter && i % 2 == 0 { 0.2 } else { 0.7 };
                PerformanceEvent::new(i * 750, EventType::NoteOnset, s, 0.9)
            })
            .collect();
        evaluate_window(
            &events,
            Some(&EngineContext::new(80.0, Grid::Quarter)),
            WindowSpan { start_ms: 0, duration_ms: 15_000 },
            &WindowConfig::default(),
        )
    }

    #[test]
    fn zero_weight_is_bit_identical() {
        let state = GrooveState::from_slow(TraitVector::uniform(0.37));
        let next = update(&state, &full_evidence(1.0), 0.0, &LearningRates::default());
        assert_eq!(next, state);
    }

    #[test]
    fn values_stay_in_unit_interval() {
        let rates = LearningRates { alpha_fast: 1.0, alpha_med: 1.0, alpha_slow: 1.0 };
        let mut state = GrooveState::default();
        for (e, w) in [(0.0, 1.0), (1.0, 1.0), (0.3, 0.7), (1.0, 0.01), (0.0, 0.99)] {
            state = update(&state, &full_evidence(e), w, &rates);
            for dim in Dimension::ALL {
                let v = state.fast.get(dim);
                assert!((0.0..=1.0).contains(&v), "{dim:?} = {v}");
                let v = state.slow.get(dim);
                assert!((0.0..=1.0).contains(&v), "{dim:?} = {v}");
            }
        }
    }

    #[test]
    fn constant_evidence_converges_monotonically() {
        let rates = LearningRates::default();
        let mut state = GrooveState::default();
        let target = 0.9;
        let mut prev = (state.fast.timing_stability - target).abs();
        for _ in 0..50 {
            state = update(&state, &full_evidence(target), 0.8, &rates);
            let dist = (state.fast.timing_stability - target).abs();
            assert!(dist < prev);
            prev = dist;
        }
    }

    #[test]
    fn time_dimensions_adapt_faster_than_medium_ones() {
        let state = GrooveState::default();
        let next = update(&state, &full_evidence(1.0), 1.0, &LearningRates::default());
        assert!((next.fast.timing_stability - 0.6).abs() < 1e-12);
        assert!((next.fast.cognitive_load - 0.54).abs() < 1e-12);
        assert!((next.slow.timing_stability - 0.51).abs() < 1e-12);
    }

    #[test]
    fn skipped_dimensions_are_untouched() {
        let mut ev = Evidence::default();
        ev.set(Dimension::TimingStability, 1.0);
        let state = GrooveState::default();
        let next = update(&state, &ev, 1.0, &LearningRates::default());
        assert_eq!(next.fast.exploration_appetite, 0.5);
        assert_eq!(next.slow.density_preference, 0.5);
    }

    #[test]
    fn perfectly_even_window_gives_full_timing_evidence() {
        let stats = stable_window(false);
        let ev = Evidence::from_window(&stats, &EvidenceConfig::default());
        assert_eq!(ev.get(Dimension::TimingStability), Some(1.0));
        assert_eq!(ev.get(Dimension::TempoAdherence), Some(1.0));
        assert_eq!(ev.get(Dimension::DynamicConsistency), Some(1.0));
        assert_eq!(ev.get(Dimension::CognitiveLoad), Some(0.0));
        assert_eq!(ev.get(Dimension::FatigueResilience), None);
        assert_eq!(timing_evidence(&stats, &EvidenceConfig::default()), Some(1.0));
    }

    #[test]
    fn uneven_strength_lowers_dynamic_consistency() {
        let stats = stable_window(true);
        let ev = Evidence::from_window(&stats, &EvidenceConfig::default());
        // Strength alternates 0.2/0.7: spread 0.25, the full-scale value.
        let v = ev.get(Dimension::DynamicConsistency).expect("test: always observed");
        assert!(v < 1e-9);
    }

    #[test]
    fn configured_mapping_feeds_latent_only_dimension() {
        let cfg = EvidenceConfig {
            mappings: vec![FeatureMapping {
                dimension: Dimension::FatigueResilience,
                source: StatFeature::MeanStrength,
                weight: 1.0,
                offset: 0.1,
            }],
            ..EvidenceConfig::default()
        };
        let ev = Evidence::from_window(&stable_window(false), &cfg);
        let v = ev.get(Dimension::FatigueResilience).expect("test: mapped");
        assert!((v - 0.8).abs() < 1e-12);
    }

    #[test]
    fn nudge_moves_fast_fully_and_slow_partially() {
        let mut model = LatentModel::new(SlowTraits::default(), LearningRates::default());
        model.nudge(Dimension::DensityPreference, 0.9, 0.25);
        assert_eq!(model.state().fast.density_preference, 0.9);
        assert!((model.state().slow.density_preference - 0.6).abs() < 1e-12);
    }

    #[test]
    fn loaded_traits_are_clamped() {
        let mut raw = SlowTraits::default();
        raw.timing_stability = 4.0;
        raw.cognitive_load = -1.0;
        let state = GrooveState::from_slow(raw);
        assert_eq!(state.slow.timing_stability, 1.0);
        assert_eq!(state.fast.cognitive_load, 0.0);
    }
}
