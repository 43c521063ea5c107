// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Policy Deriver
//
// Latent state + current window -> discrete control choices. Pure; the only
// memory it sees is the committed policy passed in by the caller, which
// drives the dead-band hysteresis.

use serde::{Deserialize, Serialize};

use crate::config::{GrooveConfig, PolicyThresholds};
use crate::latent::{timing_evidence, GrooveState};
use crate::types::{unit, ChangePolicy, DensityTarget, LoopPolicy, ReasonTag, TempoPolicy};
use crate::window::WindowStats;

// ─── Tier Ladders ───────────────────────────────────────────────────────────

/// A control enum ordered by ascending drive.
pub trait Tiered: Copy + PartialEq + 'static {
    const LADDER: &'static [Self];

    fn rank(self) -> usize {
        Self::LADDER.iter().position(|&t| t == self).unwrap_or(0)
    }
}

impl Tiered for TempoPolicy {
    const LADDER: &'static [Self] = &[Self::SteadyClock, Self::GentleNudge, Self::FollowPlayer];
}

impl Tiered for DensityTarget {
    const LADDER: &'static [Self] = &[Self::Sparse, Self::Medium, Self::Full];
}

impl Tiered for LoopPolicy {
    const LADDER: &'static [Self] = &[Self::TwoBars, Self::FourBars, Self::EightBars, Self::None];
}

impl Tiered for ChangePolicy {
    const LADDER: &'static [Self] = &[Self::AvoidModulation, Self::AllowModulation];
}

/// Plain threshold lookup: tier `i` covers `[t[i-1], t[i])`.
pub fn lookup<T: Tiered>(drive: f64, thresholds: &[f64]) -> T {
    let idx = thresholds.iter().filter(|&&t| drive >= t).count();
    T::LADDER[idx.min(T::LADDER.len() - 1)]
}

/// Threshold lookup with a dead band around every boundary.
///
/// From a previous tier the output only moves to a tier whose separating
/// thresholds the drive has cleared by at least `margin`; a jump over
/// several tiers lands on the furthest one that qualifies.
pub fn hysteretic<T: Tiered>(drive: f64, thresholds: &[f64], margin: f64, previous: Option<T>) -> T {
    let raw = lookup::<T>(drive, thresholds);
    let Some(prev) = previous else { return raw };

    let (p, r) = (prev.rank(), raw.rank());
    let idx = if r > p {
        (p + 1..=r)
            .rev()
            .find(|&j| drive >= thresholds[j - 1] + margin)
            .unwrap_or(p)
    } else if r < p {
        (r..p).find(|&j| drive < thresholds[j] - margin).unwrap_or(p)
    } else {
        p
    };
    T::LADDER[idx]
}

/// Hysteresis with slow recovery.
///
/// Moves toward a lower tier (more support) follow `escalation` at once.
/// Moves toward a higher tier follow `recovery` and only once `confirmed`,
/// so a single good window between bad ones never withdraws support.
pub fn settle<T: Tiered>(
    escalation: f64,
    recovery: f64,
    thresholds: &[f64],
    margin: f64,
    previous: Option<T>,
    confirmed: bool,
) -> T {
    let Some(prev) = previous else { return lookup(escalation, thresholds) };

    let down = hysteretic(escalation, thresholds, margin, Some(prev));
    if down.rank() < prev.rank() {
        return down;
    }
    if confirmed {
        let up = hysteretic(recovery, thresholds, margin, Some(prev));
        if up.rank() > prev.rank() {
            return up;
        }
    }
    prev
}

// ─── Decision ───────────────────────────────────────────────────────────────

/// Last committed value per output field. `None` until a field has been
/// derived once in this session (or seeded by a resume hint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommittedPolicy {
    pub tempo_policy: Option<TempoPolicy>,
    pub density_target: Option<DensityTarget>,
    pub loop_policy: Option<LoopPolicy>,
    pub change_policy: Option<ChangePolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Drives {
    pub timing: f64,
    /// `min(timing, 1 - cognitive_load)`: what the player can absorb before
    /// preference is applied.
    pub capacity: f64,
    pub density: f64,
    pub modulation: f64,
    /// Timing-stability evidence of the current window, when it had any.
    pub window_timing: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub tempo_policy: TempoPolicy,
    pub density_target: DensityTarget,
    pub loop_policy: LoopPolicy,
    pub change_policy: ChangePolicy,
    pub drives: Drives,
    pub reason: ReasonTag,
}

/// Continuous drivers behind every output field.
///
/// With a window, timing is the worse of the latent and the window's own
/// evidence; without one it is the latent alone.
pub fn drives(state: &GrooveState, stats: Option<&WindowStats>, cfg: &GrooveConfig) -> Drives {
    let fast = &state.fast;
    let window_timing = stats.and_then(|s| timing_evidence(s, &cfg.evidence));
    let timing = match window_timing {
        Some(w) => fast.timing_stability.min(w),
        None => fast.timing_stability,
    };
    let capacity = timing.min(1.0 - fast.cognitive_load);
    Drives {
        timing,
        capacity,
        density: unit(capacity + (fast.density_preference - 0.5)),
        modulation: fast.exploration_appetite,
        window_timing,
    }
}

/// Map state and window onto control choices.
///
/// `stable_windows` counts the consecutive eligible windows with stable
/// timing up to and including this one. Tempo, density and loop escalate
/// on the window-inclusive drivers and only relax, on the latent drivers,
/// once that count reaches `windows_to_confirm_stability`.
pub fn derive(
    state: &GrooveState,
    stats: Option<&WindowStats>,
    committed: &CommittedPolicy,
    stable_windows: u32,
    cfg: &GrooveConfig,
) -> PolicyDecision {
    let th = &cfg.policy;
    let d = drives(state, stats, cfg);
    let latent = drives(state, None, cfg);
    let confirmed = stable_windows >= th.windows_to_confirm_stability;

    let tempo_policy = settle(
        d.timing,
        latent.timing,
        &th.tempo_thresholds,
        th.dead_band.tempo,
        committed.tempo_policy,
        confirmed,
    );
    let density_target = settle(
        d.density,
        latent.density,
        &th.density_thresholds,
        th.dead_band.density,
        committed.density_target,
        confirmed,
    );
    let loop_policy = settle(
        d.timing,
        latent.timing,
        &th.loop_thresholds,
        th.dead_band.loop_policy,
        committed.loop_policy,
        confirmed,
    );
    let change_policy = hysteretic(
        d.modulation,
        &[th.modulation_threshold],
        th.dead_band.modulation,
        committed.change_policy,
    );

    let eligible = stats.map_or(false, |s| s.eligible);
    let reason = if !eligible {
        ReasonTag::InsufficientEvidence
    } else if tempo_policy != TempoPolicy::FollowPlayer {
        match d.window_timing {
            Some(w) if w >= th.tempo_thresholds[1] => ReasonTag::StabilityRecovering,
            _ => ReasonTag::LowTimingStability,
        }
    } else {
        ReasonTag::StableBaseline
    };

    PolicyDecision {
        tempo_policy,
        density_target,
        loop_policy,
        change_policy,
        drives: d,
        reason,
    }
}

// ─── Inverse Mapping (probe commit) ─────────────────────────────────────────

/// Midpoint of tier `idx` on a [0, 1] ladder.
fn tier_center(thresholds: &[f64], idx: usize) -> f64 {
    let lo = if idx == 0 { 0.0 } else { thresholds[idx - 1] };
    let hi = thresholds.get(idx).copied().unwrap_or(1.0);
    (lo + hi) / 2.0
}

/// Density preference that puts the density drive in the middle of
/// `target`'s tier, given the player's current capacity.
pub fn density_preference_for(target: DensityTarget, capacity: f64, th: &PolicyThresholds) -> f64 {
    unit(tier_center(&th.density_thresholds, target.rank()) - capacity + 0.5)
}

/// Exploration appetite that puts the modulation drive in `target`'s tier.
pub fn exploration_appetite_for(target: ChangePolicy, th: &PolicyThresholds) -> f64 {
    tier_center(&[th.modulation_threshold], target.rank())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
