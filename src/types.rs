// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Type Definitions

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Session Identity ───────────────────────────────────────────────────────

/// Opaque identifiers supplied by the host runtime. Never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self { PlayerId(s.to_string()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub player_id: PlayerId,
    pub device_id: String,
    pub session_id: String,
}

impl SessionMeta {
    pub fn new(player_id: &str, device_id: &str, session_id: &str) -> Self {
        Self {
            player_id: PlayerId::from(player_id),
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

// ─── Performance Events ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NoteOnset,
    StrumOnset,
    PercussiveOnset,
}

/// A single onset reported by the extractor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PerformanceEvent {
    pub t_onset_ms: u64,
    pub event_type: EventType,
    pub strength: f64,
    pub confidence: f64,
}

impl PerformanceEvent {
    pub fn new(t_onset_ms: u64, event_type: EventType, strength: f64, confidence: f64) -> Self {
        Self { t_onset_ms, event_type, strength, confidence }
    }

    /// Extractor noise is absorbed, not rejected: out-of-range or NaN
    /// strength/confidence land inside [0, 1].
    pub fn sanitized(self) -> Self {
        Self {
            strength: unit(self.strength),
            confidence: unit(self.confidence),
            ..self
        }
    }
}

/// Clamp into [0, 1], mapping NaN to 0.
pub fn unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

// ─── Engine Context ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSignature {
    pub beats_per_bar: u8,
    pub beat_unit: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Grid {
    Quarter,
    Eighth,
    Sixteenth,
    Triplet,
}

impl Grid {
    /// Grid unit expressed in quarter-note beats.
    pub fn beats(&self) -> f64 {
        match self {
            Self::Quarter => 1.0,
            Self::Eighth => 0.5,
            Self::Sixteenth => 0.25,
            Self::Triplet => 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Feel {
    #[default]
    Straight,
    Swing,
    Hybrid,
}

/// Point-in-time snapshot from the accompaniment host for one window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineContext {
    #[serde(default)]
    pub tempo_bpm_target: Option<f64>,
    #[serde(default)]
    pub time_signature: Option<TimeSignature>,
    #[serde(default)]
    pub grid: Option<Grid>,
    #[serde(default)]
    pub feel: Feel,
    #[serde(default)]
    pub bar_position: Option<f64>,
}

impl EngineContext {
    pub fn new(tempo_bpm: f64, grid: Grid) -> Self {
        Self {
            tempo_bpm_target: Some(tempo_bpm),
            time_signature: Some(TimeSignature { beats_per_bar: 4, beat_unit: 4 }),
            grid: Some(grid),
            feel: Feel::Straight,
            bar_position: None,
        }
    }

    /// Grid spacing in milliseconds, if the context defines one.
    pub fn grid_interval_ms(&self) -> Option<f64> {
        let tempo = self.tempo_bpm_target?;
        let grid = self.grid?;
        if !tempo.is_finite() || tempo <= 0.0 {
            return None;
        }
        Some(60_000.0 / tempo * grid.beats())
    }
}

// ─── Control Output Enums ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TempoPolicy {
    FollowPlayer,
    SteadyClock,
    GentleNudge,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DensityTarget {
    Sparse,
    Medium,
    Full,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LoopPolicy {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "2bars")]
    TwoBars,
    #[serde(rename = "4bars")]
    FourBars,
    #[serde(rename = "8bars")]
    EightBars,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    AvoidModulation,
    AllowModulation,
}

/// Why the emitted controls look the way they do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReasonTag {
    StableBaseline,
    LowTimingStability,
    StabilityRecovering,
    InsufficientEvidence,
    MissingContext,
    StreamDegraded,
    ProbeActive,
    ProbeCommitted,
    ProbeReverted,
}

impl ReasonTag {
    pub fn notes(&self) -> &'static str {
        match self {
            Self::StableBaseline => "Baseline stable play; following the player.",
            Self::LowTimingStability => "Timing instability; simplifying and holding the clock.",
            Self::StabilityRecovering => "Stability returning; relaxing support gradually.",
            Self::InsufficientEvidence => "Window too sparse or uncertain; holding current controls.",
            Self::MissingContext => "No tempo grid from the engine; grid-aligned controls frozen.",
            Self::StreamDegraded => "Event stream degraded; steady clock, other controls frozen.",
            Self::ProbeActive => "Trying an alternative for one control dimension.",
            Self::ProbeCommitted => "Alternative held up; adopted as the new preference.",
            Self::ProbeReverted => "Alternative hurt stability; original control restored.",
        }
    }
}

// ─── ControlOutput (published contract) ─────────────────────────────────────

/// The externally published control snapshot. Field names and enum values
/// are a wire contract; keep them backward-compatible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ControlOutput {
    pub tempo_policy: TempoPolicy,
    pub density_target: DensityTarget,
    pub loop_policy: LoopPolicy,
    pub change_policy: ChangePolicy,
    pub window_confidence: f64,
    pub reason: ReasonTag,
}

impl ControlOutput {
    /// True when any policy field differs (confidence and reason ignored).
    pub fn policy_differs(&self, other: &ControlOutput) -> bool {
        self.tempo_policy != other.tempo_policy
            || self.density_target != other.density_target
            || self.loop_policy != other.loop_policy
            || self.change_policy != other.change_policy
    }
}

// ─── Probe Dimensions ───────────────────────────────────────────────────────

/// Output dimensions the probe controller is allowed to experiment on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeDimension {
    DensityTarget,
    ChangePolicy,
}

/// A candidate value for one probed dimension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "dimension", content = "value", rename_all = "snake_case")]
pub enum ProbeValue {
    Density(DensityTarget),
    Change(ChangePolicy),
}

impl ProbeValue {
    pub fn dimension(&self) -> ProbeDimension {
        match self {
            Self::Density(_) => ProbeDimension::DensityTarget,
            Self::Change(_) => ProbeDimension::ChangePolicy,
        }
    }

    /// Overwrite this value's dimension in `output`.
    pub fn apply_to(&self, output: &mut ControlOutput) {
        match *self {
            Self::Density(d) => output.density_target = d,
            Self::Change(c) => output.change_policy = c,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
