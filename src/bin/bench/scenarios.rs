// Scenario Definitions — synthetic performers against the Groove Layer
// All scenario logic lives in per-window profile/context functions

use groove_engine::{GrooveConfig, LoopPolicy, TempoPolicy};

use crate::traffic::PlayingProfile;

// ─── Scenario Configuration ─────────────────────────────────────────────────

pub struct Scenario {
    pub name: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub windows: u64,
    pub tempo_bpm: f64,
    /// Playing profile for window `i`.
    pub profile: fn(u64) -> PlayingProfile,
    /// Whether the engine supplies a grid for window `i`.
    pub context: fn(u64) -> bool,
    /// Config override (defaults when `None`).
    pub config: Option<fn() -> GrooveConfig>,
    pub criteria: PassCriteria,
}

pub struct PassCriteria {
    pub final_tempo: Option<TempoPolicy>,
    /// Loop policy on every emission.
    pub loop_always: Option<LoopPolicy>,
    /// Every emission while the stream is degraded must hold steady_clock.
    pub steady_while_degraded: bool,
    pub max_churn: Option<u32>,
    pub min_probes: Option<u32>,
    pub max_probes: Option<u32>,
    pub p95_latency_us: f64,
}

impl Default for PassCriteria {
    fn default() -> Self {
        Self {
            final_tempo: None,
            loop_always: None,
            steady_while_degraded: true,
            max_churn: None,
            min_probes: None,
            max_probes: None,
            p95_latency_us: 500_000.0,
        }
    }
}

// ─── Profile Functions ──────────────────────────────────────────────────────

fn always_steady(_: u64) -> PlayingProfile {
    PlayingProfile::steady()
}

fn always_shaky(_: u64) -> PlayingProfile {
    PlayingProfile::shaky()
}

fn burst_in_middle(w: u64) -> PlayingProfile {
    if (16..24).contains(&w) { PlayingProfile::shaky() } else { PlayingProfile::steady() }
}

fn shaky_then_steady(w: u64) -> PlayingProfile {
    if w < 12 { PlayingProfile::shaky() } else { PlayingProfile::steady() }
}

fn dropout(w: u64) -> PlayingProfile {
    if (10..30).contains(&w) { PlayingProfile::silent() } else { PlayingProfile::steady() }
}

fn fatigue(w: u64) -> PlayingProfile {
    let t = (w as f64 / 80.0).min(1.0);
    PlayingProfile {
        jitter_ms: 6.0 + 50.0 * t,
        drift_ms: -20.0 * t,
        fill: 1.0 - 0.3 * t,
        confidence: 0.9 - 0.2 * t,
        strength: 0.7 - 0.3 * t,
        spurious: (4.0 * t) as u32,
    }
}

fn grid_always(_: u64) -> bool {
    true
}

fn grid_never(_: u64) -> bool {
    false
}

fn grid_flaky(w: u64) -> bool {
    w % 7 != 3
}

fn short_probe_config() -> GrooveConfig {
    let mut cfg = GrooveConfig::default();
    cfg.probe.interval_ms = 120_000;
    cfg.probe.duration_ms = 30_000;
    cfg.probe.revert_cooldown_ms = 240_000;
    cfg
}

// ─── Scenario List ──────────────────────────────────────────────────────────

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "STABLE_BASELINE",
            label: "Stable player, 80 BPM",
            category: "baseline",
            windows: 40,
            tempo_bpm: 80.0,
            profile: always_steady,
            context: grid_always,
            config: None,
            criteria: PassCriteria {
                final_tempo: Some(TempoPolicy::FollowPlayer),
                max_churn: Some(8),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "UNSTABLE_THROUGHOUT",
            label: "Unstable timing, 96 BPM",
            category: "stability",
            windows: 40,
            tempo_bpm: 96.0,
            profile: always_shaky,
            context: grid_always,
            config: None,
            criteria: PassCriteria {
                final_tempo: Some(TempoPolicy::SteadyClock),
                max_probes: Some(0),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "UNSTABLE_BURST",
            label: "Stable, 2-minute burst, stable",
            category: "stability",
            windows: 48,
            tempo_bpm: 80.0,
            profile: burst_in_middle,
            context: grid_always,
            config: None,
            criteria: PassCriteria { max_churn: Some(16), ..PassCriteria::default() },
        },
        Scenario {
            name: "RECOVERY",
            label: "Shaky warm-up then steady",
            category: "stability",
            windows: 60,
            tempo_bpm: 100.0,
            profile: shaky_then_steady,
            context: grid_always,
            config: None,
            criteria: PassCriteria {
                final_tempo: Some(TempoPolicy::FollowPlayer),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "MISSING_TEMPO",
            label: "Engine never supplies a grid",
            category: "degradation",
            windows: 40,
            tempo_bpm: 80.0,
            profile: always_steady,
            context: grid_never,
            config: None,
            criteria: PassCriteria {
                loop_always: Some(LoopPolicy::None),
                max_probes: Some(0),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "FLAKY_CONTEXT",
            label: "Grid missing every 7th window",
            category: "degradation",
            windows: 56,
            tempo_bpm: 120.0,
            profile: always_steady,
            context: grid_flaky,
            config: None,
            criteria: PassCriteria::default(),
        },
        Scenario {
            name: "DROPOUT",
            label: "Five minutes of silence mid-session",
            category: "degradation",
            windows: 50,
            tempo_bpm: 80.0,
            profile: dropout,
            context: grid_always,
            config: None,
            criteria: PassCriteria::default(),
        },
        Scenario {
            name: "FATIGUE_DRIFT",
            label: "Gradual fatigue over 20 minutes",
            category: "adaptation",
            windows: 100,
            tempo_bpm: 90.0,
            profile: fatigue,
            context: grid_always,
            config: None,
            criteria: PassCriteria {
                final_tempo: Some(TempoPolicy::SteadyClock),
                ..PassCriteria::default()
            },
        },
        Scenario {
            name: "PROBE_FRIENDLY",
            label: "Long stable session, short probe interval",
            category: "probing",
            windows: 80,
            tempo_bpm: 80.0,
            profile: always_steady,
            context: grid_always,
            config: Some(short_probe_config),
            criteria: PassCriteria { min_probes: Some(2), ..PassCriteria::default() },
        },
    ]
}
