// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Window Evaluator
//
// Evidence extraction only; nothing here learns or remembers. A window's
// events plus the engine context become one immutable WindowStats.

use serde::{Deserialize, Serialize};

use crate::config::WindowConfig;
use crate::types::{EngineContext, PerformanceEvent};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Time span covered by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub start_ms: u64,
    pub duration_ms: u64,
}

impl WindowSpan {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }
}

/// Grid-relative timing statistics; only present when a grid is defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub grid_interval_ms: f64,
    /// Mean signed deviation of inter-onset intervals from the nearest grid multiple.
    pub mean_deviation_ms: f64,
    pub deviation_variance_ms2: f64,
    pub intervals: usize,
}

impl TimingStats {
    pub fn deviation_spread_ms(&self) -> f64 {
        self.deviation_variance_ms2.sqrt()
    }
}

/// First eligibility rule a window failed, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    InsufficientEvents,
    LowConfidence,
    MissingGrid,
}

impl Ineligibility {
    /// True for faults of the event stream itself, as opposed to engine context.
    pub fn is_event_quality(&self) -> bool {
        matches!(self, Self::InsufficientEvents | Self::LowConfidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub span: WindowSpan,
    pub event_count: usize,
    pub timing: Option<TimingStats>,
    pub mean_strength: f64,
    pub strength_variance: f64,
    pub mean_confidence: f64,
    pub low_confidence_fraction: f64,
    pub events_per_second: f64,
    pub window_confidence: f64,
    pub eligible: bool,
    pub ineligibility: Option<Ineligibility>,
}

impl WindowStats {
    fn empty(span: WindowSpan) -> Self {
        Self {
            span,
            event_count: 0,
            timing: None,
            mean_strength: 0.0,
            strength_variance: 0.0,
            mean_confidence: 0.0,
            low_confidence_fraction: 0.0,
            events_per_second: 0.0,
            window_confidence: 0.0,
            eligible: false,
            ineligibility: Some(Ineligibility::InsufficientEvents),
        }
    }

    /// Weight this window carries in a latent update (0 when ineligible).
    pub fn update_weight(&self) -> f64 {
        if self.eligible { self.window_confidence } else { 0.0 }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Summarize the events whose onsets fall inside `span`.
///
/// `events` are expected in stream order; anything outside the span is
/// ignored. Pure function of its inputs.
pub fn evaluate_window(
    events: &[PerformanceEvent],
    context: Option<&EngineContext>,
    span: WindowSpan,
    cfg: &WindowConfig,
) -> WindowStats {
    let in_span: Vec<&PerformanceEvent> = events
        .iter()
        .filter(|e| e.t_onset_ms >= span.start_ms && e.t_onset_ms < span.end_ms())
        .collect();

    let event_count = in_span.len();
    if event_count == 0 {
        return WindowStats::empty(span);
    }

    let n = event_count as f64;
    let mean_strength = in_span.iter().map(|e| e.strength).sum::<f64>() / n;
    let strength_variance = in_span
        .iter()
        .map(|e| (e.strength - mean_strength).powi(2))
        .sum::<f64>()
        / n;
    let mean_confidence = in_span.iter().map(|e| e.confidence).sum::<f64>() / n;
    let low_confidence = in_span
        .iter()
        .filter(|e| e.confidence < cfg.confidence_floor)
        .count();
    let low_confidence_fraction = low_confidence as f64 / n;
    let events_per_second = if span.duration_ms > 0 {
        n * 1000.0 / span.duration_ms as f64
    } else {
        0.0
    };

    let grid_ms = context.and_then(EngineContext::grid_interval_ms);
    let timing = grid_ms.and_then(|g| grid_timing(&in_span, g, cfg.confidence_floor));

    let ineligibility = if event_count < cfg.min_events {
        Some(Ineligibility::InsufficientEvents)
    } else if mean_confidence < cfg.min_confidence {
        Some(Ineligibility::LowConfidence)
    } else if grid_ms.is_none() {
        Some(Ineligibility::MissingGrid)
    } else {
        None
    };
    let eligible = ineligibility.is_none();

    let count_factor = (n / cfg.min_events as f64).min(1.0);
    let window_confidence = if eligible { mean_confidence * count_factor } else { 0.0 };

    WindowStats {
        span,
        event_count,
        timing,
        mean_strength,
        strength_variance,
        mean_confidence,
        low_confidence_fraction,
        events_per_second,
        window_confidence,
        eligible,
        ineligibility,
    }
}

/// Deviation of each reliable inter-onset interval from its nearest
/// positive grid multiple. Needs at least two intervals.
fn grid_timing(events: &[&PerformanceEvent], grid_ms: f64, floor: f64) -> Option<TimingStats> {
    let reliable: Vec<u64> = events
        .iter()
        .filter(|e| e.confidence >= floor)
        .map(|e| e.t_onset_ms)
        .collect();

    let deviations: Vec<f64> = reliable
        .windows(2)
        .map(|pair| {
            let ioi = pair[1].saturating_sub(pair[0]) as f64;
            let multiple = (ioi / grid_ms).round().max(1.0);
            ioi - multiple * grid_ms
        })
        .collect();

    if deviations.len() < 2 {
        return None;
    }

    let k = deviations.len() as f64;
    let mean = deviations.iter().sum::<f64>() / k;
    let variance = deviations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / k;

    Some(TimingStats {
        grid_interval_ms: grid_ms,
        mean_deviation_ms: mean,
        deviation_variance_ms2: variance,
        intervals: deviations.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
