// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Degradation Monitor
//
// Tracks input health across windows and decides which output fields are
// held. Overrides applied here win over both the policy deriver and any
// running probe.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DegradationConfig;
use crate::policy::CommittedPolicy;
use crate::types::{ControlOutput, LoopPolicy, ReasonTag, TempoPolicy};
use crate::window::{Ineligibility, WindowStats};

// ---------------------------------------------------------------------------
// Engine status
// ---------------------------------------------------------------------------

/// Whether the accompaniment engine is currently accepting controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    #[default]
    Applying,
    Rejecting,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// One entry of the trailing health history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowHealth {
    pub window_start_ms: u64,
    pub eligible: bool,
    pub ineligibility: Option<Ineligibility>,
    pub grid_defined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DegradationStatus {
    pub stream_degraded: bool,
    pub context_missing: bool,
    pub engine_rejecting: bool,
}

impl DegradationStatus {
    /// Probing neither starts nor continues under these modes. Engine
    /// rejection only changes delivery.
    pub fn blocks_probing(&self) -> bool {
        self.stream_degraded || self.context_missing
    }

    pub fn freezes_density(&self) -> bool {
        self.stream_degraded
    }

    pub fn freezes_change(&self) -> bool {
        self.stream_degraded
    }

    pub fn freezes_loop(&self) -> bool {
        self.stream_degraded || self.context_missing
    }

    pub fn reason(&self) -> Option<ReasonTag> {
        if self.stream_degraded {
            Some(ReasonTag::StreamDegraded)
        } else if self.context_missing {
            Some(ReasonTag::MissingContext)
        } else {
            None
        }
    }

    /// Force held fields onto `output`.
    pub fn apply(&self, output: &mut ControlOutput, committed: &CommittedPolicy) {
        if self.stream_degraded {
            output.window_confidence = 0.0;
            output.tempo_policy = TempoPolicy::SteadyClock;
            if let Some(d) = committed.density_target {
                output.density_target = d;
            }
            if let Some(c) = committed.change_policy {
                output.change_policy = c;
            }
        }
        if self.freezes_loop() {
            output.loop_policy = committed.loop_policy.unwrap_or(LoopPolicy::None);
        }
    }
}

// ---------------------------------------------------------------------------
// DegradationMonitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DegradationMonitor {
    cfg: DegradationConfig,
    history: VecDeque<WindowHealth>,
    consecutive_bad: u32,
    consecutive_good: u32,
    status: DegradationStatus,
}

impl DegradationMonitor {
    pub fn new(cfg: DegradationConfig) -> Self {
        let len = cfg.history_len;
        Self {
            cfg,
            history: VecDeque::with_capacity(len),
            consecutive_bad: 0,
            consecutive_good: 0,
            status: DegradationStatus::default(),
        }
    }

    pub fn status(&self) -> DegradationStatus {
        self.status
    }

    pub fn history(&self) -> impl Iterator<Item = &WindowHealth> {
        self.history.iter()
    }

    pub fn set_engine_status(&mut self, status: EngineStatus) {
        let rejecting = status == EngineStatus::Rejecting;
        if rejecting != self.status.engine_rejecting {
            info!(?status, "engine status changed");
        }
        self.status.engine_rejecting = rejecting;
    }

    /// Record a closed window. `grid_defined` reflects the engine context
    /// supplied for that window.
    pub fn observe(&mut self, stats: &WindowStats, grid_defined: bool) -> DegradationStatus {
        if self.history.len() == self.cfg.history_len {
            self.history.pop_front();
        }
        self.history.push_back(WindowHealth {
            window_start_ms: stats.span.start_ms,
            eligible: stats.eligible,
            ineligibility: stats.ineligibility,
            grid_defined,
        });

        let event_quality_bad = stats.ineligibility.map_or(false, |i| i.is_event_quality());
        if event_quality_bad {
            self.consecutive_bad += 1;
            self.consecutive_good = 0;
            if !self.status.stream_degraded && self.consecutive_bad >= self.cfg.degraded_after_windows {
                warn!(
                    window_start_ms = stats.span.start_ms,
                    consecutive = self.consecutive_bad,
                    "event stream degraded"
                );
                self.status.stream_degraded = true;
            }
        } else {
            self.consecutive_good += 1;
            self.consecutive_bad = 0;
            if self.status.stream_degraded && self.consecutive_good >= self.cfg.recover_after_windows {
                info!(window_start_ms = stats.span.start_ms, "event stream recovered");
                self.status.stream_degraded = false;
            }
        }

        if !grid_defined && !self.status.context_missing {
            warn!(window_start_ms = stats.span.start_ms, "engine context missing");
        }
        self.status.context_missing = !grid_defined;
        self.status
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::types::{ChangePolicy, DensityTarget, EngineContext, EventType, Grid, PerformanceEvent};
    use crate::window::{evaluate_window, WindowSpan};

    fn stats(start: u64, count: u64, ctx: Option<&EngineContext>) -> WindowStats {
        let events: Vec<PerformanceEvent> = (0..count)
            .map(|i| PerformanceEvent::new(start + i * 750, EventType::NoteOnset, 0.7, 0.9))
            .collect();
        evaluate_window(
            &events,
            ctx,
            WindowSpan { start_ms: start, duration_ms: 15_000 },
            &WindowConfig::default(),
        )
    }

    fn ctx() -> EngineContext {
        EngineContext::new(80.0, Grid::Quarter)
    }

    #[test]
    fn two_bad_windows_degrade_one_good_clears() {
        let mut mon = DegradationMonitor::new(DegradationConfig::default());
        assert!(!mon.observe(&stats(0, 0, Some(&ctx())), true).stream_degraded);
        assert!(mon.observe(&stats(15_000, 3, Some(&ctx())), true).stream_degraded);
        assert!(mon.observe(&stats(30_000, 0, Some(&ctx())), true).stream_degraded);
        assert!(!mon.observe(&stats(45_000, 20, Some(&ctx())), true).stream_degraded);
    }

    #[test]
    fn missing_grid_is_not_stream_degradation() {
        let mut mon = DegradationMonitor::new(DegradationConfig::default());
        for i in 0..5 {
            let s = mon.observe(&stats(i * 15_000, 20, None), false);
            assert!(!s.stream_degraded);
            assert!(s.context_missing);
            assert!(s.blocks_probing());
        }
    }

    #[test]
    fn history_is_bounded() {
        let mut mon = DegradationMonitor::new(DegradationConfig::default());
        for i in 0..20 {
            mon.observe(&stats(i * 15_000, 20, Some(&ctx())), true);
        }
        assert_eq!(mon.history().count(), 8);
        assert_eq!(mon.history().next().map(|h| h.window_start_ms), Some(12 * 15_000));
    }

    #[test]
    fn degraded_overrides_hold_committed_fields() {
        let status = DegradationStatus { stream_degraded: true, ..Default::default() };
        let committed = CommittedPolicy {
            tempo_policy: Some(TempoPolicy::FollowPlayer),
            density_target: Some(DensityTarget::Full),
            loop_policy: Some(LoopPolicy::FourBars),
            change_policy: Some(ChangePolicy::AllowModulation),
        };
        let mut out = ControlOutput {
            tempo_policy: TempoPolicy::FollowPlayer,
            density_target: DensityTarget::Sparse,
            loop_policy: LoopPolicy::TwoBars,
            change_policy: ChangePolicy::AvoidModulation,
            window_confidence: 0.8,
            reason: ReasonTag::StableBaseline,
        };
        status.apply(&mut out, &committed);
        assert_eq!(out.tempo_policy, TempoPolicy::SteadyClock);
        assert_eq!(out.density_target, DensityTarget::Full);
        assert_eq!(out.loop_policy, LoopPolicy::FourBars);
        assert_eq!(out.change_policy, ChangePolicy::AllowModulation);
        assert_eq!(out.window_confidence, 0.0);
        assert_eq!(status.reason(), Some(ReasonTag::StreamDegraded));
    }

    #[test]
    fn missing_context_without_history_loops_none() {
        let status = DegradationStatus { context_missing: true, ..Default::default() };
        let mut out = ControlOutput {
            tempo_policy: TempoPolicy::GentleNudge,
            density_target: DensityTarget::Medium,
            loop_policy: LoopPolicy::TwoBars,
            change_policy: ChangePolicy::AvoidModulation,
            window_confidence: 0.0,
            reason: ReasonTag::InsufficientEvidence,
        };
        status.apply(&mut out, &CommittedPolicy::default());
        assert_eq!(out.loop_policy, LoopPolicy::None);
        assert_eq!(out.tempo_policy, TempoPolicy::GentleNudge);
        assert_eq!(status.reason(), Some(ReasonTag::MissingContext));
    }

    #[test]
    fn engine_rejection_does_not_block_probing() {
        let mut mon = DegradationMonitor::new(DegradationConfig::default());
        mon.set_engine_status(EngineStatus::Rejecting);
        assert!(mon.status().engine_rejecting);
        assert!(!mon.status().blocks_probing());
    }
}
