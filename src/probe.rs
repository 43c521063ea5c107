// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Probe Controller
//
// Reversible A/B experiments on a single output dimension. The controller
// only decides; the layer applies commits (latent nudge, committed policy)
// and reverts (restore the baseline value).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ProbeConfig;
use crate::policy::CommittedPolicy;
use crate::types::{ChangePolicy, DensityTarget, ProbeDimension, ProbeValue};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSession {
    pub candidate: ProbeValue,
    /// Committed value of the probed dimension when the probe started.
    pub baseline_value: ProbeValue,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub baseline_metric: f64,
    /// Timing-stability evidence of eligible windows closed during the probe.
    pub samples: Vec<f64>,
}

impl ProbeSession {
    pub fn dimension(&self) -> ProbeDimension {
        self.candidate.dimension()
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }

    fn post_metric(&self) -> Option<f64> {
        mean(self.samples.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProbePhase {
    Idle,
    Armed { since_ms: u64 },
    Probing(ProbeSession),
    /// Transitional: entered on expiry and resolved within the same
    /// [`ProbeController::poll`], so callers only ever observe it mid-call.
    Evaluating(ProbeSession),
}

/// Coarse phase carried on every emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStateTag {
    Idle,
    Armed,
    Probing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Committed { candidate: ProbeValue, baseline: ProbeValue },
    Reverted { candidate: ProbeValue, baseline: ProbeValue, aborted: bool },
}

// ---------------------------------------------------------------------------
// ProbeController
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProbeController {
    cfg: ProbeConfig,
    phase: ProbePhase,
    stability: VecDeque<f64>,
    last_probe_end_ms: u64,
    next_dimension: ProbeDimension,
    cooldowns: Vec<(ProbeValue, u64)>,
}

impl ProbeController {
    /// The first probe waits one full interval from `session_start_ms`.
    pub fn new(cfg: ProbeConfig, session_start_ms: u64) -> Self {
        let history = cfg.stability_history;
        Self {
            cfg,
            phase: ProbePhase::Idle,
            stability: VecDeque::with_capacity(history),
            last_probe_end_ms: session_start_ms,
            next_dimension: ProbeDimension::DensityTarget,
            cooldowns: Vec::new(),
        }
    }

    pub fn phase(&self) -> &ProbePhase {
        &self.phase
    }

    pub fn state_tag(&self) -> ProbeStateTag {
        match self.phase {
            ProbePhase::Idle => ProbeStateTag::Idle,
            ProbePhase::Armed { .. } => ProbeStateTag::Armed,
            ProbePhase::Probing(_) | ProbePhase::Evaluating(_) => ProbeStateTag::Probing,
        }
    }

    /// Value replacing one output field while a probe runs.
    pub fn active_override(&self) -> Option<ProbeValue> {
        match &self.phase {
            ProbePhase::Probing(s) | ProbePhase::Evaluating(s) => Some(s.candidate),
            _ => None,
        }
    }

    /// Mean timing-stability evidence over the trailing eligible windows;
    /// `None` until the history is full.
    pub fn stability_metric(&self) -> Option<f64> {
        if self.stability.len() < self.cfg.stability_history {
            return None;
        }
        mean(self.stability.iter().copied())
    }

    /// Record a closed window's timing evidence (`None` if the window was
    /// ineligible or had no timing). A `None` breaks the run of stable
    /// windows, so the history restarts from empty.
    pub fn observe_window(&mut self, timing_evidence: Option<f64>) {
        let Some(e) = timing_evidence else {
            self.stability.clear();
            return;
        };
        if self.stability.len() == self.cfg.stability_history {
            self.stability.pop_front();
        }
        self.stability.push_back(e);
        if let ProbePhase::Probing(session) = &mut self.phase {
            session.samples.push(e);
        }
    }

    /// Advance at a window boundary. `blocked` is true while any
    /// degradation mode is active.
    pub fn step(
        &mut self,
        now_ms: u64,
        blocked: bool,
        committed: &CommittedPolicy,
    ) -> Option<ProbeOutcome> {
        if blocked {
            self.stability.clear();
            if matches!(self.phase, ProbePhase::Armed { .. }) {
                debug!("probe disarmed: degradation active");
                self.phase = ProbePhase::Idle;
            }
            return self.abort(now_ms);
        }

        match std::mem::replace(&mut self.phase, ProbePhase::Idle) {
            ProbePhase::Idle => {
                if self.may_arm(now_ms) {
                    debug!(now_ms, metric = ?self.stability_metric(), "probe armed");
                    self.phase = ProbePhase::Armed { since_ms: now_ms };
                }
                None
            }
            ProbePhase::Armed { since_ms } => {
                if !self.metric_ok() {
                    debug!("probe disarmed: stability fell");
                    return None;
                }
                match self.start_probe(now_ms, committed) {
                    Some(session) => self.phase = ProbePhase::Probing(session),
                    None => self.phase = ProbePhase::Armed { since_ms },
                }
                None
            }
            phase @ (ProbePhase::Probing(_) | ProbePhase::Evaluating(_)) => {
                self.phase = phase;
                self.poll(now_ms)
            }
        }
    }

    /// Final boundary before teardown: an armed controller stands down
    /// instead of starting a probe, and a running one resolves only if it
    /// has expired.
    pub fn wind_down(&mut self, now_ms: u64) -> Option<ProbeOutcome> {
        if matches!(self.phase, ProbePhase::Armed { .. }) {
            debug!("probe disarmed: session ending");
            self.phase = ProbePhase::Idle;
            return None;
        }
        self.poll(now_ms)
    }

    /// Resolve an active probe whose duration has elapsed. Passes through
    /// `Evaluating` and always leaves the controller `Idle` when it returns
    /// an outcome.
    pub fn poll(&mut self, now_ms: u64) -> Option<ProbeOutcome> {
        match &self.phase {
            ProbePhase::Probing(s) if now_ms >= s.expires_at_ms() => {}
            ProbePhase::Evaluating(_) => {}
            _ => return None,
        }
        if let ProbePhase::Probing(session) = std::mem::replace(&mut self.phase, ProbePhase::Idle) {
            self.phase = ProbePhase::Evaluating(session);
        }
        self.evaluate(now_ms)
    }

    /// Terminate an active probe as a revert (degradation or teardown).
    pub fn abort(&mut self, now_ms: u64) -> Option<ProbeOutcome> {
        match std::mem::replace(&mut self.phase, ProbePhase::Idle) {
            ProbePhase::Probing(s) | ProbePhase::Evaluating(s) => {
                info!(candidate = ?s.candidate, "probe aborted");
                Some(self.revert(s, now_ms, true))
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    fn evaluate(&mut self, now_ms: u64) -> Option<ProbeOutcome> {
        let ProbePhase::Evaluating(session) = std::mem::replace(&mut self.phase, ProbePhase::Idle)
        else {
            return None;
        };
        self.last_probe_end_ms = now_ms;

        let held_up = session
            .post_metric()
            .map_or(false, |post| post >= session.baseline_metric - self.cfg.tolerance);
        if held_up {
            info!(
                candidate = ?session.candidate,
                baseline_metric = session.baseline_metric,
                post_metric = ?session.post_metric(),
                "probe committed"
            );
            Some(ProbeOutcome::Committed {
                candidate: session.candidate,
                baseline: session.baseline_value,
            })
        } else {
            info!(
                candidate = ?session.candidate,
                baseline_metric = session.baseline_metric,
                post_metric = ?session.post_metric(),
                "probe reverted"
            );
            Some(self.revert(session, now_ms, false))
        }
    }

    fn revert(&mut self, session: ProbeSession, now_ms: u64, aborted: bool) -> ProbeOutcome {
        self.last_probe_end_ms = now_ms;
        self.cooldowns
            .push((session.candidate, now_ms + self.cfg.revert_cooldown_ms));
        ProbeOutcome::Reverted {
            candidate: session.candidate,
            baseline: session.baseline_value,
            aborted,
        }
    }

    fn metric_ok(&self) -> bool {
        self.stability_metric()
            .map_or(false, |m| m >= self.cfg.stability_threshold)
    }

    fn may_arm(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_probe_end_ms) >= self.cfg.interval_ms && self.metric_ok()
    }

    fn on_cooldown(&self, value: ProbeValue, now_ms: u64) -> bool {
        self.cooldowns
            .iter()
            .any(|&(v, until)| v == value && now_ms < until)
    }

    /// Round-robin over the probeable dimensions, skipping any whose
    /// candidate is cooling down or whose baseline is not yet committed.
    fn start_probe(&mut self, now_ms: u64, committed: &CommittedPolicy) -> Option<ProbeSession> {
        self.cooldowns.retain(|&(_, until)| now_ms < until);
        let baseline_metric = self.stability_metric()?;

        let order = match self.next_dimension {
            ProbeDimension::DensityTarget => [ProbeDimension::DensityTarget, ProbeDimension::ChangePolicy],
            ProbeDimension::ChangePolicy => [ProbeDimension::ChangePolicy, ProbeDimension::DensityTarget],
        };
        for dim in order {
            let Some((baseline_value, candidate)) = candidate_for(dim, committed) else { continue };
            if self.on_cooldown(candidate, now_ms) {
                continue;
            }
            self.next_dimension = match dim {
                ProbeDimension::DensityTarget => ProbeDimension::ChangePolicy,
                ProbeDimension::ChangePolicy => ProbeDimension::DensityTarget,
            };
            info!(
                candidate = ?candidate,
                baseline = ?baseline_value,
                baseline_metric,
                "probe started"
            );
            return Some(ProbeSession {
                candidate,
                baseline_value,
                start_ms: now_ms,
                duration_ms: self.cfg.duration_ms,
                baseline_metric,
                samples: Vec::new(),
            });
        }
        None
    }
}

/// `(baseline, candidate)` for a dimension: density moves one tier up (down
/// from full); change policy flips.
fn candidate_for(dim: ProbeDimension, committed: &CommittedPolicy) -> Option<(ProbeValue, ProbeValue)> {
    match dim {
        ProbeDimension::DensityTarget => {
            let current = committed.density_target?;
            let next = match current {
                DensityTarget::Sparse => DensityTarget::Medium,
                DensityTarget::Medium => DensityTarget::Full,
                DensityTarget::Full => DensityTarget::Medium,
            };
            Some((ProbeValue::Density(current), ProbeValue::Density(next)))
        }
        ProbeDimension::ChangePolicy => {
            let current = committed.change_policy?;
            let next = match current {
                ChangePolicy::AvoidModulation => ChangePolicy::AllowModulation,
                ChangePolicy::AllowModulation => ChangePolicy::AvoidModulation,
            };
            Some((ProbeValue::Change(current), ProbeValue::Change(next)))
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
