// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Session Processor
//
// One GrooveLayer per player session. Every boundary runs to completion
// inside `&mut self`, so at most one update is ever in flight; producers
// only touch the ingest channel.

use std::sync::Arc;

use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;

use crate::config::{ConfigError, GrooveConfig};
use crate::degradation::{DegradationMonitor, DegradationStatus, EngineStatus};
use crate::emitter::{ControlEmitter, Delivery, EmitTrigger, Emission, WindowSummary};
use crate::ingest::{EventIngest, IngestHandle, SequencingError};
use crate::latent::{timing_evidence, Dimension, Evidence, GrooveState, LatentModel, SlowTraits};
use crate::policy::{self, CommittedPolicy};
use crate::probe::{ProbeController, ProbeOutcome, ProbePhase};
use crate::store::StoreError;
use crate::types::{
    ControlOutput, EngineContext, PerformanceEvent, ProbeDimension, ProbeValue, ReasonTag, SessionMeta,
};
use crate::window::{evaluate_window, WindowSpan, WindowStats};

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sequencing(#[from] SequencingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no session is running")]
    SessionNotStarted,

    #[error("session {0} is already running")]
    SessionAlreadyStarted(String),
}

/// What a finished session hands back to the caller.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    /// Flush of the in-flight window and any teardown revert.
    pub emissions: Vec<Emission>,
    pub slow_traits: SlowTraits,
}

// ─── GrooveLayer struct ─────────────────────────────────────────────────────

#[wasm_bindgen]
pub struct GrooveLayer {
    pub(crate) config: Arc<GrooveConfig>,
    pub(crate) meta: SessionMeta,
    pub(crate) ingest: EventIngest,
    pub(crate) engine_status: EngineStatus,
    pub(crate) session: Option<ActiveSession>,
}

/// Everything scoped to one running session.
pub(crate) struct ActiveSession {
    window_start_ms: u64,
    last_boundary_ms: Option<u64>,
    latent: LatentModel,
    probe: ProbeController,
    monitor: DegradationMonitor,
    committed: CommittedPolicy,
    /// Consecutive eligible windows with stable timing.
    stable_windows: u32,
    emitter: ControlEmitter,
    last_window: Option<WindowSummary>,
}

// ─── Internal Logic (Testable, pure Rust) ───────────────────────────────────

impl GrooveLayer {
    /// Validates `config` once; an invalid configuration never starts.
    pub fn new(config: GrooveConfig, meta: SessionMeta) -> Result<Self, LayerError> {
        Self::with_shared_config(Arc::new(config), meta)
    }

    /// Share one configuration across many sessions.
    pub fn with_shared_config(config: Arc<GrooveConfig>, meta: SessionMeta) -> Result<Self, LayerError> {
        config.validate()?;
        Ok(Self {
            config,
            meta,
            ingest: EventIngest::new(),
            engine_status: EngineStatus::default(),
            session: None,
        })
    }

    pub fn config(&self) -> &GrooveConfig {
        &self.config
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Load `slow` traits and reset the fast estimates from them. The first
    /// window opens at `start_ms`.
    pub fn start_session(&mut self, slow: SlowTraits, start_ms: u64) -> Result<(), LayerError> {
        if self.session.is_some() {
            return Err(LayerError::SessionAlreadyStarted(self.meta.session_id.clone()));
        }
        let cfg = &self.config;
        let mut monitor = DegradationMonitor::new(cfg.degradation.clone());
        monitor.set_engine_status(self.engine_status);

        self.ingest.reset();
        self.session = Some(ActiveSession {
            window_start_ms: start_ms,
            last_boundary_ms: None,
            latent: LatentModel::new(slow, cfg.learning.clone()),
            probe: ProbeController::new(cfg.probe.clone(), start_ms),
            monitor,
            committed: CommittedPolicy::default(),
            stable_windows: 0,
            emitter: ControlEmitter::new(&self.meta),
            last_window: None,
        });
        info!(
            session_id = %self.meta.session_id,
            player_id = %self.meta.player_id,
            start_ms,
            "groove session started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Producer handle for another thread or task.
    pub fn ingest_handle(&self) -> IngestHandle {
        self.ingest.handle()
    }

    pub fn push_event(&self, event: PerformanceEvent) {
        self.ingest.push(event);
    }

    /// End of the currently open window, if a session is running.
    pub fn window_end_ms(&self) -> Option<u64> {
        self.session
            .as_ref()
            .map(|s| s.window_start_ms + self.config.window.duration_ms)
    }

    pub fn state(&self) -> Option<&GrooveState> {
        self.session.as_ref().map(|s| s.latent.state())
    }

    pub fn probe_phase(&self) -> Option<&ProbePhase> {
        self.session.as_ref().map(|s| s.probe.phase())
    }

    pub fn degradation(&self) -> Option<DegradationStatus> {
        self.session.as_ref().map(|s| s.monitor.status())
    }

    pub fn committed(&self) -> Option<&CommittedPolicy> {
        self.session.as_ref().map(|s| &s.committed)
    }

    /// Close the open window at `boundary_ms` and emit its controls.
    ///
    /// A sequencing fault discards the window: no state update, no emission,
    /// and the next window opens as usual.
    pub fn close_window(
        &mut self,
        boundary_ms: u64,
        context: Option<&EngineContext>,
    ) -> Result<Emission, LayerError> {
        let cfg = Arc::clone(&self.config);
        let engine_status = self.engine_status;
        let session_id = self.meta.session_id.clone();
        let s = self.session.as_mut().ok_or(LayerError::SessionNotStarted)?;

        // 1. Boundary sanity
        if let Some(last) = s.last_boundary_ms {
            if boundary_ms <= last {
                return Err(SequencingError::BoundaryRepeated { boundary_ms, last_closed_ms: last }.into());
            }
        }
        let span = WindowSpan { start_ms: s.window_start_ms, duration_ms: cfg.window.duration_ms };
        if boundary_ms < span.end_ms() {
            return Err(SequencingError::PrematureBoundary { boundary_ms, window_end_ms: span.end_ms() }.into());
        }
        s.window_start_ms = span.end_ms();
        s.last_boundary_ms = Some(boundary_ms);

        // 2. Drain
        let events = match self.ingest.drain_window(span.start_ms, span.end_ms()) {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    window_start_ms = span.start_ms,
                    error = %e,
                    "window discarded"
                );
                return Err(e.into());
            }
        };

        // 3. Evaluate
        let stats = evaluate_window(&events, context, span, &cfg.window);
        let grid_defined = context.and_then(EngineContext::grid_interval_ms).is_some();
        debug!(
            session_id = %session_id,
            window_start_ms = span.start_ms,
            event_count = stats.event_count,
            eligible = stats.eligible,
            confidence = stats.window_confidence,
            "window evaluated"
        );

        Ok(s.process(&stats, grid_defined, boundary_ms, EmitTrigger::Cadence, engine_status, &cfg))
    }

    /// Check probe expiry between boundaries. Emits only when a policy field
    /// actually changes.
    pub fn poll(&mut self, now_ms: u64) -> Option<Emission> {
        let cfg = Arc::clone(&self.config);
        let engine_status = self.engine_status;
        let s = self.session.as_mut()?;
        let outcome = s.probe.poll(now_ms)?;
        s.out_of_band(outcome, now_ms, EmitTrigger::Transition, engine_status, &cfg)
    }

    pub fn report_engine_status(&mut self, status: EngineStatus) {
        self.engine_status = status;
        if let Some(s) = self.session.as_mut() {
            s.monitor.set_engine_status(status);
        }
    }

    /// Seed the committed policy from a previously published output so that
    /// hysteresis continues from it (host restart mid-song).
    pub fn resume_policy(&mut self, output: &ControlOutput) -> Result<(), LayerError> {
        let s = self.session.as_mut().ok_or(LayerError::SessionNotStarted)?;
        s.committed = CommittedPolicy {
            tempo_policy: Some(output.tempo_policy),
            density_target: Some(output.density_target),
            loop_policy: Some(output.loop_policy),
            change_policy: Some(output.change_policy),
        };
        debug!(session_id = %self.meta.session_id, "committed policy resumed");
        Ok(())
    }

    /// Tear the session down: flush the partial window if it qualifies,
    /// revert any running probe, and hand back the slow traits.
    pub fn end_session(
        &mut self,
        now_ms: u64,
        context: Option<&EngineContext>,
    ) -> Result<SessionEnd, LayerError> {
        let cfg = Arc::clone(&self.config);
        let engine_status = self.engine_status;
        let mut s = self.session.take().ok_or(LayerError::SessionNotStarted)?;
        let mut emissions = Vec::new();

        if now_ms > s.window_start_ms {
            let span = WindowSpan { start_ms: s.window_start_ms, duration_ms: now_ms - s.window_start_ms };
            match self.ingest.drain_window(span.start_ms, span.end_ms()) {
                Ok(events) => {
                    let stats = evaluate_window(&events, context, span, &cfg.window);
                    if stats.eligible {
                        let grid_defined = context.and_then(EngineContext::grid_interval_ms).is_some();
                        emissions.push(s.process(&stats, grid_defined, now_ms, EmitTrigger::Flush, engine_status, &cfg));
                    }
                }
                Err(e) => warn!(session_id = %self.meta.session_id, error = %e, "final window discarded"),
            }
        }

        if let Some(outcome) = s.probe.abort(now_ms) {
            if let Some(e) = s.out_of_band(outcome, now_ms, EmitTrigger::Flush, engine_status, &cfg) {
                emissions.push(e);
            }
        }
        self.ingest.reset();

        let slow_traits = s.latent.slow_traits();
        info!(
            session_id = %self.meta.session_id,
            player_id = %self.meta.player_id,
            emitted = s.emitter.emitted(),
            "groove session ended"
        );
        Ok(SessionEnd { emissions, slow_traits })
    }
}

// ─── Per-window pipeline ────────────────────────────────────────────────────

impl ActiveSession {
    fn process(
        &mut self,
        stats: &WindowStats,
        grid_defined: bool,
        now_ms: u64,
        trigger: EmitTrigger,
        engine_status: EngineStatus,
        cfg: &GrooveConfig,
    ) -> Emission {
        // 4. Degradation bookkeeping
        let status = self.monitor.observe(stats, grid_defined);

        // 5. Latent update (weight 0 for ineligible windows)
        if stats.eligible {
            let evidence = Evidence::from_window(stats, &cfg.evidence);
            self.latent.update(&evidence, stats.update_weight());
        }

        let timing = timing_evidence(stats, &cfg.evidence);
        if timing.is_some_and(|t| t >= cfg.policy.tempo_thresholds[1]) {
            self.stable_windows = self.stable_windows.saturating_add(1);
        } else {
            self.stable_windows = 0;
        }

        // 6. Probe step (a teardown flush only resolves, never starts)
        self.probe.observe_window(timing);
        let outcome = match trigger {
            EmitTrigger::Flush => self.probe.wind_down(now_ms),
            _ => self.probe.step(now_ms, status.blocks_probing(), &self.committed),
        };
        let resolved = outcome.map(|o| self.apply_outcome(o, Some(stats), cfg));

        // 7. Derive and commit non-frozen fields
        let decision = policy::derive(
            self.latent.state(),
            Some(stats),
            &self.committed,
            self.stable_windows,
            cfg,
        );
        let probing = self.probe.active_override();
        let pinned = probing.or(resolved).map(|v| v.dimension());

        self.committed.tempo_policy = Some(decision.tempo_policy);
        if !status.freezes_density() && pinned != Some(ProbeDimension::DensityTarget) {
            self.committed.density_target = Some(decision.density_target);
        }
        if !status.freezes_loop() {
            self.committed.loop_policy = Some(decision.loop_policy);
        }
        if !status.freezes_change() && pinned != Some(ProbeDimension::ChangePolicy) {
            self.committed.change_policy = Some(decision.change_policy);
        }

        // 8. Compose: committed -> probe override -> degradation overrides
        let mut output = ControlOutput {
            tempo_policy: decision.tempo_policy,
            density_target: self.committed.density_target.unwrap_or(decision.density_target),
            loop_policy: self.committed.loop_policy.unwrap_or(decision.loop_policy),
            change_policy: self.committed.change_policy.unwrap_or(decision.change_policy),
            window_confidence: stats.window_confidence,
            reason: decision.reason,
        };
        if let Some(v) = probing {
            v.apply_to(&mut output);
        }
        status.apply(&mut output, &self.committed);
        output.reason = status
            .reason()
            .or(outcome.map(outcome_reason))
            .or(probing.map(|_| ReasonTag::ProbeActive))
            .unwrap_or(decision.reason);

        // 9. Emit
        let window = WindowSummary {
            start_ms: stats.span.start_ms,
            end_ms: stats.span.end_ms(),
            duration_ms: stats.span.duration_ms,
            event_count: stats.event_count,
            confidence: output.window_confidence,
        };
        self.last_window = Some(window);
        self.emitter.emit(
            trigger,
            now_ms,
            window,
            delivery_for(engine_status),
            self.probe.state_tag(),
            output,
        )
    }

    /// Probe resolution between boundaries (expiry poll or teardown).
    fn out_of_band(
        &mut self,
        outcome: ProbeOutcome,
        now_ms: u64,
        trigger: EmitTrigger,
        engine_status: EngineStatus,
        cfg: &GrooveConfig,
    ) -> Option<Emission> {
        self.apply_outcome(outcome, None, cfg);
        let mut output = *self.emitter.last_output()?;
        if let Some(d) = self.committed.density_target {
            output.density_target = d;
        }
        if let Some(c) = self.committed.change_policy {
            output.change_policy = c;
        }
        self.monitor.status().apply(&mut output, &self.committed);
        if !self.emitter.is_transition(&output) {
            return None;
        }
        output.reason = outcome_reason(outcome);
        let window = self.last_window?;
        Some(self.emitter.emit(
            trigger,
            now_ms,
            window,
            delivery_for(engine_status),
            self.probe.state_tag(),
            output,
        ))
    }

    /// Commit nudges the interaction trait so the deriver keeps choosing the
    /// candidate; revert restores the baseline. Returns the value now
    /// committed for the probed dimension.
    fn apply_outcome(
        &mut self,
        outcome: ProbeOutcome,
        stats: Option<&WindowStats>,
        cfg: &GrooveConfig,
    ) -> ProbeValue {
        let value = match outcome {
            ProbeOutcome::Committed { candidate, .. } => {
                let rate = cfg.probe.commit_trait_rate;
                match candidate {
                    ProbeValue::Density(target) => {
                        let capacity = policy::drives(self.latent.state(), stats, cfg).capacity;
                        let pref = policy::density_preference_for(target, capacity, &cfg.policy);
                        self.latent.nudge(Dimension::DensityPreference, pref, rate);
                    }
                    ProbeValue::Change(target) => {
                        let appetite = policy::exploration_appetite_for(target, &cfg.policy);
                        self.latent.nudge(Dimension::ExplorationAppetite, appetite, rate);
                    }
                }
                candidate
            }
            ProbeOutcome::Reverted { baseline, .. } => baseline,
        };
        match value {
            ProbeValue::Density(d) => self.committed.density_target = Some(d),
            ProbeValue::Change(c) => self.committed.change_policy = Some(c),
        }
        value
    }
}

fn outcome_reason(outcome: ProbeOutcome) -> ReasonTag {
    match outcome {
        ProbeOutcome::Committed { .. } => ReasonTag::ProbeCommitted,
        ProbeOutcome::Reverted { .. } => ReasonTag::ProbeReverted,
    }
}

fn delivery_for(status: EngineStatus) -> Delivery {
    match status {
        EngineStatus::Applying => Delivery::Apply,
        EngineStatus::Rejecting => Delivery::Advisory,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
