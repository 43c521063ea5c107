// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Control Emitter
//
// Wraps a fully composed ControlOutput in the transport envelope and hands
// it to a sink. Publication is fire-and-forget: sinks never fail the loop.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::probe::ProbeStateTag;
use crate::types::{ControlOutput, SessionMeta};

pub const SCHEMA_ID: &str = "groove_layer_control";
pub const SCHEMA_VERSION: &str = "v0";

// ─── Envelope ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitTrigger {
    /// Regular window boundary.
    Cadence,
    /// Policy change between boundaries (probe expiry).
    Transition,
    /// Partial window flushed at session end.
    Flush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Apply,
    /// The engine reported it cannot apply controls right now.
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub event_count: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub schema_id: String,
    pub schema_version: String,
    pub device_id: String,
    pub session_id: String,
    pub emitted_at_ms: u64,
    pub window: WindowSummary,
    pub trigger: EmitTrigger,
    pub delivery: Delivery,
    pub probe_state: ProbeStateTag,
    pub output: ControlOutput,
    pub notes: String,
}

impl Emission {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─── Emitter ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControlEmitter {
    device_id: String,
    session_id: String,
    last: Option<ControlOutput>,
    count: u64,
}

impl ControlEmitter {
    pub fn new(meta: &SessionMeta) -> Self {
        Self {
            device_id: meta.device_id.clone(),
            session_id: meta.session_id.clone(),
            last: None,
            count: 0,
        }
    }

    pub fn last_output(&self) -> Option<&ControlOutput> {
        self.last.as_ref()
    }

    pub fn emitted(&self) -> u64 {
        self.count
    }

    /// True when `output` would change a policy field relative to the last
    /// emission (or nothing has been emitted yet).
    pub fn is_transition(&self, output: &ControlOutput) -> bool {
        self.last.map_or(true, |last| last.policy_differs(output))
    }

    pub fn emit(
        &mut self,
        trigger: EmitTrigger,
        emitted_at_ms: u64,
        window: WindowSummary,
        delivery: Delivery,
        probe_state: ProbeStateTag,
        output: ControlOutput,
    ) -> Emission {
        if self.is_transition(&output) {
            debug!(
                session_id = %self.session_id,
                tempo = ?output.tempo_policy,
                density = ?output.density_target,
                loop_policy = ?output.loop_policy,
                change = ?output.change_policy,
                reason = ?output.reason,
                "control transition"
            );
        }
        self.last = Some(output);
        self.count += 1;
        Emission {
            schema_id: SCHEMA_ID.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            device_id: self.device_id.clone(),
            session_id: self.session_id.clone(),
            emitted_at_ms,
            window,
            trigger,
            delivery,
            probe_state,
            output,
            notes: output.reason.notes().to_string(),
        }
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Receiver of published emissions.
pub trait ControlSink {
    fn publish(&mut self, emission: &Emission);
}

impl ControlSink for Vec<Emission> {
    fn publish(&mut self, emission: &Emission) {
        self.push(emission.clone());
    }
}

/// Writes one JSON document per line. Write failures are logged and dropped.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
    failed: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0, failed: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ControlSink for JsonLinesSink<W> {
    fn publish(&mut self, emission: &Emission) {
        let result = serde_json::to_string(emission)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.writer, "{line}"));
        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.failed += 1;
                warn!(session_id = %emission.session_id, error = %e, "emission dropped");
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
