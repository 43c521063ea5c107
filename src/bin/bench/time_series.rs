// Per-Window JSONL Time Series Recorder
// One JSON line per emission, joined with the latent state after it

use groove_engine::probe::ProbeStateTag;
use groove_engine::{ChangePolicy, DensityTarget, Emission, GrooveState, LoopPolicy, ReasonTag, TempoPolicy};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
pub struct WindowSnapshot {
    pub window: u64,
    pub start_ms: u64,
    pub event_count: usize,
    pub confidence: f64,
    pub tempo_policy: TempoPolicy,
    pub density_target: DensityTarget,
    pub loop_policy: LoopPolicy,
    pub change_policy: ChangePolicy,
    pub reason: ReasonTag,
    pub probe_state: ProbeStateTag,
    pub timing_fast: f64,
    pub timing_slow: f64,
    pub load_fast: f64,
    pub fatigue_fast: f64,
}

struct Row {
    window: u64,
    emission: Emission,
    state: GrooveState,
}

/// Accumulates rows for one run and writes them as JSONL.
pub struct TimeSeriesRecorder {
    rows: Vec<Row>,
}

impl TimeSeriesRecorder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn record(&mut self, window: u64, emission: &Emission, state: &GrooveState) {
        self.rows.push(Row { window, emission: emission.clone(), state: *state });
    }

    pub fn write_jsonl(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        for row in &self.rows {
            let out = &row.emission.output;
            let snapshot = WindowSnapshot {
                window: row.window,
                start_ms: row.emission.window.start_ms,
                event_count: row.emission.window.event_count,
                confidence: out.window_confidence,
                tempo_policy: out.tempo_policy,
                density_target: out.density_target,
                loop_policy: out.loop_policy,
                change_policy: out.change_policy,
                reason: out.reason,
                probe_state: row.emission.probe_state,
                timing_fast: row.state.fast.timing_stability,
                timing_slow: row.state.slow.timing_stability,
                load_fast: row.state.fast.cognitive_load,
                fatigue_fast: row.state.fast.fatigue_resilience,
            };
            let line = serde_json::to_string(&snapshot)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            writeln!(file, "{}", line)?;
        }
        file.flush()
    }
}
