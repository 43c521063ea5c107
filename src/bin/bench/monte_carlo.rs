// Monte Carlo Infrastructure — N runs per scenario with statistical aggregation
// Each scenario runs N=30 times with seeds base..base+N, computing mean ± 95% CI

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use groove_engine::{EngineContext, GrooveConfig, GrooveLayer, Grid, SessionMeta, SlowTraits};

use crate::metrics::{ControlTracker, LatencyTracker};
use crate::report::*;
use crate::scenarios::Scenario;
use crate::time_series::TimeSeriesRecorder;
use crate::traffic::Performer;

use std::time::Instant;

/// Run a single scenario iteration with a specific seed.
pub fn run_single(
    scenario: &Scenario,
    seed: u64,
    time_series_dir: Option<&std::path::Path>,
) -> BenchResult {
    let start = Instant::now();
    let config = scenario.config.map(|f| f()).unwrap_or_default();
    let window_ms = config.window.duration_ms;
    let grid_ms = 60_000.0 / scenario.tempo_bpm;
    let context = EngineContext::new(scenario.tempo_bpm, Grid::Quarter);

    let mut failures = Vec::new();
    let meta = SessionMeta::new("bench", "bench-device", &format!("{}-{}", scenario.name, seed));
    let mut layer = match build_layer(config, meta) {
        Ok(layer) => layer,
        Err(e) => {
            failures.push(format!("layer did not start: {e}"));
            return failed_result(scenario, seed, failures);
        }
    };

    let mut performer = Performer::new(ChaCha8Rng::seed_from_u64(seed));
    let mut latency = LatencyTracker::new();
    let mut controls = ControlTracker::new();
    let mut time_series = time_series_dir.map(|_| TimeSeriesRecorder::new());
    let mut rejected_windows = 0u32;
    let mut loop_violations = 0u32;

    let mut observe = |w: u64, layer: &GrooveLayer, e: &groove_engine::Emission, controls: &mut ControlTracker| {
        controls.record(e);
        if let Some(required) = scenario.criteria.loop_always {
            if e.output.loop_policy != required {
                loop_violations += 1;
            }
        }
        if let (Some(ts), Some(state)) = (time_series.as_mut(), layer.state()) {
            ts.record(w, e, state);
        }
    };

    for w in 0..scenario.windows {
        let window_start = w * window_ms;
        let profile = (scenario.profile)(w);
        for event in performer.play_window(window_start, window_ms, grid_ms, &profile) {
            layer.push_event(event);
        }

        // Mid-window poll resolves expired probes between boundaries.
        if let Some(e) = layer.poll(window_start + window_ms / 2) {
            observe(w, &layer, &e, &mut controls);
        }

        let ctx = (scenario.context)(w).then_some(&context);
        let t0 = Instant::now();
        let result = layer.close_window(window_start + window_ms, ctx);
        latency.record(t0.elapsed());
        match result {
            Ok(e) => observe(w, &layer, &e, &mut controls),
            Err(e) => {
                rejected_windows += 1;
                warn!(scenario = scenario.name, seed, window = w, error = %e, "window rejected");
            }
        }
    }

    let end_ms = scenario.windows * window_ms;
    let final_timing = layer.state().map(|s| s.slow.timing_stability).unwrap_or(0.0);
    match layer.end_session(end_ms, Some(&context)) {
        Ok(end) => {
            for e in &end.emissions {
                observe(scenario.windows, &layer, e, &mut controls);
            }
        }
        Err(e) => failures.push(format!("session did not end cleanly: {e}")),
    }

    if let (Some(ts), Some(dir)) = (&time_series, time_series_dir) {
        let path = dir.join(format!("seed-{}.jsonl", seed));
        if let Err(e) = ts.write_jsonl(&path) {
            warn!(path = %path.display(), error = %e, "failed to write time series");
        }
    }

    // Evaluate pass/fail
    let criteria = &scenario.criteria;
    let final_tempo = controls.last().map(|e| e.output.tempo_policy);
    if let Some(want) = criteria.final_tempo {
        if final_tempo != Some(want) {
            failures.push(format!("final tempo {:?}, wanted {:?}", final_tempo, want));
        }
    }
    if loop_violations > 0 {
        failures.push(format!("{loop_violations} emissions broke the loop policy"));
    }
    if criteria.steady_while_degraded && controls.steady_violations > 0 {
        failures.push(format!("{} degraded emissions without steady clock", controls.steady_violations));
    }
    if let Some(max) = criteria.max_churn {
        if controls.policy_changes > max {
            failures.push(format!("{} policy changes (max {max})", controls.policy_changes));
        }
    }
    if let Some(min) = criteria.min_probes {
        if controls.probes_started < min {
            failures.push(format!("{} probes (min {min})", controls.probes_started));
        }
    }
    if let Some(max) = criteria.max_probes {
        if controls.probes_started > max {
            failures.push(format!("{} probes (max {max})", controls.probes_started));
        }
    }
    let p95 = latency.percentile(0.95);
    if p95 > criteria.p95_latency_us {
        failures.push(format!("p95 boundary latency {p95:.0}us"));
    }
    if rejected_windows > 0 {
        failures.push(format!("{rejected_windows} windows rejected"));
    }

    debug!(scenario = scenario.name, seed, failures = failures.len(), "run complete");

    BenchResult {
        scenario: scenario.label.to_string(),
        name: scenario.name.to_string(),
        category: scenario.category.to_string(),
        seed,
        pass: failures.is_empty(),
        failures,
        windows: scenario.windows,
        emissions: controls.emissions,
        onsets: performer.onset_count,
        rejected_windows,
        policy_changes: controls.policy_changes,
        probes_started: controls.probes_started,
        probes_committed: controls.probes_committed,
        probes_reverted: controls.probes_reverted,
        degraded_windows: controls.degraded_windows,
        missing_context_windows: controls.missing_context_windows,
        steady_violations: controls.steady_violations,
        final_tempo: final_tempo.map(|t| format!("{t:?}")).unwrap_or_default(),
        final_timing_stability: final_timing,
        latency_p50_us: latency.percentile(0.5),
        latency_p95_us: p95,
        latency_max_us: latency.max(),
        elapsed_ms: start.elapsed().as_millis(),
    }
}

fn build_layer(config: GrooveConfig, meta: SessionMeta) -> Result<GrooveLayer, groove_engine::LayerError> {
    let mut layer = GrooveLayer::new(config, meta)?;
    layer.start_session(SlowTraits::default(), 0)?;
    Ok(layer)
}

fn failed_result(scenario: &Scenario, seed: u64, failures: Vec<String>) -> BenchResult {
    BenchResult {
        scenario: scenario.label.to_string(),
        name: scenario.name.to_string(),
        category: scenario.category.to_string(),
        seed,
        pass: false,
        failures,
        windows: 0,
        emissions: 0,
        onsets: 0,
        rejected_windows: 0,
        policy_changes: 0,
        probes_started: 0,
        probes_committed: 0,
        probes_reverted: 0,
        degraded_windows: 0,
        missing_context_windows: 0,
        steady_violations: 0,
        final_tempo: String::new(),
        final_timing_stability: 0.0,
        latency_p50_us: 0.0,
        latency_p95_us: 0.0,
        latency_max_us: 0.0,
        elapsed_ms: 0,
    }
}

/// Run Monte Carlo: N runs of a scenario, aggregate stats.
pub fn run_monte_carlo(
    scenario: &Scenario,
    n_runs: usize,
    base_seed: u64,
    time_series_base: Option<&std::path::Path>,
) -> MonteCarloReport {
    let ts_dir = time_series_base.map(|base| base.join(scenario.name.to_lowercase()));

    let mut results = Vec::with_capacity(n_runs);
    for i in 0..n_runs {
        let seed = base_seed + i as u64;
        results.push(run_single(scenario, seed, ts_dir.as_deref()));
    }

    aggregate(scenario, results)
}

/// Aggregate individual runs into a MonteCarloReport.
fn aggregate(scenario: &Scenario, results: Vec<BenchResult>) -> MonteCarloReport {
    let n = results.len();
    let passed = results.iter().filter(|r| r.pass).count();
    let pass_rate = if n == 0 { 0.0 } else { passed as f64 / n as f64 };

    let stat = |f: fn(&BenchResult) -> f64| Stats::from_samples(&results.iter().map(f).collect::<Vec<_>>());

    MonteCarloReport {
        scenario_name: scenario.name.to_string(),
        label: scenario.label.to_string(),
        category: scenario.category.to_string(),
        n_runs: n,
        pass_rate,
        policy_changes: stat(|r| r.policy_changes as f64),
        probes_started: stat(|r| r.probes_started as f64),
        probes_committed: stat(|r| r.probes_committed as f64),
        degraded_windows: stat(|r| r.degraded_windows as f64),
        final_timing_stability: stat(|r| r.final_timing_stability),
        latency_p95_us: stat(|r| r.latency_p95_us),
        elapsed_ms: stat(|r| r.elapsed_ms as f64),
        individual_runs: results,
    }
}
