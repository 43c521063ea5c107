// Benchmark Report Types
// Structured output for offline analysis of the control loop

use serde::Serialize;

// ─── Statistics (per-metric Monte Carlo aggregation) ────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub mean: f64,
    pub std_dev: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

impl Stats {
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self { mean: 0.0, std_dev: 0.0, ci_lower: 0.0, ci_upper: 0.0, min: 0.0, max: 0.0, n: 0 };
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        let std_dev = variance.sqrt();
        let stderr = std_dev / (n as f64).sqrt();
        let z = 1.96; // 95% CI
        Self {
            mean,
            std_dev,
            ci_lower: mean - z * stderr,
            ci_upper: mean + z * stderr,
            min: samples.iter().cloned().fold(f64::INFINITY, f64::min),
            max: samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            n,
        }
    }
}

// ─── Single-Run Result ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    pub scenario: String,
    pub name: String,
    pub category: String,
    pub seed: u64,
    pub pass: bool,
    /// Reasons the run failed its criteria (empty on pass).
    pub failures: Vec<String>,
    pub windows: u64,
    pub emissions: u64,
    pub onsets: u64,
    pub rejected_windows: u32,
    pub policy_changes: u32,
    pub probes_started: u32,
    pub probes_committed: u32,
    pub probes_reverted: u32,
    pub degraded_windows: u32,
    pub missing_context_windows: u32,
    pub steady_violations: u32,
    pub final_tempo: String,
    pub final_timing_stability: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_max_us: f64,
    pub elapsed_ms: u128,
}

// ─── Monte Carlo Report (per-scenario aggregation) ──────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloReport {
    pub scenario_name: String,
    pub label: String,
    pub category: String,
    pub n_runs: usize,
    pub pass_rate: f64,
    pub policy_changes: Stats,
    pub probes_started: Stats,
    pub probes_committed: Stats,
    pub degraded_windows: Stats,
    pub final_timing_stability: Stats,
    pub latency_p95_us: Stats,
    pub elapsed_ms: Stats,
    pub individual_runs: Vec<BenchResult>,
}

// ─── Top-Level Report ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub timestamp: String,
    pub version: &'static str,
    pub schema: &'static str,
    pub prng: &'static str,
    pub n_runs_per_scenario: usize,
    pub summary: Summary,
    pub scenarios: Vec<MonteCarloReport>,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_constant_samples() {
        let s = Stats::from_samples(&[2.0, 2.0, 2.0]);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.ci_lower, s.ci_upper);
        assert_eq!(s.n, 3);
    }

    #[test]
    fn stats_of_nothing() {
        assert_eq!(Stats::from_samples(&[]).n, 0);
    }
}
