// Per-Window Metric Trackers — boundary latency, policy churn, probe accounting
// Fed one emission at a time by the Monte Carlo runner

use std::time::Duration;

use groove_engine::{Emission, ReasonTag, TempoPolicy};

// ─── Latency Tracker ────────────────────────────────────────────────────────

/// Wall-clock cost of each `close_window` call.
pub struct LatencyTracker {
    samples_us: Vec<f64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self { samples_us: Vec::new() }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples_us.push(elapsed.as_secs_f64() * 1e6);
    }

    /// Nearest-rank percentile, `q` in [0, 1].
    pub fn percentile(&self, q: f64) -> f64 {
        if self.samples_us.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples_us.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    }

    pub fn max(&self) -> f64 {
        self.samples_us.iter().cloned().fold(0.0, f64::max)
    }
}

// ─── Control Tracker ────────────────────────────────────────────────────────

/// Counts what the emission stream did over one run.
#[derive(Debug, Default)]
pub struct ControlTracker {
    pub emissions: u64,
    pub policy_changes: u32,
    pub probes_started: u32,
    pub probes_committed: u32,
    pub probes_reverted: u32,
    pub degraded_windows: u32,
    pub missing_context_windows: u32,
    /// Degraded emissions that did not hold steady_clock.
    pub steady_violations: u32,
    last: Option<Emission>,
}

impl ControlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, emission: &Emission) {
        self.emissions += 1;
        let out = &emission.output;

        if let Some(prev) = &self.last {
            if prev.output.policy_differs(out) {
                self.policy_changes += 1;
            }
        }

        match out.reason {
            ReasonTag::ProbeActive => {
                let was_active = self
                    .last
                    .as_ref()
                    .is_some_and(|p| p.output.reason == ReasonTag::ProbeActive);
                if !was_active {
                    self.probes_started += 1;
                }
            }
            ReasonTag::ProbeCommitted => self.probes_committed += 1,
            ReasonTag::ProbeReverted => self.probes_reverted += 1,
            ReasonTag::StreamDegraded => {
                self.degraded_windows += 1;
                if out.tempo_policy != TempoPolicy::SteadyClock {
                    self.steady_violations += 1;
                }
            }
            ReasonTag::MissingContext => self.missing_context_windows += 1,
            _ => {}
        }

        self.last = Some(emission.clone());
    }

    pub fn last(&self) -> Option<&Emission> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_nearest_rank() {
        let mut t = LatencyTracker::new();
        for us in [10u64, 20, 30, 40] {
            t.record(Duration::from_micros(us));
        }
        assert!((t.percentile(0.5) - 20.0).abs() < 1e-6);
        assert!((t.percentile(0.95) - 40.0).abs() < 1e-6);
        assert!((t.max() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn empty_tracker_reports_zero() {
        assert_eq!(LatencyTracker::new().percentile(0.95), 0.0);
    }
}
