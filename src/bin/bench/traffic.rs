// Synthetic Performer — seedable onset generator
// Produces one window of PerformanceEvents from a per-window playing profile

use groove_engine::{EventType, PerformanceEvent};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// How the performer plays during one window.
#[derive(Debug, Clone, Copy)]
pub struct PlayingProfile {
    /// Standard deviation of onset placement around the grid, in ms.
    pub jitter_ms: f64,
    /// Constant push (+) or drag (-) against the grid, in ms per onset.
    pub drift_ms: f64,
    /// Probability that a grid slot is actually played.
    pub fill: f64,
    pub confidence: f64,
    pub strength: f64,
    /// Extra low-confidence onsets per window (extractor noise).
    pub spurious: u32,
}

impl PlayingProfile {
    pub const fn steady() -> Self {
        Self { jitter_ms: 6.0, drift_ms: 0.0, fill: 1.0, confidence: 0.9, strength: 0.7, spurious: 0 }
    }

    pub const fn shaky() -> Self {
        Self { jitter_ms: 70.0, drift_ms: 0.0, fill: 1.0, confidence: 0.8, strength: 0.6, spurious: 3 }
    }

    pub const fn silent() -> Self {
        Self { jitter_ms: 0.0, drift_ms: 0.0, fill: 0.0, confidence: 0.0, strength: 0.0, spurious: 0 }
    }
}

pub struct Performer {
    rng: ChaCha8Rng,
    pub onset_count: u64,
}

impl Performer {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng, onset_count: 0 }
    }

    /// Onsets for `[start_ms, start_ms + duration_ms)` on a grid of
    /// `grid_ms`, sorted by time.
    pub fn play_window(
        &mut self,
        start_ms: u64,
        duration_ms: u64,
        grid_ms: f64,
        profile: &PlayingProfile,
    ) -> Vec<PerformanceEvent> {
        let end = start_ms + duration_ms;
        let mut events = Vec::new();
        let slots = (duration_ms as f64 / grid_ms).floor() as u64;

        for slot in 0..slots {
            if self.rng.gen::<f64>() >= profile.fill {
                continue;
            }
            let ideal = start_ms as f64 + slot as f64 * grid_ms + grid_ms / 2.0;
            let t = ideal + profile.drift_ms + gaussian(&mut self.rng) * profile.jitter_ms;
            let t = t.round().max(start_ms as f64) as u64;
            if t >= end {
                continue;
            }
            let confidence = (profile.confidence + gaussian(&mut self.rng) * 0.03).clamp(0.0, 1.0);
            let strength = (profile.strength + gaussian(&mut self.rng) * 0.05).clamp(0.0, 1.0);
            events.push(PerformanceEvent::new(t, EventType::NoteOnset, strength, confidence));
        }

        for _ in 0..profile.spurious {
            let t = self.rng.gen_range(start_ms..end);
            let strength = self.rng.gen_range(0.05..0.3);
            events.push(PerformanceEvent::new(t, EventType::PercussiveOnset, strength, 0.15));
        }

        events.sort_by_key(|e| e.t_onset_ms);
        self.onset_count += events.len() as u64;
        events
    }
}

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn steady_window_fills_every_slot() {
        let mut p = Performer::new(ChaCha8Rng::seed_from_u64(7));
        let events = p.play_window(0, 15_000, 750.0, &PlayingProfile::steady());
        assert_eq!(events.len(), 20);
        assert!(events.windows(2).all(|w| w[0].t_onset_ms <= w[1].t_onset_ms));
    }

    #[test]
    fn silent_window_is_empty() {
        let mut p = Performer::new(ChaCha8Rng::seed_from_u64(7));
        assert!(p.play_window(0, 15_000, 750.0, &PlayingProfile::silent()).is_empty());
    }

    #[test]
    fn same_seed_same_onsets() {
        let a = Performer::new(ChaCha8Rng::seed_from_u64(3)).play_window(0, 15_000, 500.0, &PlayingProfile::shaky());
        let b = Performer::new(ChaCha8Rng::seed_from_u64(3)).play_window(0, 15_000, 500.0, &PlayingProfile::shaky());
        assert_eq!(a, b);
    }
}
