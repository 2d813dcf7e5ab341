//! Phase-space trajectory tracking
//!
//! Maps extracted HRV metrics onto a position in a 3D feature space, keeps a
//! bounded history of positions, and derives movement dynamics: velocity,
//! curvature, stability, a path-length-based history signature, and a
//! trajectory-coherence score.
//!
//! The history is a bounded ring with an incremental path-length
//! accumulator. Path length grows monotonically over the whole session and
//! is never decremented on eviction; the signature normalizes it against the
//! retained window's duration.

use crate::features::{autocorrelation, AMPLITUDE_NORM_MS};
use crate::types::{HrvMetrics, PhaseDynamics, PhaseState};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Default number of phase states retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

/// Default lag (in states) for the coherence computation
pub const DEFAULT_COHERENCE_LAG: usize = 5;

/// Floor applied to inter-state time deltas. Prevents divide-by-zero but
/// caps apparent speed for near-simultaneous samples (known limitation).
const MIN_DT_SECS: f64 = 0.001;

/// Breath-rate axis mapping: (rate - 4) / 16, i.e. 4-20 breaths/min spans 0-1
const BREATH_AXIS_OFFSET: f64 = 4.0;
const BREATH_AXIS_SPAN: f64 = 16.0;

/// Tracks movement through the derived feature space
#[derive(Debug, Clone)]
pub struct TrajectoryTracker {
    history: VecDeque<PhaseState>,
    capacity: usize,
    coherence_lag: usize,
    /// Cumulative Euclidean path length over the whole session (ms-free
    /// feature units); updated incrementally on every append.
    path_length: f64,
}

impl Default for TrajectoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_COHERENCE_LAG)
    }
}

impl TrajectoryTracker {
    pub fn new(capacity: usize, coherence_lag: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(3)),
            capacity: capacity.max(3),
            coherence_lag: coherence_lag.max(1),
            path_length: 0.0,
        }
    }

    /// Map metrics to a phase position and derive dynamics for this tick.
    pub fn update(&mut self, metrics: &HrvMetrics, timestamp: DateTime<Utc>) -> (PhaseState, PhaseDynamics) {
        let state = PhaseState {
            timestamp,
            position: position_from_metrics(metrics),
        };

        if let Some(last) = self.history.back() {
            self.path_length += distance(&last.position, &state.position);
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(state);

        let dynamics = self.dynamics();
        (state, dynamics)
    }

    /// Session-cumulative path length (monotonically increasing)
    pub fn path_length(&self) -> f64 {
        self.path_length
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn dynamics(&self) -> PhaseDynamics {
        let n = self.history.len();
        let history_signature = self.history_signature();

        // Two prior states are required before any motion can be derived.
        if n < 3 {
            return PhaseDynamics {
                velocity: [0.0; 3],
                velocity_magnitude: 0.0,
                curvature: 0.0,
                stability: 0.5,
                history_signature,
                coherence: 0.0,
                label: "warming up".to_string(),
            };
        }

        let now = &self.history[n - 1];
        let prev = &self.history[n - 2];
        let prev2 = &self.history[n - 3];

        let dt1 = dt_secs(prev.timestamp, now.timestamp);
        let dt2 = dt_secs(prev2.timestamp, prev.timestamp);

        let velocity = scale(&sub(&now.position, &prev.position), 1.0 / dt1);
        let velocity_magnitude = norm(&velocity);

        let prev_velocity = scale(&sub(&prev.position, &prev2.position), 1.0 / dt2);
        let curvature = norm(&sub(&velocity, &prev_velocity)) / ((dt1 + dt2) / 2.0);

        let stability =
            (1.0 / (1.0 + (velocity_magnitude + 0.5 * curvature) * 2.0)).clamp(0.0, 1.0);

        let coherence = self.coherence();

        let label = phase_label(now.position[0], velocity_magnitude, curvature, stability);

        PhaseDynamics {
            velocity,
            velocity_magnitude,
            curvature,
            stability,
            history_signature,
            coherence,
            label,
        }
    }

    /// Path-length rate over the retained window, normalized to [0, 1].
    /// Uses the session-cumulative accumulator, not a per-window recount.
    fn history_signature(&self) -> f64 {
        let (first, last) = match (self.history.front(), self.history.back()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 0.0,
        };
        let window_secs = ((last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0)
            .max(1.0);
        (self.path_length / window_secs / 0.5).clamp(0.0, 1.0)
    }

    /// Trajectory coherence: half magnitude-autocorrelation at the
    /// configured lag, half directional consistency between velocity
    /// vectors separated by that lag. Requires lag + 3 history states.
    fn coherence(&self) -> f64 {
        let lag = self.coherence_lag;
        let n = self.history.len();
        if n < lag + 3 {
            return 0.0;
        }

        let mut velocities: Vec<[f64; 3]> = Vec::with_capacity(n - 1);
        let mut magnitudes: Vec<f64> = Vec::with_capacity(n - 1);
        for i in 1..n {
            let dt = dt_secs(self.history[i - 1].timestamp, self.history[i].timestamp);
            let v = scale(
                &sub(&self.history[i].position, &self.history[i - 1].position),
                1.0 / dt,
            );
            magnitudes.push(norm(&v));
            velocities.push(v);
        }

        let mean = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
        let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>()
            / magnitudes.len() as f64;
        if variance < 1e-12 {
            // No magnitude variation at all: fully dwelling.
            return 0.8;
        }

        let magnitude_term = autocorrelation(&magnitudes, lag).max(0.0);

        let mut cos_sum = 0.0;
        let mut cos_count = 0;
        for i in lag..velocities.len() {
            let a = &velocities[i];
            let b = &velocities[i - lag];
            let (na, nb) = (norm(a), norm(b));
            if na < 1e-9 || nb < 1e-9 {
                continue;
            }
            // Remap cosine similarity from [-1, 1] to [0, 1]
            cos_sum += (dot(a, b) / (na * nb) + 1.0) / 2.0;
            cos_count += 1;
        }
        let direction_term = if cos_count > 0 {
            cos_sum / cos_count as f64
        } else {
            0.5
        };

        (0.5 * magnitude_term + 0.5 * direction_term).clamp(0.0, 1.0)
    }
}

/// Axis mapping: entrainment, normalized breath rate (absent = 0.5 center),
/// normalized amplitude.
pub fn position_from_metrics(metrics: &HrvMetrics) -> [f64; 3] {
    let breath_axis = match metrics.breath_rate {
        Some(rate) => ((rate - BREATH_AXIS_OFFSET) / BREATH_AXIS_SPAN).clamp(0.0, 1.0),
        None => 0.5,
    };
    [
        metrics.entrainment.clamp(0.0, 1.0),
        breath_axis,
        (metrics.amplitude as f64 / AMPLITUDE_NORM_MS).clamp(0.0, 1.0),
    ]
}

/// Ordered decision list: first matching branch wins.
fn phase_label(entrainment_axis: f64, velocity_magnitude: f64, curvature: f64, stability: f64) -> String {
    let label = if stability > 0.7 && entrainment_axis > 0.6 {
        "entrained dwelling"
    } else if curvature > 0.3 {
        if entrainment_axis > 0.5 {
            "inflection (entrained)"
        } else {
            "inflection (searching)"
        }
    } else if velocity_magnitude > 0.1 {
        if entrainment_axis > 0.5 {
            "flowing"
        } else {
            "active transition"
        }
    } else if stability > 0.6 {
        if entrainment_axis > 0.6 {
            "settling"
        } else if entrainment_axis > 0.3 {
            "neutral dwelling"
        } else {
            "alert stillness"
        }
    } else {
        "transitional"
    };
    label.to_string()
}

fn dt_secs(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_milliseconds() as f64 / 1000.0).max(MIN_DT_SECS)
}

fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(v: &[f64; 3], k: f64) -> [f64; 3] {
    [v[0] * k, v[1] * k, v[2] * k]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(v: &[f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    norm(&sub(a, b))
}
