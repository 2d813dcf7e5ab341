//! Soft mode classification
//!
//! Computes a probability-like membership of the current feature position
//! across six fixed mode centroids: weighted squared Euclidean distance per
//! centroid, softmax over negative distances with a temperature parameter,
//! normalized to a distribution. Also reports ambiguity (primary vs
//! secondary margin) and the KL divergence against the previous tick's
//! distribution.

use crate::error::EngineError;
use crate::features::AMPLITUDE_NORM_MS;
use crate::types::{HrvMetrics, Mode, SoftModeInference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default softmax temperature
pub const DEFAULT_TEMPERATURE: f64 = 1.0;

/// Epsilon floor applied inside the KL divergence to avoid log(0)
const KL_EPSILON: f64 = 1e-9;

/// Per-axis weights shared by the default centroids:
/// entrainment, breath steadiness, amplitude, inverse volatility.
pub const DEFAULT_AXIS_WEIGHTS: [f64; 4] = [0.4, 0.3, 0.2, 0.1];

/// A fixed reference point in the 4D classification feature space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeCentroid {
    pub mode: Mode,
    /// Canonical feature profile: entrainment, breath steadiness,
    /// normalized amplitude, inverse volatility — each in [0, 1]
    pub position: [f64; 4],
    /// Per-axis distance weights (non-negative, not all zero)
    pub weights: [f64; 4],
}

impl ModeCentroid {
    fn weighted_sq_distance(&self, features: &[f64; 4]) -> f64 {
        self.position
            .iter()
            .zip(features.iter())
            .zip(self.weights.iter())
            .map(|((c, x), w)| w * (x - c).powi(2))
            .sum()
    }
}

/// The full centroid configuration, invariant for the process lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidSet {
    pub centroids: Vec<ModeCentroid>,
}

impl Default for CentroidSet {
    fn default() -> Self {
        let c = |mode, position| ModeCentroid {
            mode,
            position,
            weights: DEFAULT_AXIS_WEIGHTS,
        };
        Self {
            centroids: vec![
                c(Mode::Scattered, [0.10, 0.3, 0.20, 0.20]),
                c(Mode::Alert, [0.25, 0.3, 0.40, 0.45]),
                c(Mode::Neutral, [0.40, 0.65, 0.50, 0.55]),
                c(Mode::Settling, [0.55, 1.0, 0.55, 0.65]),
                c(Mode::Coherent, [0.75, 1.0, 0.60, 0.80]),
                c(Mode::Deep, [0.90, 1.0, 0.45, 0.90]),
            ],
        }
    }
}

impl CentroidSet {
    /// Startup validation; the only error class this crate surfaces.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.centroids.len() != Mode::ALL.len() {
            return Err(EngineError::InvalidCentroids(format!(
                "expected {} centroids, got {}",
                Mode::ALL.len(),
                self.centroids.len()
            )));
        }
        for mode in Mode::ALL {
            if self.centroids.iter().filter(|c| c.mode == mode).count() != 1 {
                return Err(EngineError::InvalidCentroids(format!(
                    "mode {} must appear exactly once",
                    mode.as_str()
                )));
            }
        }
        for centroid in &self.centroids {
            if centroid.position.iter().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(EngineError::InvalidCentroids(format!(
                    "centroid {} has a position component outside [0, 1]",
                    centroid.mode.as_str()
                )));
            }
            if centroid.weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
                return Err(EngineError::InvalidCentroids(format!(
                    "centroid {} has a negative or non-finite weight",
                    centroid.mode.as_str()
                )));
            }
            if centroid.weights.iter().sum::<f64>() <= 0.0 {
                return Err(EngineError::InvalidCentroids(format!(
                    "centroid {} has all-zero weights",
                    centroid.mode.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Softmax classifier over the centroid set.
///
/// Holds the previous membership distribution across ticks so it can report
/// the distribution shift; this is the classifier's only cross-tick state.
#[derive(Debug, Clone)]
pub struct SoftClassifier {
    centroids: CentroidSet,
    temperature: f64,
    previous: Option<BTreeMap<Mode, f64>>,
}

impl SoftClassifier {
    pub fn new(centroids: CentroidSet, temperature: f64) -> Result<Self, EngineError> {
        centroids.validate()?;
        if temperature <= 0.0 || !temperature.is_finite() {
            return Err(EngineError::InvalidCentroids(format!(
                "softmax temperature must be positive, got {temperature}"
            )));
        }
        Ok(Self {
            centroids,
            temperature,
            previous: None,
        })
    }

    pub fn with_defaults() -> Self {
        // Default configuration is validated by construction.
        Self {
            centroids: CentroidSet::default(),
            temperature: DEFAULT_TEMPERATURE,
            previous: None,
        }
    }

    /// Classify the current metrics into a soft membership distribution.
    pub fn infer(&mut self, metrics: &HrvMetrics) -> SoftModeInference {
        let features = classification_features(metrics);

        // Numerically stabilized softmax over negative weighted distances
        let logits: Vec<(Mode, f64)> = self
            .centroids
            .centroids
            .iter()
            .map(|c| (c.mode, -c.weighted_sq_distance(&features) / self.temperature))
            .collect();
        let max_logit = logits
            .iter()
            .map(|(_, l)| *l)
            .fold(f64::NEG_INFINITY, f64::max);

        let exps: Vec<(Mode, f64)> = logits
            .iter()
            .map(|(m, l)| (*m, (l - max_logit).exp()))
            .collect();
        let total: f64 = exps.iter().map(|(_, e)| e).sum();

        let membership: BTreeMap<Mode, f64> =
            exps.iter().map(|(m, e)| (*m, e / total)).collect();

        // Rank by weight; ties resolve in mode order, keeping inference
        // deterministic.
        let mut ranked: Vec<(Mode, f64)> = membership.iter().map(|(m, w)| (*m, *w)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (primary, primary_weight) = ranked[0];
        let (secondary, secondary_weight) = ranked[1];
        let ambiguity = (1.0 - (primary_weight - secondary_weight)).clamp(0.0, 1.0);

        let distribution_shift = self
            .previous
            .as_ref()
            .map(|prev| kl_divergence(&membership, prev));
        self.previous = Some(membership.clone());

        SoftModeInference {
            membership,
            primary,
            secondary: Some(secondary),
            ambiguity,
            distribution_shift,
        }
    }
}

/// The 4D classification feature vector: entrainment, breath steadiness
/// (1.0 steady / 0.3 not), normalized amplitude, inverse volatility.
pub fn classification_features(metrics: &HrvMetrics) -> [f64; 4] {
    [
        metrics.entrainment.clamp(0.0, 1.0),
        if metrics.breath_steady { 1.0 } else { 0.3 },
        (metrics.amplitude as f64 / AMPLITUDE_NORM_MS).clamp(0.0, 1.0),
        (1.0 - metrics.volatility * 5.0).clamp(0.0, 1.0),
    ]
}

/// KL divergence of `current` relative to `previous`, epsilon-floored
fn kl_divergence(current: &BTreeMap<Mode, f64>, previous: &BTreeMap<Mode, f64>) -> f64 {
    current
        .iter()
        .map(|(mode, p)| {
            let p = p.max(KL_EPSILON);
            let q = previous.get(mode).copied().unwrap_or(0.0).max(KL_EPSILON);
            p * (p / q).ln()
        })
        .sum()
}
