//! Core types for the pulse-phase pipeline
//!
//! This module defines the data structures that flow through each stage of
//! the per-tick pipeline: interval samples, extracted HRV metrics, phase
//! states and dynamics, soft-mode inference, and the resolved mode decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single beat-to-beat interval measurement from the acquisition layer.
///
/// Immutable once created. The core performs no bounds validation on the
/// value; that belongs to the device-parsing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSample {
    /// Beat-to-beat interval in milliseconds
    pub value_ms: u32,
    /// When the interval was observed (UTC)
    pub timestamp: DateTime<Utc>,
}

impl IntervalSample {
    pub fn new(value_ms: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            value_ms,
            timestamp,
        }
    }
}

/// The six named autonomic modes, ordered by legacy score band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Scattered,
    Alert,
    Neutral,
    Settling,
    Coherent,
    Deep,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Scattered,
        Mode::Alert,
        Mode::Neutral,
        Mode::Settling,
        Mode::Coherent,
        Mode::Deep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Scattered => "scattered",
            Mode::Alert => "alert",
            Mode::Neutral => "neutral",
            Mode::Settling => "settling",
            Mode::Coherent => "coherent",
            Mode::Deep => "deep",
        }
    }
}

/// HRV metrics derived from the current buffer contents.
///
/// A pure function of buffer state, recomputed fully on every tick; no
/// persistent identity. Every field has a documented neutral default for
/// insufficient-data conditions, so extraction is total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvMetrics {
    /// Mean interval over the buffer (ms)
    pub mean_interval_ms: f64,
    /// Minimum interval in the buffer (ms)
    pub min_ms: u32,
    /// Maximum interval in the buffer (ms)
    pub max_ms: u32,
    /// max - min (ms); 0 with fewer than 2 samples
    pub amplitude: u32,
    /// Rhythmic coupling strength from lagged autocorrelation (0-1)
    pub entrainment: f64,
    /// Human-readable entrainment band
    pub entrainment_label: String,
    /// Estimated breath rate (breaths/min); absent when unresolvable or
    /// outside the plausible 2-20 range
    pub breath_rate: Option<f64>,
    /// Whether the breath estimate came from regularly spaced peaks
    pub breath_steady: bool,
    /// Coefficient of variation of the interval series; 0 with fewer than 2 samples
    pub volatility: f64,
    /// Legacy scalar mode label (informational; superseded by soft inference)
    pub mode_label: Mode,
    /// Legacy scalar mode score (0-1); feeds the annotation rate-of-change signal
    pub mode_score: f64,
}

/// A position in the derived 3D feature space at one instant.
///
/// Axes: entrainment, normalized breath rate, normalized amplitude,
/// all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub timestamp: DateTime<Utc>,
    pub position: [f64; 3],
}

/// Movement through feature space, derived from the trailing phase history.
///
/// Pure function of the history window; not stored beyond the current tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDynamics {
    /// Component-wise velocity (feature units per second)
    pub velocity: [f64; 3],
    /// Euclidean norm of velocity
    pub velocity_magnitude: f64,
    /// Acceleration magnitude. Named "curvature" for continuity with the
    /// source design; this is NOT differential-geometry curvature (no
    /// division by speed cubed).
    pub curvature: f64,
    /// How settled the trajectory is (0-1, 1 = motionless)
    pub stability: f64,
    /// Session path length rate over the retained window, normalized to 0-1
    pub history_signature: f64,
    /// Self-consistency of recent movement (0-1)
    pub coherence: f64,
    /// Human-readable phase descriptor from the priority cascade
    pub label: String,
}

/// Probability-like membership over the six modes from the soft classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftModeInference {
    /// Per-mode weights, summing to 1.0 within floating tolerance.
    /// BTreeMap keeps serialization order deterministic.
    pub membership: BTreeMap<Mode, f64>,
    /// Highest-weight mode
    pub primary: Mode,
    /// Second-highest-weight mode
    pub secondary: Option<Mode>,
    /// 1 - (primary weight - secondary weight); 1 = maximally ambiguous
    pub ambiguity: f64,
    /// KL divergence of this membership relative to the previous tick's
    pub distribution_shift: Option<f64>,
}

/// Temporal status of the current mode decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeStatus {
    Unknown,
    Provisional,
    Established,
}

impl ModeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeStatus::Unknown => "unknown",
            ModeStatus::Provisional => "provisional",
            ModeStatus::Established => "established",
        }
    }
}

/// The hysteresis engine's per-tick decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeDecision {
    /// Stable current mode, if one has been entered
    pub mode: Option<Mode>,
    /// Mode held before the most recent transition
    pub previous_mode: Option<Mode>,
    /// Confidence after entry penalty / settled bonus / boundary clamping
    pub confidence: f64,
    pub status: ModeStatus,
    /// Seconds since the current mode was entered (0 while Unknown)
    pub dwell_secs: f64,
    /// Actual mode changes so far this session
    pub transition_count: u32,
    /// When the most recent transition happened, if any
    pub last_transition_at: Option<DateTime<Utc>>,
}

/// One interval event as consumed from the acquisition collaborator.
///
/// This is the wire shape the CLI host reads; validation lives here because
/// the host *is* the device-parsing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrEvent {
    /// Observation timestamp (RFC 3339)
    pub ts: DateTime<Utc>,
    /// Beat-to-beat interval in milliseconds (positive)
    pub rr_ms: u32,
}

impl RrEvent {
    /// Reject intervals the engine's contract excludes (non-positive).
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.rr_ms == 0 {
            return Err(crate::error::EngineError::ParseError(
                "rr_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
