//! Per-tick output record
//!
//! The JSON shape emitted once per update tick. Field names are the
//! cross-implementation contract consumed by persistence, transport, and
//! visualization collaborators; renames break downstream compatibility and
//! must be versioned explicitly.
//!
//! Records are a pure function of the tick's inputs (the timestamp comes
//! from the sample, never from the wall clock), so replaying an identical
//! sample sequence yields byte-identical output.

use crate::error::EngineError;
use crate::types::{HrvMetrics, Mode, ModeDecision, ModeStatus, PhaseDynamics, PhaseState, SoftModeInference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HRV metrics block of the output record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub amp: u32,
    pub ent: f64,
    pub ent_label: String,
    pub breath: Option<f64>,
    pub volatility: f64,
    pub mode: Mode,
    pub mode_score: f64,
}

/// Soft classification block of the output record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftModeRecord {
    pub primary: Mode,
    pub secondary: Option<Mode>,
    pub ambiguity: f64,
    /// BTreeMap keeps key order deterministic across replays
    pub membership: BTreeMap<Mode, f64>,
}

/// Phase-space block of the output record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub velocity_mag: f64,
    pub curvature: f64,
    pub stability: f64,
    pub history_signature: f64,
    pub coherence: f64,
    pub phase_label: String,
    pub soft_mode: SoftModeRecord,
    pub movement_annotation: String,
    pub movement_aware_label: String,
    pub mode_status: ModeStatus,
    pub dwell_time: f64,
}

/// One complete output record, emitted atomically at tick end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    /// Tick timestamp (from the sample, RFC 3339)
    pub ts: DateTime<Utc>,
    /// Instantaneous heart rate from the buffer mean; null when no samples
    pub hr: Option<i64>,
    /// Interval value(s) consumed by this tick (ms)
    pub rr: Vec<i64>,
    pub metrics: MetricsRecord,
    pub phase: PhaseRecord,
}

impl TickRecord {
    /// Assemble the record from the tick's pipeline outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        ts: DateTime<Utc>,
        rr: Vec<i64>,
        mean_interval_ms: f64,
        metrics: &HrvMetrics,
        state: &PhaseState,
        dynamics: &PhaseDynamics,
        inference: &SoftModeInference,
        decision: &ModeDecision,
        movement_annotation: String,
        movement_aware_label: String,
    ) -> Self {
        let hr = if mean_interval_ms > 0.0 {
            Some((60_000.0 / mean_interval_ms).round() as i64)
        } else {
            None
        };

        Self {
            ts,
            hr,
            rr,
            metrics: MetricsRecord {
                amp: metrics.amplitude,
                ent: metrics.entrainment,
                ent_label: metrics.entrainment_label.clone(),
                breath: metrics.breath_rate,
                volatility: metrics.volatility,
                mode: metrics.mode_label,
                mode_score: metrics.mode_score,
            },
            phase: PhaseRecord {
                position: state.position,
                velocity: dynamics.velocity,
                velocity_mag: dynamics.velocity_magnitude,
                curvature: dynamics.curvature,
                stability: dynamics.stability,
                history_signature: dynamics.history_signature,
                coherence: dynamics.coherence,
                phase_label: dynamics.label.clone(),
                soft_mode: SoftModeRecord {
                    primary: inference.primary,
                    secondary: inference.secondary,
                    ambiguity: inference.ambiguity,
                    membership: inference.membership.clone(),
                },
                movement_annotation,
                movement_aware_label,
                mode_status: decision.status,
                dwell_time: decision.dwell_secs,
            },
        }
    }

    /// Compact JSON, one record per NDJSON line
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(EngineError::JsonError)
    }
}
