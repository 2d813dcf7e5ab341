//! Movement annotation
//!
//! Derives a short human-readable qualifier from the rate of change of the
//! legacy scalar mode score and the current dwell time, then combines it
//! with the resolved mode name. The rate-of-change signal deliberately comes
//! from the legacy scalar rather than the soft membership (inherited
//! internal coupling; changing it changes observable annotation behavior).
//! Annotation is strictly observational: it runs after hysteresis resolution
//! and never feeds back into classification.

use crate::types::ModeDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Floor applied to tick time deltas in the derivative chain
const MIN_DT_SECS: f64 = 0.001;

/// Annotations that suppress the parenthesized form and return the bare
/// mode name. Carried over verbatim from the source design; part of the
/// externally observed label format.
const SUPPRESSED: [&str; 3] = ["settled", "unknown", "insufficient data"];

/// Annotation tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Score velocity magnitude (per second) below which motion counts as still
    pub still_threshold: f64,
    /// Dwell time (seconds) at which "still" matures into "settled"
    pub settled_secs: f64,
    /// Score acceleration magnitude (per second squared) separating
    /// accelerating/decelerating from plain moving
    pub accel_threshold: f64,
    /// Window (seconds) during which a transition earns a "from <mode>" suffix
    pub recent_transition_secs: f64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            still_threshold: 0.03,
            settled_secs: 5.0,
            accel_threshold: 0.01,
            recent_transition_secs: 3.0,
        }
    }
}

/// Composes per-tick movement annotations from the legacy score derivative
#[derive(Debug, Clone, Default)]
pub struct AnnotationComposer {
    config: AnnotationConfig,
    previous_score: Option<(f64, DateTime<Utc>)>,
    previous_velocity: Option<f64>,
}

impl AnnotationComposer {
    pub fn new(config: AnnotationConfig) -> Self {
        Self {
            config,
            previous_score: None,
            previous_velocity: None,
        }
    }

    /// Produce (annotation, movement-aware label) for this tick and advance
    /// the derivative trackers.
    pub fn compose(
        &mut self,
        decision: &ModeDecision,
        mode_score: f64,
        now: DateTime<Utc>,
    ) -> (String, String) {
        let mode_name = decision
            .mode
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let base = if decision.mode.is_none() {
            "unknown".to_string()
        } else {
            self.classify_motion(mode_score, now, decision.dwell_secs)
        };

        // Advance trackers even when the mode is unknown so the derivative
        // is warm once a mode is entered.
        self.advance(mode_score, now);

        let annotation = self.with_transition_suffix(base, decision, now);

        let label = if SUPPRESSED.contains(&annotation.as_str()) {
            mode_name
        } else {
            format!("{mode_name} ({annotation})")
        };

        (annotation, label)
    }

    fn classify_motion(&self, score: f64, now: DateTime<Utc>, dwell_secs: f64) -> String {
        let (prev_score, prev_ts) = match self.previous_score {
            Some(p) => p,
            None => return "insufficient data".to_string(),
        };

        let dt = (((now - prev_ts).num_milliseconds() as f64) / 1000.0).max(MIN_DT_SECS);
        let velocity = (score - prev_score) / dt;
        let acceleration = match self.previous_velocity {
            Some(prev_v) => (velocity - prev_v) / dt,
            None => 0.0,
        };

        let label = if velocity.abs() < self.config.still_threshold {
            if dwell_secs >= self.config.settled_secs {
                "settled"
            } else {
                "still"
            }
        } else if acceleration > self.config.accel_threshold {
            "accelerating"
        } else if acceleration < -self.config.accel_threshold {
            "decelerating"
        } else {
            "moving"
        };
        label.to_string()
    }

    fn advance(&mut self, score: f64, now: DateTime<Utc>) {
        if let Some((prev_score, prev_ts)) = self.previous_score {
            let dt = (((now - prev_ts).num_milliseconds() as f64) / 1000.0).max(MIN_DT_SECS);
            self.previous_velocity = Some((score - prev_score) / dt);
        }
        self.previous_score = Some((score, now));
    }

    fn with_transition_suffix(
        &self,
        base: String,
        decision: &ModeDecision,
        now: DateTime<Utc>,
    ) -> String {
        let (transition_at, from) = match (decision.last_transition_at, decision.previous_mode) {
            (Some(t), Some(m)) => (t, m),
            _ => return base,
        };
        let age = (now - transition_at).num_milliseconds() as f64 / 1000.0;
        if age <= self.config.recent_transition_secs {
            format!("{base}, from {}", from.as_str())
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mode, ModeStatus};
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn decision(mode: Option<Mode>, dwell_secs: f64) -> ModeDecision {
        ModeDecision {
            mode,
            previous_mode: None,
            confidence: 0.7,
            status: ModeStatus::Provisional,
            dwell_secs,
            transition_count: 0,
            last_transition_at: None,
        }
    }

    #[test]
    fn test_first_tick_insufficient_data() {
        let mut composer = AnnotationComposer::default();
        let (annotation, label) = composer.compose(&decision(Some(Mode::Neutral), 0.0), 0.5, ts(0));
        assert_eq!(annotation, "insufficient data");
        // Suppressed annotations return the bare mode name
        assert_eq!(label, "neutral");
    }

    #[test]
    fn test_unknown_mode() {
        let mut composer = AnnotationComposer::default();
        let (annotation, label) = composer.compose(&decision(None, 0.0), 0.3, ts(0));
        assert_eq!(annotation, "unknown");
        assert_eq!(label, "unknown");
    }

    #[test]
    fn test_still_before_settled_threshold() {
        let mut composer = AnnotationComposer::default();
        composer.compose(&decision(Some(Mode::Neutral), 0.0), 0.5, ts(0));
        let (annotation, label) = composer.compose(&decision(Some(Mode::Neutral), 2.0), 0.5, ts(1));
        assert_eq!(annotation, "still");
        assert_eq!(label, "neutral (still)");
    }

    #[test]
    fn test_settled_after_dwell() {
        let mut composer = AnnotationComposer::default();
        composer.compose(&decision(Some(Mode::Coherent), 5.0), 0.7, ts(0));
        let (annotation, label) = composer.compose(&decision(Some(Mode::Coherent), 6.0), 0.7, ts(1));
        assert_eq!(annotation, "settled");
        assert_eq!(label, "coherent");
    }

    #[test]
    fn test_accelerating() {
        let mut composer = AnnotationComposer::default();
        composer.compose(&decision(Some(Mode::Settling), 1.0), 0.30, ts(0));
        // velocity 0.05/s, no prior velocity -> "moving"
        let (a1, _) = composer.compose(&decision(Some(Mode::Settling), 2.0), 0.35, ts(1));
        assert_eq!(a1, "moving");
        // velocity 0.15/s, acceleration 0.10/s^2 -> "accelerating"
        let (a2, label) = composer.compose(&decision(Some(Mode::Settling), 3.0), 0.50, ts(2));
        assert_eq!(a2, "accelerating");
        assert_eq!(label, "settling (accelerating)");
    }

    #[test]
    fn test_decelerating() {
        let mut composer = AnnotationComposer::default();
        composer.compose(&decision(Some(Mode::Settling), 1.0), 0.30, ts(0));
        composer.compose(&decision(Some(Mode::Settling), 2.0), 0.50, ts(1));
        // velocity drops from 0.20/s to 0.05/s
        let (annotation, _) = composer.compose(&decision(Some(Mode::Settling), 3.0), 0.55, ts(2));
        assert_eq!(annotation, "decelerating");
    }

    #[test]
    fn test_recent_transition_suffix() {
        let mut composer = AnnotationComposer::default();
        composer.compose(&decision(Some(Mode::Neutral), 1.0), 0.5, ts(0));

        let d = ModeDecision {
            mode: Some(Mode::Coherent),
            previous_mode: Some(Mode::Neutral),
            confidence: 0.7,
            status: ModeStatus::Provisional,
            dwell_secs: 1.0,
            transition_count: 1,
            last_transition_at: Some(ts(1)),
        };
        let (annotation, label) = composer.compose(&d, 0.5, ts(2));
        assert_eq!(annotation, "still, from neutral");
        assert_eq!(label, "coherent (still, from neutral)");
    }

    #[test]
    fn test_old_transition_no_suffix() {
        let mut composer = AnnotationComposer::default();
        composer.compose(&decision(Some(Mode::Coherent), 8.0), 0.5, ts(0));

        let d = ModeDecision {
            mode: Some(Mode::Coherent),
            previous_mode: Some(Mode::Neutral),
            confidence: 0.7,
            status: ModeStatus::Established,
            dwell_secs: 9.0,
            transition_count: 1,
            last_transition_at: Some(ts(-10)),
        };
        let (annotation, _) = composer.compose(&d, 0.5, ts(1));
        assert_eq!(annotation, "settled");
    }
}
