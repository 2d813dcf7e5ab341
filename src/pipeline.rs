//! Pipeline orchestration
//!
//! The public API of pulse-phase. One update tick consumes one interval
//! sample and produces exactly one output record; all sub-computations
//! within a tick are synchronous and ordered: buffer append → feature
//! extraction → trajectory update → soft classification → hysteresis
//! resolution → annotation. The record is assembled atomically at tick end,
//! so a half-completed tick is never observable.

use crate::annotation::{AnnotationComposer, AnnotationConfig};
use crate::buffer::{IntervalBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::classifier::{CentroidSet, SoftClassifier, DEFAULT_TEMPERATURE};
use crate::error::EngineError;
use crate::features::{ExtractorConfig, FeatureExtractor};
use crate::hysteresis::{HysteresisConfig, HysteresisEngine};
use crate::record::TickRecord;
use crate::trajectory::{TrajectoryTracker, DEFAULT_COHERENCE_LAG, DEFAULT_HISTORY_CAPACITY};
use crate::types::IntervalSample;
use uuid::Uuid;

/// Engine construction parameters, all defaulted to the documented values
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub buffer_capacity: usize,
    pub history_capacity: usize,
    pub coherence_lag: usize,
    pub temperature: f64,
    pub extractor: ExtractorConfig,
    pub centroids: CentroidSet,
    pub hysteresis: HysteresisConfig,
    pub annotation: AnnotationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            coherence_lag: DEFAULT_COHERENCE_LAG,
            temperature: DEFAULT_TEMPERATURE,
            extractor: ExtractorConfig::default(),
            centroids: CentroidSet::default(),
            hysteresis: HysteresisConfig::default(),
            annotation: AnnotationConfig::default(),
        }
    }
}

/// Single-session processing engine.
///
/// Logically single-threaded: the caller drives ticks in sample order and
/// records come back in strictly increasing timestamp order. All state is
/// created at session start and dropped at session end; nothing persists
/// across sessions.
pub struct PhaseEngine {
    session_id: Uuid,
    buffer: IntervalBuffer,
    extractor: FeatureExtractor,
    tracker: TrajectoryTracker,
    classifier: SoftClassifier,
    hysteresis: HysteresisEngine,
    annotator: AnnotationComposer,
    tick_count: u64,
}

impl Default for PhaseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseEngine {
    /// Create an engine with the documented default configuration
    pub fn new() -> Self {
        // Defaults are valid by construction.
        Self::with_config(EngineConfig::default()).expect("default engine config is valid")
    }

    /// Create an engine from an explicit configuration. Configuration
    /// problems are the only hard failure this crate surfaces.
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            session_id: Uuid::new_v4(),
            buffer: IntervalBuffer::new(config.buffer_capacity),
            extractor: FeatureExtractor::new(config.extractor)?,
            tracker: TrajectoryTracker::new(config.history_capacity, config.coherence_lag),
            classifier: SoftClassifier::new(config.centroids, config.temperature)?,
            hysteresis: HysteresisEngine::new(config.hysteresis)?,
            annotator: AnnotationComposer::new(config.annotation),
            tick_count: 0,
        })
    }

    /// Session identity for host provenance; never embedded in records
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Run one update tick: consume one interval sample, emit one record.
    pub fn tick(&mut self, sample: IntervalSample) -> TickRecord {
        self.tick_batch(&[sample])
    }

    /// Run one update tick over a batch of samples arriving together.
    /// The batch's last timestamp becomes the tick timestamp.
    ///
    /// An empty batch still produces a record from the current buffer state,
    /// stamped with the previous tick's time (callers should not do this;
    /// the CLI host never does).
    pub fn tick_batch(&mut self, samples: &[IntervalSample]) -> TickRecord {
        for sample in samples {
            self.buffer.append(*sample);
        }
        let ts = samples
            .last()
            .map(|s| s.timestamp)
            .or_else(|| self.buffer.snapshot().last().map(|s| s.timestamp))
            .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let rr: Vec<i64> = samples.iter().map(|s| s.value_ms as i64).collect();

        let metrics = self.extractor.extract(&self.buffer);
        let (state, dynamics) = self.tracker.update(&metrics, ts);
        let inference = self.classifier.infer(&metrics);
        let raw_confidence = inference.membership[&inference.primary];
        let decision = self.hysteresis.resolve(inference.primary, raw_confidence, ts);
        let (annotation, label) = self.annotator.compose(&decision, metrics.mode_score, ts);

        self.tick_count += 1;

        TickRecord::from_parts(
            ts,
            rr,
            metrics.mean_interval_ms,
            &metrics,
            &state,
            &dynamics,
            &inference,
            &decision,
            annotation,
            label,
        )
    }
}

/// Run an ordered interval sequence through a fresh engine and return one
/// JSON line per tick. Replaying the same sequence yields byte-identical
/// output.
pub fn replay(samples: &[IntervalSample]) -> Result<Vec<String>, EngineError> {
    let mut engine = PhaseEngine::new();
    samples
        .iter()
        .map(|s| engine.tick(*s).to_json())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModeStatus;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn base_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn samples_from(values: &[u32]) -> Vec<IntervalSample> {
        let mut elapsed = 0i64;
        values
            .iter()
            .map(|&v| {
                elapsed += v as i64;
                IntervalSample::new(v, base_ts() + Duration::milliseconds(elapsed))
            })
            .collect()
    }

    #[test]
    fn test_one_record_per_tick_in_order() {
        let mut engine = PhaseEngine::new();
        let samples = samples_from(&[812, 798, 825, 801, 790]);
        let mut last_ts = None;
        for sample in &samples {
            let record = engine.tick(*sample);
            assert_eq!(record.rr, vec![sample.value_ms as i64]);
            if let Some(prev) = last_ts {
                assert!(record.ts > prev, "records must be in increasing ts order");
            }
            last_ts = Some(record.ts);
        }
        assert_eq!(engine.tick_count(), 5);
    }

    #[test]
    fn test_cold_start_properties() {
        let mut engine = PhaseEngine::new();
        for sample in samples_from(&[812, 798]).iter() {
            let record = engine.tick(*sample);
            assert_eq!(record.phase.phase_label, "warming up");
            assert_eq!(record.phase.stability, 0.5);
        }
    }

    #[test]
    fn test_identical_intervals_scenario() {
        // 30 identical values: amplitude and volatility collapse to zero,
        // motion dies out, stability trends to 1.
        let mut engine = PhaseEngine::new();
        let mut last = None;
        for sample in samples_from(&[800; 30]).iter() {
            last = Some(engine.tick(*sample));
        }
        let record = last.unwrap();
        assert_eq!(record.metrics.amp, 0);
        assert_eq!(record.metrics.volatility, 0.0);
        assert!(record.phase.velocity_mag < 1e-9);
        assert!(record.phase.stability > 0.99);
        assert_eq!(record.hr, Some(75));
    }

    #[test]
    fn test_membership_always_normalized() {
        let mut engine = PhaseEngine::new();
        for sample in samples_from(&[812, 640, 1100, 798, 802, 640, 990, 805, 801, 799]).iter() {
            let record = engine.tick(*sample);
            let sum: f64 = record.phase.soft_mode.membership.values().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let samples = samples_from(&[
            800, 814, 809, 791, 786, 800, 814, 809, 791, 786, 800, 814, 809, 791, 786, 805,
        ]);
        let first = replay(&samples).unwrap();
        let second = replay(&samples).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), samples.len());
    }

    #[test]
    fn test_mode_eventually_established() {
        // A long steady oscillation should settle into an established mode.
        let pattern = [800u32, 814, 809, 791, 786];
        let values: Vec<u32> = pattern.iter().cycle().take(40).copied().collect();
        let mut engine = PhaseEngine::new();
        let mut last = None;
        for sample in samples_from(&values).iter() {
            last = Some(engine.tick(*sample));
        }
        let record = last.unwrap();
        assert_eq!(record.phase.mode_status, ModeStatus::Established);
        assert!(record.phase.dwell_time > 0.0);
    }

    #[test]
    fn test_batch_tick_uses_last_timestamp() {
        let mut engine = PhaseEngine::new();
        let samples = samples_from(&[812, 798, 825]);
        let record = engine.tick_batch(&samples);
        assert_eq!(record.ts, samples[2].timestamp);
        assert_eq!(record.rr, vec![812, 798, 825]);
        assert_eq!(engine.tick_count(), 1);
    }

    #[test]
    fn test_invalid_config_is_a_hard_failure() {
        let mut config = EngineConfig::default();
        config.temperature = -1.0;
        assert!(PhaseEngine::with_config(config).is_err());
    }

    #[test]
    fn test_sessions_do_not_share_state() {
        let samples = samples_from(&[812, 798, 825, 801]);
        let mut a = PhaseEngine::new();
        let mut b = PhaseEngine::new();
        assert_ne!(a.session_id(), b.session_id());
        for sample in &samples {
            let ra = a.tick(*sample);
            let rb = b.tick(*sample);
            // Same inputs, fresh state: identical outputs
            assert_eq!(ra.to_json().unwrap(), rb.to_json().unwrap());
        }
    }
}
