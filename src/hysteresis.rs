//! Temporal hysteresis over the soft classifier
//!
//! Converts raw per-tick membership into a stable mode decision. Entry is
//! easier than exit (asymmetric thresholds), new modes start Provisional and
//! are promoted to Established after a dwell period, and an Established mode
//! refuses to yield while the challenger's confidence sits below the current
//! mode's exit threshold. This is the only component with cross-tick mutable
//! identity spanning the whole session.

use crate::error::EngineError;
use crate::types::{Mode, ModeDecision, ModeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Confidence scale reported while no mode has been entered
const UNKNOWN_CONFIDENCE_SCALE: f64 = 0.3;

/// Fraction of the exit threshold reported when a transition is refused,
/// signaling "near the boundary but not over it"
const REFUSAL_CONFIDENCE_FACTOR: f64 = 0.9;

/// Bounded transition history length
const HISTORY_CAPACITY: usize = 64;

/// Per-mode hysteresis tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeThresholds {
    /// Raw confidence needed to enter this mode
    pub entry_threshold: f64,
    /// Raw challenger confidence needed to leave this mode once Established
    pub exit_threshold: f64,
    /// Consecutive ticks before Provisional promotes to Established
    pub provisional_dwell_samples: u32,
    /// Ticks after which an Established mode earns the settled bonus
    pub established_dwell_samples: u32,
    /// Multiplier (< 1) applied to confidence on entry
    pub entry_penalty: f64,
    /// Multiplier (> 1) applied once established and past the dwell
    pub settled_bonus: f64,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        // The softmax over six centroids at temperature 1.0 is flat: primary
        // weights sit just above the uniform 1/6. Thresholds are tuned to
        // that scale; raising them would leave the session stuck in Unknown.
        Self {
            entry_threshold: 0.17,
            exit_threshold: 0.19,
            provisional_dwell_samples: 3,
            established_dwell_samples: 8,
            entry_penalty: 0.85,
            settled_bonus: 1.1,
        }
    }
}

impl ModeThresholds {
    pub fn validate(&self, mode: Mode) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.entry_threshold)
            || !(0.0..=1.0).contains(&self.exit_threshold)
        {
            return Err(EngineError::InvalidHysteresis(format!(
                "{}: thresholds must lie in [0, 1]",
                mode.as_str()
            )));
        }
        if self.entry_threshold >= self.exit_threshold {
            return Err(EngineError::InvalidHysteresis(format!(
                "{}: entry threshold {} must be below exit threshold {}",
                mode.as_str(),
                self.entry_threshold,
                self.exit_threshold
            )));
        }
        if self.entry_penalty <= 0.0 || self.entry_penalty >= 1.0 {
            return Err(EngineError::InvalidHysteresis(format!(
                "{}: entry penalty must lie in (0, 1)",
                mode.as_str()
            )));
        }
        if self.settled_bonus < 1.0 {
            return Err(EngineError::InvalidHysteresis(format!(
                "{}: settled bonus must be >= 1",
                mode.as_str()
            )));
        }
        if self.provisional_dwell_samples == 0 {
            return Err(EngineError::InvalidHysteresis(format!(
                "{}: provisional dwell must be at least 1 sample",
                mode.as_str()
            )));
        }
        Ok(())
    }
}

/// Full hysteresis configuration, one threshold set per mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HysteresisConfig {
    pub per_mode: BTreeMap<Mode, ModeThresholds>,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            per_mode: Mode::ALL
                .iter()
                .map(|&m| (m, ModeThresholds::default()))
                .collect(),
        }
    }
}

impl HysteresisConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        for mode in Mode::ALL {
            match self.per_mode.get(&mode) {
                Some(t) => t.validate(mode)?,
                None => {
                    return Err(EngineError::InvalidHysteresis(format!(
                        "missing thresholds for mode {}",
                        mode.as_str()
                    )))
                }
            }
        }
        Ok(())
    }

    fn thresholds(&self, mode: Mode) -> &ModeThresholds {
        // validate() guarantees presence for all modes
        &self.per_mode[&mode]
    }
}

/// Per-session mode state machine
#[derive(Debug, Clone)]
pub struct HysteresisEngine {
    config: HysteresisConfig,
    current: Option<Mode>,
    previous: Option<Mode>,
    status: ModeStatus,
    mode_entered_at: Option<DateTime<Utc>>,
    provisional_since: Option<DateTime<Utc>>,
    ticks_in_mode: u32,
    transition_count: u32,
    last_transition_at: Option<DateTime<Utc>>,
    history: VecDeque<(DateTime<Utc>, Mode, f64)>,
}

impl HysteresisEngine {
    pub fn new(config: HysteresisConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            current: None,
            previous: None,
            status: ModeStatus::Unknown,
            mode_entered_at: None,
            provisional_since: None,
            ticks_in_mode: 0,
            transition_count: 0,
            last_transition_at: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        })
    }

    /// Resolve the classifier's raw proposal into the session's stable mode.
    pub fn resolve(&mut self, proposed: Mode, raw_confidence: f64, now: DateTime<Utc>) -> ModeDecision {
        let confidence = match self.current {
            None => self.resolve_from_unknown(proposed, raw_confidence, now),
            Some(current) if current == proposed => {
                self.resolve_same_mode(current, raw_confidence)
            }
            Some(current) => self.resolve_challenge(current, proposed, raw_confidence, now),
        };

        if let Some(mode) = self.current {
            if self.history.len() == HISTORY_CAPACITY {
                self.history.pop_front();
            }
            self.history.push_back((now, mode, confidence));
        }

        ModeDecision {
            mode: self.current,
            previous_mode: self.previous,
            confidence,
            status: self.status,
            dwell_secs: self.dwell_secs(now),
            transition_count: self.transition_count,
            last_transition_at: self.last_transition_at,
        }
    }

    /// Seconds since the current mode was entered; 0 while Unknown
    pub fn dwell_secs(&self, now: DateTime<Utc>) -> f64 {
        match self.mode_entered_at {
            Some(entered) => ((now - entered).num_milliseconds() as f64 / 1000.0).max(0.0),
            None => 0.0,
        }
    }

    pub fn transition_history(&self) -> impl Iterator<Item = &(DateTime<Utc>, Mode, f64)> {
        self.history.iter()
    }

    fn resolve_from_unknown(&mut self, proposed: Mode, raw: f64, now: DateTime<Utc>) -> f64 {
        let thresholds = *self.config.thresholds(proposed);
        if raw >= thresholds.entry_threshold {
            self.enter(proposed, now);
            raw * thresholds.entry_penalty
        } else {
            raw * UNKNOWN_CONFIDENCE_SCALE
        }
    }

    fn resolve_same_mode(&mut self, current: Mode, raw: f64) -> f64 {
        let thresholds = *self.config.thresholds(current);
        self.ticks_in_mode += 1;

        if self.status == ModeStatus::Provisional
            && self.ticks_in_mode >= thresholds.provisional_dwell_samples
        {
            self.status = ModeStatus::Established;
            self.provisional_since = None;
        }

        if self.status == ModeStatus::Established
            && self.ticks_in_mode >= thresholds.established_dwell_samples
        {
            (raw * thresholds.settled_bonus).min(1.0)
        } else {
            raw
        }
    }

    fn resolve_challenge(
        &mut self,
        current: Mode,
        proposed: Mode,
        raw: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        if self.status == ModeStatus::Established {
            let exit = self.config.thresholds(current).exit_threshold;
            if raw < exit {
                // Refused: hold the mode and signal the near-boundary state.
                self.ticks_in_mode += 1;
                return exit * REFUSAL_CONFIDENCE_FACTOR;
            }
            let penalty = self.config.thresholds(proposed).entry_penalty;
            self.enter(proposed, now);
            return raw * penalty;
        }

        // Provisional modes yield more easily.
        let thresholds = *self.config.thresholds(proposed);
        if raw >= thresholds.entry_threshold {
            self.enter(proposed, now);
            raw * thresholds.entry_penalty
        } else {
            self.ticks_in_mode += 1;
            raw
        }
    }

    fn enter(&mut self, mode: Mode, now: DateTime<Utc>) {
        if self.current.is_some() {
            self.previous = self.current;
            self.transition_count += 1;
            self.last_transition_at = Some(now);
        }
        self.current = Some(mode);
        self.status = ModeStatus::Provisional;
        self.mode_entered_at = Some(now);
        self.provisional_since = Some(now);
        self.ticks_in_mode = 1;
    }
}

impl Default for HysteresisEngine {
    fn default() -> Self {
        // Default configuration is valid by construction.
        Self::new(HysteresisConfig::default()).expect("default hysteresis config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    /// Readable round-number thresholds for the state-machine tests
    fn test_thresholds() -> ModeThresholds {
        ModeThresholds {
            entry_threshold: 0.35,
            exit_threshold: 0.5,
            provisional_dwell_samples: 3,
            established_dwell_samples: 8,
            entry_penalty: 0.85,
            settled_bonus: 1.1,
        }
    }

    fn test_engine() -> HysteresisEngine {
        let config = HysteresisConfig {
            per_mode: Mode::ALL.iter().map(|&m| (m, test_thresholds())).collect(),
        };
        HysteresisEngine::new(config).unwrap()
    }

    /// Drive the engine into Established Coherent at tick offset 0..n
    fn established_engine(n: i64) -> HysteresisEngine {
        let mut engine = test_engine();
        for i in 0..n {
            engine.resolve(Mode::Coherent, 0.8, ts(i));
        }
        engine
    }

    #[test]
    fn test_low_confidence_stays_unknown() {
        let mut engine = test_engine();
        let decision = engine.resolve(Mode::Neutral, 0.2, ts(0));
        assert!(decision.mode.is_none());
        assert_eq!(decision.status, ModeStatus::Unknown);
        assert!((decision.confidence - 0.2 * 0.3).abs() < 1e-9);
        assert_eq!(decision.dwell_secs, 0.0);
    }

    #[test]
    fn test_entry_applies_penalty() {
        let mut engine = test_engine();
        let decision = engine.resolve(Mode::Neutral, 0.6, ts(0));
        assert_eq!(decision.mode, Some(Mode::Neutral));
        assert_eq!(decision.status, ModeStatus::Provisional);
        assert!((decision.confidence - 0.6 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_promotion_after_provisional_dwell() {
        let mut engine = test_engine();
        // Test config provisional dwell is 3 samples
        let d1 = engine.resolve(Mode::Coherent, 0.7, ts(0));
        assert_eq!(d1.status, ModeStatus::Provisional);
        let d2 = engine.resolve(Mode::Coherent, 0.7, ts(1));
        assert_eq!(d2.status, ModeStatus::Provisional);
        let d3 = engine.resolve(Mode::Coherent, 0.7, ts(2));
        assert_eq!(d3.status, ModeStatus::Established);
    }

    #[test]
    fn test_established_resists_single_low_challenge() {
        let mut engine = established_engine(5);
        let decision = engine.resolve(Mode::Scattered, 0.3, ts(5));
        assert_eq!(decision.mode, Some(Mode::Coherent));
        assert_eq!(decision.status, ModeStatus::Established);
        // Refusal reports exit_threshold * 0.9
        assert!((decision.confidence - 0.5 * 0.9).abs() < 1e-9);
        assert_eq!(decision.transition_count, 0);
    }

    #[test]
    fn test_same_mode_decreasing_confidence_holds_established() {
        // Monotonically decreasing raw confidence down to exactly the exit
        // threshold never dislodges the established mode.
        let mut engine = established_engine(4);
        let mut raw = 0.9;
        let mut tick = 4;
        while raw >= 0.5 {
            let decision = engine.resolve(Mode::Coherent, raw, ts(tick));
            assert_eq!(decision.mode, Some(Mode::Coherent));
            assert_eq!(decision.status, ModeStatus::Established);
            raw -= 0.05;
            tick += 1;
        }
        // Strictly below the exit threshold, a same-mode proposal still
        // changes nothing; only a challenger can force an exit.
        let decision = engine.resolve(Mode::Coherent, 0.2, ts(tick));
        assert_eq!(decision.mode, Some(Mode::Coherent));
        assert_eq!(decision.status, ModeStatus::Established);
    }

    #[test]
    fn test_challenge_at_exit_threshold_exits() {
        let mut engine = established_engine(5);
        let decision = engine.resolve(Mode::Settling, 0.5, ts(5));
        assert_eq!(decision.mode, Some(Mode::Settling));
        assert_eq!(decision.status, ModeStatus::Provisional);
        assert_eq!(decision.previous_mode, Some(Mode::Coherent));
        assert_eq!(decision.transition_count, 1);
        assert!((decision.confidence - 0.5 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_provisional_switches_easily() {
        let mut engine = test_engine();
        engine.resolve(Mode::Neutral, 0.6, ts(0));
        // Still provisional; a challenger above its own entry threshold wins
        // immediately even though 0.4 is below Neutral's exit threshold.
        let decision = engine.resolve(Mode::Alert, 0.4, ts(1));
        assert_eq!(decision.mode, Some(Mode::Alert));
        assert_eq!(decision.status, ModeStatus::Provisional);
    }

    #[test]
    fn test_provisional_holds_below_entry() {
        let mut engine = test_engine();
        engine.resolve(Mode::Neutral, 0.6, ts(0));
        let decision = engine.resolve(Mode::Alert, 0.2, ts(1));
        assert_eq!(decision.mode, Some(Mode::Neutral));
        assert!((decision.confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_settled_bonus_capped() {
        let mut engine = test_engine();
        // Test config established dwell is 8 samples
        let mut last = None;
        for i in 0..10 {
            last = Some(engine.resolve(Mode::Deep, 0.95, ts(i)));
        }
        let decision = last.unwrap();
        assert_eq!(decision.status, ModeStatus::Established);
        // 0.95 * 1.1 would exceed 1; must be capped
        assert!((decision.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dwell_resets_on_transition() {
        let mut engine = established_engine(10);
        let before = engine.resolve(Mode::Coherent, 0.8, ts(10));
        assert!(before.dwell_secs >= 10.0);

        let after = engine.resolve(Mode::Alert, 0.9, ts(11));
        assert_eq!(after.mode, Some(Mode::Alert));
        assert_eq!(after.dwell_secs, 0.0);
        assert_eq!(after.transition_count, 1);
        assert_eq!(after.last_transition_at, Some(ts(11)));
    }

    #[test]
    fn test_dwell_accumulates() {
        let mut engine = test_engine();
        engine.resolve(Mode::Neutral, 0.7, ts(0));
        let decision = engine.resolve(Mode::Neutral, 0.7, ts(4));
        assert!((decision.dwell_secs - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut engine = test_engine();
        for i in 0..(HISTORY_CAPACITY as i64 + 20) {
            engine.resolve(Mode::Neutral, 0.7, ts(i));
        }
        assert_eq!(engine.transition_history().count(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(HysteresisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = HysteresisConfig::default();
        config.per_mode.get_mut(&Mode::Neutral).unwrap().entry_threshold = 0.7; // above exit
        assert!(matches!(
            HysteresisEngine::new(config),
            Err(EngineError::InvalidHysteresis(_))
        ));

        let mut config = HysteresisConfig::default();
        config.per_mode.get_mut(&Mode::Deep).unwrap().settled_bonus = 0.9;
        assert!(HysteresisEngine::new(config).is_err());

        let mut config = HysteresisConfig::default();
        config.per_mode.remove(&Mode::Alert);
        assert!(HysteresisEngine::new(config).is_err());
    }
}
