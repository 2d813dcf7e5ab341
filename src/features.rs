//! HRV feature extraction
//!
//! Computes amplitude, entrainment, breath rate, volatility, and the legacy
//! scalar mode score from the current buffer contents. Extraction is total:
//! every metric has a documented neutral default when the buffer holds too
//! few samples, so callers treat "insufficient data" as a first-class silent
//! result rather than an error.

use crate::buffer::IntervalBuffer;
use crate::error::EngineError;
use crate::types::{HrvMetrics, Mode};
use serde::{Deserialize, Serialize};

/// Minimum samples before entrainment is computed
pub const ENTRAINMENT_MIN_SAMPLES: usize = 10;

/// Default autocorrelation lags scanned for entrainment
pub const DEFAULT_ENTRAINMENT_LAGS: [usize; 5] = [4, 5, 6, 7, 8];

/// Plausible breath-rate window (breaths/min); estimates outside it are discarded
pub const BREATH_RATE_RANGE: (f64, f64) = (2.0, 20.0);

/// Peak-spacing coefficient of variation below which breathing counts as steady
pub const BREATH_STEADY_CV: f64 = 0.3;

/// Amplitude normalization ceiling (ms) for the legacy score and phase axes
pub const AMPLITUDE_NORM_MS: f64 = 200.0;

/// Extractor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Autocorrelation lags scanned for entrainment (each >= 2)
    pub entrainment_lags: Vec<usize>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            entrainment_lags: DEFAULT_ENTRAINMENT_LAGS.to_vec(),
        }
    }
}

impl ExtractorConfig {
    /// Recenter the entrainment lag scan on an expected oscillation period
    /// (in samples). Lags are `period-1 ..= period+1`, floored at 2.
    pub fn with_expected_period(period_samples: usize) -> Self {
        let center = period_samples.max(3);
        Self {
            entrainment_lags: vec![center - 1, center, center + 1],
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.entrainment_lags.is_empty() {
            return Err(EngineError::InvalidExtractor(
                "entrainment lag set is empty".to_string(),
            ));
        }
        if let Some(bad) = self.entrainment_lags.iter().find(|&&l| l < 2) {
            return Err(EngineError::InvalidExtractor(format!(
                "entrainment lag {bad} is below the minimum of 2"
            )));
        }
        Ok(())
    }
}

/// Feature extractor over a rolling interval buffer
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Compute the full metric set from the current buffer contents.
    pub fn extract(&self, buffer: &IntervalBuffer) -> HrvMetrics {
        let values = buffer.values();
        let mean_interval_ms = buffer.mean_interval_ms().unwrap_or(0.0);

        let min_ms = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (min_ms, max_ms) = if values.is_empty() {
            (0, 0)
        } else {
            (min_ms as u32, max_ms as u32)
        };

        let amplitude = amplitude(&values);
        let (entrainment, entrainment_label) = self.entrainment(&values);
        let (breath_rate, breath_steady) = breath_rate(&values, mean_interval_ms);
        let volatility = volatility(&values);

        let (mode_label, mode_score) =
            legacy_mode(entrainment, breath_steady, amplitude, volatility);

        HrvMetrics {
            mean_interval_ms,
            min_ms,
            max_ms,
            amplitude,
            entrainment,
            entrainment_label: entrainment_label.to_string(),
            breath_rate,
            breath_steady,
            volatility,
            mode_label,
            mode_score,
        }
    }

    /// Entrainment: maximum autocorrelation over the configured lags,
    /// clamped to [0, 1]. Negative correlation clamps to 0, discarding
    /// anti-phase information (known limitation of the measure).
    fn entrainment(&self, values: &[f64]) -> (f64, &'static str) {
        if values.len() < ENTRAINMENT_MIN_SAMPLES {
            return (0.0, entrainment_label(0.0));
        }
        let best = self
            .config
            .entrainment_lags
            .iter()
            .map(|&lag| autocorrelation(values, lag))
            .fold(f64::NEG_INFINITY, f64::max);
        let score = best.clamp(0.0, 1.0);
        (score, entrainment_label(score))
    }
}

/// max - min of the buffer; 0 with fewer than 2 samples
pub fn amplitude(values: &[f64]) -> u32 {
    if values.len() < 2 {
        return 0;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (max - min) as u32
}

/// Normalized autocorrelation at `lag` over the full series.
///
/// Autocovariance uses a 1/(n-lag) divisor; normalization divides by the
/// population variance of the full series. Returns 0 when n < lag + 2 or
/// the series has no variance.
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    if n < lag + 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    if variance < f64::EPSILON {
        return 0.0;
    }
    let autocov = (0..n - lag)
        .map(|i| (values[i] - mean) * (values[i + lag] - mean))
        .sum::<f64>()
        / (n - lag) as f64;
    autocov / variance
}

fn entrainment_label(score: f64) -> &'static str {
    if score < 0.2 {
        "low"
    } else if score < 0.4 {
        "emerging"
    } else if score < 0.7 {
        "entrained"
    } else {
        "high"
    }
}

/// Breath-rate estimate in breaths/min plus a steadiness flag.
///
/// Primary method: local-maxima peak detection; average peak spacing times
/// the mean interval gives the breath-cycle duration. Steadiness is a peak
/// spacing CV below [`BREATH_STEADY_CV`]. With fewer than 2 peaks, falls
/// back to a zero-crossing count on the mean-subtracted signal (two
/// crossings per cycle), always reported as not steady. Estimates outside
/// [`BREATH_RATE_RANGE`] are discarded.
pub fn breath_rate(values: &[f64], mean_interval_ms: f64) -> (Option<f64>, bool) {
    if values.len() < 3 || mean_interval_ms <= 0.0 {
        return (None, false);
    }

    let peaks = local_maxima(values);

    if peaks.len() >= 2 {
        let spacings: Vec<f64> = peaks.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
        let mean_spacing = spacings.iter().sum::<f64>() / spacings.len() as f64;
        if mean_spacing > 0.0 {
            let cycle_secs = mean_spacing * mean_interval_ms / 1000.0;
            let rate = 60.0 / cycle_secs;
            let steady = coefficient_of_variation(&spacings) < BREATH_STEADY_CV;
            if rate >= BREATH_RATE_RANGE.0 && rate <= BREATH_RATE_RANGE.1 {
                return (Some(rate), steady);
            }
            return (None, false);
        }
    }

    // Fallback: zero crossings of the mean-subtracted signal
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let crossings = zero_crossings(values, mean);
    if crossings == 0 {
        return (None, false);
    }
    let cycles = crossings as f64 / 2.0;
    let total_secs = values.len() as f64 * mean_interval_ms / 1000.0;
    if total_secs <= 0.0 {
        return (None, false);
    }
    let rate = 60.0 * cycles / total_secs;
    if rate >= BREATH_RATE_RANGE.0 && rate <= BREATH_RATE_RANGE.1 {
        (Some(rate), false)
    } else {
        (None, false)
    }
}

/// Indices of strict interior local maxima
fn local_maxima(values: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    for i in 1..values.len().saturating_sub(1) {
        if values[i] > values[i - 1] && values[i] > values[i + 1] {
            peaks.push(i);
        }
    }
    peaks
}

/// Sign changes of the mean-subtracted signal, skipping on-mean samples
fn zero_crossings(values: &[f64], mean: f64) -> usize {
    let mut crossings = 0;
    let mut last_sign: Option<bool> = None;
    for v in values {
        let delta = v - mean;
        if delta.abs() < f64::EPSILON {
            continue;
        }
        let sign = delta > 0.0;
        if let Some(prev) = last_sign {
            if prev != sign {
                crossings += 1;
            }
        }
        last_sign = Some(sign);
    }
    crossings
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

/// Coefficient of variation of the interval series (population std / mean);
/// 0 with fewer than 2 samples
pub fn volatility(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    coefficient_of_variation(values)
}

/// Legacy scalar mode: weighted blend of the four features, clamped to
/// [0, 1], then banded to a mode name. Retained as the input to the
/// annotation layer's rate-of-change signal; the soft classifier supersedes
/// it for the primary classification.
pub fn legacy_mode(
    entrainment: f64,
    breath_steady: bool,
    amplitude: u32,
    volatility: f64,
) -> (Mode, f64) {
    let breath_term = if breath_steady { 1.0 } else { 0.3 };
    let amp_term = (amplitude as f64 / AMPLITUDE_NORM_MS).clamp(0.0, 1.0);
    let calm_term = (1.0 - volatility * 5.0).max(0.0);

    let score = (entrainment * 0.4 + breath_term * 0.3 + amp_term * 0.2 + calm_term * 0.1)
        .clamp(0.0, 1.0);

    let mode = if score < 0.2 {
        Mode::Scattered
    } else if score < 0.35 {
        Mode::Alert
    } else if score < 0.5 {
        Mode::Neutral
    } else if score < 0.65 {
        Mode::Settling
    } else if score < 0.85 {
        Mode::Coherent
    } else {
        Mode::Deep
    };

    (mode, score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntervalSample;
    use chrono::{Duration, TimeZone, Utc};

    fn buffer_from(values: &[u32]) -> IntervalBuffer {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let mut buf = IntervalBuffer::new(32);
        let mut elapsed = 0i64;
        for &v in values {
            elapsed += v as i64;
            buf.append(IntervalSample::new(v, base + Duration::milliseconds(elapsed)));
        }
        buf
    }

    /// 10 samples with a 5-sample periodic oscillation around 800 ms
    fn oscillating_values() -> Vec<u32> {
        vec![800, 814, 809, 791, 786, 800, 814, 809, 791, 786]
    }

    #[test]
    fn test_amplitude_needs_two_samples() {
        assert_eq!(amplitude(&[]), 0);
        assert_eq!(amplitude(&[800.0]), 0);
        assert_eq!(amplitude(&[800.0, 820.0]), 20);
    }

    #[test]
    fn test_volatility_needs_two_samples() {
        assert_eq!(volatility(&[]), 0.0);
        assert_eq!(volatility(&[812.0]), 0.0);
        assert!(volatility(&[700.0, 900.0]) > 0.0);
    }

    #[test]
    fn test_volatility_zero_for_constant_series() {
        assert_eq!(volatility(&[800.0; 12]), 0.0);
    }

    #[test]
    fn test_autocorrelation_periodic_signal() {
        let values: Vec<f64> = oscillating_values().iter().map(|&v| v as f64).collect();
        let ac = autocorrelation(&values, 5);
        assert!((ac - 1.0).abs() < 1e-9, "lag-5 autocorr was {ac}");
    }

    #[test]
    fn test_autocorrelation_insufficient_samples() {
        let values = vec![800.0, 810.0, 805.0];
        assert_eq!(autocorrelation(&values, 4), 0.0);
    }

    #[test]
    fn test_autocorrelation_zero_variance() {
        assert_eq!(autocorrelation(&[800.0; 12], 4), 0.0);
    }

    #[test]
    fn test_entrainment_bounded() {
        let extractor = FeatureExtractor::default();
        let metrics = extractor.extract(&buffer_from(&oscillating_values()));
        assert!(metrics.entrainment >= 0.0 && metrics.entrainment <= 1.0);
    }

    #[test]
    fn test_entrainment_requires_ten_samples() {
        let extractor = FeatureExtractor::default();
        let metrics = extractor.extract(&buffer_from(&[800, 814, 809, 791, 786]));
        assert_eq!(metrics.entrainment, 0.0);
        assert_eq!(metrics.entrainment_label, "low");
    }

    #[test]
    fn test_oscillation_scenario() {
        // Periodic +/-15ms oscillation must register above the "low" band
        // and the breath rate must resolve to the oscillation period.
        let extractor = FeatureExtractor::default();
        let metrics = extractor.extract(&buffer_from(&oscillating_values()));

        assert!(metrics.entrainment > 0.2, "entrainment {}", metrics.entrainment);
        let breath = metrics.breath_rate.expect("breath rate should resolve");
        // 5-sample period at ~800ms mean = 4s cycle = 15 breaths/min
        assert!((breath - 15.0).abs() < 1.0, "breath {breath}");
        assert!(metrics.breath_steady);
    }

    #[test]
    fn test_breath_rate_out_of_range_discarded() {
        // 2-sample alternation at ~815ms mean = 1.63s cycle = ~37 breaths/min,
        // above the plausible range.
        let values = vec![800, 830, 800, 830, 800, 830, 800, 830, 800, 830];
        let (rate, steady) = breath_rate(
            &values.iter().map(|&v| v as f64).collect::<Vec<_>>(),
            815.0,
        );
        assert!(rate.is_none());
        assert!(!steady);
    }

    #[test]
    fn test_breath_fallback_never_steady() {
        // Monotone ramp then drop: one interior peak only, forcing the
        // zero-crossing fallback.
        let values: Vec<f64> = vec![760.0, 770.0, 780.0, 790.0, 800.0, 810.0, 820.0, 750.0];
        let (rate, steady) = breath_rate(&values, 785.0);
        assert!(!steady);
        // Rate may or may not fall in range; only the steadiness contract holds.
        if let Some(r) = rate {
            assert!(r >= BREATH_RATE_RANGE.0 && r <= BREATH_RATE_RANGE.1);
        }
    }

    #[test]
    fn test_legacy_mode_banding() {
        let (low_mode, low_score) = legacy_mode(0.0, false, 0, 1.0);
        assert_eq!(low_mode, Mode::Scattered);
        assert!(low_score < 0.2);

        let (high_mode, high_score) = legacy_mode(1.0, true, 200, 0.0);
        assert_eq!(high_mode, Mode::Deep);
        assert!((high_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_legacy_score_clamped() {
        let (_, score) = legacy_mode(1.0, true, 5000, 0.0);
        assert!(score <= 1.0);
    }

    #[test]
    fn test_expected_period_recenters_lags() {
        let config = ExtractorConfig::with_expected_period(6);
        assert_eq!(config.entrainment_lags, vec![5, 6, 7]);
        // Small periods floor at lag 2
        let config = ExtractorConfig::with_expected_period(1);
        assert_eq!(config.entrainment_lags, vec![2, 3, 4]);
    }

    #[test]
    fn test_invalid_lag_config_rejected() {
        let config = ExtractorConfig {
            entrainment_lags: vec![1],
        };
        assert!(FeatureExtractor::new(config).is_err());
        let config = ExtractorConfig {
            entrainment_lags: vec![],
        };
        assert!(FeatureExtractor::new(config).is_err());
    }

    #[test]
    fn test_empty_buffer_is_neutral() {
        let extractor = FeatureExtractor::default();
        let metrics = extractor.extract(&IntervalBuffer::default());
        assert_eq!(metrics.amplitude, 0);
        assert_eq!(metrics.volatility, 0.0);
        assert_eq!(metrics.entrainment, 0.0);
        assert!(metrics.breath_rate.is_none());
    }
}
