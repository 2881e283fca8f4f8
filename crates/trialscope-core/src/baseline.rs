//! Baseline moments, long-term drift and periodic patterns.
//!
//! A baseline is the fitted distribution of a reference trial window. Long
//! runs are first reduced to per-interval [`BaselineSample`]s, which feed the
//! drift regression and the periodicity ANOVA.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::analysis::TrendDirection;
use crate::config::{BaselineConfig, Settings};
use crate::error::{EngineError, Result};
use crate::math::{self, LinearFit};
use crate::trial::{self, NullModel, Trial};

const MS_PER_HOUR: u64 = 3_600_000;
const MS_PER_DAY: u64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStatistics {
    pub count: usize,
    pub mean: f64,
    /// Sample variance.
    pub variance: f64,
    pub std: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// `mean - N/2`.
    pub mean_deviation: f64,
    /// Standardized mean deviation under the null model.
    pub mean_z: f64,
    /// `variance / (N/4)`.
    pub variance_ratio: f64,
}

impl BaselineStatistics {
    /// Moments of `values`; at least two values are required.
    pub fn from_values(values: &[f64], null: &NullModel, confidence_level: f64) -> Result<Self> {
        let n = values.len();
        if n < 2 {
            return Err(EngineError::insufficient("baseline statistics", 2, n));
        }
        let mean = math::mean(values);
        let variance = math::sample_variance(values);
        let std = variance.sqrt();

        let nf = n as f64;
        let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nf;
        let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / nf;
        let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / nf;
        let (skewness, excess_kurtosis) = if m2 > math::EPSILON {
            (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
        } else {
            (0.0, 0.0)
        };

        let z = math::normal_inverse(0.5 + confidence_level / 2.0);
        let margin = z * std / nf.sqrt();
        let mean_deviation = mean - null.expected_mean();
        let null_se = null.expected_std() / nf.sqrt();
        let expected_var = null.expected_variance();

        Ok(Self {
            count: n,
            mean,
            variance,
            std,
            skewness: math::finite_or_zero(skewness),
            excess_kurtosis: math::finite_or_zero(excess_kurtosis),
            ci_lower: mean - margin,
            ci_upper: mean + margin,
            mean_deviation,
            mean_z: if null_se > 0.0 { mean_deviation / null_se } else { 0.0 },
            variance_ratio: if expected_var > 0.0 { variance / expected_var } else { 0.0 },
        })
    }

    /// 0-100 agreement with the null model: the mean of a mean-deviation
    /// score and a variance-ratio score, each 100, 50 or 0.
    pub fn quality_score(&self) -> f64 {
        let z = self.mean_z.abs();
        let mean_score = if z < 2.0 {
            100.0
        } else if z < 3.0 {
            50.0
        } else {
            0.0
        };
        let ratio = (self.variance_ratio - 1.0).abs();
        let variance_score = if ratio < 0.1 {
            100.0
        } else if ratio < 0.2 {
            50.0
        } else {
            0.0
        };
        (mean_score + variance_score) / 2.0
    }
}

/// Aggregate of one collection interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineSample {
    /// Timestamp of the interval's first trial.
    pub timestamp_ms: u64,
    pub trial_count: usize,
    pub mean: f64,
    pub variance: f64,
}

impl BaselineSample {
    pub fn from_trials(trials: &[Trial]) -> Option<Self> {
        let first = trials.first()?;
        let values = trial::values(trials);
        Some(Self {
            timestamp_ms: first.timestamp_ms,
            trial_count: trials.len(),
            mean: math::mean(&values),
            variance: math::sample_variance(&values),
        })
    }
}

/// Split `trials` into consecutive batches of `interval_size` (the last one
/// may be shorter) and aggregate each.
pub fn aggregate_intervals(trials: &[Trial], interval_size: usize) -> Vec<BaselineSample> {
    trials
        .chunks(interval_size.max(1))
        .filter_map(BaselineSample::from_trials)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftChangePoint {
    /// First sample after the split.
    pub index: usize,
    pub timestamp_ms: u64,
    pub before_mean: f64,
    pub after_mean: f64,
    pub difference: f64,
}

/// Linear drift of the per-sample success proportion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAnalysis {
    pub sample_count: usize,
    /// Change of `mean / N` per hour.
    pub slope_per_hour: f64,
    pub intercept: f64,
    pub p_value: f64,
    pub significant: bool,
    pub direction: TrendDirection,
    pub change_points: Vec<DriftChangePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGranularity {
    HourOfDay,
    DayOfWeek,
}

impl PeriodGranularity {
    /// Hour 0-23 (UTC) or weekday 0-6 with 0 = Sunday.
    pub fn key(self, timestamp_ms: u64) -> u32 {
        match self {
            PeriodGranularity::HourOfDay => ((timestamp_ms / MS_PER_HOUR) % 24) as u32,
            // 1970-01-01 was a Thursday
            PeriodGranularity::DayOfWeek => ((timestamp_ms / MS_PER_DAY + 4) % 7) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodGroup {
    pub key: u32,
    pub count: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicityAnalysis {
    pub granularity: PeriodGranularity,
    pub groups: Vec<PeriodGroup>,
    /// Between-group over within-group mean square.
    pub f_statistic: f64,
    /// F-distribution CDF at `f_statistic`.
    pub confidence: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineChange {
    None,
    Mean,
    Variance,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub mean_difference: f64,
    pub z_score: f64,
    pub p_value: f64,
    /// `|current variance / reference variance - 1|`.
    pub variance_change: f64,
    pub change: BaselineChange,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineResult {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub statistics: BaselineStatistics,
    pub quality_score: f64,
    pub samples: Vec<BaselineSample>,
    pub drift: DriftAnalysis,
    pub periodicity: PeriodicityAnalysis,
}

#[derive(Debug, Clone)]
pub struct BaselineEstimator {
    null: NullModel,
    confidence_level: f64,
    alpha: f64,
    variance_threshold: f64,
    config: BaselineConfig,
}

impl BaselineEstimator {
    pub fn new(
        null: NullModel,
        confidence_level: f64,
        alpha: f64,
        variance_threshold: f64,
        config: BaselineConfig,
    ) -> Self {
        Self {
            null,
            confidence_level,
            alpha,
            variance_threshold,
            config,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            NullModel::new(settings.trial_bits),
            settings.confidence_level,
            settings.alpha,
            settings.quality.variance,
            settings.baseline.clone(),
        )
    }

    pub fn null_model(&self) -> &NullModel {
        &self.null
    }

    pub fn statistics(&self, trials: &[Trial]) -> Result<BaselineStatistics> {
        BaselineStatistics::from_values(&trial::values(trials), &self.null, self.confidence_level)
    }

    fn proportion(&self, mean: f64) -> f64 {
        if self.null.n_bits == 0 {
            return 0.0;
        }
        mean / self.null.n_bits as f64
    }

    pub fn drift(&self, samples: &[BaselineSample]) -> DriftAnalysis {
        let Some(first) = samples.first() else {
            return DriftAnalysis {
                sample_count: 0,
                slope_per_hour: 0.0,
                intercept: 0.0,
                p_value: 1.0,
                significant: false,
                direction: TrendDirection::Stable,
                change_points: Vec::new(),
            };
        };
        let hours: Vec<f64> = samples
            .iter()
            .map(|s| s.timestamp_ms.saturating_sub(first.timestamp_ms) as f64 / MS_PER_HOUR as f64)
            .collect();
        let proportions: Vec<f64> = samples.iter().map(|s| self.proportion(s.mean)).collect();
        let fit = LinearFit::fit(&hours, &proportions);
        let p_value = fit.p_value();
        let significant = p_value < self.alpha;
        let direction = match (significant, fit.slope > 0.0) {
            (false, _) => TrendDirection::Stable,
            (true, true) => TrendDirection::Increasing,
            (true, false) => TrendDirection::Decreasing,
        };

        let mut change_points = Vec::new();
        for split in 1..proportions.len() {
            let before_mean = math::mean(&proportions[..split]);
            let after_mean = math::mean(&proportions[split..]);
            let difference = after_mean - before_mean;
            if difference.abs() > self.config.drift_threshold {
                change_points.push(DriftChangePoint {
                    index: split,
                    timestamp_ms: samples[split].timestamp_ms,
                    before_mean,
                    after_mean,
                    difference,
                });
            }
        }

        debug!(
            "baseline drift: samples={} slope={:.6}/h p={:.4} change_points={}",
            samples.len(),
            fit.slope,
            p_value,
            change_points.len()
        );
        DriftAnalysis {
            sample_count: samples.len(),
            slope_per_hour: fit.slope,
            intercept: fit.intercept,
            p_value,
            significant,
            direction,
            change_points,
        }
    }

    /// One-way ANOVA of sample means grouped by hour of day, or by day of
    /// week once the samples span a week or more.
    pub fn periodicity(&self, samples: &[BaselineSample]) -> PeriodicityAnalysis {
        let span = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => last.timestamp_ms.saturating_sub(first.timestamp_ms),
            _ => 0,
        };
        let granularity = if span < 7 * MS_PER_DAY {
            PeriodGranularity::HourOfDay
        } else {
            PeriodGranularity::DayOfWeek
        };

        let mut buckets: std::collections::BTreeMap<u32, Vec<f64>> = Default::default();
        for sample in samples {
            buckets
                .entry(granularity.key(sample.timestamp_ms))
                .or_default()
                .push(sample.mean);
        }
        let groups: Vec<PeriodGroup> = buckets
            .iter()
            .map(|(&key, means)| PeriodGroup {
                key,
                count: means.len(),
                mean: math::mean(means),
            })
            .collect();

        let n = samples.len();
        let k = groups.len();
        let (f_statistic, confidence) = if k >= 2 && n > k {
            let grand = samples.iter().map(|s| s.mean).sum::<f64>() / n as f64;
            let between: f64 = groups
                .iter()
                .map(|g| g.count as f64 * (g.mean - grand).powi(2))
                .sum();
            let within: f64 = groups
                .iter()
                .zip(buckets.values())
                .map(|(g, means)| means.iter().map(|m| (m - g.mean).powi(2)).sum::<f64>())
                .sum();
            let d1 = (k - 1) as f64;
            let d2 = (n - k) as f64;
            if within <= math::EPSILON {
                // exact repetition inside every slot
                if between > math::EPSILON {
                    (f64::MAX, 1.0)
                } else {
                    (0.0, 0.0)
                }
            } else {
                let f = math::finite_or_zero((between / d1) / (within / d2));
                (f, math::f_cdf(f, d1, d2))
            }
        } else {
            (0.0, 0.0)
        };

        PeriodicityAnalysis {
            granularity,
            groups,
            f_statistic,
            confidence,
            significant: confidence > self.config.periodicity_confidence,
        }
    }

    /// Pooled-variance z-test of the means plus a relative variance check.
    pub fn compare(
        &self,
        reference: &BaselineStatistics,
        current: &BaselineStatistics,
    ) -> BaselineComparison {
        let (n1, n2) = (reference.count as f64, current.count as f64);
        let df = n1 + n2 - 2.0;
        let pooled = if df > 0.0 {
            ((n1 - 1.0) * reference.variance + (n2 - 1.0) * current.variance) / df
        } else {
            0.0
        };
        let se = (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
        let mean_difference = current.mean - reference.mean;
        let z_score = if se > math::EPSILON {
            mean_difference / se
        } else {
            0.0
        };
        let p_value = math::normal_two_tailed(z_score);
        let variance_change = if reference.variance > math::EPSILON {
            (current.variance / reference.variance - 1.0).abs()
        } else {
            0.0
        };

        let mean_changed = p_value < self.alpha;
        let variance_changed = variance_change > self.variance_threshold;
        let (change, recommendation) = match (mean_changed, variance_changed) {
            (false, false) => (BaselineChange::None, "Baseline is stable; no action needed"),
            (true, false) => (
                BaselineChange::Mean,
                "Mean has shifted; recalibrate the source",
            ),
            (false, true) => (
                BaselineChange::Variance,
                "Variance has changed; check the source for interference",
            ),
            (true, true) => (
                BaselineChange::Both,
                "Mean and variance have changed; run a full calibration",
            ),
        };
        BaselineComparison {
            mean_difference,
            z_score,
            p_value,
            variance_change,
            change,
            recommendation: recommendation.to_string(),
        }
    }

    /// Full baseline estimate of a window, aggregated in `interval_size` batches.
    pub fn estimate(&self, trials: &[Trial], interval_size: usize) -> Result<BaselineResult> {
        let statistics = self.statistics(trials)?;
        let samples = aggregate_intervals(trials, interval_size);
        let drift = self.drift(&samples);
        let periodicity = self.periodicity(&samples);
        Ok(BaselineResult {
            window_start_ms: trials.first().map_or(0, |t| t.timestamp_ms),
            window_end_ms: trials.last().map_or(0, |t| t.timestamp_ms),
            quality_score: statistics.quality_score(),
            statistics,
            samples,
            drift,
            periodicity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{START_MS, lcg_trials, trial};

    fn estimator() -> BaselineEstimator {
        BaselineEstimator::new(
            NullModel::new(200),
            0.95,
            0.05,
            0.1,
            BaselineConfig::default(),
        )
    }

    fn sample(timestamp_ms: u64, mean: f64) -> BaselineSample {
        BaselineSample {
            timestamp_ms,
            trial_count: 100,
            mean,
            variance: 50.0,
        }
    }

    #[test]
    fn test_moments() {
        let null = NullModel::new(200);
        let stats =
            BaselineStatistics::from_values(&[96.0, 98.0, 100.0, 102.0, 104.0], &null, 0.95)
                .unwrap();
        assert_eq!(stats.mean, 100.0);
        assert!((stats.variance - 10.0).abs() < 1e-12);
        assert!(stats.skewness.abs() < 1e-12);
        assert!((stats.excess_kurtosis + 1.3).abs() < 1e-12);
        assert!((stats.variance_ratio - 0.2).abs() < 1e-12);
        assert_eq!(stats.mean_deviation, 0.0);
        let margin = 1.959_964 * 10f64.sqrt() / 5f64.sqrt();
        assert!((stats.ci_upper - 100.0 - margin).abs() < 1e-4);
        // variance far below the null
        assert_eq!(stats.quality_score(), 50.0);

        assert!(matches!(
            BaselineStatistics::from_values(&[100.0], &null, 0.95),
            Err(EngineError::InsufficientData { needed: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_linear_drift_and_change_points() {
        let samples: Vec<BaselineSample> = (0..10)
            .map(|i| sample(START_MS + i * MS_PER_HOUR, 100.0 + i as f64))
            .collect();
        let drift = estimator().drift(&samples);
        assert!((drift.slope_per_hour - 0.005).abs() < 1e-12);
        assert!(drift.significant);
        assert_eq!(drift.direction, TrendDirection::Increasing);
        // every split differs by 0.025 in proportion
        assert_eq!(drift.change_points.len(), 9);
        assert!((drift.change_points[0].difference - 0.025).abs() < 1e-12);

        let flat: Vec<BaselineSample> = (0..10)
            .map(|i| sample(START_MS + i * MS_PER_HOUR, 100.0))
            .collect();
        let drift = estimator().drift(&flat);
        assert_eq!(drift.direction, TrendDirection::Stable);
        assert_eq!(drift.p_value, 1.0);
        assert!(drift.change_points.is_empty());
        assert_eq!(estimator().drift(&[]).sample_count, 0);
    }

    #[test]
    fn test_hour_of_day_periodicity() {
        let samples: Vec<BaselineSample> = (0..48u64)
            .map(|i| {
                let hour = i % 24;
                let level = if hour < 12 { 105.0 } else { 95.0 };
                let noise = if i < 24 { 0.5 } else { -0.5 };
                sample(START_MS + i * MS_PER_HOUR, level + noise)
            })
            .collect();
        let result = estimator().periodicity(&samples);
        assert_eq!(result.granularity, PeriodGranularity::HourOfDay);
        assert_eq!(result.groups.len(), 24);
        // MS_between = 1200 / 23, MS_within = 12 / 24
        assert!((result.f_statistic - (1200.0 / 23.0) / 0.5).abs() < 1e-9);
        assert!(result.confidence > 0.99);
        assert!(result.significant);

        let flat: Vec<BaselineSample> = (0..48u64)
            .map(|i| sample(START_MS + i * MS_PER_HOUR, if i < 24 { 100.5 } else { 99.5 }))
            .collect();
        let result = estimator().periodicity(&flat);
        assert_eq!(result.f_statistic, 0.0);
        assert!(!result.significant);
    }

    #[test]
    fn test_exact_daily_cycle_is_periodic() {
        let samples: Vec<BaselineSample> = (0..48u64)
            .map(|i| sample(START_MS + i * MS_PER_HOUR, if i % 24 < 12 { 105.0 } else { 95.0 }))
            .collect();
        let result = estimator().periodicity(&samples);
        assert_eq!(result.f_statistic, f64::MAX);
        assert_eq!(result.confidence, 1.0);
        assert!(result.significant);

        let constant: Vec<BaselineSample> = (0..48u64)
            .map(|i| sample(START_MS + i * MS_PER_HOUR, 100.0))
            .collect();
        let result = estimator().periodicity(&constant);
        assert_eq!(result.f_statistic, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.significant);
    }

    #[test]
    fn test_day_of_week_for_long_spans() {
        let samples: Vec<BaselineSample> = (0..28u64)
            .map(|i| sample(START_MS + i * MS_PER_DAY / 2, 100.0))
            .collect();
        let result = estimator().periodicity(&samples);
        assert_eq!(result.granularity, PeriodGranularity::DayOfWeek);
        assert_eq!(result.groups.len(), 7);
        // 2026-01-01 is a Thursday
        assert_eq!(PeriodGranularity::DayOfWeek.key(START_MS), 4);
        assert_eq!(PeriodGranularity::HourOfDay.key(START_MS + 5 * MS_PER_HOUR), 5);
    }

    #[test]
    fn test_comparison_classification() {
        let est = estimator();
        let reference_trials = lcg_trials(1000, 1);
        let reference = est.statistics(&reference_trials).unwrap();

        let same = est.compare(&reference, &reference);
        assert_eq!(same.change, BaselineChange::None);
        assert_eq!(same.p_value, 1.0);

        let shifted: Vec<Trial> = reference_trials
            .iter()
            .map(|t| trial(t.value + 5, t.timestamp_ms, t.sequence_number))
            .collect();
        let shifted = est.statistics(&shifted).unwrap();
        let comparison = est.compare(&reference, &shifted);
        assert_eq!(comparison.change, BaselineChange::Mean);
        assert!((comparison.mean_difference - 5.0).abs() < 1e-9);

        let spread: Vec<Trial> = reference_trials
            .iter()
            .map(|t| trial(2 * t.value, t.timestamp_ms, t.sequence_number))
            .collect();
        let spread = est.statistics(&spread).unwrap();
        assert_eq!(est.compare(&reference, &spread).change, BaselineChange::Both);
    }

    #[test]
    fn test_estimate_window() {
        let trials = lcg_trials(1000, 3);
        let result = estimator().estimate(&trials, 100).unwrap();
        assert_eq!(result.samples.len(), 10);
        assert_eq!(result.samples[1].timestamp_ms, START_MS + 100_000);
        assert_eq!(result.statistics.count, 1000);
        assert_eq!(result.window_end_ms, START_MS + 999_000);
        assert!(estimator().estimate(&trials[..1], 100).is_err());
        assert_eq!(aggregate_intervals(&trials[..250], 100).len(), 3);
    }
}
