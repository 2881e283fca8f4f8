//! Engine configuration.
//!
//! [`EngineConfig`] is the serde-facing form: every field has a default, so a
//! JSON file only needs to name the values it overrides. [`EngineConfig::validate`]
//! turns it into [`Settings`], the immutable validated form every component
//! reads its thresholds from.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use trialscope_tests::SuiteConfig;

use crate::error::{EngineError, Result};

const DAY_MS: u64 = 86_400_000;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Binary draws per trial (N). Trial values lie in `[0, N]`.
    pub trial_bits: u32,
    /// Significance level for the aggregate analyses.
    pub alpha: f64,
    /// Confidence level of the effect-size interval.
    pub confidence_level: f64,
    pub quality: QualityThresholds,
    pub excursion: ExcursionConfig,
    pub trend: TrendConfig,
    pub randomness: RandomnessConfig,
    pub baseline: BaselineConfig,
    pub calibration: CalibrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trial_bits: 200,
            alpha: 0.05,
            confidence_level: 0.95,
            quality: QualityThresholds::default(),
            excursion: ExcursionConfig::default(),
            trend: TrendConfig::default(),
            randomness: RandomnessConfig::default(),
            baseline: BaselineConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

/// Thresholds for the anomaly detector and quality metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Maximum |mean/N - 0.5| per window.
    pub bias: f64,
    /// Maximum |observed variance / expected variance - 1|.
    pub variance: f64,
    /// Maximum |r| at any lag.
    pub autocorrelation: f64,
    /// Minimum binary entropy (bits) of the per-draw success rate.
    pub bit_entropy: f64,
    /// Z-score above which an inter-trial interval is an outlier.
    pub outlier: f64,
    /// Maximum coefficient of variation of inter-trial intervals.
    pub timing_deviation: f64,
    /// Same-side runs longer than this are reported.
    pub pattern_run: usize,
    /// Same-side runs longer than this are reported with high severity.
    pub pattern_run_critical: usize,
    /// A gap longer than this many expected intervals counts as missing data.
    pub missing_gap_factor: f64,
    /// Expected inter-trial interval; the batch median is used when absent.
    pub expected_interval_ms: Option<f64>,
    /// Minimum fraction of expected trials actually present.
    pub completeness: f64,
    /// Trials per bias window.
    pub bias_window: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            bias: 0.05,
            variance: 0.1,
            autocorrelation: 0.1,
            bit_entropy: 0.99,
            outlier: 3.0,
            timing_deviation: 0.1,
            pattern_run: 20,
            pattern_run_critical: 50,
            missing_gap_factor: 10.0,
            expected_interval_ms: None,
            completeness: 0.99,
            bias_window: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcursionConfig {
    /// |Z| that opens an excursion.
    pub threshold: f64,
    /// Minimum excursion length in trials.
    pub min_duration: usize,
}

impl Default for ExcursionConfig {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            min_duration: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Trials per window mean.
    pub window_size: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self { window_size: 100 }
    }
}

/// Parameters of the randomness test battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomnessConfig {
    pub alpha: f64,
    pub block_size: usize,
    pub autocorrelation_threshold: f64,
    /// Stricter lag threshold used by the hardware health check.
    pub hardware_autocorrelation_threshold: f64,
    /// Minimum Shannon entropy in bits per byte.
    pub entropy_threshold: f64,
}

impl Default for RandomnessConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            block_size: 128,
            autocorrelation_threshold: 0.1,
            hardware_autocorrelation_threshold: 0.05,
            entropy_threshold: 7.9,
        }
    }
}

impl RandomnessConfig {
    pub fn suite_config(&self) -> SuiteConfig {
        SuiteConfig {
            alpha: self.alpha,
            block_size: self.block_size,
            autocorrelation_threshold: self.autocorrelation_threshold,
            entropy_threshold: self.entropy_threshold,
        }
    }

    pub fn hardware_suite_config(&self) -> SuiteConfig {
        SuiteConfig {
            autocorrelation_threshold: self.hardware_autocorrelation_threshold,
            ..self.suite_config()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Proportion-mean difference that flags a change point.
    pub drift_threshold: f64,
    /// F-CDF confidence above which periodicity is reported.
    pub periodicity_confidence: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.01,
            periodicity_confidence: 0.5,
        }
    }
}

/// How often calibration should be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Daily,
    #[default]
    Weekly,
    Monthly,
    Quarterly,
}

impl Schedule {
    pub fn period_ms(self) -> u64 {
        match self {
            Schedule::Daily => DAY_MS,
            Schedule::Weekly => 7 * DAY_MS,
            Schedule::Monthly => 30 * DAY_MS,
            Schedule::Quarterly => 90 * DAY_MS,
        }
    }
}

impl std::str::FromStr for Schedule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Schedule::Daily),
            "weekly" => Ok(Schedule::Weekly),
            "monthly" => Ok(Schedule::Monthly),
            "quarterly" => Ok(Schedule::Quarterly),
            other => Err(EngineError::invalid(
                "calibration.schedule",
                format!("unknown schedule '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Trials generated by a standard calibration.
    pub trials: usize,
    /// Trials generated per progress checkpoint.
    pub chunk_size: usize,
    /// Trials sampled by the hardware health check.
    pub health_check_trials: usize,
    /// Trials collected per extended-calibration interval.
    pub trials_per_interval: usize,
    /// Pause between extended-calibration intervals.
    pub sample_interval_ms: u64,
    /// Wall-clock length of an extended calibration.
    pub extended_duration_ms: u64,
    pub schedule: Schedule,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            trials: 100_000,
            chunk_size: 10_000,
            health_check_trials: 1_000,
            trials_per_interval: 1_000,
            sample_interval_ms: 60_000,
            extended_duration_ms: DAY_MS,
            schedule: Schedule::Weekly,
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check every field and freeze the configuration.
    pub fn validate(self) -> Result<Settings> {
        fn probability(field: &'static str, value: f64) -> Result<()> {
            if value > 0.0 && value < 1.0 {
                Ok(())
            } else {
                Err(EngineError::invalid(field, format!("{value} is not in (0, 1)")))
            }
        }
        fn positive(field: &'static str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::invalid(field, format!("{value} must be positive")))
            }
        }
        fn nonzero(field: &'static str, value: usize) -> Result<()> {
            if value > 0 {
                Ok(())
            } else {
                Err(EngineError::invalid(field, "must be at least 1"))
            }
        }

        if self.trial_bits == 0 {
            return Err(EngineError::invalid("trial_bits", "must be at least 1"));
        }
        probability("alpha", self.alpha)?;
        probability("confidence_level", self.confidence_level)?;

        let q = &self.quality;
        probability("quality.bias", q.bias)?;
        positive("quality.variance", q.variance)?;
        probability("quality.autocorrelation", q.autocorrelation)?;
        probability("quality.bit_entropy", q.bit_entropy)?;
        positive("quality.outlier", q.outlier)?;
        positive("quality.timing_deviation", q.timing_deviation)?;
        nonzero("quality.pattern_run", q.pattern_run)?;
        if q.pattern_run_critical < q.pattern_run {
            return Err(EngineError::invalid(
                "quality.pattern_run_critical",
                "must not be below quality.pattern_run",
            ));
        }
        positive("quality.missing_gap_factor", q.missing_gap_factor)?;
        if let Some(interval) = q.expected_interval_ms {
            positive("quality.expected_interval_ms", interval)?;
        }
        probability("quality.completeness", q.completeness)?;
        nonzero("quality.bias_window", q.bias_window)?;

        positive("excursion.threshold", self.excursion.threshold)?;
        nonzero("excursion.min_duration", self.excursion.min_duration)?;
        nonzero("trend.window_size", self.trend.window_size)?;

        let r = &self.randomness;
        probability("randomness.alpha", r.alpha)?;
        nonzero("randomness.block_size", r.block_size)?;
        probability("randomness.autocorrelation_threshold", r.autocorrelation_threshold)?;
        probability(
            "randomness.hardware_autocorrelation_threshold",
            r.hardware_autocorrelation_threshold,
        )?;
        if !(r.entropy_threshold > 0.0 && r.entropy_threshold <= 8.0) {
            return Err(EngineError::invalid(
                "randomness.entropy_threshold",
                format!("{} is not in (0, 8]", r.entropy_threshold),
            ));
        }

        probability("baseline.drift_threshold", self.baseline.drift_threshold)?;
        probability(
            "baseline.periodicity_confidence",
            self.baseline.periodicity_confidence,
        )?;

        let c = &self.calibration;
        nonzero("calibration.trials", c.trials)?;
        nonzero("calibration.chunk_size", c.chunk_size)?;
        nonzero("calibration.health_check_trials", c.health_check_trials)?;
        nonzero("calibration.trials_per_interval", c.trials_per_interval)?;
        if c.extended_duration_ms == 0 {
            return Err(EngineError::invalid(
                "calibration.extended_duration_ms",
                "must be positive",
            ));
        }

        Ok(Settings(Arc::new(self)))
    }
}

/// Validated, immutable configuration. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Settings(Arc<EngineConfig>);

impl Settings {
    pub fn config(&self) -> &EngineConfig {
        &self.0
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings(Arc::new(EngineConfig::default()))
    }
}

impl Deref for Settings {
    type Target = EngineConfig;

    fn deref(&self) -> &EngineConfig {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = EngineConfig::default().validate().unwrap();
        assert_eq!(settings.trial_bits, 200);
        assert_eq!(settings.quality.pattern_run, 20);
        assert_eq!(settings.calibration.trials, 100_000);
        assert_eq!(settings.calibration.schedule, Schedule::Weekly);
        assert_eq!(settings.randomness.suite_config(), SuiteConfig::default());
        assert_eq!(
            settings.randomness.hardware_suite_config().autocorrelation_threshold,
            0.05
        );
    }

    #[test]
    fn test_invalid_field_is_named() {
        let config = EngineConfig {
            alpha: 1.5,
            ..Default::default()
        };
        match config.validate() {
            Err(EngineError::InvalidConfiguration { field, .. }) => assert_eq!(field, "alpha"),
            other => panic!("unexpected {other:?}"),
        }

        let mut config = EngineConfig::default();
        config.quality.pattern_run_critical = 5;
        match config.validate() {
            Err(EngineError::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "quality.pattern_run_critical")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"trial_bits": 100, "quality": {"bias": 0.02}}"#).unwrap();
        assert_eq!(config.trial_bits, 100);
        assert_eq!(config.quality.bias, 0.02);
        assert_eq!(config.quality.outlier, 3.0);
        assert_eq!(config.excursion.min_duration, 100);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("trialscope.json");
        std::fs::write(&path, r#"{"calibration": {"schedule": "daily"}}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.calibration.schedule, Schedule::Daily);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn test_schedule_parsing() {
        assert_eq!("Monthly".parse::<Schedule>().unwrap(), Schedule::Monthly);
        assert!("hourly".parse::<Schedule>().is_err());
        assert_eq!(Schedule::Quarterly.period_ms(), 90 * 86_400_000);
    }
}
