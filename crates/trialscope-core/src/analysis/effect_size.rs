//! Standardized effect sizes of a window's mean deviation.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::math;
use crate::trial::{NullModel, Trial};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectMagnitude {
    pub fn from_d(d: f64) -> Self {
        let d = d.abs();
        if d < 0.2 {
            EffectMagnitude::Negligible
        } else if d < 0.5 {
            EffectMagnitude::Small
        } else if d < 0.8 {
            EffectMagnitude::Medium
        } else {
            EffectMagnitude::Large
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSizeResult {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub trial_count: usize,
    pub observed_mean: f64,
    pub cohens_d: f64,
    pub hedges_g: f64,
    pub point_biserial: f64,
    pub confidence_level: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub magnitude: EffectMagnitude,
    /// |d| of at least 0.2.
    pub practically_significant: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EffectSizeCalculator {
    null: NullModel,
    confidence_level: f64,
}

impl EffectSizeCalculator {
    pub fn new(null: NullModel, confidence_level: f64) -> Self {
        Self {
            null,
            confidence_level,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(NullModel::new(settings.trial_bits), settings.confidence_level)
    }

    pub fn calculate(&self, trials: &[Trial]) -> Result<EffectSizeResult> {
        let (Some(first), Some(last)) = (trials.first(), trials.last()) else {
            return Err(EngineError::insufficient("effect size", 1, 0));
        };
        let n = trials.len();
        let nf = n as f64;
        let deviations: Vec<f64> = trials
            .iter()
            .map(|t| t.value as f64 - self.null.expected_mean())
            .collect();
        let observed_mean = math::mean(&deviations) + self.null.expected_mean();

        let std = self.null.expected_std();
        let d = if std > 0.0 {
            (observed_mean - self.null.expected_mean()) / std
        } else {
            0.0
        };
        let j = if n < 2 {
            1.0
        } else {
            1.0 - 3.0 / (4.0 * (nf - 1.0) - 1.0)
        };
        let se = if n > 3 {
            ((nf + d * d / 2.0) / (nf * (nf - 3.0))).sqrt()
        } else {
            0.0
        };
        let critical = math::normal_inverse(1.0 - (1.0 - self.confidence_level) / 2.0);

        Ok(EffectSizeResult {
            window_start_ms: first.timestamp_ms,
            window_end_ms: last.timestamp_ms,
            trial_count: n,
            observed_mean,
            cohens_d: d,
            hedges_g: d * j,
            point_biserial: point_biserial(&deviations),
            confidence_level: self.confidence_level,
            ci_lower: d - critical * se,
            ci_upper: d + critical * se,
            magnitude: EffectMagnitude::from_d(d),
            practically_significant: d.abs() >= 0.2,
        })
    }
}

/// Correlation between each deviation and the indicator `deviation > 0`.
fn point_biserial(deviations: &[f64]) -> f64 {
    let (above, below): (Vec<f64>, Vec<f64>) = deviations.iter().partition(|&&d| d > 0.0);
    if above.is_empty() || below.is_empty() {
        return 0.0;
    }
    let n = deviations.len() as f64;
    let mean = math::mean(deviations);
    let std = (deviations.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / n).sqrt();
    if std < math::EPSILON {
        return 0.0;
    }
    let p = above.len() as f64 / n;
    math::finite_or_zero((math::mean(&above) - math::mean(&below)) / std * (p * (1.0 - p)).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::trial;

    fn calculator() -> EffectSizeCalculator {
        EffectSizeCalculator::new(NullModel::new(200), 0.95)
    }

    #[test]
    fn test_cohens_d_and_hedges_correction() {
        // mean 102.5: d = 2.5 / sqrt(50)
        let trials: Vec<Trial> = (0..10)
            .map(|i| trial(if i % 2 == 0 { 100 } else { 105 }, i, i))
            .collect();
        let result = calculator().calculate(&trials).unwrap();
        let d = 2.5 / 50f64.sqrt();
        assert!((result.cohens_d - d).abs() < 1e-12);
        assert!((result.hedges_g - d * (1.0 - 3.0 / 35.0)).abs() < 1e-12);
        assert_eq!(result.magnitude, EffectMagnitude::Small);
        assert!(result.practically_significant);
        assert!(result.ci_lower < d && d < result.ci_upper);
    }

    #[test]
    fn test_point_biserial_two_groups() {
        // deviations alternate 0 and +5: the indicator predicts them perfectly
        let trials: Vec<Trial> = (0..10)
            .map(|i| trial(if i % 2 == 0 { 100 } else { 105 }, i, i))
            .collect();
        let result = calculator().calculate(&trials).unwrap();
        assert!((result.point_biserial - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        let one = calculator().calculate(&[trial(110, 0, 0)]).unwrap();
        assert_eq!(one.hedges_g, one.cohens_d);
        assert_eq!(one.ci_lower, one.cohens_d);
        assert_eq!(one.point_biserial, 0.0);

        let flat: Vec<Trial> = (0..20).map(|i| trial(100, i, i)).collect();
        let result = calculator().calculate(&flat).unwrap();
        assert_eq!(result.cohens_d, 0.0);
        assert_eq!(result.magnitude, EffectMagnitude::Negligible);
        assert!(!result.practically_significant);

        assert!(calculator().calculate(&[]).is_err());
    }

    #[test]
    fn test_magnitude_bands() {
        assert_eq!(EffectMagnitude::from_d(-0.1), EffectMagnitude::Negligible);
        assert_eq!(EffectMagnitude::from_d(0.6), EffectMagnitude::Medium);
        assert_eq!(EffectMagnitude::from_d(-0.8), EffectMagnitude::Large);
    }
}
