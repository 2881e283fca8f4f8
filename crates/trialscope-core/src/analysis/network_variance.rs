//! Network variance (chi-square of standardized trials) and Stouffer Z.

use log::debug;
use serde::{Deserialize, Serialize};

use super::Significance;
use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::math;
use crate::trial::{NullModel, Trial};

/// Chi-square aggregate of the squared trial z-scores over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkVarianceResult {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub trial_count: usize,
    /// Sum of squared z-scores.
    pub network_variance: f64,
    pub degrees_of_freedom: usize,
    /// `network_variance - degrees_of_freedom`.
    pub excess: f64,
    /// Upper-tail chi-square probability.
    pub p_value: f64,
    pub mean_z: f64,
    pub stouffer_z: f64,
    /// 95% acceptance interval of the network variance under the null.
    pub acceptance_lower: f64,
    pub acceptance_upper: f64,
    pub significance: Significance,
}

impl NetworkVarianceResult {
    pub fn within_acceptance(&self) -> bool {
        self.network_variance >= self.acceptance_lower
            && self.network_variance <= self.acceptance_upper
    }
}

/// Stouffer combination of the window's z-scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreResult {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub trial_count: usize,
    pub z_score: f64,
    pub p_two_tailed: f64,
    pub p_one_tailed: f64,
    pub observed_mean: f64,
    pub cumulative_deviation: f64,
    pub significance: Significance,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkVarianceAnalyzer {
    null: NullModel,
}

impl NetworkVarianceAnalyzer {
    pub fn new(null: NullModel) -> Self {
        Self { null }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(NullModel::new(settings.trial_bits))
    }

    pub fn analyze(&self, trials: &[Trial]) -> Result<NetworkVarianceResult> {
        let (first, last) = bounds(trials, "network variance")?;
        let n = trials.len();
        let mut sum_sq = 0.0;
        let mut sum_z = 0.0;
        for trial in trials {
            let z = self.null.z(trial.value as f64);
            sum_sq += z * z;
            sum_z += z;
        }
        let df = n as f64;
        let p_value = math::chi_square_sf(sum_sq, df);
        let result = NetworkVarianceResult {
            window_start_ms: first,
            window_end_ms: last,
            trial_count: n,
            network_variance: sum_sq,
            degrees_of_freedom: n,
            excess: sum_sq - df,
            p_value,
            mean_z: sum_z / df,
            stouffer_z: sum_z / df.sqrt(),
            acceptance_lower: math::chi_square_inverse(0.025, df),
            acceptance_upper: math::chi_square_inverse(0.975, df),
            significance: Significance::from_p(p_value),
        };
        debug!(
            "network variance: n={n} netvar={:.2} p={:.4} ({})",
            result.network_variance, result.p_value, result.significance
        );
        Ok(result)
    }

    pub fn z_score(&self, trials: &[Trial]) -> Result<ZScoreResult> {
        let (first, last) = bounds(trials, "z-score")?;
        let n = trials.len() as f64;
        let sum: f64 = trials.iter().map(|t| t.value as f64).sum();
        let cumulative_deviation = sum - n * self.null.expected_mean();
        let sum_z: f64 = trials.iter().map(|t| self.null.z(t.value as f64)).sum();
        let z_score = sum_z / n.sqrt();
        let p_two_tailed = math::normal_two_tailed(z_score);
        Ok(ZScoreResult {
            window_start_ms: first,
            window_end_ms: last,
            trial_count: trials.len(),
            z_score,
            p_two_tailed,
            p_one_tailed: math::normal_upper_tail(z_score),
            observed_mean: sum / n,
            cumulative_deviation,
            significance: Significance::from_p(p_two_tailed),
        })
    }
}

fn bounds(trials: &[Trial], analysis: &'static str) -> Result<(u64, u64)> {
    match (trials.first(), trials.last()) {
        (Some(first), Some(last)) => Ok((first.timestamp_ms, last.timestamp_ms)),
        _ => Err(EngineError::insufficient(analysis, 1, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{lcg_trials, trial};

    fn analyzer() -> NetworkVarianceAnalyzer {
        NetworkVarianceAnalyzer::new(NullModel::new(200))
    }

    #[test]
    fn test_single_extreme_trial() {
        let result = analyzer().analyze(&[trial(200, 0, 0)]).unwrap();
        // ((200 - 100) / sqrt(50))^2
        assert!((result.network_variance - 200.0).abs() < 1e-9);
        assert_eq!(result.degrees_of_freedom, 1);
        assert_eq!(result.significance, Significance::HighlySignificant);
    }

    #[test]
    fn test_unbiased_window_is_not_significant() {
        let trials = lcg_trials(1000, 6);
        let result = analyzer().analyze(&trials).unwrap();
        assert!((result.network_variance - 974.96).abs() < 1e-6);
        assert!((900.0..=1100.0).contains(&result.network_variance));
        assert!(result.within_acceptance());
        assert_eq!(result.significance, Significance::None);
        assert!((result.excess - (974.96 - 1000.0)).abs() < 1e-6);
    }

    #[test]
    fn test_empty_window_is_insufficient() {
        assert!(matches!(
            analyzer().analyze(&[]),
            Err(EngineError::InsufficientData { needed: 1, got: 0, .. })
        ));
        assert!(analyzer().z_score(&[]).is_err());
    }

    #[test]
    fn test_z_score_of_shifted_window() {
        let trials: Vec<Trial> = (0..100).map(|i| trial(105, i * 1000, i)).collect();
        let result = analyzer().z_score(&trials).unwrap();
        // each trial is +5 / sqrt(50); Stouffer over 100 trials
        let expected = 100.0 * (5.0 / 50f64.sqrt()) / 10.0;
        assert!((result.z_score - expected).abs() < 1e-9);
        assert_eq!(result.cumulative_deviation, 500.0);
        assert_eq!(result.observed_mean, 105.0);
        assert_eq!(result.significance, Significance::HighlySignificant);
        assert!(result.p_one_tailed < result.p_two_tailed);
    }
}
