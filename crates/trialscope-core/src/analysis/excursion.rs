//! Sustained excursions of the cumulative deviation.
//!
//! The cumulative deviation after `i + 1` trials is standardized by its null
//! standard deviation `sqrt(σ²·(i+1))`. An excursion is a maximal stretch
//! where that z-score stays beyond the threshold with a constant sign.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::math;
use crate::trial::{NullModel, Trial};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
}

/// One point of the cumulative deviation series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CumulativePoint {
    pub index: usize,
    pub timestamp_ms: u64,
    pub cumulative_deviation: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcursionPeriod {
    pub start_index: usize,
    pub end_index: usize,
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    /// Signed z-score of largest magnitude inside the excursion.
    pub peak_z: f64,
    /// `end_index - start_index + 1`.
    pub duration: usize,
    pub direction: Direction,
    /// One-tailed p-value of the peak.
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeResult {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub trial_count: usize,
    pub final_cumulative_deviation: f64,
    pub final_z: f64,
    pub max_abs_z: f64,
    pub threshold: f64,
    pub min_duration: usize,
    pub excursions: Vec<ExcursionPeriod>,
}

impl CumulativeResult {
    fn empty(threshold: f64, min_duration: usize) -> Self {
        Self {
            window_start_ms: 0,
            window_end_ms: 0,
            trial_count: 0,
            final_cumulative_deviation: 0.0,
            final_z: 0.0,
            max_abs_z: 0.0,
            threshold,
            min_duration,
            excursions: Vec::new(),
        }
    }
}

/// Cumulative deviation series of a trial window.
pub fn cumulative_series(trials: &[Trial], null: &NullModel) -> Vec<CumulativePoint> {
    let variance = null.expected_variance();
    let mut cumulative = 0.0;
    trials
        .iter()
        .enumerate()
        .map(|(index, trial)| {
            cumulative += trial.value as f64 - null.expected_mean();
            let scale = (variance * (index + 1) as f64).sqrt();
            CumulativePoint {
                index,
                timestamp_ms: trial.timestamp_ms,
                cumulative_deviation: cumulative,
                z_score: if scale > 0.0 { cumulative / scale } else { 0.0 },
            }
        })
        .collect()
}

struct OpenExcursion {
    start: usize,
    direction: Direction,
    peak_z: f64,
}

/// Find every excursion beyond `threshold` lasting at least `min_duration` points.
pub fn detect_excursions(
    series: &[CumulativePoint],
    threshold: f64,
    min_duration: usize,
) -> Vec<ExcursionPeriod> {
    let mut found = Vec::new();
    let mut open: Option<OpenExcursion> = None;

    let close = |found: &mut Vec<ExcursionPeriod>, excursion: OpenExcursion, end: usize| {
        let duration = end - excursion.start + 1;
        if duration >= min_duration {
            found.push(ExcursionPeriod {
                start_index: series[excursion.start].index,
                end_index: series[end].index,
                start_timestamp_ms: series[excursion.start].timestamp_ms,
                end_timestamp_ms: series[end].timestamp_ms,
                peak_z: excursion.peak_z,
                duration,
                direction: excursion.direction,
                p_value: math::normal_upper_tail(excursion.peak_z.abs()),
            });
        }
    };

    for (i, point) in series.iter().enumerate() {
        let z = point.z_score;
        let beyond = z.abs() > threshold;
        let direction = if z > 0.0 {
            Direction::Positive
        } else {
            Direction::Negative
        };

        if let Some(current) = open.as_mut() {
            if beyond && direction == current.direction {
                if z.abs() > current.peak_z.abs() {
                    current.peak_z = z;
                }
                continue;
            }
            if let Some(ended) = open.take() {
                close(&mut found, ended, i - 1);
            }
        }
        // a sign flip may open the next excursion on the same point
        if beyond {
            open = Some(OpenExcursion {
                start: i,
                direction,
                peak_z: z,
            });
        }
    }
    if let Some(ended) = open {
        close(&mut found, ended, series.len() - 1);
    }
    found
}

#[derive(Debug, Clone, Copy)]
pub struct ExcursionDetector {
    null: NullModel,
    threshold: f64,
    min_duration: usize,
}

impl ExcursionDetector {
    pub fn new(null: NullModel, threshold: f64, min_duration: usize) -> Self {
        Self {
            null,
            threshold,
            min_duration,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            NullModel::new(settings.trial_bits),
            settings.excursion.threshold,
            settings.excursion.min_duration,
        )
    }

    /// Analyze a window. An empty window yields the empty result.
    pub fn analyze(&self, trials: &[Trial]) -> CumulativeResult {
        let series = cumulative_series(trials, &self.null);
        let Some(last) = series.last() else {
            return CumulativeResult::empty(self.threshold, self.min_duration);
        };
        let excursions = detect_excursions(&series, self.threshold, self.min_duration);
        debug!(
            "cumulative deviation: n={} final_z={:.3} excursions={}",
            series.len(),
            last.z_score,
            excursions.len()
        );
        CumulativeResult {
            window_start_ms: series[0].timestamp_ms,
            window_end_ms: last.timestamp_ms,
            trial_count: series.len(),
            final_cumulative_deviation: last.cumulative_deviation,
            final_z: last.z_score,
            max_abs_z: series.iter().map(|p| p.z_score.abs()).fold(0.0, f64::max),
            threshold: self.threshold,
            min_duration: self.min_duration,
            excursions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::trial;

    fn series(zs: &[f64]) -> Vec<CumulativePoint> {
        zs.iter()
            .enumerate()
            .map(|(index, &z_score)| CumulativePoint {
                index,
                timestamp_ms: 1000 * index as u64,
                cumulative_deviation: z_score,
                z_score,
            })
            .collect()
    }

    #[test]
    fn test_single_crafted_excursion() {
        let mut zs = vec![0.5; 50];
        zs.extend((0..110).map(|i| 2.5 + (i as f64) / 100.0));
        zs.extend(vec![0.3; 40]);
        let found = detect_excursions(&series(&zs), 2.0, 100);
        assert_eq!(found.len(), 1);
        let excursion = &found[0];
        assert_eq!(excursion.start_index, 50);
        assert_eq!(excursion.end_index, 159);
        assert_eq!(excursion.duration, 110);
        assert_eq!(excursion.start_timestamp_ms, 50_000);
        assert_eq!(excursion.end_timestamp_ms, 159_000);
        assert_eq!(excursion.direction, Direction::Positive);
        assert!((excursion.peak_z - 3.59).abs() < 1e-12);
        assert!((excursion.p_value - math::normal_upper_tail(3.59)).abs() < 1e-15);
    }

    #[test]
    fn test_short_run_is_ignored_and_open_run_is_kept() {
        let mut zs = vec![3.0; 99];
        zs.push(0.0);
        zs.extend(vec![-2.5; 100]);
        let found = detect_excursions(&series(&zs), 2.0, 100);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].direction, Direction::Negative);
        assert_eq!(found[0].start_index, 100);
        assert_eq!(found[0].end_index, 199);
    }

    #[test]
    fn test_sign_flip_starts_new_excursion_on_same_point() {
        let mut zs = vec![2.5; 3];
        zs.extend(vec![-2.5; 3]);
        let found = detect_excursions(&series(&zs), 2.0, 3);
        assert_eq!(found.len(), 2);
        assert_eq!((found[0].start_index, found[0].end_index), (0, 2));
        assert_eq!((found[1].start_index, found[1].end_index), (3, 5));
    }

    #[test]
    fn test_analyze_trials() {
        let detector = ExcursionDetector::new(NullModel::new(200), 2.0, 10);
        let empty = detector.analyze(&[]);
        assert_eq!(empty.trial_count, 0);
        assert!(empty.excursions.is_empty());

        // a persistent +20 shift is beyond 2 sigma from the first trial on
        let trials: Vec<Trial> = (0..30).map(|i| trial(120, i * 1000, i)).collect();
        let result = detector.analyze(&trials);
        assert_eq!(result.excursions.len(), 1);
        assert_eq!(result.excursions[0].duration, 30);
        assert_eq!(result.final_cumulative_deviation, 600.0);
        let expected_final = 600.0 / (50.0f64 * 30.0).sqrt();
        assert!((result.final_z - expected_final).abs() < 1e-12);
        assert!((result.max_abs_z - expected_final).abs() < 1e-12);
    }
}
