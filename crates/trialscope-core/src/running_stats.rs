//! Incremental aggregate statistics over a trial stream.

use serde::{Deserialize, Serialize};

use crate::trial::{NullModel, Trial};

/// Running aggregate of a trial stream.
///
/// `variance` is the sample variance (n - 1 denominator) maintained with
/// Welford's update, so it matches a two-pass computation at every prefix.
/// The empty aggregate is all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub mean: f64,
    pub variance: f64,
    pub standard_deviation: f64,
    /// Sum of `value - expected_mean` over every trial.
    pub cumulative_deviation: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub last_updated_ms: u64,
}

impl RunningStats {
    /// Aggregate after observing one more trial. O(1).
    pub fn update(&self, trial: &Trial, null: &NullModel) -> RunningStats {
        let mut next = *self;
        next.observe(trial.value as f64, trial.timestamp_ms, null);
        next
    }

    fn observe(&mut self, value: f64, timestamp_ms: u64, null: &NullModel) {
        let n = self.count + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / n as f64;
        // m2 = (n - 1) * sample variance
        let m2_old = self.variance * self.count.saturating_sub(1) as f64;
        let m2 = m2_old + delta * (value - mean);

        self.count = n;
        self.sum += value;
        self.sum_of_squares += value * value;
        self.mean = mean;
        self.variance = if n > 1 { (m2 / (n - 1) as f64).max(0.0) } else { 0.0 };
        self.standard_deviation = self.variance.sqrt();
        self.cumulative_deviation += value - null.expected_mean();
        if n == 1 {
            self.min_value = value;
            self.max_value = value;
        } else {
            self.min_value = self.min_value.min(value);
            self.max_value = self.max_value.max(value);
        }
        self.last_updated_ms = self.last_updated_ms.max(timestamp_ms);
    }

    /// Batch constructor, equivalent to folding [`RunningStats::update`].
    pub fn from_trials(trials: &[Trial], null: &NullModel) -> RunningStats {
        let mut stats = RunningStats::default();
        for trial in trials {
            stats.observe(trial.value as f64, trial.timestamp_ms, null);
        }
        stats
    }

    /// Combine two disjoint aggregates (Chan et al. parallel update).
    pub fn merge(&self, other: &RunningStats) -> RunningStats {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let (na, nb) = (self.count as f64, other.count as f64);
        let n = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * nb / n as f64;
        let m2 = self.variance * (na - 1.0)
            + other.variance * (nb - 1.0)
            + delta * delta * na * nb / n as f64;
        let variance = (m2 / (n - 1) as f64).max(0.0);
        RunningStats {
            count: n,
            sum: self.sum + other.sum,
            sum_of_squares: self.sum_of_squares + other.sum_of_squares,
            mean,
            variance,
            standard_deviation: variance.sqrt(),
            cumulative_deviation: self.cumulative_deviation + other.cumulative_deviation,
            min_value: self.min_value.min(other.min_value),
            max_value: self.max_value.max(other.max_value),
            last_updated_ms: self.last_updated_ms.max(other.last_updated_ms),
        }
    }

    /// Cumulative deviation in units of its null standard deviation.
    pub fn z_score(&self, null: &NullModel) -> f64 {
        let scale = (self.count as f64 * null.expected_variance()).sqrt();
        if scale > 0.0 {
            self.cumulative_deviation / scale
        } else {
            0.0
        }
    }
}

/// Owns the aggregate for one sequential trial stream.
#[derive(Debug, Clone)]
pub struct RunningStatsTracker {
    null: NullModel,
    stats: RunningStats,
}

impl RunningStatsTracker {
    pub fn new(null: NullModel) -> Self {
        Self {
            null,
            stats: RunningStats::default(),
        }
    }

    pub fn update(&mut self, trial: &Trial) -> &RunningStats {
        self.stats = self.stats.update(trial, &self.null);
        &self.stats
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn null_model(&self) -> &NullModel {
        &self.null
    }

    pub fn reset(&mut self) {
        self.stats = RunningStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::lcg_trials;

    fn two_pass(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = if values.len() > 1 {
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        (mean, var)
    }

    #[test]
    fn test_matches_two_pass_at_every_prefix() {
        let trials = lcg_trials(2000, 7);
        let null = NullModel::new(200);
        let mut tracker = RunningStatsTracker::new(null);
        let mut values = Vec::new();
        for trial in &trials {
            values.push(trial.value as f64);
            let stats = *tracker.update(trial);
            let (mean, var) = two_pass(&values);
            assert!((stats.mean - mean).abs() < 1e-9);
            assert!((stats.variance - var).abs() < 1e-9);
        }
        assert_eq!(tracker.stats().count, 2000);
    }

    #[test]
    fn test_empty_and_single() {
        let null = NullModel::new(200);
        assert_eq!(RunningStats::from_trials(&[], &null), RunningStats::default());

        let trial = &lcg_trials(1, 1)[0];
        let stats = RunningStats::default().update(trial, &null);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.variance, 0.0);
        assert_eq!(stats.min_value, trial.value as f64);
        assert_eq!(stats.max_value, trial.value as f64);
        assert_eq!(stats.cumulative_deviation, trial.value as f64 - 100.0);
    }

    #[test]
    fn test_merge_equals_sequential() {
        let trials = lcg_trials(1000, 3);
        let null = NullModel::new(200);
        let left = RunningStats::from_trials(&trials[..377], &null);
        let right = RunningStats::from_trials(&trials[377..], &null);
        let whole = RunningStats::from_trials(&trials, &null);
        let merged = left.merge(&right);
        assert_eq!(merged.count, whole.count);
        assert!((merged.mean - whole.mean).abs() < 1e-9);
        assert!((merged.variance - whole.variance).abs() < 1e-9);
        assert!((merged.cumulative_deviation - whole.cumulative_deviation).abs() < 1e-9);
        assert_eq!(merged.min_value, whole.min_value);
        assert_eq!(merged.max_value, whole.max_value);
        assert_eq!(RunningStats::default().merge(&whole), whole);
    }

    #[test]
    fn test_z_score_and_reset() {
        let null = NullModel::new(200);
        let mut tracker = RunningStatsTracker::new(null);
        let mut trial = lcg_trials(1, 1)[0].clone();
        trial.value = 110;
        for _ in 0..50 {
            tracker.update(&trial);
        }
        // 50 trials at +10 each: 500 / sqrt(50 * 50)
        assert!((tracker.stats().z_score(&null) - 10.0).abs() < 1e-12);
        tracker.reset();
        assert_eq!(*tracker.stats(), RunningStats::default());
        assert_eq!(tracker.stats().z_score(&null), 0.0);
    }
}
