//! Linear trend and change points in windowed mean deviations.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::math::{self, LinearFit};
use crate::trial::{NullModel, Trial};

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Mean deviation from the expected mean over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMean {
    pub start_index: usize,
    /// Mean timestamp of the window's trials.
    pub timestamp_ms: f64,
    pub mean_deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    pub window_index: usize,
    pub trial_index: usize,
    pub timestamp_ms: f64,
    pub cumulative_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub window_size: usize,
    pub window_count: usize,
    /// Change of the mean deviation per hour.
    pub slope_per_hour: f64,
    pub intercept: f64,
    pub slope_se: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub r_squared: f64,
    pub significant: bool,
    pub direction: TrendDirection,
    pub change_points: Vec<ChangePoint>,
    pub windows: Vec<WindowMean>,
}

impl TrendResult {
    fn stable(window_size: usize, windows: Vec<WindowMean>) -> Self {
        Self {
            window_size,
            window_count: windows.len(),
            slope_per_hour: 0.0,
            intercept: 0.0,
            slope_se: 0.0,
            t_statistic: 0.0,
            p_value: 1.0,
            r_squared: 0.0,
            significant: false,
            direction: TrendDirection::Stable,
            change_points: Vec::new(),
            windows,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrendDetector {
    null: NullModel,
    window_size: usize,
    alpha: f64,
}

impl TrendDetector {
    pub fn new(null: NullModel, window_size: usize, alpha: f64) -> Self {
        Self {
            null,
            window_size: window_size.max(1),
            alpha,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            NullModel::new(settings.trial_bits),
            settings.trend.window_size,
            settings.alpha,
        )
    }

    /// Window means with step `max(1, window_size / 4)`.
    pub fn window_means(&self, trials: &[Trial]) -> Vec<WindowMean> {
        let w = self.window_size;
        let step = (w / 4).max(1);
        let mut windows = Vec::new();
        let mut start = 0;
        while start + w <= trials.len() {
            let window = &trials[start..start + w];
            let mean_value = window.iter().map(|t| t.value as f64).sum::<f64>() / w as f64;
            let timestamp_ms =
                window.iter().map(|t| t.timestamp_ms as f64).sum::<f64>() / w as f64;
            windows.push(WindowMean {
                start_index: start,
                timestamp_ms,
                mean_deviation: mean_value - self.null.expected_mean(),
            });
            start += step;
        }
        windows
    }

    pub fn analyze(&self, trials: &[Trial]) -> TrendResult {
        let windows = self.window_means(trials);
        if windows.len() < 3 {
            return TrendResult::stable(self.window_size, windows);
        }
        let origin = windows[0].timestamp_ms;
        let hours: Vec<f64> = windows
            .iter()
            .map(|w| (w.timestamp_ms - origin) / MS_PER_HOUR)
            .collect();
        let means: Vec<f64> = windows.iter().map(|w| w.mean_deviation).collect();
        let fit = LinearFit::fit(&hours, &means);
        let p_value = fit.p_value();
        let significant = p_value < self.alpha;
        let direction = match (significant, fit.slope > 0.0) {
            (false, _) => TrendDirection::Stable,
            (true, true) => TrendDirection::Increasing,
            (true, false) => TrendDirection::Decreasing,
        };
        let change_points = change_points(&windows);
        debug!(
            "trend: windows={} slope={:.5}/h p={:.4} change_points={}",
            windows.len(),
            fit.slope,
            p_value,
            change_points.len()
        );
        TrendResult {
            window_size: self.window_size,
            window_count: windows.len(),
            slope_per_hour: fit.slope,
            intercept: fit.intercept,
            slope_se: fit.slope_se,
            t_statistic: fit.t_statistic(),
            p_value,
            r_squared: fit.r_squared,
            significant,
            direction,
            change_points,
            windows,
        }
    }
}

/// CUSUM over window means; a point is emitted at the most recently updated
/// extremum whenever the running sum leaves the ±2σ band, then the sum resets.
fn change_points(windows: &[WindowMean]) -> Vec<ChangePoint> {
    let means: Vec<f64> = windows.iter().map(|w| w.mean_deviation).collect();
    let overall = math::mean(&means);
    let sigma = math::sample_variance(&means).sqrt();
    if sigma < math::EPSILON {
        return Vec::new();
    }

    let mut points = Vec::new();
    let (mut cum, mut max, mut min) = (0.0f64, 0.0f64, 0.0f64);
    let mut last_extremum = 0usize;
    for (i, mean) in means.iter().enumerate() {
        cum += mean - overall;
        if cum > max {
            max = cum;
            last_extremum = i;
        }
        if cum < min {
            min = cum;
            last_extremum = i;
        }
        if cum.abs() > 2.0 * sigma {
            points.push(ChangePoint {
                window_index: last_extremum,
                trial_index: windows[last_extremum].start_index,
                timestamp_ms: windows[last_extremum].timestamp_ms,
                cumulative_sum: cum,
            });
            cum = 0.0;
            max = 0.0;
            min = 0.0;
        }
    }
    points
}
