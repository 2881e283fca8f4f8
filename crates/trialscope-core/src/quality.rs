//! Anomaly detection and stream quality scoring.
//!
//! [`AnomalyDetector`] scans a bounded batch of recent trials for bias,
//! same-side patterns, autocorrelation, timing outliers, missing data and
//! timing variability, grades six summary metrics and folds both into a
//! 0-100 score. [`QualityController`] wires the detector to a trial store,
//! persists the report and raises alerts on the event log.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{QualityThresholds, Settings};
use crate::error::Result;
use crate::events::{EngineEvent, EventLog};
use crate::math;
use crate::storage::{Report, Store};
use crate::trial::{NullModel, Trial};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn penalty(self) -> f64 {
        match self {
            Severity::Critical => 15.0,
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
        }
    }

    /// Graded by how far `value` exceeds `threshold`: low up to 1.5x,
    /// medium up to 2x, high up to 4x, critical beyond.
    fn from_excess(value: f64, threshold: f64) -> Self {
        if value > 4.0 * threshold {
            Severity::Critical
        } else if value > 2.0 * threshold {
            Severity::High
        } else if value > 1.5 * threshold {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Bias,
    Pattern,
    Correlation,
    Outlier,
    MissingData,
    TimingVariability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub start_index: usize,
    pub end_index: usize,
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    /// Observed value of the offending statistic.
    pub value: f64,
    pub threshold: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl MetricStatus {
    /// Grade a non-negative deviation against its threshold.
    pub fn grade(deviation: f64, threshold: f64) -> Self {
        if deviation <= threshold / 2.0 {
            MetricStatus::Excellent
        } else if deviation <= threshold {
            MetricStatus::Good
        } else if deviation <= 2.0 * threshold {
            MetricStatus::Warning
        } else {
            MetricStatus::Critical
        }
    }

    pub fn penalty(self) -> f64 {
        match self {
            MetricStatus::Excellent => 0.0,
            MetricStatus::Good => 2.0,
            MetricStatus::Warning => 10.0,
            MetricStatus::Critical => 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetric {
    pub name: String,
    /// Raw metric value (e.g. the success proportion for bias).
    pub value: f64,
    /// Distance from the ideal, compared against `threshold`.
    pub deviation: f64,
    pub threshold: f64,
    pub status: MetricStatus,
}

impl QualityMetric {
    fn new(name: &str, value: f64, deviation: f64, threshold: f64) -> Self {
        let deviation = math::finite_or_zero(deviation.abs());
        Self {
            name: name.to_string(),
            value: math::finite_or_zero(value),
            deviation,
            threshold,
            status: MetricStatus::grade(deviation, threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    Pass,
    Warning,
    Fail,
}

impl std::fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Warning => write!(f, "warning"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub trial_count: usize,
    pub score: f64,
    pub status: QualityStatus,
    pub metrics: Vec<QualityMetric>,
    pub anomalies: Vec<AnomalyReport>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    fn no_data() -> Self {
        Self {
            window_start_ms: 0,
            window_end_ms: 0,
            trial_count: 0,
            score: 0.0,
            status: QualityStatus::Fail,
            metrics: Vec::new(),
            anomalies: Vec::new(),
            recommendations: vec!["No data".to_string()],
        }
    }

    pub fn metric(&self, name: &str) -> Option<&QualityMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.anomalies.iter().filter(|a| a.kind == kind).count()
    }
}

/// Batch scanner parameterised by [`QualityThresholds`].
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    null: NullModel,
    thresholds: QualityThresholds,
}

impl AnomalyDetector {
    pub fn new(null: NullModel, thresholds: QualityThresholds) -> Self {
        Self { null, thresholds }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(NullModel::new(settings.trial_bits), settings.quality.clone())
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Scan a batch and score it. An empty batch yields a failed report.
    pub fn assess(&self, trials: &[Trial]) -> QualityReport {
        let (Some(first), Some(last)) = (trials.first(), trials.last()) else {
            return QualityReport::no_data();
        };
        let values: Vec<f64> = trials.iter().map(|t| t.value as f64).collect();
        let intervals: Vec<f64> = trials
            .windows(2)
            .map(|w| w[1].timestamp_ms.saturating_sub(w[0].timestamp_ms) as f64)
            .collect();

        let mut anomalies = Vec::new();
        self.detect_bias(trials, &values, &mut anomalies);
        self.detect_patterns(trials, &mut anomalies);
        self.detect_correlation(trials, &values, &mut anomalies);
        self.detect_outliers(trials, &intervals, &mut anomalies);
        let missed = self.detect_missing(trials, &intervals, &mut anomalies);
        self.detect_timing(trials, &intervals, &mut anomalies);

        let metrics = self.metrics(&values, &intervals, missed);
        let penalty: f64 = metrics.iter().map(|m| m.status.penalty()).sum::<f64>()
            + anomalies.iter().map(|a| a.severity.penalty()).sum::<f64>();
        let score = (100.0 - penalty).clamp(0.0, 100.0);

        let any = |severity| anomalies.iter().any(|a| a.severity == severity);
        let status = if score < 50.0 || any(Severity::Critical) {
            QualityStatus::Fail
        } else if score < 80.0 || any(Severity::High) {
            QualityStatus::Warning
        } else {
            QualityStatus::Pass
        };
        let recommendations = recommendations(&metrics, &anomalies);
        debug!(
            "quality: n={} score={score:.1} status={status} anomalies={}",
            trials.len(),
            anomalies.len()
        );

        QualityReport {
            window_start_ms: first.timestamp_ms,
            window_end_ms: last.timestamp_ms,
            trial_count: trials.len(),
            score,
            status,
            metrics,
            anomalies,
            recommendations,
        }
    }

    fn anomaly(
        trials: &[Trial],
        kind: AnomalyKind,
        severity: Severity,
        (start, end): (usize, usize),
        value: f64,
        threshold: f64,
        description: String,
    ) -> AnomalyReport {
        AnomalyReport {
            kind,
            severity,
            start_index: start,
            end_index: end,
            start_timestamp_ms: trials[start].timestamp_ms,
            end_timestamp_ms: trials[end].timestamp_ms,
            value,
            threshold,
            description,
        }
    }

    fn proportion_bias(&self, mean: f64) -> f64 {
        if self.null.n_bits == 0 {
            return 0.0;
        }
        (mean / self.null.n_bits as f64 - 0.5).abs()
    }

    fn detect_bias(&self, trials: &[Trial], values: &[f64], out: &mut Vec<AnomalyReport>) {
        let n = values.len();
        let window = self.thresholds.bias_window.min(n).max(1);
        let step = (window / 2).max(1);
        let threshold = self.thresholds.bias;
        let mut starts: Vec<usize> = (0..=n - window).step_by(step).collect();
        // tail window ends on the last trial
        if starts.last().is_some_and(|&last| last + window < n) {
            starts.push(n - window);
        }
        for start in starts {
            let end = start + window - 1;
            let bias = self.proportion_bias(math::mean(&values[start..=end]));
            if bias > threshold {
                out.push(Self::anomaly(
                    trials,
                    AnomalyKind::Bias,
                    Severity::from_excess(bias, threshold),
                    (start, end),
                    bias,
                    threshold,
                    format!("Proportion bias {bias:.4} over trials {start}..={end}"),
                ));
            }
        }
    }

    fn detect_patterns(&self, trials: &[Trial], out: &mut Vec<AnomalyReport>) {
        let midpoint = self.null.n_bits as u64;
        let report = |out: &mut Vec<AnomalyReport>, start: usize, len: usize| {
            if len <= self.thresholds.pattern_run {
                return;
            }
            let severity = if len > self.thresholds.pattern_run_critical {
                Severity::High
            } else {
                Severity::Medium
            };
            out.push(Self::anomaly(
                trials,
                AnomalyKind::Pattern,
                severity,
                (start, start + len - 1),
                len as f64,
                self.thresholds.pattern_run as f64,
                format!("{len} consecutive trials on the same side of the mean"),
            ));
        };

        // side: 1 above, -1 below, 0 exactly at N/2 (breaks any run)
        let mut run_start = 0;
        let mut run_len = 0;
        let mut run_side = 0i8;
        for (i, trial) in trials.iter().enumerate() {
            let doubled = 2 * trial.value as u64;
            let side = match doubled.cmp(&midpoint) {
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
            };
            if side != 0 && side == run_side {
                run_len += 1;
                continue;
            }
            report(out, run_start, run_len);
            run_side = side;
            run_start = i;
            run_len = usize::from(side != 0);
        }
        report(out, run_start, run_len);
    }

    fn detect_correlation(&self, trials: &[Trial], values: &[f64], out: &mut Vec<AnomalyReport>) {
        let n = values.len();
        let threshold = self.thresholds.autocorrelation;
        for lag in 1..=(n / 10).min(100) {
            let r = math::autocorrelation(values, lag);
            if r.abs() > threshold {
                out.push(Self::anomaly(
                    trials,
                    AnomalyKind::Correlation,
                    Severity::from_excess(r.abs(), threshold),
                    (0, n - 1),
                    r,
                    threshold,
                    format!("Autocorrelation {r:.3} at lag {lag}"),
                ));
            }
        }
    }

    fn detect_outliers(&self, trials: &[Trial], intervals: &[f64], out: &mut Vec<AnomalyReport>) {
        if intervals.len() < 2 {
            return;
        }
        let mean = math::mean(intervals);
        let std = math::sample_variance(intervals).sqrt();
        if std < math::EPSILON {
            return;
        }
        let threshold = self.thresholds.outlier;
        for (i, interval) in intervals.iter().enumerate() {
            let z = (interval - mean) / std;
            if z.abs() > threshold {
                out.push(Self::anomaly(
                    trials,
                    AnomalyKind::Outlier,
                    Severity::from_excess(z.abs(), threshold).min(Severity::High),
                    (i, i + 1),
                    z,
                    threshold,
                    format!("Inter-trial interval of {interval:.0} ms (z = {z:.1})"),
                ));
            }
        }
    }

    /// Returns the estimated number of missing trials.
    fn detect_missing(
        &self,
        trials: &[Trial],
        intervals: &[f64],
        out: &mut Vec<AnomalyReport>,
    ) -> u64 {
        let positive: Vec<f64> = intervals.iter().copied().filter(|&i| i > 0.0).collect();
        let expected = self
            .thresholds
            .expected_interval_ms
            .unwrap_or_else(|| math::median(&positive));
        let gap_limit = self.thresholds.missing_gap_factor * expected;

        let mut total = 0u64;
        for (i, pair) in trials.windows(2).enumerate() {
            let interval = intervals[i];
            let by_time = if expected > 0.0 && interval > gap_limit {
                ((interval / expected).round() as u64).saturating_sub(1)
            } else {
                0
            };
            let by_sequence = if pair[0].session_id == pair[1].session_id {
                pair[1]
                    .sequence_number
                    .saturating_sub(pair[0].sequence_number)
                    .saturating_sub(1)
            } else {
                0
            };
            let missed = by_time.max(by_sequence);
            if missed == 0 {
                continue;
            }
            total += missed;
            let severity = if missed >= trials.len() as u64 {
                Severity::Critical
            } else if missed > 100 {
                Severity::High
            } else if missed > 1 {
                Severity::Medium
            } else {
                Severity::Low
            };
            out.push(Self::anomaly(
                trials,
                AnomalyKind::MissingData,
                severity,
                (i, i + 1),
                missed as f64,
                self.thresholds.missing_gap_factor,
                format!("About {missed} trials missing after trial {i} ({interval:.0} ms gap)"),
            ));
        }
        total
    }

    fn detect_timing(&self, trials: &[Trial], intervals: &[f64], out: &mut Vec<AnomalyReport>) {
        let cv = coefficient_of_variation(intervals);
        let threshold = self.thresholds.timing_deviation;
        if cv > threshold {
            out.push(Self::anomaly(
                trials,
                AnomalyKind::TimingVariability,
                Severity::from_excess(cv, threshold).min(Severity::High),
                (0, trials.len() - 1),
                cv,
                threshold,
                format!("Inter-trial interval coefficient of variation {cv:.3}"),
            ));
        }
    }

    fn metrics(&self, values: &[f64], intervals: &[f64], missed: u64) -> Vec<QualityMetric> {
        let t = &self.thresholds;
        let mean = math::mean(values);
        let proportion = if self.null.n_bits > 0 {
            mean / self.null.n_bits as f64
        } else {
            0.5
        };
        let expected_var = self.null.expected_variance();
        let variance_ratio = if expected_var > 0.0 {
            math::sample_variance(values) / expected_var
        } else {
            1.0
        };
        let entropy = binary_entropy(proportion);
        let n = values.len() as f64;
        let completeness = n / (n + missed as f64);
        vec![
            QualityMetric::new("bias", proportion, proportion - 0.5, t.bias),
            QualityMetric::new("variance_ratio", variance_ratio, variance_ratio - 1.0, t.variance),
            QualityMetric::new(
                "autocorrelation",
                math::autocorrelation(values, 1),
                math::autocorrelation(values, 1),
                t.autocorrelation,
            ),
            QualityMetric::new("bit_entropy", entropy, 1.0 - entropy, 1.0 - t.bit_entropy),
            QualityMetric::new(
                "timing_cv",
                coefficient_of_variation(intervals),
                coefficient_of_variation(intervals),
                t.timing_deviation,
            ),
            QualityMetric::new(
                "completeness",
                completeness,
                1.0 - completeness,
                1.0 - t.completeness,
            ),
        ]
    }
}

fn coefficient_of_variation(intervals: &[f64]) -> f64 {
    if intervals.len() < 2 {
        return 0.0;
    }
    let mean = math::mean(intervals);
    if mean <= 0.0 {
        return 0.0;
    }
    math::finite_or_zero(math::sample_variance(intervals).sqrt() / mean)
}

/// Shannon entropy (bits) of a Bernoulli(p) draw.
fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -(p * p.log2() + (1.0 - p) * (1.0 - p).log2())
}

fn recommendations(metrics: &[QualityMetric], anomalies: &[AnomalyReport]) -> Vec<String> {
    let mut out = Vec::new();
    let has = |kind| anomalies.iter().any(|a| a.kind == kind);
    if has(AnomalyKind::Bias) {
        out.push("Sustained bias detected: recalibrate the trial source".to_string());
    }
    if has(AnomalyKind::Pattern) || has(AnomalyKind::Correlation) {
        out.push("Sequential structure detected: check the source for periodic interference".to_string());
    }
    if has(AnomalyKind::Outlier) || has(AnomalyKind::TimingVariability) {
        out.push("Irregular trial timing: check system load and the collection loop".to_string());
    }
    if has(AnomalyKind::MissingData) {
        out.push("Trials are missing: check storage and collection continuity".to_string());
    }
    for metric in metrics {
        if metric.status == MetricStatus::Critical {
            out.push(format!("Metric '{}' is critical", metric.name));
        }
    }
    if out.is_empty() {
        out.push("Stream quality is good".to_string());
    }
    out
}

/// Periodic quality assessment over a trial store.
#[derive(Debug, Clone)]
pub struct QualityController {
    detector: AnomalyDetector,
    events: EventLog,
}

impl QualityController {
    pub fn new(detector: AnomalyDetector, events: EventLog) -> Self {
        Self { detector, events }
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Assess the trials of the last `window_ms` before `now_ms`, persist the
    /// report and emit a report event plus one alert per high or critical anomaly.
    pub fn assess_recent(
        &self,
        store: &dyn Store,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<QualityReport> {
        let trials = store.trials_in_range(now_ms.saturating_sub(window_ms), now_ms)?;
        let report = self.detector.assess(&trials);
        if let Err(e) = store.persist(&Report::Quality(report.clone())) {
            warn!("failed to persist quality report: {e}");
        }
        self.events.push(EngineEvent::QualityReport {
            score: report.score,
            status: report.status,
        });
        for anomaly in &report.anomalies {
            if anomaly.severity >= Severity::High {
                self.events.push(EngineEvent::QualityAlert {
                    anomaly: anomaly.clone(),
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, ReportStore, TrialStore};
    use crate::testutil::{START_MS, lcg_trials, trial};

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(NullModel::new(200), QualityThresholds::default())
    }

    #[test]
    fn test_empty_batch_fails_with_no_data() {
        let report = detector().assess(&[]);
        assert_eq!(report.status, QualityStatus::Fail);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.recommendations, vec!["No data".to_string()]);
    }

    #[test]
    fn test_score_decreases_as_anomalies_are_injected() {
        let mut trials = lcg_trials(2000, 1);
        let clean = detector().assess(&trials);
        assert_eq!(clean.score, 100.0, "{:?}", clean.metrics);
        assert_eq!(clean.status, QualityStatus::Pass);
        assert!(clean.anomalies.is_empty());

        // one 5 s gap in a 1 s cadence
        for t in trials.iter_mut().skip(1000) {
            t.timestamp_ms += 4000;
        }
        let with_outlier = detector().assess(&trials);
        assert_eq!(with_outlier.count(AnomalyKind::Outlier), 1);
        assert_eq!(with_outlier.count(AnomalyKind::MissingData), 0);
        assert_eq!(with_outlier.score, 88.0);
        assert_eq!(with_outlier.status, QualityStatus::Warning);

        // 25 trials in a row above the mean
        for t in trials.iter_mut().skip(500).take(25) {
            t.value = if t.value > 100 { t.value } else { (200 - t.value).max(101) };
        }
        let with_pattern = detector().assess(&trials);
        assert_eq!(with_pattern.count(AnomalyKind::Pattern), 1);
        assert_eq!(with_pattern.score, 83.0);

        for t in trials.iter_mut() {
            t.value += 45;
        }
        let with_bias = detector().assess(&trials);
        assert!(with_bias.count(AnomalyKind::Bias) > 0);
        assert!(
            with_bias
                .anomalies
                .iter()
                .any(|a| a.kind == AnomalyKind::Bias && a.severity == Severity::Critical)
        );
        assert!(with_bias.score < with_pattern.score);
        assert_eq!(with_bias.status, QualityStatus::Fail);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_excess(0.12, 0.1), Severity::Low);
        assert_eq!(Severity::from_excess(0.18, 0.1), Severity::Medium);
        assert_eq!(Severity::from_excess(0.3, 0.1), Severity::High);
        assert_eq!(Severity::from_excess(0.5, 0.1), Severity::Critical);
    }

    #[test]
    fn test_critical_anomaly_fails_a_passing_score() {
        let mut trials = lcg_trials(2000, 1);
        for t in trials.iter_mut().skip(1000) {
            t.sequence_number += 5000;
        }
        let report = detector().assess(&trials);
        let missing: Vec<&AnomalyReport> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::MissingData)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].severity, Severity::Critical);
        // 15 for the anomaly, 20 for the completeness metric
        assert_eq!(report.score, 65.0);
        assert_eq!(report.status, QualityStatus::Fail);
    }

    #[test]
    fn test_bias_scan_reaches_the_last_trials() {
        let mut trials = lcg_trials(1200, 1);
        for t in trials.iter_mut().skip(1000) {
            t.value = 200;
        }
        let report = detector().assess(&trials);
        let bias: Vec<&AnomalyReport> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::Bias)
            .collect();
        assert_eq!(bias.len(), 1);
        assert_eq!((bias[0].start_index, bias[0].end_index), (200, 1199));
    }

    #[test]
    fn test_autocorrelated_trials() {
        // square wave: seven trials high, seven low
        let trials: Vec<Trial> = (0..140u64)
            .map(|i| {
                let value = if (i / 7) % 2 == 0 { 110 } else { 90 };
                trial(value, START_MS + i * 1000, i)
            })
            .collect();
        let report = detector().assess(&trials);
        let correlation: Vec<&AnomalyReport> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::Correlation)
            .collect();
        // every lag up to n / 10 exceeds 0.1
        assert_eq!(correlation.len(), 14);
        assert!((correlation[0].value - 101.0 / 139.0).abs() < 1e-9);
        assert_eq!(correlation[0].severity, Severity::Critical);
        assert_eq!(correlation[2].severity, Severity::Medium);
        assert_eq!(correlation[3].severity, Severity::Low);
        assert_eq!(report.count(AnomalyKind::Pattern), 0);
    }

    #[test]
    fn test_irregular_timing() {
        let jittered = |short: u64, long: u64| {
            let mut trials = lcg_trials(200, 1);
            let mut ts = START_MS;
            for (i, t) in trials.iter_mut().enumerate() {
                t.timestamp_ms = ts;
                ts += if i % 2 == 0 { short } else { long };
            }
            detector().assess(&trials)
        };

        let report = jittered(820, 1180);
        let timing: Vec<&AnomalyReport> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::TimingVariability)
            .collect();
        assert_eq!(timing.len(), 1);
        assert!((timing[0].value - 0.1806).abs() < 1e-3);
        assert_eq!(timing[0].severity, Severity::Medium);
        assert_eq!((timing[0].start_index, timing[0].end_index), (0, 199));
        assert_eq!(report.count(AnomalyKind::Outlier), 0);
        assert_eq!(report.count(AnomalyKind::MissingData), 0);
        assert_eq!(report.metric("timing_cv").unwrap().status, MetricStatus::Warning);

        let report = jittered(870, 1130);
        let timing = report
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::TimingVariability)
            .unwrap();
        assert_eq!(timing.severity, Severity::Low);

        let report = jittered(200, 9800);
        let timing = report
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::TimingVariability)
            .unwrap();
        assert_eq!(timing.severity, Severity::High);
    }

    #[test]
    fn test_pattern_runs_break_at_midpoint() {
        let mut values = vec![120u32; 30];
        values[15] = 100;
        let trials: Vec<Trial> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| trial(v, i as u64 * 1000, i as u64))
            .collect();
        let report = detector().assess(&trials);
        assert_eq!(report.count(AnomalyKind::Pattern), 0);

        let long: Vec<Trial> = (0..60).map(|i| trial(80, i * 1000, i)).collect();
        let report = detector().assess(&long);
        let pattern: Vec<&AnomalyReport> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::Pattern)
            .collect();
        assert_eq!(pattern.len(), 1);
        assert_eq!(pattern[0].severity, Severity::High);
        assert_eq!((pattern[0].start_index, pattern[0].end_index), (0, 59));
    }

    #[test]
    fn test_missing_data_from_gap_and_sequence() {
        let mut trials = lcg_trials(200, 2);
        for t in trials.iter_mut().skip(100) {
            t.timestamp_ms += 20_000;
            t.sequence_number += 20;
        }
        let report = detector().assess(&trials);
        let missing: Vec<&AnomalyReport> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::MissingData)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].value, 20.0);
        assert_eq!(missing[0].start_index, 99);
        let completeness = report.metric("completeness").unwrap();
        assert!((completeness.value - 200.0 / 220.0).abs() < 1e-12);
        assert_eq!(completeness.status, MetricStatus::Critical);
    }

    #[test]
    fn test_metric_grading() {
        assert_eq!(MetricStatus::grade(0.02, 0.05), MetricStatus::Excellent);
        assert_eq!(MetricStatus::grade(0.05, 0.05), MetricStatus::Good);
        assert_eq!(MetricStatus::grade(0.09, 0.05), MetricStatus::Warning);
        assert_eq!(MetricStatus::grade(0.11, 0.05), MetricStatus::Critical);
        assert!((binary_entropy(0.5) - 1.0).abs() < 1e-12);
        assert_eq!(binary_entropy(1.0), 0.0);
    }

    #[test]
    fn test_controller_persists_and_alerts() {
        let store = MemoryStore::new();
        let mut trials = lcg_trials(300, 4);
        for t in trials.iter_mut() {
            t.value = 150;
        }
        store.extend(trials).unwrap();
        let events = EventLog::default();
        let controller = QualityController::new(detector(), events.clone());
        let now = START_MS + 299_000;
        let report = controller.assess_recent(&store, now, 600_000).unwrap();
        assert_eq!(report.trial_count, 300);
        assert_eq!(report.status, QualityStatus::Fail);
        assert_eq!(store.reports().unwrap().len(), 1);

        let drained = events.drain();
        assert!(matches!(drained[0].event, EngineEvent::QualityReport { .. }));
        assert!(
            drained[1..]
                .iter()
                .all(|e| matches!(e.event, EngineEvent::QualityAlert { .. }))
        );
        assert!(drained.len() > 1);
        assert_eq!(store.trials_in_range(0, START_MS - 1).unwrap().len(), 0);
    }
}
