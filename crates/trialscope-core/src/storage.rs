//! Trial and report persistence.
//!
//! The engine reads trials and writes reports through the [`TrialStore`] and
//! [`ReportStore`] traits so any backend can be plugged in. [`MemoryStore`]
//! is the in-process implementation; [`crate::session::SessionStore`] writes
//! to a session directory on disk.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use trialscope_tests::SuiteResult;

use crate::analysis::{
    CumulativeResult, EffectSizeResult, NetworkVarianceResult, TrendResult, ZScoreResult,
};
use crate::baseline::BaselineResult;
use crate::calibration::{CalibrationResult, ExtendedCalibrationResult, HealthCheckResult};
use crate::error::{EngineError, Result};
use crate::quality::QualityReport;
use crate::trial::Trial;

/// Read access to recorded trials.
pub trait TrialStore: Send + Sync {
    /// Trials with `start_ms <= timestamp_ms <= end_ms`, in timestamp order.
    fn trials_in_range(&self, start_ms: u64, end_ms: u64) -> Result<Vec<Trial>>;

    fn trials_for_session(&self, session_id: &str) -> Result<Vec<Trial>>;
}

/// Sink for analysis, quality and calibration reports.
pub trait ReportStore: Send + Sync {
    fn persist(&self, report: &Report) -> Result<()>;

    fn reports(&self) -> Result<Vec<Report>>;
}

/// A backend that serves trials and accepts reports.
pub trait Store: TrialStore + ReportStore {}

impl<T: TrialStore + ReportStore> Store for T {}

/// Every record the engine persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    NetworkVariance(NetworkVarianceResult),
    ZScore(ZScoreResult),
    EffectSize(EffectSizeResult),
    Cumulative(CumulativeResult),
    Trend(TrendResult),
    Randomness(SuiteResult),
    Quality(QualityReport),
    Baseline(BaselineResult),
    Calibration(CalibrationResult),
    ExtendedCalibration(ExtendedCalibrationResult),
    HealthCheck(HealthCheckResult),
}

impl Report {
    pub fn kind(&self) -> &'static str {
        match self {
            Report::NetworkVariance(_) => "network_variance",
            Report::ZScore(_) => "z_score",
            Report::EffectSize(_) => "effect_size",
            Report::Cumulative(_) => "cumulative",
            Report::Trend(_) => "trend",
            Report::Randomness(_) => "randomness",
            Report::Quality(_) => "quality",
            Report::Baseline(_) => "baseline",
            Report::Calibration(_) => "calibration",
            Report::ExtendedCalibration(_) => "extended_calibration",
            Report::HealthCheck(_) => "health_check",
        }
    }
}

/// In-memory store. Trials are kept sorted by timestamp.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trials: RwLock<Vec<Trial>>,
    reports: RwLock<Vec<Report>>,
}

fn poisoned<T>(_: T) -> EngineError {
    EngineError::Storage("lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, trial: Trial) -> Result<()> {
        self.extend(std::iter::once(trial))
    }

    pub fn extend(&self, trials: impl IntoIterator<Item = Trial>) -> Result<()> {
        let mut stored = self.trials.write().map_err(poisoned)?;
        let before = stored.len();
        stored.extend(trials);
        if !stored[before.saturating_sub(1)..].is_sorted_by_key(|t| t.timestamp_ms) {
            stored.sort_by_key(|t| t.timestamp_ms);
        }
        Ok(())
    }

    pub fn trial_count(&self) -> Result<usize> {
        Ok(self.trials.read().map_err(poisoned)?.len())
    }
}

impl TrialStore for MemoryStore {
    fn trials_in_range(&self, start_ms: u64, end_ms: u64) -> Result<Vec<Trial>> {
        let trials = self.trials.read().map_err(poisoned)?;
        let from = trials.partition_point(|t| t.timestamp_ms < start_ms);
        let to = trials.partition_point(|t| t.timestamp_ms <= end_ms);
        Ok(trials.get(from..to).map(<[Trial]>::to_vec).unwrap_or_default())
    }

    fn trials_for_session(&self, session_id: &str) -> Result<Vec<Trial>> {
        let trials = self.trials.read().map_err(poisoned)?;
        Ok(trials
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }
}

impl ReportStore for MemoryStore {
    fn persist(&self, report: &Report) -> Result<()> {
        self.reports.write().map_err(poisoned)?.push(report.clone());
        Ok(())
    }

    fn reports(&self) -> Result<Vec<Report>> {
        Ok(self.reports.read().map_err(poisoned)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{START_MS, lcg_trials, trial};

    #[test]
    fn test_range_is_inclusive() {
        let store = MemoryStore::new();
        store.extend(lcg_trials(10, 1)).unwrap();
        let window = store
            .trials_in_range(START_MS + 2000, START_MS + 5000)
            .unwrap();
        let seqs: Vec<u64> = window.iter().map(|t| t.sequence_number).collect();
        assert_eq!(seqs, vec![2, 3, 4, 5]);
        assert!(store.trials_in_range(0, START_MS - 1).unwrap().is_empty());
        assert!(store.trials_in_range(START_MS + 9000, START_MS).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_appends_are_sorted() {
        let store = MemoryStore::new();
        store.append(trial(100, 3000, 3)).unwrap();
        store.append(trial(101, 1000, 1)).unwrap();
        store.extend(vec![trial(102, 2000, 2)]).unwrap();
        let all = store.trials_in_range(0, u64::MAX).unwrap();
        let timestamps: Vec<u64> = all.iter().map(|t| t.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000]);
        assert_eq!(store.trials_for_session("test").unwrap().len(), 3);
        assert!(store.trials_for_session("other").unwrap().is_empty());
    }

    #[test]
    fn test_reports_are_tagged_by_kind() {
        let store = MemoryStore::new();
        let report = Report::Quality(crate::quality::AnomalyDetector::new(
            Default::default(),
            Default::default(),
        )
        .assess(&[]));
        store.persist(&report).unwrap();
        assert_eq!(store.reports().unwrap(), vec![report.clone()]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "quality");
        assert_eq!(report.kind(), "quality");
        let back: Report = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
