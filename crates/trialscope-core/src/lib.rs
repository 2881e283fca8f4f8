//! # trialscope-core
//!
//! **Is the generator still fair?**
//!
//! `trialscope-core` analyzes streams of bounded-sum trials (each trial is
//! the number of ones among N binary draws) against a Binomial(N, 1/2) null
//! model. It detects deviations from the unbiased baseline, flags data-quality
//! problems in the stream itself and periodically re-validates the source
//! against a battery of randomness tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trialscope_core::{
//!     CalibrationOrchestrator, EngineConfig, NetworkVarianceAnalyzer, SeededSource,
//!     TrialGenerator,
//! };
//!
//! let settings = EngineConfig::default().validate().unwrap();
//! let source = Arc::new(SeededSource::new(7));
//!
//! let mut generator = TrialGenerator::new(source.clone(), settings.trial_bits, "demo");
//! let batch = generator.generate(1_000).unwrap();
//! let result = NetworkVarianceAnalyzer::from_settings(&settings)
//!     .analyze(&batch.trials)
//!     .unwrap();
//! println!("netvar {:.1}, p = {:.3}", result.network_variance, result.p_value);
//!
//! let orchestrator = CalibrationOrchestrator::new(settings, source);
//! let health = orchestrator.run_health_check().unwrap();
//! println!("health {:.0}%", health.health_percent);
//! ```
//!
//! ## Architecture
//!
//! Source → Trials → Analyses / Quality / Baseline → Reports → Store + Events
//!
//! - [`analysis`]: network variance, effect size, cumulative excursions, trend.
//! - [`quality`]: windowed anomaly detection and a 0-100 quality score.
//! - [`baseline`]: baseline moments, drift and periodicity.
//! - [`calibration`]: standard, extended and health-check runs, one at a time.
//!
//! Collaborators sit behind traits: [`TrialSource`] produces bytes,
//! [`TrialStore`]/[`ReportStore`] hold trials and persisted [`Report`]s, and
//! [`EnvironmentProbe`] supplies signals during extended calibration.

pub mod analysis;
pub mod baseline;
pub mod calibration;
pub mod config;
pub mod error;
pub mod events;
pub mod math;
pub mod quality;
pub mod running_stats;
pub mod session;
pub mod source;
pub mod storage;
pub mod telemetry;
pub mod trial;

#[cfg(test)]
pub(crate) mod testutil;

pub use analysis::{
    CumulativeResult, EffectMagnitude, EffectSizeCalculator, EffectSizeResult, ExcursionDetector,
    ExcursionPeriod, NetworkVarianceAnalyzer, NetworkVarianceResult, Significance, TrendDetector,
    TrendDirection, TrendResult, ZScoreResult,
};
pub use baseline::{BaselineComparison, BaselineEstimator, BaselineResult, BaselineStatistics};
pub use calibration::{
    CalibrationHandle, CalibrationKind, CalibrationOrchestrator, CalibrationResult,
    CalibrationState, CancellationToken, ExtendedCalibrationResult, ExtendedOptions,
    HealthCheckResult, Progress,
};
pub use config::{EngineConfig, Schedule, Settings};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventLog, TimedEvent};
pub use quality::{
    AnomalyDetector, AnomalyKind, AnomalyReport, QualityController, QualityReport, QualityStatus,
    Severity,
};
pub use running_stats::{RunningStats, RunningStatsTracker};
pub use session::{
    MachineInfo, SessionConfig, SessionMeta, SessionStore, SessionWriter, detect_machine_info,
};
pub use source::{
    OsSource, SeededSource, SourceInfo, SourceKind, TrialBatch, TrialGenerator, TrialSource,
    source_by_name,
};
pub use storage::{MemoryStore, Report, ReportStore, Store, TrialStore};
pub use telemetry::{EnvironmentProbe, EnvironmentReading, SystemProbe, SystemSnapshot};
pub use trial::{Intention, NullModel, Trial, TrialMode};

pub use trialscope_tests::{QualityTier, SuiteResult, TestResult};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
