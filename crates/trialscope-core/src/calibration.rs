//! Calibration orchestration.
//!
//! [`CalibrationOrchestrator`] sequences trial generation, the randomness
//! battery and the baseline estimator into health verdicts. Three kinds of
//! run are offered:
//!
//! - **standard**: a fixed number of trials through the full battery
//! - **extended**: interval sampling over a wall-clock duration with drift,
//!   periodicity, environment and degradation analysis
//! - **health check**: a small sample through the lightweight battery,
//!   blended with host resource headroom
//!
//! At most one run is active per orchestrator (and its clones). A second
//! request while one is running fails immediately with
//! [`EngineError::ConcurrentCalibration`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use trialscope_tests::{QualityTier, SuiteResult, TestResult, pass_rate, run_lightweight, run_suite};
use uuid::Uuid;

use crate::baseline::{
    BaselineComparison, BaselineEstimator, BaselineResult, BaselineSample, BaselineStatistics,
    DriftAnalysis, PeriodicityAnalysis,
};
use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventLog};
use crate::math::{self, LinearFit};
use crate::source::{TrialGenerator, TrialSource};
use crate::storage::{Report, Store};
use crate::telemetry::{
    EnvironmentProbe, EnvironmentReading, SystemSnapshot, collect_system_snapshot,
};
use crate::trial::{self, TrialMode};

const DAY_MS: u64 = 86_400_000;
const SUITE_WEIGHT: f64 = 0.7;
const BASELINE_WEIGHT: f64 = 0.3;
const PAUSE_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Standard,
    Extended,
    HealthCheck,
}

impl std::fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Extended => write!(f, "extended"),
            Self::HealthCheck => write!(f, "health_check"),
        }
    }
}

/// Progress checkpoint of the current (or last) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub state: CalibrationState,
    pub phase: String,
    /// 0-100.
    pub percent: f64,
}

/// Shared cancellation flag, checked between chunks and intervals.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds the run flag; releases it on drop, including during unwinding.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::ConcurrentCalibration)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Marks the run failed when the calibration body unwinds.
struct PanicRecorder<'a> {
    orchestrator: &'a CalibrationOrchestrator,
    kind: CalibrationKind,
    id: &'a str,
}

impl Drop for PanicRecorder<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.orchestrator
                .record_failure(self.kind, self.id, "calibration thread panicked");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub id: String,
    pub started_ms: u64,
    pub completed_ms: u64,
    pub trial_count: usize,
    pub suite: SuiteResult,
    pub baseline: BaselineResult,
    pub health_score: f64,
    pub quality: QualityTier,
    pub recommendations: Vec<String>,
    pub next_calibration_ms: u64,
}

/// Correlation of one environment signal with the interval success proportion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentCorrelation {
    pub signal: String,
    pub samples: usize,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationIndicators {
    /// First half of the run against the second half.
    pub comparison: Option<BaselineComparison>,
    /// Change of the interval battery score per hour.
    pub score_slope_per_hour: f64,
    pub score_p_value: f64,
    pub degrading: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedCalibrationResult {
    pub id: String,
    pub started_ms: u64,
    pub completed_ms: u64,
    /// Stopped early by cancellation; every field covers the intervals collected.
    pub cancelled: bool,
    pub trial_count: usize,
    pub samples: Vec<BaselineSample>,
    /// Lightweight battery score (0-100) per interval.
    pub interval_scores: Vec<f64>,
    pub statistics: Option<BaselineStatistics>,
    pub drift: DriftAnalysis,
    pub periodicity: PeriodicityAnalysis,
    pub environment: Vec<EnvironmentCorrelation>,
    pub degradation: DegradationIndicators,
    pub health_score: f64,
    pub quality: QualityTier,
    pub recommendations: Vec<String>,
    pub next_calibration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub id: String,
    pub timestamp_ms: u64,
    pub trial_count: usize,
    pub tests: Vec<TestResult>,
    pub test_pass_rate: f64,
    pub system: SystemSnapshot,
    pub system_score: f64,
    /// 0-100.
    pub health_percent: f64,
    pub quality: QualityTier,
    pub recommendations: Vec<String>,
}

/// Common surface of the three result records.
trait Outcome: Clone {
    fn health(&self) -> f64;
    fn into_report(self) -> Report;
}

impl Outcome for CalibrationResult {
    fn health(&self) -> f64 {
        self.health_score
    }
    fn into_report(self) -> Report {
        Report::Calibration(self)
    }
}

impl Outcome for ExtendedCalibrationResult {
    fn health(&self) -> f64 {
        self.health_score
    }
    fn into_report(self) -> Report {
        Report::ExtendedCalibration(self)
    }
}

impl Outcome for HealthCheckResult {
    fn health(&self) -> f64 {
        self.health_percent
    }
    fn into_report(self) -> Report {
        Report::HealthCheck(self)
    }
}

/// Knobs of an extended run; defaults come from [`crate::config::CalibrationConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedOptions {
    pub duration: Duration,
    pub sample_interval: Duration,
    pub trials_per_interval: usize,
    /// Stop after this many intervals even if time remains.
    pub max_intervals: Option<usize>,
}

impl ExtendedOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let c = &settings.calibration;
        Self {
            duration: Duration::from_millis(c.extended_duration_ms),
            sample_interval: Duration::from_millis(c.sample_interval_ms),
            trials_per_interval: c.trials_per_interval,
            max_intervals: None,
        }
    }
}

/// A calibration running on a background thread.
pub struct CalibrationHandle<T> {
    progress: Arc<Mutex<Progress>>,
    cancel: CancellationToken,
    thread: JoinHandle<Result<T>>,
}

impl<T> CalibrationHandle<T> {
    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run. A panic inside the run is resumed on the caller.
    pub fn join(self) -> Result<T> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Sequences sources, the battery and the baseline estimator into
/// calibration runs. Clones share the run flag, progress and event log.
#[derive(Clone)]
pub struct CalibrationOrchestrator {
    settings: Settings,
    source: Arc<dyn TrialSource>,
    store: Option<Arc<dyn Store>>,
    probes: Vec<Arc<dyn EnvironmentProbe>>,
    events: EventLog,
    running: Arc<AtomicBool>,
    progress: Arc<Mutex<Progress>>,
    last_result: Arc<Mutex<Option<Report>>>,
}

impl CalibrationOrchestrator {
    pub fn new(settings: Settings, source: Arc<dyn TrialSource>) -> Self {
        Self {
            settings,
            source,
            store: None,
            probes: Vec::new(),
            events: EventLog::default(),
            running: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(Mutex::new(Progress::default())),
            last_result: Arc::new(Mutex::new(None)),
        }
    }

    /// Persist every result through `store`.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent successful result of any kind.
    pub fn last_result(&self) -> Option<Report> {
        self.last_result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // -- blocking forms ------------------------------------------------------

    pub fn run_standard(&self) -> Result<CalibrationResult> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.tracked(CalibrationKind::Standard, |id| {
            self.standard(id, &CancellationToken::new())
        })
    }

    pub fn run_extended(
        &self,
        options: ExtendedOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtendedCalibrationResult> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.tracked(CalibrationKind::Extended, |id| self.extended(id, options, cancel))
    }

    pub fn run_health_check(&self) -> Result<HealthCheckResult> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.tracked(CalibrationKind::HealthCheck, |id| self.health_check(id))
    }

    // -- background forms ----------------------------------------------------

    pub fn spawn_standard(&self) -> Result<CalibrationHandle<CalibrationResult>> {
        self.spawn(CalibrationKind::Standard, |this, id, cancel| {
            this.standard(id, cancel)
        })
    }

    pub fn spawn_extended(
        &self,
        options: ExtendedOptions,
    ) -> Result<CalibrationHandle<ExtendedCalibrationResult>> {
        self.spawn(CalibrationKind::Extended, move |this, id, cancel| {
            this.extended(id, options, cancel)
        })
    }

    pub fn spawn_health_check(&self) -> Result<CalibrationHandle<HealthCheckResult>> {
        self.spawn(CalibrationKind::HealthCheck, |this, id, _| this.health_check(id))
    }

    fn spawn<T, F>(&self, kind: CalibrationKind, body: F) -> Result<CalibrationHandle<T>>
    where
        T: Outcome + Send + 'static,
        F: FnOnce(&Self, &str, &CancellationToken) -> Result<T> + Send + 'static,
    {
        // taken before spawning so a concurrent request fails synchronously
        let guard = RunGuard::acquire(&self.running)?;
        let this = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name(format!("calibration-{kind}"))
            .spawn(move || {
                let _guard = guard;
                this.tracked(kind, |id| body(&this, id, &token))
            })?;
        Ok(CalibrationHandle {
            progress: Arc::clone(&self.progress),
            cancel,
            thread,
        })
    }

    // -- bookkeeping ---------------------------------------------------------

    fn set_progress(&self, state: CalibrationState, phase: &str, percent: f64) -> Progress {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        *progress = Progress {
            state,
            phase: phase.to_string(),
            percent: percent.clamp(0.0, 100.0),
        };
        progress.clone()
    }

    fn checkpoint(&self, id: &str, phase: &str, percent: f64) {
        let progress = self.set_progress(CalibrationState::Running, phase, percent);
        self.events.push(EngineEvent::CalibrationProgress {
            id: id.to_string(),
            progress,
        });
    }

    fn tracked<T: Outcome>(
        &self,
        kind: CalibrationKind,
        body: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        let id = Uuid::new_v4().to_string();
        info!("{kind} calibration {id} started");
        self.set_progress(CalibrationState::Running, "starting", 0.0);
        self.events.push(EngineEvent::CalibrationStarted {
            id: id.clone(),
            kind: kind.to_string(),
        });

        let _recorder = PanicRecorder {
            orchestrator: self,
            kind,
            id: &id,
        };
        match body(&id) {
            Ok(outcome) => {
                let health_score = outcome.health();
                let report = outcome.clone().into_report();
                if let Some(store) = &self.store
                    && let Err(e) = store.persist(&report)
                {
                    warn!("failed to persist {kind} calibration {id}: {e}");
                }
                *self.last_result.lock().unwrap_or_else(|e| e.into_inner()) = Some(report);
                self.set_progress(CalibrationState::Completed, "complete", 100.0);
                self.events.push(EngineEvent::CalibrationCompleted {
                    id: id.clone(),
                    health_score,
                });
                info!("{kind} calibration {id} completed: health {health_score:.1}");
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(kind, &id, &e.to_string());
                Err(e)
            }
        }
    }

    fn record_failure(&self, kind: CalibrationKind, id: &str, reason: &str) {
        let percent = self.progress().percent;
        self.set_progress(CalibrationState::Failed, "failed", percent);
        self.events.push(EngineEvent::CalibrationFailed {
            id: id.to_string(),
            reason: reason.to_string(),
        });
        warn!("{kind} calibration {id} failed: {reason}");
    }

    fn generator(&self, id: &str) -> TrialGenerator {
        TrialGenerator::new(Arc::clone(&self.source), self.settings.trial_bits, id)
            .with_mode(TrialMode::Calibration)
    }

    // -- runs ----------------------------------------------------------------

    fn standard(&self, id: &str, cancel: &CancellationToken) -> Result<CalibrationResult> {
        let started_ms = crate::now_ms();
        let cfg = &self.settings.calibration;
        let mut generator = self.generator(id);
        let mut trials = Vec::with_capacity(cfg.trials);
        let mut bits = Vec::new();

        while trials.len() < cfg.trials {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let n = cfg.chunk_size.min(cfg.trials - trials.len());
            let batch = generator.generate(n)?;
            trials.extend(batch.trials);
            bits.extend(batch.bits);
            self.checkpoint(id, "generating", 60.0 * trials.len() as f64 / cfg.trials as f64);
        }

        self.events.push(EngineEvent::TestsStarted {
            bit_count: bits.len(),
        });
        let suite = run_suite(&bits, &self.settings.randomness.suite_config());
        self.events.push(EngineEvent::TestsCompleted {
            score: suite.overall_score,
            passed: suite.passed,
            total: suite.total,
        });
        self.checkpoint(id, "testing", 85.0);

        let estimator = BaselineEstimator::from_settings(&self.settings);
        let baseline = estimator.estimate(&trials, cfg.chunk_size)?;
        self.checkpoint(id, "baseline", 95.0);

        let health_score = (SUITE_WEIGHT * suite.overall_score
            + BASELINE_WEIGHT * baseline.quality_score)
            .clamp(0.0, 100.0);
        let quality = QualityTier::from_score(health_score);

        let mut recommendations = vec![quality.recommendation().to_string()];
        recommendations.extend(failed_tests(suite.results()));
        if baseline.statistics.mean_z.abs() >= 2.0 {
            recommendations.push(format!(
                "Trial mean deviates from the null (z = {:.2})",
                baseline.statistics.mean_z
            ));
        }
        if (baseline.statistics.variance_ratio - 1.0).abs() >= 0.1 {
            recommendations.push(format!(
                "Trial variance is {:.2}x the expected variance",
                baseline.statistics.variance_ratio
            ));
        }

        let completed_ms = crate::now_ms();
        Ok(CalibrationResult {
            id: id.to_string(),
            started_ms,
            completed_ms,
            trial_count: trials.len(),
            suite,
            baseline,
            health_score,
            quality,
            recommendations,
            next_calibration_ms: completed_ms + cfg.schedule.period_ms(),
        })
    }

    fn extended(
        &self,
        id: &str,
        options: ExtendedOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtendedCalibrationResult> {
        let started_ms = crate::now_ms();
        let started = Instant::now();
        let suite_config = self.settings.randomness.hardware_suite_config();
        let mut generator = self.generator(id);

        let mut samples = Vec::new();
        let mut interval_scores = Vec::new();
        let mut readings: Vec<Vec<EnvironmentReading>> = Vec::new();
        let mut values = Vec::new();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let batch = generator.generate(options.trials_per_interval)?;
            if let Some(sample) = BaselineSample::from_trials(&batch.trials) {
                samples.push(sample);
                let tests = run_lightweight(&batch.bits, &suite_config);
                interval_scores.push(100.0 * pass_rate(&tests));
                readings.push(self.sample_environment());
                values.extend(trial::values(&batch.trials));
            }

            let elapsed = started.elapsed();
            let by_time = elapsed.as_secs_f64() / options.duration.as_secs_f64().max(f64::EPSILON);
            let by_count = options
                .max_intervals
                .map_or(0.0, |max| samples.len() as f64 / max.max(1) as f64);
            self.checkpoint(id, "sampling", 90.0 * by_time.max(by_count).min(1.0));

            let done = elapsed >= options.duration
                || options.max_intervals.is_some_and(|max| samples.len() >= max);
            if done {
                break;
            }
            let remaining = options.duration.saturating_sub(elapsed);
            pause(options.sample_interval.min(remaining), cancel);
        }
        if cancelled {
            info!("extended calibration {id} cancelled after {} intervals", samples.len());
        }

        self.checkpoint(id, "analyzing", 92.0);
        let estimator = BaselineEstimator::from_settings(&self.settings);
        let statistics = BaselineStatistics::from_values(
            &values,
            estimator.null_model(),
            self.settings.confidence_level,
        )
        .ok();
        let drift = estimator.drift(&samples);
        let periodicity = estimator.periodicity(&samples);
        let environment = self.environment_correlations(&samples, &readings);
        let degradation = self.degradation(&estimator, &samples, &values, &interval_scores);

        let mean_score = math::mean(&interval_scores);
        let baseline_quality = statistics.as_ref().map_or(0.0, BaselineStatistics::quality_score);
        let health_score =
            (SUITE_WEIGHT * mean_score + BASELINE_WEIGHT * baseline_quality).clamp(0.0, 100.0);
        let quality = QualityTier::from_score(health_score);

        let mut recommendations = vec![quality.recommendation().to_string()];
        if cancelled {
            recommendations.push(format!(
                "Run was cancelled after {} intervals; results are partial",
                samples.len()
            ));
        }
        if drift.significant {
            recommendations.push(format!(
                "Significant long-term drift ({:+.5} per hour)",
                drift.slope_per_hour
            ));
        }
        if periodicity.significant {
            recommendations.push(format!(
                "Periodic pattern by {:?} (confidence {:.0}%)",
                periodicity.granularity,
                periodicity.confidence * 100.0
            ));
        }
        for correlation in &environment {
            if correlation.correlation.abs() > 0.5 {
                recommendations.push(format!(
                    "Output correlates with {} (r = {:.2})",
                    correlation.signal, correlation.correlation
                ));
            }
        }
        if degradation.degrading {
            recommendations.push("Source shows signs of degradation; recalibrate within a day".to_string());
        }

        let completed_ms = crate::now_ms();
        let next_calibration_ms = completed_ms
            + if degradation.degrading {
                DAY_MS
            } else {
                self.settings.calibration.schedule.period_ms()
            };
        Ok(ExtendedCalibrationResult {
            id: id.to_string(),
            started_ms,
            completed_ms,
            cancelled,
            trial_count: values.len(),
            samples,
            interval_scores,
            statistics,
            drift,
            periodicity,
            environment,
            degradation,
            health_score,
            quality,
            recommendations,
            next_calibration_ms,
        })
    }

    fn health_check(&self, id: &str) -> Result<HealthCheckResult> {
        let n = self.settings.calibration.health_check_trials;
        let mut generator = self.generator(id);
        let batch = generator.generate(n)?;
        self.checkpoint(id, "sampling", 40.0);

        self.events.push(EngineEvent::TestsStarted {
            bit_count: batch.bits.len(),
        });
        let tests = run_lightweight(&batch.bits, &self.settings.randomness.hardware_suite_config());
        let test_pass_rate = pass_rate(&tests);
        self.events.push(EngineEvent::TestsCompleted {
            score: 100.0 * test_pass_rate,
            passed: tests.iter().filter(|t| t.passed).count(),
            total: tests.len(),
        });
        self.checkpoint(id, "system", 80.0);

        let system = collect_system_snapshot();
        let system_score = system.resource_score();
        let health_percent =
            (SUITE_WEIGHT * 100.0 * test_pass_rate + BASELINE_WEIGHT * system_score)
                .clamp(0.0, 100.0);
        let quality = QualityTier::from_score(health_percent);

        let mut recommendations: Vec<String> = failed_tests(tests.iter()).collect();
        recommendations.extend(system.recommendations());
        if recommendations.is_empty() {
            recommendations.push("Hardware is healthy".to_string());
        }

        Ok(HealthCheckResult {
            id: id.to_string(),
            timestamp_ms: crate::now_ms(),
            trial_count: batch.trials.len(),
            tests,
            test_pass_rate,
            system,
            system_score,
            health_percent,
            quality,
            recommendations,
        })
    }

    // -- extended helpers ----------------------------------------------------

    /// Readings from every probe; a failing probe is logged and skipped.
    fn sample_environment(&self) -> Vec<EnvironmentReading> {
        let mut out = Vec::new();
        for probe in &self.probes {
            match probe.sample() {
                Ok(readings) => out.extend(readings),
                Err(e) => warn!("environment probe '{}' failed: {e}", probe.name()),
            }
        }
        out
    }

    fn environment_correlations(
        &self,
        samples: &[BaselineSample],
        readings: &[Vec<EnvironmentReading>],
    ) -> Vec<EnvironmentCorrelation> {
        let n_bits = self.settings.trial_bits as f64;
        let mut signals: Vec<&str> = readings
            .iter()
            .flatten()
            .map(|r| r.name.as_str())
            .collect();
        signals.sort_unstable();
        signals.dedup();

        signals
            .into_iter()
            .filter_map(|signal| {
                let (proportions, observed): (Vec<f64>, Vec<f64>) = samples
                    .iter()
                    .zip(readings)
                    .filter_map(|(sample, interval)| {
                        interval
                            .iter()
                            .find(|r| r.name == signal)
                            .map(|r| (sample.mean / n_bits, r.value))
                    })
                    .unzip();
                (proportions.len() >= 3).then(|| EnvironmentCorrelation {
                    signal: signal.to_string(),
                    samples: proportions.len(),
                    correlation: math::pearson(&proportions, &observed),
                })
            })
            .collect()
    }

    fn degradation(
        &self,
        estimator: &BaselineEstimator,
        samples: &[BaselineSample],
        values: &[f64],
        scores: &[f64],
    ) -> DegradationIndicators {
        let half = samples.len() / 2;
        let split: usize = samples[..half].iter().map(|s| s.trial_count).sum();
        let stats = |part: &[f64]| {
            BaselineStatistics::from_values(
                part,
                estimator.null_model(),
                self.settings.confidence_level,
            )
            .ok()
        };
        let comparison = match (stats(&values[..split]), stats(&values[split..])) {
            (Some(first), Some(second)) if half > 0 => Some(estimator.compare(&first, &second)),
            _ => None,
        };

        let hours: Vec<f64> = samples
            .iter()
            .map(|s| s.timestamp_ms.saturating_sub(samples[0].timestamp_ms) as f64 / 3_600_000.0)
            .collect();
        let fit = LinearFit::fit(&hours, scores);
        let score_p_value = fit.p_value();
        let degrading = comparison
            .as_ref()
            .is_some_and(|c| c.change != crate::baseline::BaselineChange::None)
            || (score_p_value < self.settings.alpha && fit.slope < 0.0);

        DegradationIndicators {
            comparison,
            score_slope_per_hour: fit.slope,
            score_p_value,
            degrading,
        }
    }
}

fn failed_tests<'a>(tests: impl Iterator<Item = &'a TestResult>) -> impl Iterator<Item = String> {
    tests.filter(|t| !t.passed).map(|t| match t.p_value {
        Some(p) => format!("Test '{}' failed (p = {p:.4})", t.name),
        None => format!("Test '{}' failed", t.name),
    })
}

/// Sleep for `duration`, waking early on cancellation.
fn pause(duration: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::source::{SeededSource, SourceInfo, SourceKind};
    use crate::storage::{MemoryStore, ReportStore};
    use std::sync::atomic::AtomicUsize;

    fn settings(trials: usize) -> Settings {
        let mut config = EngineConfig::default();
        config.calibration.trials = trials;
        config.calibration.chunk_size = trials / 4;
        config.calibration.health_check_trials = 500;
        config.validate().unwrap()
    }

    fn orchestrator(trials: usize) -> CalibrationOrchestrator {
        CalibrationOrchestrator::new(settings(trials), Arc::new(SeededSource::new(99)))
    }

    fn quick(max_intervals: usize) -> ExtendedOptions {
        ExtendedOptions {
            duration: Duration::from_secs(3600),
            sample_interval: Duration::ZERO,
            trials_per_interval: 250,
            max_intervals: Some(max_intervals),
        }
    }

    struct Counter(AtomicUsize);

    impl EnvironmentProbe for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn sample(&self) -> Result<Vec<EnvironmentReading>> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![EnvironmentReading {
                name: "tick".into(),
                value: n as f64,
            }])
        }
    }

    struct Broken;

    impl EnvironmentProbe for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn sample(&self) -> Result<Vec<EnvironmentReading>> {
            Err(EngineError::Source("sensor unplugged".into()))
        }
    }

    #[test]
    fn test_standard_run_persists_and_reports() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(2000).with_store(store.clone());
        let result = orch.run_standard().unwrap();

        assert_eq!(result.trial_count, 2000);
        assert_eq!(result.suite.bit_count, 400_000);
        assert_eq!(result.suite.total, 12);
        assert!((0.0..=100.0).contains(&result.health_score));
        assert_eq!(result.quality, QualityTier::from_score(result.health_score));
        assert_eq!(result.baseline.samples.len(), 4);
        assert_eq!(
            result.next_calibration_ms - result.completed_ms,
            7 * DAY_MS
        );

        assert_eq!(store.reports().unwrap().len(), 1);
        assert!(matches!(orch.last_result(), Some(Report::Calibration(_))));
        let progress = orch.progress();
        assert_eq!(progress.state, CalibrationState::Completed);
        assert_eq!(progress.percent, 100.0);

        let events = orch.events().drain();
        assert!(matches!(events.first().map(|e| &e.event), Some(EngineEvent::CalibrationStarted { .. })));
        assert!(matches!(events.last().map(|e| &e.event), Some(EngineEvent::CalibrationCompleted { .. })));
        let progress_events = events
            .iter()
            .filter(|e| matches!(e.event, EngineEvent::CalibrationProgress { .. }))
            .count();
        // four generation chunks, testing and baseline
        assert_eq!(progress_events, 6);
        assert!(!orch.is_running());
    }

    #[test]
    fn test_second_calibration_is_rejected_while_running() {
        let orch = orchestrator(1000);
        let options = ExtendedOptions {
            duration: Duration::from_secs(60),
            sample_interval: Duration::from_millis(20),
            trials_per_interval: 100,
            max_intervals: None,
        };
        let handle = orch.spawn_extended(options).unwrap();
        assert!(orch.is_running());

        let started = Instant::now();
        assert!(matches!(orch.run_standard(), Err(EngineError::ConcurrentCalibration)));
        assert!(matches!(
            orch.clone().spawn_health_check(),
            Err(EngineError::ConcurrentCalibration)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));

        handle.cancel();
        let partial = handle.join().unwrap();
        assert!(partial.cancelled);
        assert_eq!(partial.samples.len(), partial.interval_scores.len());
        assert!(!orch.is_running());
        assert!(orch.run_health_check().is_ok());
    }

    #[test]
    fn test_extended_run_collects_intervals() {
        let orch = orchestrator(1000)
            .with_probe(Arc::new(Counter(AtomicUsize::new(0))))
            .with_probe(Arc::new(Broken));
        let result = orch.run_extended(quick(6), &CancellationToken::new()).unwrap();

        assert!(!result.cancelled);
        assert_eq!(result.samples.len(), 6);
        assert_eq!(result.interval_scores.len(), 6);
        assert_eq!(result.trial_count, 1500);
        assert_eq!(result.statistics.as_ref().map(|s| s.count), Some(1500));
        assert_eq!(result.environment.len(), 1);
        assert_eq!(result.environment[0].signal, "tick");
        assert_eq!(result.environment[0].samples, 6);
        assert!(result.degradation.comparison.is_some());
        assert!((0.0..=100.0).contains(&result.health_score));
        assert!(result.next_calibration_ms > result.completed_ms);
    }

    #[test]
    fn test_cancelled_before_first_interval_is_a_clean_partial_result() {
        let orch = orchestrator(1000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orch.run_extended(quick(5), &cancel).unwrap();
        assert!(result.cancelled);
        assert!(result.samples.is_empty());
        assert!(result.statistics.is_none());
        assert!(result.degradation.comparison.is_none());
        assert_eq!(result.health_score, 0.0);
        assert_eq!(result.quality, QualityTier::Failed);
    }

    #[test]
    fn test_health_check() {
        let orch = orchestrator(1000);
        let handle = orch.spawn_health_check().unwrap();
        let result = handle.join().unwrap();
        assert_eq!(result.trial_count, 500);
        assert_eq!(result.tests.len(), 4);
        assert!((0.0..=100.0).contains(&result.health_percent));
        assert!(!result.recommendations.is_empty());
        assert!(matches!(orch.last_result(), Some(Report::HealthCheck(_))));
    }

    #[test]
    fn test_failed_run_releases_the_flag() {
        struct Dead;
        static INFO: SourceInfo = SourceInfo {
            name: "dead",
            description: "always fails",
            kind: SourceKind::External,
        };
        impl TrialSource for Dead {
            fn info(&self) -> &SourceInfo {
                &INFO
            }
            fn is_available(&self) -> bool {
                false
            }
            fn collect(&self, _: usize) -> Result<Vec<u8>> {
                Err(EngineError::Source("no device".into()))
            }
        }

        let orch = CalibrationOrchestrator::new(settings(1000), Arc::new(Dead));
        assert!(matches!(orch.run_standard(), Err(EngineError::Source(_))));
        assert!(!orch.is_running());
        assert_eq!(orch.progress().state, CalibrationState::Failed);
        let events = orch.events().drain();
        assert!(matches!(
            events.last().map(|e| &e.event),
            Some(EngineEvent::CalibrationFailed { .. })
        ));
        assert!(orch.last_result().is_none());
    }

    #[test]
    fn test_panicking_run_is_recorded_as_failed() {
        struct Exploding;
        static INFO: SourceInfo = SourceInfo {
            name: "exploding",
            description: "panics on collect",
            kind: SourceKind::External,
        };
        impl TrialSource for Exploding {
            fn info(&self) -> &SourceInfo {
                &INFO
            }
            fn is_available(&self) -> bool {
                true
            }
            fn collect(&self, _: usize) -> Result<Vec<u8>> {
                panic!("driver fault");
            }
        }

        let orch = CalibrationOrchestrator::new(settings(1000), Arc::new(Exploding));
        let handle = orch.spawn_standard().unwrap();
        let joined = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.join()));
        assert!(joined.is_err());
        assert!(!orch.is_running());
        assert_eq!(orch.progress().state, CalibrationState::Failed);
        let events = orch.events().drain();
        assert!(matches!(
            events.last().map(|e| &e.event),
            Some(EngineEvent::CalibrationFailed { reason, .. }) if reason.contains("panicked")
        ));
    }
}
