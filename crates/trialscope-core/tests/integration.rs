//! Integration tests for trialscope-core.
//!
//! These tests exercise the full pipeline:
//! source → trials → session directory / store → analyses, quality and
//! calibration → persisted reports and events.

use std::sync::Arc;

use trialscope_core::{
    AnomalyDetector, CalibrationOrchestrator, CalibrationState, EngineConfig, EngineError,
    EngineEvent, EventLog, MemoryStore, NetworkVarianceAnalyzer, NullModel, QualityController,
    Report, ReportStore, SeededSource, SessionConfig, SessionMeta, SessionStore, SessionWriter,
    Settings, Store, TrialGenerator, TrialStore, now_ms,
};

fn small_settings() -> Settings {
    let mut config = EngineConfig::default();
    config.calibration.trials = 2_000;
    config.calibration.chunk_size = 500;
    config.calibration.health_check_trials = 300;
    config.validate().unwrap()
}

#[test]
fn config_round_trips_through_json_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("engine.json");
    std::fs::write(
        &path,
        r#"{ "trial_bits": 100, "calibration": { "schedule": "daily" } }"#,
    )
    .unwrap();

    let settings = EngineConfig::load(&path).unwrap().validate().unwrap();
    assert_eq!(settings.trial_bits, 100);
    assert_eq!(settings.alpha, 0.05);
    assert_eq!(settings.calibration.trials, 100_000);
    assert_eq!(
        settings.calibration.schedule,
        trialscope_core::Schedule::Daily
    );

    std::fs::write(&path, r#"{ "alpha": 0.0 }"#).unwrap();
    let err = EngineConfig::load(&path).unwrap().validate().unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidConfiguration { field: "alpha", .. }
    ));
}

#[test]
fn recorded_session_reopens_as_a_store() {
    let tmp = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        source: "seeded:5".to_string(),
        interval: None,
        output_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let mut writer = SessionWriter::new(config).unwrap();
    let mut generator =
        TrialGenerator::new(Arc::new(SeededSource::new(5)), 200, writer.session_id());
    let batch = generator.generate(400).unwrap();
    for trial in &batch.trials {
        writer.write_trial(trial).unwrap();
    }
    let session_id = writer.session_id().to_string();
    let dir = writer.finish().unwrap();

    for file in ["session.json", "trials.csv", "reports.jsonl"] {
        assert!(dir.join(file).exists(), "{file} missing");
    }
    let meta: SessionMeta =
        serde_json::from_str(&std::fs::read_to_string(dir.join("session.json")).unwrap())
            .unwrap();
    assert_eq!(meta.id, session_id);
    assert_eq!(meta.total_trials, 400);
    assert_eq!(meta.trial_bits, 200);
    assert_eq!(meta.trialscope_version, trialscope_core::VERSION);

    let store = SessionStore::open(&dir).unwrap();
    assert_eq!(store.trials(), &batch.trials[..]);
    assert_eq!(store.trials_for_session(&session_id).unwrap().len(), 400);

    // Quality over the whole session persists into reports.jsonl and emits an event.
    let events = EventLog::default();
    let controller = QualityController::new(
        AnomalyDetector::new(NullModel::new(200), Default::default()),
        events.clone(),
    );
    let report = controller
        .assess_recent(&store, now_ms() + 1_000, 3_600_000)
        .unwrap();
    assert_eq!(report.trial_count, 400);
    assert!((0.0..=100.0).contains(&report.score));

    let reopened = SessionStore::open(&dir).unwrap();
    let reports = reopened.reports().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind(), "quality");
    assert!(
        events
            .drain()
            .iter()
            .any(|e| matches!(e.event, EngineEvent::QualityReport { .. }))
    );
}

#[test]
fn analyses_agree_between_memory_and_session_stores() {
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = SessionWriter::new(SessionConfig {
        source: "seeded:9".to_string(),
        output_dir: tmp.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    let mut generator = TrialGenerator::new(Arc::new(SeededSource::new(9)), 200, "shared");
    let batch = generator.generate_at(250, 1_000_000).unwrap();
    for trial in &batch.trials {
        writer.write_trial(trial).unwrap();
    }
    let dir = writer.finish().unwrap();

    let memory = MemoryStore::new();
    memory.extend(batch.trials.clone()).unwrap();
    let session = SessionStore::open(&dir).unwrap();

    let analyzer = NetworkVarianceAnalyzer::new(NullModel::new(200));
    let stores: [&dyn Store; 2] = [&memory, &session];
    let results: Vec<_> = stores
        .iter()
        .map(|store| {
            let trials = store.trials_in_range(0, u64::MAX).unwrap();
            analyzer.analyze(&trials).unwrap()
        })
        .collect();
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].trial_count, 250);
}

#[test]
fn standard_calibration_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator =
        CalibrationOrchestrator::new(small_settings(), Arc::new(SeededSource::new(3)))
            .with_store(store.clone());

    let handle = orchestrator.spawn_standard().unwrap();
    let result = handle.join().unwrap();

    assert_eq!(result.trial_count, 2_000);
    assert_eq!(result.suite.bit_count, 400_000);
    assert!((0.0..=100.0).contains(&result.health_score));
    assert!(result.next_calibration_ms > result.completed_ms);
    assert!(!orchestrator.is_running());
    assert_eq!(orchestrator.progress().state, CalibrationState::Completed);

    let persisted = store.reports().unwrap();
    assert!(matches!(persisted.as_slice(), [Report::Calibration(r)] if r.id == result.id));
    assert_eq!(orchestrator.last_result(), Some(Report::Calibration(result)));

    let events = orchestrator.events().drain();
    assert!(matches!(
        events.first().map(|e| &e.event),
        Some(EngineEvent::CalibrationStarted { .. })
    ));
    assert!(matches!(
        events.last().map(|e| &e.event),
        Some(EngineEvent::CalibrationCompleted { .. })
    ));
}

#[test]
fn second_calibration_is_rejected_while_one_runs() {
    let mut config = EngineConfig::default();
    config.calibration.trials_per_interval = 10;
    config.calibration.sample_interval_ms = 20;
    config.calibration.extended_duration_ms = 60_000;
    let orchestrator =
        CalibrationOrchestrator::new(config.validate().unwrap(), Arc::new(SeededSource::new(1)));

    let extended = orchestrator
        .spawn_extended(trialscope_core::ExtendedOptions::from_settings(
            orchestrator.settings(),
        ))
        .unwrap();
    assert!(orchestrator.is_running());
    assert!(matches!(
        orchestrator.run_standard(),
        Err(EngineError::ConcurrentCalibration)
    ));
    assert!(matches!(
        orchestrator.spawn_health_check(),
        Err(EngineError::ConcurrentCalibration)
    ));

    extended.cancel();
    let partial = extended.join().unwrap();
    assert!(partial.cancelled);
    assert!(!orchestrator.is_running());

    let health = orchestrator.run_health_check().unwrap();
    assert_eq!(health.trial_count, 1_000);
    assert_eq!(health.tests.len(), 4);
    assert!((0.0..=100.0).contains(&health.health_percent));
}
