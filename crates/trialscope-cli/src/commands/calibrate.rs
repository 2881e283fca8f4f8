//! `trialscope calibrate` — standard or extended source calibration.

use std::sync::Arc;
use std::time::Duration;

use trialscope_core::session::format_iso8601;
use trialscope_core::{
    CalibrationHandle, CalibrationOrchestrator, CalibrationResult, EngineError,
    ExtendedCalibrationResult, ExtendedOptions, Settings, SystemProbe,
};

use super::{fail, make_source, open_session, parse_duration, write_json};

pub struct CalibrateCommandConfig<'a> {
    pub source: &'a str,
    pub extended: bool,
    pub duration: Option<&'a str>,
    pub interval: Option<&'a str>,
    pub session: Option<&'a str>,
    pub output: Option<&'a str>,
}

pub fn run(settings: Settings, cmd: CalibrateCommandConfig<'_>) {
    let source = make_source(cmd.source);
    let mut orchestrator = CalibrationOrchestrator::new(settings, source);
    if let Some(session) = cmd.session {
        orchestrator = orchestrator.with_store(Arc::new(open_session(session)));
    }

    if cmd.extended {
        let mut options = ExtendedOptions::from_settings(orchestrator.settings());
        if let Some(d) = cmd.duration {
            options.duration = parse_duration(d).unwrap_or_else(|e| fail(e));
        }
        if let Some(iv) = cmd.interval {
            options.sample_interval = parse_duration(iv).unwrap_or_else(|e| fail(e));
        }
        println!(
            "Extended calibration of {}: {}s, {} trials every {}s (Ctrl+C stops early)\n",
            cmd.source,
            options.duration.as_secs(),
            options.trials_per_interval,
            options.sample_interval.as_secs()
        );
        let orchestrator = orchestrator.with_probe(Arc::new(SystemProbe));
        let handle = orchestrator
            .spawn_extended(options)
            .unwrap_or_else(|e| fail(e));
        match wait(handle) {
            Ok(result) => {
                print_extended(&result);
                if let Some(path) = cmd.output {
                    write_json(path, &result);
                }
            }
            Err(e) => fail(e),
        }
    } else {
        println!(
            "Standard calibration of {}: {} trials of {} bits (Ctrl+C cancels)\n",
            cmd.source,
            orchestrator.settings().calibration.trials,
            orchestrator.settings().trial_bits
        );
        let handle = orchestrator.spawn_standard().unwrap_or_else(|e| fail(e));
        match wait(handle) {
            Ok(result) => {
                print_standard(&result);
                if let Some(path) = cmd.output {
                    write_json(path, &result);
                }
            }
            Err(EngineError::Cancelled) => {
                println!("Calibration cancelled.");
                std::process::exit(130);
            }
            Err(e) => fail(e),
        }
    }
}

/// Poll progress until the run finishes; Ctrl+C requests cancellation.
fn wait<T>(handle: CalibrationHandle<T>) -> Result<T, EngineError> {
    let token = handle.cancellation_token();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        log::warn!("cannot install Ctrl+C handler: {e}");
    }
    while !handle.is_finished() {
        let p = handle.progress();
        print!("\r  {:<12} {:>5.1}%", p.phase, p.percent);
        let _ = std::io::Write::flush(&mut std::io::stdout());
        std::thread::sleep(Duration::from_millis(250));
    }
    println!("\r  {:<12} {:>5.1}%\n", "done", 100.0);
    handle.join()
}

fn next_run(ms: u64) -> String {
    format_iso8601(Duration::from_millis(ms))
}

fn print_recommendations(recommendations: &[String]) {
    println!("\n  Recommendations:");
    for rec in recommendations {
        println!("    - {rec}");
    }
}

fn print_standard(result: &CalibrationResult) {
    println!("Calibration {}", result.id);
    println!(
        "  Battery:   {:.1}/100 ({}/{} tests passed, {} bits)",
        result.suite.overall_score, result.suite.passed, result.suite.total, result.suite.bit_count
    );
    let stats = &result.baseline.statistics;
    println!(
        "  Baseline:  {:.0}/100 (mean z {:+.2}, variance ratio {:.3})",
        result.baseline.quality_score, stats.mean_z, stats.variance_ratio
    );
    println!(
        "  Health:    {:.1}/100 — {}",
        result.health_score,
        result.quality.label()
    );
    println!("  Next run:  {}", next_run(result.next_calibration_ms));
    print_recommendations(&result.recommendations);
}

fn print_extended(result: &ExtendedCalibrationResult) {
    println!(
        "Extended calibration {}{}",
        result.id,
        if result.cancelled { " (stopped early)" } else { "" }
    );
    println!(
        "  Intervals: {} ({} trials)",
        result.interval_scores.len(),
        result.trial_count
    );
    println!(
        "  Drift:     {:+.6}/h (p = {:.4}, {} change point(s))",
        result.drift.slope_per_hour,
        result.drift.p_value,
        result.drift.change_points.len()
    );
    println!(
        "  Periodicity: F = {:.2}, confidence {:.2}{}",
        result.periodicity.f_statistic,
        result.periodicity.confidence,
        if result.periodicity.significant { " (significant)" } else { "" }
    );
    for env in &result.environment {
        println!(
            "  Environment: {} r = {:+.3} over {} intervals",
            env.signal, env.correlation, env.samples
        );
    }
    if result.degradation.degrading {
        println!(
            "  Degrading: battery score {:+.2}/h (p = {:.4})",
            result.degradation.score_slope_per_hour, result.degradation.score_p_value
        );
    }
    println!(
        "  Health:    {:.1}/100 — {}",
        result.health_score,
        result.quality.label()
    );
    println!("  Next run:  {}", next_run(result.next_calibration_ms));
    print_recommendations(&result.recommendations);
}
