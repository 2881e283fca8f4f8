//! `trialscope record` — record a session of trials.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use trialscope_core::{
    AnomalyDetector, Intention, NetworkVarianceAnalyzer, Report, SessionConfig, SessionWriter,
    Settings, TrialGenerator, TrialMode,
};

use super::{fail, make_source, parse_duration, parse_tags};

pub struct RecordCommandConfig<'a> {
    pub source: &'a str,
    pub duration: Option<&'a str>,
    pub interval: &'a str,
    pub batch: usize,
    pub mode: &'a str,
    pub intention: &'a str,
    pub tags: &'a [String],
    pub note: Option<&'a str>,
    pub output: Option<&'a str>,
    pub analyze: bool,
}

pub fn run(settings: &Settings, cmd: RecordCommandConfig<'_>) {
    let source = make_source(cmd.source);
    let max_duration = cmd.duration.map(|d| parse_duration(d).unwrap_or_else(|e| fail(e)));
    let interval = parse_duration(cmd.interval).unwrap_or_else(|e| fail(e));
    let interval = (!interval.is_zero()).then_some(interval);
    let mode: TrialMode = cmd.mode.parse().unwrap_or_else(|e: String| fail(e));
    let intention: Intention = cmd.intention.parse().unwrap_or_else(|e: String| fail(e));
    let batch = cmd.batch.max(1);

    let config = SessionConfig {
        source: cmd.source.to_string(),
        trial_bits: settings.trial_bits,
        mode,
        intention,
        interval,
        output_dir: cmd.output.map_or_else(|| PathBuf::from("sessions"), PathBuf::from),
        tags: parse_tags(cmd.tags),
        note: cmd.note.map(str::to_string),
        duration: max_duration,
    };

    let mut writer = SessionWriter::new(config)
        .unwrap_or_else(|e| fail(format!("cannot create session: {e}")));
    let mut generator = TrialGenerator::new(source, settings.trial_bits, writer.session_id())
        .with_mode(mode)
        .with_intention(intention);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
        fail(format!("cannot install Ctrl+C handler: {e}"));
    }

    println!("Recording session {}", writer.session_id());
    println!("  Source:    {}", cmd.source);
    println!("  Trial:     {} bits, {batch} per batch", settings.trial_bits);
    println!("  Mode:      {mode} / {intention}");
    match max_duration {
        Some(d) => println!("  Duration:  {}s", d.as_secs()),
        None => println!("  Duration:  until Ctrl+C"),
    }
    match interval {
        Some(iv) => println!("  Interval:  {}ms", iv.as_millis()),
        None => println!("  Interval:  continuous"),
    }
    println!("  Output:    {}", writer.session_dir().display());
    println!();

    let start = Instant::now();
    let mut recorded = Vec::new();
    let mut had_error = false;

    while running.load(Ordering::SeqCst) {
        if let Some(max) = max_duration
            && start.elapsed() >= max
        {
            break;
        }

        match generator.generate(batch) {
            Ok(generated) => {
                for trial in generated.trials {
                    if let Err(e) = writer.write_trial(&trial) {
                        eprintln!("\nError writing trial: {e}");
                        had_error = true;
                        break;
                    }
                    if cmd.analyze {
                        recorded.push(trial);
                    }
                }
            }
            Err(e) => {
                eprintln!("\nError collecting trials: {e}");
                had_error = true;
            }
        }
        if had_error {
            break;
        }

        print!(
            "\r  Trials: {:<8} Elapsed: {:.1}s",
            writer.total_trials(),
            start.elapsed().as_secs_f64()
        );
        let _ = std::io::Write::flush(&mut std::io::stdout());

        if let Some(iv) = interval {
            let deadline = Instant::now() + iv;
            while Instant::now() < deadline && running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    println!("\n");

    if had_error {
        eprintln!("Recording stopped due to an error.");
    }

    if cmd.analyze && !recorded.is_empty() {
        let mut reports = Vec::new();
        match NetworkVarianceAnalyzer::from_settings(settings).analyze(&recorded) {
            Ok(result) => {
                println!(
                    "  Network variance: {:.1} over {} trials (p = {:.4}, {})",
                    result.network_variance,
                    result.trial_count,
                    result.p_value,
                    result.significance.label()
                );
                reports.push(Report::NetworkVariance(result));
            }
            Err(e) => eprintln!("  Network variance skipped: {e}"),
        }
        let quality = AnomalyDetector::from_settings(settings).assess(&recorded);
        println!(
            "  Quality:          {:.0}/100 ({}), {} anomalies",
            quality.score,
            quality.status,
            quality.anomalies.len()
        );
        reports.push(Report::Quality(quality));
        for report in &reports {
            if let Err(e) = writer.write_report(report) {
                eprintln!("Error writing {} report: {e}", report.kind());
            }
        }
        println!();
    }

    match writer.finish() {
        Ok(dir) => {
            println!("Session saved to {}", dir.display());
            println!("  session.json   — metadata");
            println!("  trials.csv     — one row per trial");
            println!("  reports.jsonl  — persisted analysis reports");
        }
        Err(e) => fail(format!("cannot finalize session: {e}")),
    }
}
