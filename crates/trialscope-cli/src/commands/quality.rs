//! `trialscope quality` — anomaly scan and quality score over a session.

use trialscope_core::{AnomalyDetector, EventLog, QualityController, Settings};

use super::{fail, open_session, write_json};

pub fn run(settings: &Settings, session: &str, minutes: Option<u64>, output: Option<&str>) {
    let store = open_session(session);
    let (Some(first), Some(last)) = (store.trials().first(), store.trials().last()) else {
        fail(format!("session {session} has no trials"));
    };

    // The window ends at the last recorded trial, not at the wall clock.
    let end_ms = last.timestamp_ms;
    let window_ms = match minutes {
        Some(m) => m.saturating_mul(60_000),
        None => end_ms - first.timestamp_ms,
    };

    let events = EventLog::default();
    let controller =
        QualityController::new(AnomalyDetector::from_settings(settings), events.clone());
    let report = controller
        .assess_recent(&store, end_ms, window_ms)
        .unwrap_or_else(|e| fail(e));

    println!(
        "Quality of {} ({} trials)",
        store.dir().display(),
        report.trial_count
    );
    println!("  Score:  {:.0}/100", report.score);
    println!("  Status: {}", report.status);
    println!();
    println!(
        "  {:<16} {:>10} {:>10} {:>10}  status",
        "metric", "value", "deviation", "threshold"
    );
    for m in &report.metrics {
        println!(
            "  {:<16} {:>10.4} {:>10.4} {:>10.4}  {:?}",
            m.name, m.value, m.deviation, m.threshold, m.status
        );
    }

    if !report.anomalies.is_empty() {
        println!("\n  Anomalies:");
        for a in &report.anomalies {
            println!(
                "    [{:?}] {:?} trials {}..{}: {}",
                a.severity, a.kind, a.start_index, a.end_index, a.description
            );
        }
    }

    println!("\n  Recommendations:");
    for rec in &report.recommendations {
        println!("    - {rec}");
    }

    let alerts = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e.event, trialscope_core::EngineEvent::QualityAlert { .. }))
        .count();
    if alerts > 0 {
        println!("\n  {alerts} alert(s) at high severity or above");
    }
    println!("\nReport appended to reports.jsonl");

    if let Some(path) = output {
        write_json(path, &report);
    }
}
