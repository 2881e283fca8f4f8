//! `trialscope health` — quick hardware health check.

use trialscope_core::{CalibrationOrchestrator, Settings};

use super::{fail, make_source, write_json};

pub fn run(settings: Settings, source_name: &str, output: Option<&str>) {
    let orchestrator = CalibrationOrchestrator::new(settings, make_source(source_name));
    let result = orchestrator.run_health_check().unwrap_or_else(|e| fail(e));

    println!("Health check of {source_name} ({} trials)\n", result.trial_count);
    for test in &result.tests {
        let p = test
            .p_value
            .map_or_else(|| "-".to_string(), |p| format!("{p:.4}"));
        println!(
            "  {} {:<20} p = {p}",
            if test.passed { "✓" } else { "✗" },
            test.name
        );
    }

    let system = &result.system;
    println!(
        "\n  System:  {:.0}/100 ({} CPUs, load {}, memory available {})",
        result.system_score,
        system.cpu_count,
        system
            .loadavg_1m
            .map_or_else(|| "n/a".to_string(), |l| format!("{l:.2}")),
        system
            .memory_available_fraction()
            .map_or_else(|| "n/a".to_string(), |m| format!("{:.0}%", m * 100.0))
    );
    println!(
        "  Tests:   {:.0}% passed",
        result.test_pass_rate * 100.0
    );
    println!(
        "  Health:  {:.1}% — {}",
        result.health_percent,
        result.quality.label()
    );

    println!("\n  Recommendations:");
    for rec in &result.recommendations {
        println!("    - {rec}");
    }

    if let Some(path) = output {
        write_json(path, &result);
    }
}
