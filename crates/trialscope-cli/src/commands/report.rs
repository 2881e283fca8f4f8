//! `trialscope report` — randomness battery on fresh trials from a source.

use std::time::Instant;

use trialscope_core::{Settings, TrialGenerator};

use super::{fail, make_source, write_json};

pub fn run(
    settings: &Settings,
    source_name: &str,
    trials: usize,
    hardware: bool,
    output: Option<&str>,
) {
    if trials == 0 {
        fail("--trials must be at least 1");
    }
    let source = make_source(source_name);
    let config = if hardware {
        settings.randomness.hardware_suite_config()
    } else {
        settings.randomness.suite_config()
    };

    println!(
        "Running the randomness battery on {trials} trials of {} bits from {source_name}...\n",
        settings.trial_bits
    );

    let t0 = Instant::now();
    let mut generator = TrialGenerator::new(source, settings.trial_bits, "report");
    let batch = generator.generate(trials).unwrap_or_else(|e| fail(e));
    let suite = trialscope_tests::run_suite(&batch.bits, &config);
    let elapsed = t0.elapsed().as_secs_f64();

    for battery in &suite.batteries {
        println!(
            "  {} (weight {:.0}%, {:.0}% passed)",
            battery.battery.label(),
            battery.weight * 100.0,
            battery.pass_rate * 100.0
        );
        for test in &battery.tests {
            let p = test
                .p_value
                .map_or_else(|| "     -".to_string(), |p| format!("{p:.4}"));
            println!(
                "    {} {:<24} p = {p}  grade {}  {}",
                if test.passed { "✓" } else { "✗" },
                test.name,
                test.grade,
                test.description
            );
        }
        println!();
    }

    println!(
        "  Overall: {:.1}/100 ({}) — {}/{} tests passed over {} bits [{elapsed:.1}s]",
        suite.overall_score,
        suite.quality.label(),
        suite.passed,
        suite.total,
        suite.bit_count
    );
    println!("  {}", suite.recommendation);

    if let Some(path) = output {
        write_json(path, &suite);
    }
}
