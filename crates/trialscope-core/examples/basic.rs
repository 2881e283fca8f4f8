//! Basic analysis example.
//!
//! Generates trials from a seeded source, runs the aggregate analyses and
//! the quality scan, and prints a summary.
//!
//! Run: `cargo run --example basic`

use std::sync::Arc;

use trialscope_core::{
    AnomalyDetector, EffectSizeCalculator, EngineConfig, ExcursionDetector,
    NetworkVarianceAnalyzer, SeededSource, TrendDetector, TrialGenerator,
};

fn main() {
    let settings = EngineConfig::default()
        .validate()
        .expect("default configuration is valid");

    // 1000 trials of 200 bits, reproducible from seed 7
    let source = Arc::new(SeededSource::new(7));
    let mut generator = TrialGenerator::new(source, settings.trial_bits, "basic-example");
    let batch = generator.generate(1_000).expect("seeded source never fails");
    println!("Trials generated: {}", batch.trials.len());

    let netvar = NetworkVarianceAnalyzer::from_settings(&settings)
        .analyze(&batch.trials)
        .expect("non-empty window");
    println!(
        "Network variance: {:.1} (df {}, p = {:.4}, {})",
        netvar.network_variance,
        netvar.degrees_of_freedom,
        netvar.p_value,
        netvar.significance.label()
    );

    let effect = EffectSizeCalculator::from_settings(&settings)
        .calculate(&batch.trials)
        .expect("non-empty window");
    println!(
        "Cohen's d: {:+.4} [{:+.4}, {:+.4}]",
        effect.cohens_d, effect.ci_lower, effect.ci_upper
    );

    let cumulative = ExcursionDetector::from_settings(&settings).analyze(&batch.trials);
    println!(
        "Cumulative deviation: {:+.0} (max |z| {:.2}, {} excursions)",
        cumulative.final_cumulative_deviation,
        cumulative.max_abs_z,
        cumulative.excursions.len()
    );

    let trend = TrendDetector::from_settings(&settings).analyze(&batch.trials);
    println!(
        "Trend: {:?} over {} windows (p = {:.4})",
        trend.direction, trend.window_count, trend.p_value
    );

    let quality = AnomalyDetector::from_settings(&settings).assess(&batch.trials);
    println!(
        "\nQuality: {:.0}/100 ({}), {} anomalies",
        quality.score,
        quality.status,
        quality.anomalies.len()
    );
    for rec in &quality.recommendations {
        println!("  - {rec}");
    }
}
