//! `trialscope analyze` — aggregate analyses over a recorded session.

use trialscope_core::{
    BaselineEstimator, EffectSizeCalculator, ExcursionDetector, NetworkVarianceAnalyzer,
    NullModel, Report, ReportStore, RunningStats, Settings, TrendDetector,
};

use super::{open_session, write_json};

pub fn run(settings: &Settings, session: &str, save: bool, output: Option<&str>) {
    let store = open_session(session);
    let trials = store.trials();
    if trials.is_empty() {
        super::fail(format!("session {session} has no trials"));
    }

    let null = NullModel::new(settings.trial_bits);
    let stats = RunningStats::from_trials(trials, &null);
    println!("Session {}", store.dir().display());
    if let Some(meta) = store.meta() {
        println!(
            "  Source: {}  Mode: {} / {}  Recorded: {}",
            meta.source, meta.mode, meta.intention, meta.started_at
        );
    }
    println!(
        "  Trials: {}  Mean: {:.3} (expected {:.1})  SD: {:.3} (expected {:.3})",
        stats.count,
        stats.mean,
        null.expected_mean(),
        stats.standard_deviation,
        null.expected_std()
    );
    println!();

    let mut reports = Vec::new();

    let netvar = NetworkVarianceAnalyzer::from_settings(settings);
    match netvar.analyze(trials) {
        Ok(r) => {
            println!(
                "  Network variance   {:>10.2}  df {:<7} p = {:.4}  {}",
                r.network_variance,
                r.degrees_of_freedom,
                r.p_value,
                r.significance.label()
            );
            println!(
                "                     acceptance [{:.1}, {:.1}]",
                r.acceptance_lower, r.acceptance_upper
            );
            reports.push(Report::NetworkVariance(r));
        }
        Err(e) => eprintln!("  Network variance skipped: {e}"),
    }
    match netvar.z_score(trials) {
        Ok(r) => {
            println!(
                "  Stouffer Z         {:>+10.3}  p = {:.4} (two-tailed)  {}",
                r.z_score,
                r.p_two_tailed,
                r.significance.label()
            );
            reports.push(Report::ZScore(r));
        }
        Err(e) => eprintln!("  Z-score skipped: {e}"),
    }
    match EffectSizeCalculator::from_settings(settings).calculate(trials) {
        Ok(r) => {
            println!(
                "  Cohen's d          {:>+10.4}  CI [{:+.4}, {:+.4}]  {:?}",
                r.cohens_d, r.ci_lower, r.ci_upper, r.magnitude
            );
            reports.push(Report::EffectSize(r));
        }
        Err(e) => eprintln!("  Effect size skipped: {e}"),
    }

    let cumulative = ExcursionDetector::from_settings(settings).analyze(trials);
    println!(
        "  Cumulative dev.    {:>+10.1}  max |z| {:.2}  {} excursion(s)",
        cumulative.final_cumulative_deviation,
        cumulative.max_abs_z,
        cumulative.excursions.len()
    );
    for ex in &cumulative.excursions {
        println!(
            "      trials {}..{}  {:?}  peak z {:+.2}  p = {:.4}",
            ex.start_index, ex.end_index, ex.direction, ex.peak_z, ex.p_value
        );
    }
    reports.push(Report::Cumulative(cumulative));

    let trend = TrendDetector::from_settings(settings).analyze(trials);
    println!(
        "  Trend              {:>+10.4}/h  p = {:.4}  {:?}  {} change point(s)",
        trend.slope_per_hour,
        trend.p_value,
        trend.direction,
        trend.change_points.len()
    );
    reports.push(Report::Trend(trend));

    match BaselineEstimator::from_settings(settings).estimate(trials, settings.trend.window_size) {
        Ok(b) => {
            println!(
                "  Baseline quality   {:>10.0}  drift {:+.5}/h  periodicity {}",
                b.quality_score,
                b.drift.slope_per_hour,
                if b.periodicity.significant { "significant" } else { "none" }
            );
            reports.push(Report::Baseline(b));
        }
        Err(e) => eprintln!("  Baseline skipped: {e}"),
    }

    if save {
        let mut saved = 0;
        for report in &reports {
            match store.persist(report) {
                Ok(()) => saved += 1,
                Err(e) => eprintln!("Error saving {} report: {e}", report.kind()),
            }
        }
        println!("\n{saved} report(s) appended to reports.jsonl");
    }

    if let Some(path) = output {
        write_json(path, &reports);
    }
}
