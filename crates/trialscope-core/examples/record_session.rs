//! Record a short session to disk and read it back.
//!
//! Writes `trials.csv`, `reports.jsonl` and `session.json` under
//! `./sessions`, then reopens the directory as a store.
//!
//! Run: `cargo run --example record_session`

use std::sync::Arc;

use trialscope_core::{
    NetworkVarianceAnalyzer, NullModel, OsSource, Report, ReportStore, SessionConfig,
    SessionStore, SessionWriter, TrialGenerator,
};

fn main() {
    let total: usize = 600;
    let config = SessionConfig {
        interval: None,
        ..Default::default()
    };
    let trial_bits = config.trial_bits;

    let mut writer = SessionWriter::new(config).expect("Failed to create session directory");
    let mut generator =
        TrialGenerator::new(Arc::new(OsSource::new()), trial_bits, writer.session_id());

    while (writer.total_trials() as usize) < total {
        let batch = generator.generate(100).expect("OS randomness unavailable");
        for trial in &batch.trials {
            writer.write_trial(trial).expect("Failed to write trial");
        }
        print!("\r  {}/{total} trials written", writer.total_trials());
    }

    let dir = writer.finish().expect("Failed to finish session");
    println!("\nSession written to {}", dir.display());

    let store = SessionStore::open(&dir).expect("Failed to reopen session");
    let result = NetworkVarianceAnalyzer::new(NullModel::new(trial_bits))
        .analyze(store.trials())
        .expect("session has trials");
    store
        .persist(&Report::NetworkVariance(result.clone()))
        .expect("Failed to persist report");
    println!(
        "Network variance {:.1} over {} trials (p = {:.4})",
        result.network_variance, result.trial_count, result.p_value
    );
}
