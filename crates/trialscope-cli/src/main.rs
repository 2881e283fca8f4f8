//! CLI for trialscope: record trial sessions, analyze them and calibrate sources.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trialscope")]
#[command(about = "trialscope: bias detection, stream quality control and source calibration")]
#[command(version = trialscope_core::VERSION)]
struct Cli {
    /// Engine configuration JSON (defaults apply to missing fields)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record trials from a source into a session directory
    Record {
        /// Trial source: os, seeded or seeded:<seed>
        #[arg(long, default_value = "os")]
        source: String,

        /// Maximum recording duration (e.g. "5m", "30s", "1h"); default: until Ctrl+C
        #[arg(long)]
        duration: Option<String>,

        /// Pause between batches (e.g. "100ms", "1s"); "0" for continuous
        #[arg(long, default_value = "1s")]
        interval: String,

        /// Trials generated per batch
        #[arg(long, default_value = "1")]
        batch: usize,

        /// Collection mode
        #[arg(long, default_value = "session", value_parser = ["calibration", "session", "continuous"])]
        mode: String,

        /// Operator intention
        #[arg(long, default_value = "baseline", value_parser = ["high", "low", "baseline"])]
        intention: String,

        /// Metadata tags as key:value pairs
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Session note
        #[arg(long)]
        note: Option<String>,

        /// Output directory (default: ./sessions/)
        #[arg(long)]
        output: Option<String>,

        /// Run the aggregate analyses and a quality scan at the end and store them in reports.jsonl
        #[arg(long)]
        analyze: bool,
    },

    /// Aggregate analyses over a recorded session: network variance, z-score,
    /// effect size, cumulative excursions, trend and baseline
    Analyze {
        /// Session directory
        session: String,

        /// Append the results to the session's reports.jsonl
        #[arg(long)]
        save: bool,

        /// Write all results as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Anomaly scan and quality score over a recorded session
    Quality {
        /// Session directory
        session: String,

        /// Only scan the last N minutes of the session
        #[arg(long)]
        minutes: Option<u64>,

        /// Write the quality report as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Run the randomness test battery on fresh trials from a source
    Report {
        /// Trial source: os, seeded or seeded:<seed>
        #[arg(long, default_value = "os")]
        source: String,

        /// Number of trials to generate
        #[arg(long, default_value = "5000")]
        trials: usize,

        /// Use the stricter hardware autocorrelation threshold
        #[arg(long)]
        hardware: bool,

        /// Write the suite result as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Calibrate a source: standard battery run or extended drift monitoring
    Calibrate {
        /// Trial source: os, seeded or seeded:<seed>
        #[arg(long, default_value = "os")]
        source: String,

        /// Run an extended calibration instead of a standard one
        #[arg(long)]
        extended: bool,

        /// Extended run length (e.g. "10m", "24h"); default from configuration
        #[arg(long)]
        duration: Option<String>,

        /// Pause between extended-run intervals (e.g. "30s"); default from configuration
        #[arg(long)]
        interval: Option<String>,

        /// Session directory whose reports.jsonl receives the result
        #[arg(long)]
        session: Option<String>,

        /// Write the result as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Quick hardware health check: lightweight battery plus host resources
    Health {
        /// Trial source: os, seeded or seeded:<seed>
        #[arg(long, default_value = "os")]
        source: String,

        /// Write the result as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Start the HTTP status and control server
    Server {
        /// Port to listen on
        #[arg(long, default_value = "8043")]
        port: u16,

        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Trial source for calibrations: os, seeded or seeded:<seed>
        #[arg(long, default_value = "os")]
        source: String,

        /// Serve trials and persist reports from this session directory
        #[arg(long)]
        session: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging(&cli.log_level);
    let settings = commands::load_settings(cli.config.as_deref());

    match cli.command {
        Commands::Record {
            source,
            duration,
            interval,
            batch,
            mode,
            intention,
            tags,
            note,
            output,
            analyze,
        } => commands::record::run(
            &settings,
            commands::record::RecordCommandConfig {
                source: &source,
                duration: duration.as_deref(),
                interval: &interval,
                batch,
                mode: &mode,
                intention: &intention,
                tags: &tags,
                note: note.as_deref(),
                output: output.as_deref(),
                analyze,
            },
        ),
        Commands::Analyze {
            session,
            save,
            output,
        } => commands::analyze::run(&settings, &session, save, output.as_deref()),
        Commands::Quality {
            session,
            minutes,
            output,
        } => commands::quality::run(&settings, &session, minutes, output.as_deref()),
        Commands::Report {
            source,
            trials,
            hardware,
            output,
        } => commands::report::run(&settings, &source, trials, hardware, output.as_deref()),
        Commands::Calibrate {
            source,
            extended,
            duration,
            interval,
            session,
            output,
        } => commands::calibrate::run(
            settings,
            commands::calibrate::CalibrateCommandConfig {
                source: &source,
                extended,
                duration: duration.as_deref(),
                interval: interval.as_deref(),
                session: session.as_deref(),
                output: output.as_deref(),
            },
        ),
        Commands::Health { source, output } => {
            commands::health::run(settings, &source, output.as_deref())
        }
        Commands::Server {
            port,
            host,
            source,
            session,
        } => commands::server::run(settings, &host, port, &source, session.as_deref()),
    }
}
