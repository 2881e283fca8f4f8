//! Session recording and the on-disk session store.
//!
//! Each session is a directory containing:
//! - `session.json`: metadata (source, timing, machine info, tags)
//! - `trials.csv`: one row per trial
//! - `reports.jsonl`: one JSON [`Report`] per line, appended as they are persisted
//!
//! [`SessionWriter`] produces a session while trials are generated;
//! [`SessionStore`] reopens one as a [`TrialStore`] + [`ReportStore`].

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::storage::{Report, ReportStore, TrialStore};
use crate::trial::{Intention, Trial, TrialMode};

const TRIALS_FILE: &str = "trials.csv";
const REPORTS_FILE: &str = "reports.jsonl";
const META_FILE: &str = "session.json";
const TRIALS_HEADER: &str = "timestamp_ms,value,session_id,mode,intention,sequence_number";

/// Machine information captured at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub cores: usize,
}

pub fn detect_machine_info() -> MachineInfo {
    MachineInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cores: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

/// Session metadata written to session.json at the end of recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub version: u32,
    pub id: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub trial_bits: u32,
    pub total_trials: u64,
    pub source: String,
    pub mode: TrialMode,
    pub intention: Intention,
    pub interval_ms: Option<u64>,
    pub machine: MachineInfo,
    pub tags: BTreeMap<String, String>,
    pub note: Option<String>,
    pub trialscope_version: String,
}

/// Configuration for a recording session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub source: String,
    pub trial_bits: u32,
    pub mode: TrialMode,
    pub intention: Intention,
    /// Pause between trials.
    pub interval: Option<Duration>,
    pub output_dir: PathBuf,
    pub tags: BTreeMap<String, String>,
    pub note: Option<String>,
    pub duration: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: "os".to_string(),
            trial_bits: 200,
            mode: TrialMode::Session,
            intention: Intention::Baseline,
            interval: Some(Duration::from_secs(1)),
            output_dir: PathBuf::from("sessions"),
            tags: BTreeMap::new(),
            note: None,
            duration: None,
        }
    }
}

/// Incremental file I/O for a recording session.
pub struct SessionWriter {
    session_dir: PathBuf,
    trials: BufWriter<File>,
    reports: BufWriter<File>,
    total_trials: u64,
    started_at: SystemTime,
    started_instant: Instant,
    session_id: String,
    config: SessionConfig,
}

impl SessionWriter {
    /// Create the session directory and its files.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let started_at = SystemTime::now();
        let since_epoch = started_at.duration_since(UNIX_EPOCH).unwrap_or_default();

        let slug: String = config
            .source
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let dir_name = format!(
            "{}-{}-{}",
            format_iso8601_compact(since_epoch),
            slug,
            &session_id[..8]
        );
        let session_dir = config.output_dir.join(dir_name);
        fs::create_dir_all(&session_dir)?;

        let mut trials = BufWriter::new(File::create(session_dir.join(TRIALS_FILE))?);
        writeln!(trials, "{TRIALS_HEADER}")?;
        trials.flush()?;
        let reports = BufWriter::new(File::create(session_dir.join(REPORTS_FILE))?);

        Ok(Self {
            session_dir,
            trials,
            reports,
            total_trials: 0,
            started_at,
            started_instant: Instant::now(),
            session_id,
            config,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn total_trials(&self) -> u64 {
        self.total_trials
    }

    pub fn elapsed(&self) -> Duration {
        self.started_instant.elapsed()
    }

    pub fn write_trial(&mut self, trial: &Trial) -> Result<()> {
        writeln!(self.trials, "{}", format_trial(trial))?;
        self.trials.flush()?;
        self.total_trials += 1;
        Ok(())
    }

    pub fn write_report(&mut self, report: &Report) -> Result<()> {
        serde_json::to_writer(&mut self.reports, report)?;
        writeln!(self.reports)?;
        self.reports.flush()?;
        Ok(())
    }

    /// Flush everything and write session.json. Call on graceful shutdown.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.trials.flush()?;
        self.reports.flush()?;

        let ended_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let meta = SessionMeta {
            version: 1,
            id: self.session_id,
            started_at: format_iso8601(
                self.started_at.duration_since(UNIX_EPOCH).unwrap_or_default(),
            ),
            ended_at: format_iso8601(ended_at),
            duration_ms: self.started_instant.elapsed().as_millis() as u64,
            trial_bits: self.config.trial_bits,
            total_trials: self.total_trials,
            source: self.config.source.clone(),
            mode: self.config.mode,
            intention: self.config.intention,
            interval_ms: self.config.interval.map(|d| d.as_millis() as u64),
            machine: detect_machine_info(),
            tags: self.config.tags.clone(),
            note: self.config.note.clone(),
            trialscope_version: crate::VERSION.to_string(),
        };
        fs::write(
            self.session_dir.join(META_FILE),
            serde_json::to_string_pretty(&meta)?,
        )?;
        Ok(self.session_dir)
    }
}

fn format_trial(trial: &Trial) -> String {
    format!(
        "{},{},{},{},{},{}",
        trial.timestamp_ms,
        trial.value,
        trial.session_id,
        trial.mode,
        trial.intention,
        trial.sequence_number
    )
}

fn parse_trial(line: &str) -> std::result::Result<Trial, String> {
    let fields: Vec<&str> = line.split(',').collect();
    let [timestamp_ms, value, session_id, mode, intention, sequence_number] = fields[..] else {
        return Err(format!("expected 6 fields, got {}", fields.len()));
    };
    Ok(Trial {
        timestamp_ms: timestamp_ms.parse().map_err(|e| format!("timestamp: {e}"))?,
        value: value.parse().map_err(|e| format!("value: {e}"))?,
        session_id: session_id.to_string(),
        mode: mode.parse()?,
        intention: intention.parse()?,
        sequence_number: sequence_number
            .parse()
            .map_err(|e| format!("sequence_number: {e}"))?,
    })
}

/// A recorded session directory opened for analysis.
///
/// Trials are loaded once at open; persisted reports are appended to
/// `reports.jsonl`.
pub struct SessionStore {
    dir: PathBuf,
    meta: Option<SessionMeta>,
    trials: Vec<Trial>,
    reports: Mutex<()>,
}

impl SessionStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = match fs::read_to_string(dir.join(META_FILE)) {
            Ok(text) => Some(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(File::open(dir.join(TRIALS_FILE))?);
        let mut trials = Vec::new();
        for (i, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            trials.push(parse_trial(&line).map_err(|reason| {
                EngineError::Storage(format!("{TRIALS_FILE} line {}: {reason}", i + 1))
            })?);
        }
        trials.sort_by_key(|t| t.timestamp_ms);

        Ok(Self {
            dir,
            meta,
            trials,
            reports: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Metadata, absent when the session was not finished cleanly.
    pub fn meta(&self) -> Option<&SessionMeta> {
        self.meta.as_ref()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }
}

impl TrialStore for SessionStore {
    fn trials_in_range(&self, start_ms: u64, end_ms: u64) -> Result<Vec<Trial>> {
        let from = self.trials.partition_point(|t| t.timestamp_ms < start_ms);
        let to = self.trials.partition_point(|t| t.timestamp_ms <= end_ms);
        Ok(self.trials.get(from..to).map(<[Trial]>::to_vec).unwrap_or_default())
    }

    fn trials_for_session(&self, session_id: &str) -> Result<Vec<Trial>> {
        Ok(self
            .trials
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect())
    }
}

impl ReportStore for SessionStore {
    fn persist(&self, report: &Report) -> Result<()> {
        let _lock = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(REPORTS_FILE))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, report)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn reports(&self) -> Result<Vec<Report>> {
        let _lock = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        let file = match File::open(self.dir.join(REPORTS_FILE)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reports = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(report) => reports.push(report),
                Err(e) => warn!("skipping unreadable report in {}: {e}", self.dir.display()),
            }
        }
        Ok(reports)
    }
}

/// Full ISO-8601 UTC timestamp, e.g. `2026-01-01T00:00:00Z`.
pub fn format_iso8601(since_epoch: Duration) -> String {
    let (date, (hour, minute, second)) = split_utc(since_epoch.as_secs());
    format!("{date}T{hour:02}:{minute:02}:{second:02}Z")
}

/// Compact form for directory names, e.g. `2026-01-01T000000Z`.
fn format_iso8601_compact(since_epoch: Duration) -> String {
    let (date, (hour, minute, second)) = split_utc(since_epoch.as_secs());
    format!("{date}T{hour:02}{minute:02}{second:02}Z")
}

fn split_utc(secs: u64) -> (String, (u64, u64, u64)) {
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let time = ((secs / 3600) % 24, (secs / 60) % 60, secs % 60);
    (format!("{year:04}-{month:02}-{day:02}"), time)
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
