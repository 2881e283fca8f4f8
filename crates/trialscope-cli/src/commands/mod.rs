pub mod analyze;
pub mod calibrate;
pub mod health;
pub mod quality;
pub mod record;
pub mod report;
pub mod server;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use trialscope_core::{EngineConfig, SessionStore, Settings, TrialSource};

/// Initialise `env_logger`; `RUST_LOG` wins over `--log-level`.
pub fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

/// Print an error and exit with status 1.
pub fn fail(message: impl Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

/// Load and validate the engine configuration, or the defaults.
pub fn load_settings(path: Option<&str>) -> Settings {
    let config = match path {
        Some(path) => EngineConfig::load(path)
            .unwrap_or_else(|e| fail(format!("cannot load config {path}: {e}"))),
        None => EngineConfig::default(),
    };
    config.validate().unwrap_or_else(|e| fail(e))
}

pub fn make_source(name: &str) -> Arc<dyn TrialSource> {
    let source = trialscope_core::source_by_name(name).unwrap_or_else(|e| fail(e));
    if !source.is_available() {
        fail(format!("source '{name}' is not available on this machine"));
    }
    source
}

pub fn open_session(path: &str) -> SessionStore {
    SessionStore::open(path).unwrap_or_else(|e| fail(format!("cannot open session {path}: {e}")))
}

/// Pretty-print `value` as JSON into `path`.
pub fn write_json<T: Serialize + ?Sized>(path: &str, value: &T) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|e| fail(e));
    match std::fs::write(path, json) {
        Ok(()) => println!("\nResults written to {path}"),
        Err(e) => fail(format!("cannot write {path}: {e}")),
    }
}

/// Parse a duration string like "5m", "30s", "1h", "100ms". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1000)
    };
    numeric
        .trim()
        .parse::<u64>()
        .map(|value| Duration::from_millis(value.saturating_mul(multiplier)))
        .map_err(|_| format!("invalid duration '{s}'"))
}

/// `key:value` pairs; malformed entries are skipped with a warning.
pub fn parse_tags(tags: &[String]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for tag in tags {
        match tag.split_once(':') {
            Some((k, v)) if !k.is_empty() => {
                map.insert(k.to_string(), v.to_string());
            }
            _ => eprintln!("Warning: ignoring malformed tag '{tag}' (expected key:value)"),
        }
    }
    map
}
