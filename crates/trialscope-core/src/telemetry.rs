//! Best-effort host resource snapshots and environment probes.
//!
//! Works without elevated privileges and leaves unavailable values as `None`
//! rather than guessing. The hardware health check blends
//! [`SystemSnapshot::resource_score`] into its verdict; extended calibration
//! samples [`EnvironmentProbe`]s once per interval.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Point-in-time host snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub collected_ms: u64,
    pub os: String,
    pub arch: String,
    pub cpu_count: usize,
    pub loadavg_1m: Option<f64>,
    pub loadavg_5m: Option<f64>,
    pub loadavg_15m: Option<f64>,
    pub memory_total_bytes: Option<u64>,
    pub memory_available_bytes: Option<u64>,
}

impl SystemSnapshot {
    /// One-minute load average divided by the CPU count.
    pub fn load_per_cpu(&self) -> Option<f64> {
        let load = self.loadavg_1m?;
        (self.cpu_count > 0).then(|| load / self.cpu_count as f64)
    }

    pub fn memory_available_fraction(&self) -> Option<f64> {
        match (self.memory_available_bytes, self.memory_total_bytes) {
            (Some(available), Some(total)) if total > 0 => Some(available as f64 / total as f64),
            _ => None,
        }
    }

    /// 0-100 headroom score: the mean of the load and memory scores that
    /// could be observed, 100 when neither is available.
    pub fn resource_score(&self) -> f64 {
        let load = self.load_per_cpu().map(|l| {
            if l < 0.7 {
                100.0
            } else if l < 1.0 {
                75.0
            } else if l < 2.0 {
                50.0
            } else {
                25.0
            }
        });
        let memory = self.memory_available_fraction().map(|m| {
            if m > 0.2 {
                100.0
            } else if m > 0.1 {
                60.0
            } else {
                30.0
            }
        });
        let scores: Vec<f64> = [load, memory].into_iter().flatten().collect();
        if scores.is_empty() {
            100.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(load) = self.load_per_cpu()
            && load >= 1.0
        {
            out.push(format!(
                "System load is high ({load:.2} per CPU); timing-sensitive sources may be affected"
            ));
        }
        if let Some(memory) = self.memory_available_fraction()
            && memory <= 0.2
        {
            out.push(format!(
                "Only {:.0}% of memory is available",
                memory * 100.0
            ));
        }
        out
    }
}

/// Collect a snapshot of the current host.
pub fn collect_system_snapshot() -> SystemSnapshot {
    let (loadavg_1m, loadavg_5m, loadavg_15m) = collect_loadavg();
    let (memory_total_bytes, memory_available_bytes) = collect_memory();
    SystemSnapshot {
        collected_ms: crate::now_ms(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_count: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        loadavg_1m,
        loadavg_5m,
        loadavg_15m,
        memory_total_bytes,
        memory_available_bytes,
    }
}

fn collect_loadavg() -> (Option<f64>, Option<f64>, Option<f64>) {
    #[cfg(unix)]
    {
        let mut values = [0.0_f64; 3];
        // SAFETY: `getloadavg` writes at most 3 doubles into a 3-element buffer.
        let n = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
        if n <= 0 {
            (None, None, None)
        } else {
            (
                Some(values[0]),
                (n > 1).then_some(values[1]),
                (n > 2).then_some(values[2]),
            )
        }
    }
    #[cfg(not(unix))]
    {
        (None, None, None)
    }
}

fn collect_memory() -> (Option<u64>, Option<u64>) {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .map(|text| parse_meminfo(&text))
            .unwrap_or((None, None))
    }
    #[cfg(not(target_os = "linux"))]
    {
        (None, None)
    }
}

/// `(MemTotal, MemAvailable)` in bytes from `/proc/meminfo` text.
pub fn parse_meminfo(text: &str) -> (Option<u64>, Option<u64>) {
    let field = |key: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    (field("MemTotal"), field("MemAvailable"))
}

/// Named environmental signal observed during extended calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    pub name: String,
    pub value: f64,
}

/// Supplies environmental signals once per calibration interval.
pub trait EnvironmentProbe: Send + Sync {
    fn name(&self) -> &str;

    fn sample(&self) -> Result<Vec<EnvironmentReading>>;
}

/// Host load and memory headroom as environment signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl EnvironmentProbe for SystemProbe {
    fn name(&self) -> &str {
        "system"
    }

    fn sample(&self) -> Result<Vec<EnvironmentReading>> {
        let snapshot = collect_system_snapshot();
        let readings = [
            ("load_1m", snapshot.loadavg_1m),
            ("memory_available_fraction", snapshot.memory_available_fraction()),
        ];
        Ok(readings
            .into_iter()
            .filter_map(|(name, value)| {
                value.map(|value| EnvironmentReading {
                    name: name.to_string(),
                    value,
                })
            })
            .collect())
    }
}
