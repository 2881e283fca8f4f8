//! Trial sources.
//!
//! Every source implements the [`TrialSource`] trait, which provides metadata
//! via [`SourceInfo`], availability checking and raw byte collection.
//! [`TrialGenerator`] unpacks those bytes into bits and sums them into trials.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::trial::{Intention, Trial, TrialMode};

/// How a source produces its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Deterministic PRNG; reproducible from its seed.
    Pseudo,
    /// Operating-system CSPRNG.
    Os,
    /// Anything else plugged in by the caller.
    External,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pseudo => write!(f, "pseudo"),
            Self::Os => write!(f, "os"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Metadata about a trial source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"os"`).
    pub name: &'static str,
    pub description: &'static str,
    pub kind: SourceKind,
}

/// Trait that every trial source must implement.
pub trait TrialSource: Send + Sync {
    fn info(&self) -> &SourceInfo;

    /// Check if this source can operate on the current machine.
    fn is_available(&self) -> bool;

    /// Collect exactly `n_bytes` raw bytes.
    fn collect(&self, n_bytes: usize) -> Result<Vec<u8>>;

    fn name(&self) -> &'static str {
        self.info().name
    }
}

static SEEDED_INFO: SourceInfo = SourceInfo {
    name: "seeded",
    description: "Seeded StdRng stream, reproducible across runs",
    kind: SourceKind::Pseudo,
};

static OS_INFO: SourceInfo = SourceInfo {
    name: "os",
    description: "Operating-system CSPRNG via getrandom",
    kind: SourceKind::Os,
};

/// Reproducible PRNG source.
pub struct SeededSource {
    seed: u64,
    rng: Mutex<StdRng>,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl TrialSource for SeededSource {
    fn info(&self) -> &SourceInfo {
        &SEEDED_INFO
    }

    fn is_available(&self) -> bool {
        true
    }

    fn collect(&self, n_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n_bytes];
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fill_bytes(&mut buf);
        Ok(buf)
    }
}

/// Operating-system randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSource;

impl OsSource {
    pub fn new() -> Self {
        Self
    }
}

impl TrialSource for OsSource {
    fn info(&self) -> &SourceInfo {
        &OS_INFO
    }

    fn is_available(&self) -> bool {
        let mut probe = [0u8; 1];
        getrandom::fill(&mut probe).is_ok()
    }

    fn collect(&self, n_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n_bytes];
        getrandom::fill(&mut buf).map_err(|e| EngineError::Source(e.to_string()))?;
        Ok(buf)
    }
}

/// Resolve a source by name: `"os"`, `"seeded"` (seed 0) or `"seeded:<seed>"`.
pub fn source_by_name(name: &str) -> Result<Arc<dyn TrialSource>> {
    match name.split_once(':') {
        None if name == "os" => Ok(Arc::new(OsSource::new())),
        None if name == "seeded" => Ok(Arc::new(SeededSource::new(0))),
        Some(("seeded", seed)) => seed
            .parse::<u64>()
            .map(|seed| Arc::new(SeededSource::new(seed)) as Arc<dyn TrialSource>)
            .map_err(|e| EngineError::Source(format!("invalid seed '{seed}': {e}"))),
        _ => Err(EngineError::Source(format!("unknown source '{name}'"))),
    }
}

/// Bytes needed to hold `n_bits` bits.
pub fn bytes_per_trial(n_bits: u32) -> usize {
    (n_bits as usize).div_ceil(8)
}

/// Number of ones among the first `n_bits` bits of `bytes` (MSB first).
pub fn trial_value(bytes: &[u8], n_bits: u32) -> u32 {
    let full = (n_bits / 8) as usize;
    let rem = n_bits % 8;
    let mut ones: u32 = bytes.iter().take(full).map(|b| b.count_ones()).sum();
    if rem > 0
        && let Some(last) = bytes.get(full)
    {
        ones += (last >> (8 - rem)).count_ones();
    }
    ones
}

/// Trials together with the bits they were summed from.
#[derive(Debug, Clone, Default)]
pub struct TrialBatch {
    pub trials: Vec<Trial>,
    /// One element per bit (0 or 1), `n_bits` per trial, in trial order.
    pub bits: Vec<u8>,
}

impl TrialBatch {
    pub fn extend(&mut self, other: TrialBatch) {
        self.trials.extend(other.trials);
        self.bits.extend(other.bits);
    }
}

/// Turns raw source bytes into numbered trials.
pub struct TrialGenerator {
    source: Arc<dyn TrialSource>,
    n_bits: u32,
    session_id: String,
    mode: TrialMode,
    intention: Intention,
    next_sequence: u64,
}

impl TrialGenerator {
    pub fn new(source: Arc<dyn TrialSource>, n_bits: u32, session_id: impl Into<String>) -> Self {
        Self {
            source,
            n_bits,
            session_id: session_id.into(),
            mode: TrialMode::default(),
            intention: Intention::default(),
            next_sequence: 0,
        }
    }

    pub fn with_mode(mut self, mode: TrialMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_intention(mut self, intention: Intention) -> Self {
        self.intention = intention;
        self
    }

    pub fn source(&self) -> &dyn TrialSource {
        self.source.as_ref()
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Generate `count` trials stamped with the current time.
    pub fn generate(&mut self, count: usize) -> Result<TrialBatch> {
        self.generate_at(count, crate::now_ms())
    }

    /// Generate `count` trials stamped with `timestamp_ms`.
    pub fn generate_at(&mut self, count: usize, timestamp_ms: u64) -> Result<TrialBatch> {
        let per_trial = bytes_per_trial(self.n_bits);
        let wanted = count * per_trial;
        let bytes = self.source.collect(wanted)?;
        if bytes.len() < wanted {
            return Err(EngineError::Source(format!(
                "{} returned {} of {wanted} bytes",
                self.source.name(),
                bytes.len()
            )));
        }

        let mut batch = TrialBatch {
            trials: Vec::with_capacity(count),
            bits: Vec::with_capacity(count * self.n_bits as usize),
        };
        for chunk in bytes.chunks_exact(per_trial.max(1)).take(count) {
            let bits = trialscope_tests::to_bits(chunk);
            batch.bits.extend_from_slice(&bits[..self.n_bits as usize]);
            batch.trials.push(Trial {
                timestamp_ms,
                value: trial_value(chunk, self.n_bits),
                session_id: self.session_id.clone(),
                mode: self.mode,
                intention: self.intention,
                sequence_number: self.next_sequence,
            });
            self.next_sequence += 1;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_value_counts_leading_bits() {
        assert_eq!(trial_value(&[0xFF; 25], 200), 200);
        assert_eq!(trial_value(&[0xFF, 0xF0], 12), 12);
        assert_eq!(trial_value(&[0xFF, 0x0F], 12), 8);
        assert_eq!(trial_value(&[], 8), 0);
        assert_eq!(bytes_per_trial(200), 25);
        assert_eq!(bytes_per_trial(12), 2);
    }

    #[test]
    fn test_seeded_source_is_reproducible() {
        let a = SeededSource::new(42).collect(64).unwrap();
        let b = SeededSource::new(42).collect(64).unwrap();
        let c = SeededSource::new(43).collect(64).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_generator_numbers_trials_and_keeps_bits() {
        let source: Arc<dyn TrialSource> = Arc::new(SeededSource::new(7));
        let mut generator =
            TrialGenerator::new(source, 200, "s1").with_mode(TrialMode::Calibration);
        let first = generator.generate_at(10, 1_000).unwrap();
        let second = generator.generate_at(5, 2_000).unwrap();
        assert_eq!(first.trials.len(), 10);
        assert_eq!(first.bits.len(), 2000);
        assert_eq!(second.trials[0].sequence_number, 10);
        assert_eq!(second.trials[0].mode, TrialMode::Calibration);
        for (i, trial) in first.trials.iter().enumerate() {
            let ones: u32 = first.bits[i * 200..(i + 1) * 200].iter().map(|&b| b as u32).sum();
            assert_eq!(trial.value, ones);
            assert!(trial.value <= 200);
        }
    }

    #[test]
    fn test_short_source_is_an_error() {
        struct Short;
        static INFO: SourceInfo = SourceInfo {
            name: "short",
            description: "returns half of what is asked",
            kind: SourceKind::External,
        };
        impl TrialSource for Short {
            fn info(&self) -> &SourceInfo {
                &INFO
            }
            fn is_available(&self) -> bool {
                true
            }
            fn collect(&self, n_bytes: usize) -> Result<Vec<u8>> {
                Ok(vec![0; n_bytes / 2])
            }
        }
        let mut generator = TrialGenerator::new(Arc::new(Short), 200, "s");
        assert!(matches!(generator.generate(4), Err(EngineError::Source(_))));
    }

    #[test]
    fn test_source_lookup() {
        assert_eq!(source_by_name("os").unwrap().name(), "os");
        assert_eq!(source_by_name("seeded:9").unwrap().name(), "seeded");
        assert!(source_by_name("seeded:x").is_err());
        assert!(source_by_name("dice").is_err());
        assert!(OsSource::new().is_available());
        assert_eq!(OsSource::new().collect(16).unwrap().len(), 16);
    }
}
