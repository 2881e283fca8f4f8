//! Deterministic fixtures shared by the unit tests.

use crate::trial::{Intention, Trial, TrialMode};

/// 2026-01-01T00:00:00Z
pub const START_MS: u64 = 1_767_225_600_000;

/// 64-bit LCG byte stream.
pub fn lcg_bytes(n: usize, seed: u64) -> Vec<u8> {
    let mut state = 0xDEAD_BEEF_CAFE_BABE_u64 ^ seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as u8
        })
        .collect()
}

/// 200-bit trials at a 1 s cadence starting at [`START_MS`].
pub fn lcg_trials(n: usize, seed: u64) -> Vec<Trial> {
    lcg_bytes(n * 25, seed)
        .chunks_exact(25)
        .enumerate()
        .map(|(i, chunk)| {
            let value = chunk.iter().map(|b| b.count_ones()).sum();
            trial(value, START_MS + i as u64 * 1000, i as u64)
        })
        .collect()
}

pub fn trial(value: u32, timestamp_ms: u64, sequence_number: u64) -> Trial {
    Trial {
        timestamp_ms,
        value,
        session_id: "test".to_string(),
        mode: TrialMode::Session,
        intention: Intention::Baseline,
        sequence_number,
    }
}
