//! NIST SP 800-22 inspired randomness test battery for trial sources.
//!
//! Tests operate on a bit sequence (one `0`/`1` per element) or on its
//! byte-packed form. Each test returns a [`TestResult`] with a p-value (where
//! applicable), a pass/fail determination at the configured significance
//! level and a letter grade (A through F). [`run_suite`] groups the tests into
//! weighted sub-batteries and scores the source from 0 to 100.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::function::erf::erfc;
use std::collections::BTreeSet;
use std::io::Write;

/// Upper bound on the bits fed to the quadratic-cost tests (lag scan, DFT).
pub const MAX_SCAN_BITS: usize = 1 << 20;

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Thresholds shared by every test in the battery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Significance level for p-value based tests.
    pub alpha: f64,
    /// Block length (bits) for the block frequency test.
    pub block_size: usize,
    /// Maximum tolerated |r| at any sampled lag.
    pub autocorrelation_threshold: f64,
    /// Minimum Shannon entropy in bits per byte.
    pub entropy_threshold: f64,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            block_size: 128,
            autocorrelation_threshold: 0.1,
            entropy_threshold: 7.9,
        }
    }
}

/// Result of a single randomness test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub statistic: f64,
    /// Acceptance threshold the statistic or p-value was compared against.
    pub threshold: f64,
    pub description: String,
    pub grade: char,
}

impl TestResult {
    /// Assign a letter grade based on p-value.
    ///
    /// - A: p >= 0.1
    /// - B: p >= 0.01
    /// - C: p >= 0.001
    /// - D: p >= 0.0001
    /// - F: otherwise or None
    pub fn grade_from_p(p: Option<f64>) -> char {
        match p {
            Some(p) if p >= 0.1 => 'A',
            Some(p) if p >= 0.01 => 'B',
            Some(p) if p >= 0.001 => 'C',
            Some(p) if p >= 0.0001 => 'D',
            _ => 'F',
        }
    }

    /// Determine pass/fail from p-value against the significance level.
    pub fn pass_from_p(p: Option<f64>, alpha: f64) -> bool {
        match p {
            Some(p) => p >= alpha,
            None => false,
        }
    }

    fn from_p(name: &str, p: f64, statistic: f64, alpha: f64, description: String) -> Self {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            name: name.to_string(),
            passed: Self::pass_from_p(Some(p), alpha),
            p_value: Some(p),
            statistic,
            threshold: alpha,
            description,
            grade: Self::grade_from_p(Some(p)),
        }
    }

    fn failed(name: &str, statistic: f64, threshold: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            p_value: None,
            statistic,
            threshold,
            description: description.to_string(),
            grade: 'F',
        }
    }
}

/// Grade a ratio in [0, 1] where 1 is ideal.
fn grade_from_ratio(ratio: f64) -> char {
    if ratio > 0.95 {
        'A'
    } else if ratio > 0.85 {
        'B'
    } else if ratio > 0.7 {
        'C'
    } else if ratio > 0.5 {
        'D'
    } else {
        'F'
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unpack a byte slice into individual bits (MSB first per byte).
pub fn to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Pack bits (MSB first) into bytes. A trailing partial byte is dropped.
pub fn pack_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | (b & 1)))
        .collect()
}

/// Return a failing `TestResult` when data is too short.
fn insufficient(name: &str, needed: usize, got: usize) -> TestResult {
    TestResult::failed(
        name,
        0.0,
        0.0,
        &format!("Insufficient data: need {needed}, got {got}"),
    )
}

fn ones(bits: &[u8]) -> usize {
    bits.iter().filter(|&&b| b != 0).count()
}

/// Lag-k autocorrelation normalised by the population variance.
fn lag_correlation(values: &[f64], mean: f64, var: f64, lag: usize) -> f64 {
    let count = values.len() - lag;
    let sum: f64 = (0..count)
        .map(|i| (values[i] - mean) * (values[i + lag] - mean))
        .sum();
    sum / (count as f64 * var)
}

// ═══════════════════════════════════════════════════════════════════════════════
// 1. BIT-LEVEL TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Monobit frequency: the proportion of ones should be close to 1/2.
pub fn frequency(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Frequency";
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let ones = ones(bits);
    let s = (2 * ones as i64 - n as i64).unsigned_abs() as f64;
    let p = erfc(s / (2.0 * n as f64).sqrt());
    TestResult::from_p(name, p, s, cfg.alpha, format!("S={s}, ones={ones}, n={n}"))
}

/// Block frequency: chi-square over the proportion of ones per block.
pub fn block_frequency(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Block Frequency";
    let block_size = cfg.block_size.max(1);
    let n = bits.len();
    let num_blocks = n / block_size;
    if num_blocks < 10 {
        return insufficient(name, block_size * 10, n);
    }
    let chi2 = 4.0
        * block_size as f64
        * bits
            .chunks_exact(block_size)
            .map(|block| {
                let proportion = ones(block) as f64 / block_size as f64;
                (proportion - 0.5) * (proportion - 0.5)
            })
            .sum::<f64>();
    let p = match ChiSquared::new(num_blocks as f64) {
        Ok(dist) => dist.sf(chi2),
        Err(_) => 0.0,
    };
    TestResult::from_p(
        name,
        p,
        chi2,
        cfg.alpha,
        format!("blocks={num_blocks}, block_size={block_size}"),
    )
}

/// Runs: number of uninterrupted same-value runs against its expectation.
pub fn runs(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Runs";
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let prop = ones(bits) as f64 / n as f64;
    if (prop - 0.5).abs() >= 2.0 / (n as f64).sqrt() {
        return TestResult {
            name: name.to_string(),
            passed: false,
            p_value: Some(0.0),
            statistic: 0.0,
            threshold: cfg.alpha,
            description: format!("Pre-test failed: proportion={prop:.4}"),
            grade: 'F',
        };
    }
    let runs = 1 + bits.windows(2).filter(|w| w[0] != w[1]).count();
    let expected = 2.0 * n as f64 * prop * (1.0 - prop);
    let std = 2.0 * (2.0 * n as f64).sqrt() * prop * (1.0 - prop);
    if std < 1e-10 {
        return TestResult::failed(name, 0.0, cfg.alpha, "Zero variance");
    }
    let z = (runs as f64 - expected).abs() / std;
    let p = erfc(z);
    TestResult::from_p(
        name,
        p,
        runs as f64,
        cfg.alpha,
        format!("runs={runs}, expected={expected:.0}"),
    )
}

/// Longest run of identical bits compared against `log2(n)`.
pub fn longest_run(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Longest Run";
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let mut longest = 1usize;
    let mut current = 1usize;
    for w in bits.windows(2) {
        if w[0] == w[1] {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 1;
        }
    }
    let expected = (n as f64).log2();
    let z = (longest as f64 - expected) / 1.873;
    let p = erfc(z.abs() / 2.0_f64.sqrt());
    TestResult::from_p(
        name,
        p,
        longest as f64,
        cfg.alpha,
        format!("longest={longest}, expected={expected:.2}"),
    )
}

/// Cumulative sums (forward mode): maximum excursion of the ±1 random walk.
pub fn cumulative_sums(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Cumulative Sums";
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let mut s: i64 = 0;
    let mut max_abs: u64 = 0;
    for &bit in bits {
        s += if bit != 0 { 1 } else { -1 };
        max_abs = max_abs.max(s.unsigned_abs());
    }
    let z = max_abs as f64;
    if z < 1e-10 {
        return TestResult::from_p(name, 1.0, 0.0, cfg.alpha, format!("max|S|=0, n={n}"));
    }

    let nf = n as f64;
    let sqrt_n = nf.sqrt();
    let norm = Normal::standard();
    let phi = |k: i64, a: f64| norm.cdf((4.0 * k as f64 + a) * z / sqrt_n);
    let upper = ((nf / z - 1.0) / 4.0).ceil() as i64;
    let mut sum1 = 0.0;
    for k in ((-nf / z + 1.0) / 4.0).floor() as i64..=upper {
        sum1 += phi(k, 1.0) - phi(k, -1.0);
    }
    let mut sum2 = 0.0;
    for k in ((-nf / z - 3.0) / 4.0).floor() as i64..=upper {
        sum2 += phi(k, 3.0) - phi(k, 1.0);
    }
    let p = 1.0 - sum1 + sum2;
    TestResult::from_p(name, p, z, cfg.alpha, format!("max|S|={max_abs}, n={n}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 2. AUTOCORRELATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Lags examined for a sequence of length `n`: 1, 5 and 10 plus every lag up
/// to `min(100, n/10)`.
pub fn sampled_lags(n: usize) -> Vec<usize> {
    let scan = 100.min(n / 10);
    let mut lags: BTreeSet<usize> = (1..=scan).collect();
    lags.extend([1, 5, 10].into_iter().filter(|&lag| lag < n));
    lags.into_iter().collect()
}

/// Autocorrelation of the bit sequence; passes when every sampled |r| stays
/// below the threshold.
pub fn autocorrelation(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Autocorrelation";
    let bits = &bits[..bits.len().min(MAX_SCAN_BITS)];
    let n = bits.len();
    if n < 20 {
        return insufficient(name, 20, n);
    }
    let values: Vec<f64> = bits.iter().map(|&b| b as f64).collect();
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    if var < 1e-10 {
        return TestResult::failed(name, 0.0, cfg.autocorrelation_threshold, "Zero variance");
    }
    let mut max_corr = 0.0f64;
    let mut max_lag = 1usize;
    let lags = sampled_lags(n);
    for &lag in &lags {
        let r = lag_correlation(&values, mean, var, lag);
        if r.abs() > max_corr {
            max_corr = r.abs();
            max_lag = lag;
        }
    }
    let z = max_corr * ((n - max_lag) as f64).sqrt();
    let p = erfc(z / 2.0_f64.sqrt());
    let passed = max_corr < cfg.autocorrelation_threshold;
    TestResult {
        name: name.to_string(),
        passed,
        p_value: Some(p),
        statistic: max_corr,
        threshold: cfg.autocorrelation_threshold,
        description: format!("max|r|={max_corr:.4} at lag {max_lag}, {} lags", lags.len()),
        grade: if passed { TestResult::grade_from_p(Some(p)) } else { 'F' },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 3. BYTE-LEVEL TESTS
// ═══════════════════════════════════════════════════════════════════════════════

fn histogram(data: &[u8]) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &b in data {
        hist[b as usize] += 1;
    }
    hist
}

/// Shannon entropy in bits per byte.
pub fn shannon_entropy(data: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Shannon Entropy";
    let n = data.len();
    if n < 16 {
        return insufficient(name, 16, n);
    }
    let mut h = 0.0;
    for &c in &histogram(data) {
        if c > 0 {
            let p = c as f64 / n as f64;
            h -= p * p.log2();
        }
    }
    let ratio = h / 8.0;
    TestResult {
        name: name.to_string(),
        passed: h >= cfg.entropy_threshold,
        p_value: None,
        statistic: h,
        threshold: cfg.entropy_threshold,
        description: format!("{h:.4} / 8.0 bits ({:.1}%)", ratio * 100.0),
        grade: grade_from_ratio(ratio),
    }
}

/// Distinct byte values relative to the count expected from `n` uniform draws.
pub fn compression(data: &[u8], _cfg: &SuiteConfig) -> TestResult {
    let name = "Compression";
    let n = data.len();
    if n < 16 {
        return insufficient(name, 16, n);
    }
    let distinct = histogram(data).iter().filter(|&&c| c > 0).count();
    let expected = 256.0 * (1.0 - (255.0_f64 / 256.0).powf(n as f64));
    let ratio = (distinct as f64 / expected).min(1.0);
    TestResult {
        name: name.to_string(),
        passed: ratio >= 0.9,
        p_value: None,
        statistic: ratio,
        threshold: 0.9,
        description: format!("distinct={distinct}, expected={expected:.1}"),
        grade: grade_from_ratio(ratio),
    }
}

/// 256-bin chi-square goodness of fit of byte values.
pub fn chi_square(data: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Chi-Square";
    let n = data.len();
    if n < 256 {
        return insufficient(name, 256, n);
    }
    let expected = n as f64 / 256.0;
    let chi2: f64 = histogram(data)
        .iter()
        .map(|&c| {
            let diff = c as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p = match ChiSquared::new(255.0) {
        Ok(dist) => dist.sf(chi2),
        Err(_) => 0.0,
    };
    TestResult::from_p(
        name,
        p,
        chi2,
        cfg.alpha,
        format!("n={n}, expected_per_bin={expected:.1}"),
    )
}

/// Lag-1 correlation of adjacent byte values.
pub fn serial_correlation(data: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "Serial Correlation";
    let n = data.len();
    if n < 20 {
        return insufficient(name, 20, n);
    }
    let values: Vec<f64> = data.iter().map(|&b| b as f64).collect();
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    if var < 1e-10 {
        return TestResult::failed(name, 1.0, cfg.alpha, "Zero variance");
    }
    let r = lag_correlation(&values, mean, var, 1);
    let z = r * (n as f64).sqrt();
    let p = erfc(z.abs() / 2.0_f64.sqrt());
    TestResult::from_p(name, p, r.abs(), cfg.alpha, format!("r={r:.6}, z={z:.4}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 4. EXTENDED TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Discrete Fourier transform: periodic features show up as excess peaks.
pub fn dft_spectral(bits: &[u8], cfg: &SuiteConfig) -> TestResult {
    let name = "DFT Spectral";
    let bits = &bits[..bits.len().min(MAX_SCAN_BITS)];
    let n = bits.len();
    if n < 64 {
        return insufficient(name, 64, n);
    }

    let mut buffer: Vec<Complex<f64>> = bits
        .iter()
        .map(|&b| Complex {
            re: if b != 0 { 1.0 } else { -1.0 },
            im: 0.0,
        })
        .collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut buffer);

    let half = n / 2;
    let threshold = (2.995732274 * n as f64).sqrt();
    let n0 = 0.95 * half as f64;
    let n1 = buffer[..half].iter().filter(|c| c.norm() < threshold).count() as f64;
    let d = (n1 - n0) / (n as f64 * 0.95 * 0.05 / 4.0).sqrt();
    let p = erfc(d.abs() / 2.0_f64.sqrt());
    TestResult::from_p(
        name,
        p,
        d,
        cfg.alpha,
        format!("peaks_below_threshold={}/{half}", n1 as u64),
    )
}

/// zlib compressed size over original size; random data does not compress.
pub fn zlib_ratio(data: &[u8], _cfg: &SuiteConfig) -> TestResult {
    let name = "Compression Ratio";
    let n = data.len();
    if n < 32 {
        return insufficient(name, 32, n);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    let compressed = match encoder.write_all(data).and_then(|_| encoder.finish()) {
        Ok(compressed) => compressed,
        Err(e) => return TestResult::failed(name, 0.0, 0.85, &format!("zlib failed: {e}")),
    };
    let ratio = compressed.len() as f64 / n as f64;
    TestResult {
        name: name.to_string(),
        passed: ratio > 0.85,
        p_value: None,
        statistic: ratio,
        threshold: 0.85,
        description: format!("{}/{n} = {ratio:.4}", compressed.len()),
        grade: grade_from_ratio(ratio),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batteries and scoring
// ═══════════════════════════════════════════════════════════════════════════════

/// Weighted group of tests contributing to the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Battery {
    BitLevel,
    Autocorrelation,
    ByteLevel,
    Extended,
}

impl Battery {
    pub const ALL: [Battery; 4] = [
        Battery::BitLevel,
        Battery::Autocorrelation,
        Battery::ByteLevel,
        Battery::Extended,
    ];

    pub fn weight(self) -> f64 {
        match self {
            Battery::BitLevel => 0.40,
            Battery::Autocorrelation => 0.15,
            Battery::ByteLevel => 0.30,
            Battery::Extended => 0.15,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Battery::BitLevel => "bit-level",
            Battery::Autocorrelation => "autocorrelation",
            Battery::ByteLevel => "byte-level",
            Battery::Extended => "extended",
        }
    }

    fn run(self, bits: &[u8], bytes: &[u8], cfg: &SuiteConfig) -> Vec<TestResult> {
        type Test = fn(&[u8], &SuiteConfig) -> TestResult;
        let on_bits = |name: &str, test: Test| guarded(name, || test(bits, cfg));
        let on_bytes = |name: &str, test: Test| guarded(name, || test(bytes, cfg));
        match self {
            Battery::BitLevel => vec![
                on_bits("Frequency", frequency),
                on_bits("Block Frequency", block_frequency),
                on_bits("Runs", runs),
                on_bits("Longest Run", longest_run),
                on_bits("Cumulative Sums", cumulative_sums),
            ],
            Battery::Autocorrelation => vec![on_bits("Autocorrelation", autocorrelation)],
            Battery::ByteLevel => vec![
                on_bytes("Shannon Entropy", shannon_entropy),
                on_bytes("Compression", compression),
                on_bytes("Chi-Square", chi_square),
                on_bytes("Serial Correlation", serial_correlation),
            ],
            Battery::Extended => vec![
                on_bits("DFT Spectral", dft_spectral),
                on_bytes("Compression Ratio", zlib_ratio),
            ],
        }
    }
}

/// Run a test, converting a panic into a failed result.
fn guarded(name: &str, test: impl FnOnce() -> TestResult) -> TestResult {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(test)) {
        Ok(result) => result,
        Err(_) => TestResult::failed(name, 0.0, 0.0, "Test panicked"),
    }
}

/// Fraction of passed tests, 0 for an empty set.
pub fn pass_rate(results: &[TestResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().filter(|r| r.passed).count() as f64 / results.len() as f64
}

/// Banded quality assessment of a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Failed,
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl QualityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            QualityTier::Excellent
        } else if score >= 85.0 {
            QualityTier::Good
        } else if score >= 70.0 {
            QualityTier::Acceptable
        } else if score >= 50.0 {
            QualityTier::Poor
        } else {
            QualityTier::Failed
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Acceptable => "acceptable",
            QualityTier::Poor => "poor",
            QualityTier::Failed => "failed",
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            QualityTier::Excellent => "Source randomness is excellent; no action needed",
            QualityTier::Good => "Source randomness is good; continue routine monitoring",
            QualityTier::Acceptable => {
                "Source randomness is acceptable; review failing tests and recalibrate soon"
            }
            QualityTier::Poor => {
                "Source randomness is poor; investigate the source before collecting data"
            }
            QualityTier::Failed => "Source failed randomness validation; do not use for data collection",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Results of one sub-battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryResult {
    pub battery: Battery,
    pub weight: f64,
    pub pass_rate: f64,
    pub tests: Vec<TestResult>,
}

/// Composite outcome of the full battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub bit_count: usize,
    pub alpha: f64,
    pub batteries: Vec<BatteryResult>,
    pub overall_score: f64,
    pub quality: QualityTier,
    pub recommendation: String,
    pub passed: usize,
    pub total: usize,
}

impl SuiteResult {
    /// Every individual test result, battery by battery.
    pub fn results(&self) -> impl Iterator<Item = &TestResult> {
        self.batteries.iter().flat_map(|b| b.tests.iter())
    }

    pub fn find(&self, name: &str) -> Option<&TestResult> {
        self.results().find(|r| r.name == name)
    }
}

/// Run every sub-battery on `bits` and combine them into a weighted score.
pub fn run_suite(bits: &[u8], cfg: &SuiteConfig) -> SuiteResult {
    let bytes = pack_bits(bits);
    let batteries: Vec<BatteryResult> = Battery::ALL
        .iter()
        .map(|&battery| {
            let tests = battery.run(bits, &bytes, cfg);
            BatteryResult {
                battery,
                weight: battery.weight(),
                pass_rate: pass_rate(&tests),
                tests,
            }
        })
        .collect();
    let overall_score: f64 = batteries
        .iter()
        .map(|b| b.pass_rate * b.weight * 100.0)
        .sum();
    let quality = QualityTier::from_score(overall_score);
    let total = batteries.iter().map(|b| b.tests.len()).sum();
    let passed = batteries
        .iter()
        .flat_map(|b| b.tests.iter())
        .filter(|t| t.passed)
        .count();
    SuiteResult {
        bit_count: bits.len(),
        alpha: cfg.alpha,
        batteries,
        overall_score,
        quality,
        recommendation: quality.recommendation().to_string(),
        passed,
        total,
    }
}

/// Frequency, runs, entropy and autocorrelation only; used for quick health checks.
pub fn run_lightweight(bits: &[u8], cfg: &SuiteConfig) -> Vec<TestResult> {
    let bytes = pack_bits(bits);
    vec![
        guarded("Frequency", || frequency(bits, cfg)),
        guarded("Runs", || runs(bits, cfg)),
        guarded("Shannon Entropy", || shannon_entropy(&bytes, cfg)),
        guarded("Autocorrelation", || autocorrelation(bits, cfg)),
    ]
}
