//! Distribution functions and small numeric helpers used by the analyses.
//!
//! Thin wrappers over `statrs` that never return NaN or infinity: inputs
//! outside a distribution's domain map to the conservative answer (p = 1,
//! statistic 0).

use statrs::distribution::{ContinuousCDF, FisherSnedecor, Normal, StudentsT};
use statrs::function::gamma::gamma_ur;

pub use statrs::function::erf::{erf, erfc};

/// Values below this magnitude are treated as zero.
pub const EPSILON: f64 = 1e-12;

/// Replace NaN and infinities with zero.
pub fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Inverse standard normal CDF, with `p` clamped into the open unit interval.
pub fn normal_inverse(p: f64) -> f64 {
    let p = p.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
    Normal::standard().inverse_cdf(p)
}

/// Two-tailed standard normal p-value of `z`.
pub fn normal_two_tailed(z: f64) -> f64 {
    erfc(z.abs() / std::f64::consts::SQRT_2).clamp(0.0, 1.0)
}

/// Upper-tail standard normal p-value of `z`.
pub fn normal_upper_tail(z: f64) -> f64 {
    (0.5 * erfc(z / std::f64::consts::SQRT_2)).clamp(0.0, 1.0)
}

/// Regularized upper incomplete gamma Q(a, x).
pub fn upper_incomplete_gamma(a: f64, x: f64) -> f64 {
    if !(a > 0.0) || !a.is_finite() || !(x > 0.0) {
        return 1.0;
    }
    if x.is_infinite() {
        return 0.0;
    }
    gamma_ur(a, x).clamp(0.0, 1.0)
}

/// Upper-tail probability of the chi-square distribution.
pub fn chi_square_sf(statistic: f64, df: f64) -> f64 {
    upper_incomplete_gamma(df / 2.0, statistic / 2.0)
}

/// Wilson–Hilferty approximation of the chi-square quantile.
pub fn chi_square_inverse(p: f64, df: f64) -> f64 {
    if !(df > 0.0) {
        return 0.0;
    }
    let z = normal_inverse(p);
    let h = 2.0 / (9.0 * df);
    (df * (1.0 - h + z * h.sqrt()).powi(3)).max(0.0)
}

/// Two-sided p-value of a Student t statistic.
pub fn t_two_sided(t: f64, df: f64) -> f64 {
    if !(df > 0.0) || !t.is_finite() {
        return 1.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// CDF of the F distribution.
pub fn f_cdf(f: f64, d1: f64, d2: f64) -> f64 {
    if !(f > 0.0) || !f.is_finite() {
        return 0.0;
    }
    match FisherSnedecor::new(d1, d2) {
        Ok(dist) => dist.cdf(f).clamp(0.0, 1.0),
        Err(_) => 0.0,
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator); 0 for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Lag-k autocorrelation normalised by the population variance.
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    if lag == 0 || lag >= n {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n as f64;
    if var < EPSILON {
        return 0.0;
    }
    let sum: f64 = (0..n - lag)
        .map(|i| (values[i] - m) * (values[i + lag] - m))
        .sum();
    sum / ((n - lag) as f64 * var)
}

/// Pearson correlation of paired samples; 0 when either side is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let sxx: f64 = x.iter().map(|a| (a - mx) * (a - mx)).sum();
    let syy: f64 = y.iter().map(|b| (b - my) * (b - my)).sum();
    if sxx < EPSILON || syy < EPSILON {
        return 0.0;
    }
    finite_or_zero(sxy / (sxx * syy).sqrt())
}

/// Ordinary least squares fit of `y` on `x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub slope_se: f64,
    pub r_squared: f64,
    pub n: usize,
}

impl LinearFit {
    pub fn fit(x: &[f64], y: &[f64]) -> Self {
        let n = x.len().min(y.len());
        let (x, y) = (&x[..n], &y[..n]);
        let mx = mean(x);
        let my = mean(y);
        let sxx: f64 = x.iter().map(|v| (v - mx) * (v - mx)).sum();
        let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let syy: f64 = y.iter().map(|v| (v - my) * (v - my)).sum();
        if n < 2 || sxx < EPSILON {
            return Self {
                slope: 0.0,
                intercept: my,
                slope_se: 0.0,
                r_squared: 0.0,
                n,
            };
        }
        let slope = sxy / sxx;
        let intercept = my - slope * mx;
        let ss_res: f64 = x
            .iter()
            .zip(y)
            .map(|(a, b)| {
                let r = b - (intercept + slope * a);
                r * r
            })
            .sum();
        let slope_se = if n > 2 {
            (ss_res / (n - 2) as f64 / sxx).sqrt()
        } else {
            0.0
        };
        let r_squared = if syy > EPSILON { 1.0 - ss_res / syy } else { 0.0 };
        Self {
            slope: finite_or_zero(slope),
            intercept: finite_or_zero(intercept),
            slope_se: finite_or_zero(slope_se),
            r_squared: finite_or_zero(r_squared),
            n,
        }
    }

    pub fn t_statistic(&self) -> f64 {
        if self.slope_se > EPSILON {
            self.slope / self.slope_se
        } else {
            0.0
        }
    }

    /// Two-sided p-value of the slope. A perfect fit (zero standard error)
    /// is significant exactly when the slope is non-zero.
    pub fn p_value(&self) -> f64 {
        if self.n < 3 {
            return 1.0;
        }
        if self.slope_se <= EPSILON {
            return if self.slope.abs() > EPSILON { 0.0 } else { 1.0 };
        }
        t_two_sided(self.t_statistic(), (self.n - 2) as f64)
    }
}
