//! Trial records and the null model they are tested against.

use serde::{Deserialize, Serialize};

/// Collection context of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrialMode {
    Calibration,
    #[default]
    Session,
    Continuous,
}

impl std::fmt::Display for TrialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calibration => write!(f, "calibration"),
            Self::Session => write!(f, "session"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

impl std::str::FromStr for TrialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "calibration" => Ok(Self::Calibration),
            "session" => Ok(Self::Session),
            "continuous" => Ok(Self::Continuous),
            other => Err(format!("unknown trial mode '{other}'")),
        }
    }
}

/// Direction the operator intended the trial to deviate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intention {
    High,
    Low,
    #[default]
    Baseline,
}

impl std::fmt::Display for Intention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Low => write!(f, "low"),
            Self::Baseline => write!(f, "baseline"),
        }
    }
}

impl std::str::FromStr for Intention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            "baseline" => Ok(Self::Baseline),
            other => Err(format!("unknown intention '{other}'")),
        }
    }
}

/// One bounded-sum trial: the number of ones among N binary draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub timestamp_ms: u64,
    pub value: u32,
    pub session_id: String,
    pub mode: TrialMode,
    pub intention: Intention,
    pub sequence_number: u64,
}

/// Binomial(N, 1/2) null hypothesis for trial values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NullModel {
    pub n_bits: u32,
}

impl NullModel {
    pub fn new(n_bits: u32) -> Self {
        Self { n_bits }
    }

    pub fn expected_mean(&self) -> f64 {
        self.n_bits as f64 / 2.0
    }

    pub fn expected_variance(&self) -> f64 {
        self.n_bits as f64 / 4.0
    }

    pub fn expected_std(&self) -> f64 {
        self.expected_variance().sqrt()
    }

    /// Standardized deviation of a single trial value.
    pub fn z(&self, value: f64) -> f64 {
        let std = self.expected_std();
        if std > 0.0 {
            (value - self.expected_mean()) / std
        } else {
            0.0
        }
    }
}

impl Default for NullModel {
    fn default() -> Self {
        Self::new(200)
    }
}

/// Trial values as floats, in order.
pub fn values(trials: &[Trial]) -> Vec<f64> {
    trials.iter().map(|t| t.value as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_model_moments() {
        let null = NullModel::new(200);
        assert_eq!(null.expected_mean(), 100.0);
        assert_eq!(null.expected_variance(), 50.0);
        assert!((null.expected_std() - 50f64.sqrt()).abs() < 1e-12);
        assert!((null.z(200.0) - 100.0 / 50f64.sqrt()).abs() < 1e-12);
        assert_eq!(NullModel::new(0).z(3.0), 0.0);
    }

    #[test]
    fn test_trial_serialization_uses_lowercase_enums() {
        let trial = Trial {
            timestamp_ms: 1,
            value: 104,
            session_id: "s".into(),
            mode: TrialMode::Calibration,
            intention: Intention::High,
            sequence_number: 0,
        };
        let json = serde_json::to_string(&trial).unwrap();
        assert!(json.contains(r#""mode":"calibration""#));
        assert!(json.contains(r#""intention":"high""#));
        assert_eq!("low".parse::<Intention>().unwrap(), Intention::Low);
        assert!("sideways".parse::<TrialMode>().is_err());
    }
}
