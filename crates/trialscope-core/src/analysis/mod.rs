//! Aggregate significance analyses over a window of trials.
//!
//! Every analysis takes an ordered slice of [`Trial`](crate::trial::Trial)s
//! and returns an immutable, serializable result record. Significance-bearing
//! results share the [`Significance`] banding.

pub mod effect_size;
pub mod excursion;
pub mod network_variance;
pub mod trend;

use serde::{Deserialize, Serialize};

pub use effect_size::{EffectMagnitude, EffectSizeCalculator, EffectSizeResult};
pub use excursion::{
    CumulativePoint, CumulativeResult, Direction, ExcursionDetector, ExcursionPeriod,
    cumulative_series, detect_excursions,
};
pub use network_variance::{NetworkVarianceAnalyzer, NetworkVarianceResult, ZScoreResult};
pub use trend::{ChangePoint, TrendDetector, TrendDirection, TrendResult, WindowMean};

/// Four-band classification of a p-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    None,
    Marginal,
    Significant,
    HighlySignificant,
}

impl Significance {
    pub fn from_p(p: f64) -> Self {
        if p < 0.001 {
            Significance::HighlySignificant
        } else if p < 0.05 {
            Significance::Significant
        } else if p < 0.1 {
            Significance::Marginal
        } else {
            Significance::None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Significance::None => "none",
            Significance::Marginal => "marginal",
            Significance::Significant => "significant",
            Significance::HighlySignificant => "highly significant",
        }
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_significance_bands() {
        assert_eq!(Significance::from_p(0.0005), Significance::HighlySignificant);
        assert_eq!(Significance::from_p(0.001), Significance::Significant);
        assert_eq!(Significance::from_p(0.049), Significance::Significant);
        assert_eq!(Significance::from_p(0.05), Significance::Marginal);
        assert_eq!(Significance::from_p(0.1), Significance::None);
        assert!(Significance::Significant > Significance::Marginal);
    }
}
