//! Error type shared by every engine operation.

use thiserror::Error;

/// Errors returned by analyses, calibration and storage collaborators.
///
/// Anomalies, low quality scores and failed randomness tests are not errors;
/// they are reported as data inside the corresponding result records.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{analysis}: insufficient data (need at least {needed}, got {got})")]
    InsufficientData {
        analysis: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("a calibration is already running")]
    ConcurrentCalibration,

    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    #[error("trial source error: {0}")]
    Source(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub(crate) fn insufficient(analysis: &'static str, needed: usize, got: usize) -> Self {
        EngineError::InsufficientData {
            analysis,
            needed,
            got,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = EngineError::insufficient("network variance", 1, 0);
        assert_eq!(
            err.to_string(),
            "network variance: insufficient data (need at least 1, got 0)"
        );
        let err = EngineError::invalid("trial_bits", "must be positive");
        assert!(err.to_string().contains("`trial_bits`"));
    }

    #[test]
    fn test_io_errors_convert() {
        fn open() -> Result<()> {
            std::fs::File::open("/definitely/not/here")?;
            Ok(())
        }
        assert!(matches!(open(), Err(EngineError::Io(_))));
    }
}
