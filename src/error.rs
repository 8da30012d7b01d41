use thiserror::Error;

/// Broad classification of a failed simulation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs are inconsistent or out of range; detected before any simulation work.
    Configuration,
    /// The covariance structure cannot be factorized.
    Numerical,
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("dimension mismatch: `{field}` has length {actual}, expected {expected}")]
    DimensionMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("portfolio weights sum to {0}, expected 1")]
    WeightsNotNormalized(f64),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("correlation matrix is not symmetric at ({row}, {col}): {upper} vs {lower}")]
    AsymmetricCorrelation {
        row: usize,
        col: usize,
        upper: f64,
        lower: f64,
    },
    #[error("correlation matrix entry ({row}, {col}) = {value} is invalid: {reason}")]
    InvalidCorrelationEntry {
        row: usize,
        col: usize,
        value: f64,
        reason: &'static str,
    },
    #[error("covariance matrix is not positive semi-definite (pivot {pivot} = {value:e})")]
    NotPositiveSemiDefinite { pivot: usize, value: f64 },
    #[error("nearest-correlation repair failed: {0}")]
    RepairFailed(String),
}

impl SimulationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimulationError::NotPositiveSemiDefinite { .. } | SimulationError::RepairFailed(_) => {
                ErrorKind::Numerical
            }
            _ => ErrorKind::Configuration,
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SimulationError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimulationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let e = SimulationError::NotPositiveSemiDefinite { pivot: 2, value: -0.3 };
        assert_eq!(e.kind(), ErrorKind::Numerical);

        let e = SimulationError::WeightsNotNormalized(0.9);
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert!(e.to_string().contains("0.9"));

        let e = SimulationError::invalid("num_steps", "must be positive");
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert_eq!(e.to_string(), "invalid parameter `num_steps`: must be positive");
    }
}
