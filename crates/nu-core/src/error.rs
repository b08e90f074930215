//! Error types for NextUnfold

use thiserror::Error;

/// NextUnfold error type
#[derive(Error, Debug)]
pub enum Error {
    /// Cause- or effect-indexed containers disagree in length.
    #[error("Shape mismatch: {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Which container was checked.
        what: String,
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// A response column sums to zero, so it cannot be normalized.
    #[error("Undefined normalization: response column for cause bin {cause} sums to {sum}")]
    UndefinedNormalization {
        /// Cause bin index.
        cause: usize,
        /// Offending column sum.
        sum: f64,
    },

    /// Prior has a negative or non-finite entry, or cannot be normalized.
    #[error("Invalid prior: {0}")]
    InvalidPrior(String),

    /// Test statistic name is not recognized.
    #[error("Unknown test statistic: {0:?}")]
    UnknownTestStatistic(String),

    /// Regularizer kind or option is not recognized.
    #[error("Unknown regularizer config: {0}")]
    UnknownRegularizerConfig(String),

    /// A regularization group has fewer points than the spline needs.
    #[error(
        "Insufficient group size: group {group} has {size} bins, spline of degree {degree} needs at least {required}"
    )]
    InsufficientGroupSize {
        /// Group id.
        group: i64,
        /// Number of cause bins in the group.
        size: usize,
        /// Spline degree.
        degree: usize,
        /// Minimum number of bins (degree + 1).
        required: usize,
    },

    /// Numerical breakdown during an iteration.
    #[error("Non-convergent at iteration {iteration}: {reason}")]
    NonConvergent {
        /// 1-based iteration at which the failure was detected.
        iteration: usize,
        /// What went wrong.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Shorthand for [`Error::ShapeMismatch`].
    pub fn shape(what: impl Into<String>, expected: usize, got: usize) -> Self {
        Error::ShapeMismatch { what: what.into(), expected, got }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_message() {
        let e = Error::shape("efficiencies", 3, 2);
        assert_eq!(e.to_string(), "Shape mismatch: efficiencies: expected 3, got 2");
    }

    #[test]
    fn test_group_size_message_names_group() {
        let e = Error::InsufficientGroupSize { group: 7, size: 2, degree: 3, required: 4 };
        assert!(e.to_string().contains("group 7"));
    }
}
