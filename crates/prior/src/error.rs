//! Error types for the augur-prior crate.

/// Error type for all fallible operations in the augur-prior crate.
///
/// Every variant describes a malformed specification or a caller
/// mistake. None of them is recovered inside the crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriorError {
    /// Returned when a prior specification contains no entries.
    #[error("prior specification is empty")]
    EmptySpec,

    /// Returned when two entries share a parameter name.
    #[error("duplicate prior for parameter '{name}'")]
    DuplicateName {
        /// Parameter name declared twice.
        name: String,
    },

    /// Returned when the distribution tag is not in the catalogue.
    #[error("unknown distribution '{dist}' for parameter '{name}'")]
    UnknownDistribution {
        /// Parameter name.
        name: String,
        /// Distribution tag as declared.
        dist: String,
    },

    /// Returned when the moments cannot be matched by the distribution family.
    #[error("malformed prior for parameter '{name}': {reason}")]
    Malformed {
        /// Parameter name.
        name: String,
        /// Human readable reason.
        reason: String,
    },

    /// Returned when the lower bound is not strictly below the upper bound.
    #[error("invalid bounds for parameter '{name}': lower {lower} must be below upper {upper}")]
    InvalidBounds {
        /// Parameter name.
        name: String,
        /// Lower bound.
        lower: f64,
        /// Upper bound.
        upper: f64,
    },

    /// Returned when the initial value lies outside the bounds.
    #[error("initial value {init} of parameter '{name}' lies outside [{lower}, {upper}]")]
    InitOutOfBounds {
        /// Parameter name.
        name: String,
        /// Offending initial value.
        init: f64,
        /// Lower bound.
        lower: f64,
        /// Upper bound.
        upper: f64,
    },

    /// Returned when a parameter vector does not match the number of priors.
    #[error("parameter vector has length {got}, expected {expected}")]
    DimensionMismatch {
        /// Number of priors.
        expected: usize,
        /// Length of the vector supplied.
        got: usize,
    },
}
