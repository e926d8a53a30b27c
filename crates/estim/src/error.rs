//! Error types for the augur-estim crate.

use std::fmt;
use std::path::PathBuf;

use augur_filter::{FilterError, FilterKind};
use augur_prior::PriorError;

/// Failure reported by a model while rebuilding its system.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SystemError {
    /// No stable solution exists at these parameters.
    #[error("no stable solution: {0}")]
    NoSolution(String),

    /// The solution is not unique.
    #[error("indeterminate system: {0}")]
    Indeterminate(String),

    /// The rebuilt system contains NaN or infinity.
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),

    /// A system component was requested that the model does not provide.
    #[error("{0} is not available; rebuild the system first")]
    Unavailable(&'static str),
}

/// Name checked when a free-parameter vector has the wrong length.
pub(crate) const PARAMETER_VECTOR: &str = "parameter vector";

/// A failure inside one likelihood evaluation. These are expected at
/// unlikely parameter draws and map to a log-likelihood of `-inf`.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericFailure {
    /// The filter pass failed on the numbers.
    Filter(FilterError),
    /// The model could not build a system.
    System(SystemError),
    /// A rebuilt quantity is not finite.
    NonFinite(&'static str),
    /// Any other failure of the evaluation.
    Evaluation(String),
}

impl fmt::Display for NumericFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(e) => write!(f, "filter: {e}"),
            Self::System(e) => write!(f, "system: {e}"),
            Self::NonFinite(what) => write!(f, "non-finite {what}"),
            Self::Evaluation(reason) => f.write_str(reason),
        }
    }
}

impl std::error::Error for NumericFailure {}

/// Error type for all fallible operations in the augur-estim crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EstimError {
    /// Returned when the requested linearity does not fit the bound filter.
    #[error("mismatch between linearity choice (linear = {linear}) and the {kind} filter")]
    LinearityMismatch {
        /// Kind of the bound filter.
        kind: FilterKind,
        /// Requested linearity.
        linear: bool,
    },

    /// Returned when a seed policy tag cannot be parsed.
    #[error("unknown seed policy '{0}'; expected one of set, vec, rand")]
    UnknownSeedPolicy(String),

    /// Returned when persisted state was requested but never stored.
    #[error("`{0}` was requested from the persisted configuration but is not present")]
    MissingPersistedState(&'static str),

    /// Returned when the dry run at the initial values yields `-inf`.
    #[error("likelihood of initial values is zero")]
    InitialLikelihoodZero,

    /// Returned when a vector or matrix does not have the expected size.
    #[error("{what} has length {got}, expected {expected}")]
    DimensionMismatch {
        /// What was checked.
        what: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        got: usize,
    },

    /// Returned when an operation needs a filter but none was created.
    #[error("no active filter; call create_filter or prep_estim first")]
    NoActiveFilter,

    /// Returned when an observation constraint cannot be resolved.
    #[error("cannot apply observation constraint: {0}")]
    MissingConstraint(String),

    /// Returned when an operation needs frozen priors but none exist.
    #[error("priors not initialized; call prep_estim first")]
    PriorsNotInitialized,

    /// Returned when an option value is out of range.
    #[error("invalid option {field}: {reason}")]
    InvalidOption {
        /// Option name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Prior construction or evaluation failed.
    #[error(transparent)]
    Prior(#[from] PriorError),

    /// Filter construction or a filter pass failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The model failed to rebuild its system.
    #[error(transparent)]
    System(#[from] SystemError),

    /// A numerical failure detected outside the filter and the model.
    #[error("numerical failure: {0}")]
    Numeric(NumericFailure),

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The shock decomposition failed on every attempt.
    #[error("extraction of sample {index} failed after {attempts} attempts: {source}")]
    Extraction {
        /// Position of the (parameter, replicate) pair in the grid.
        index: usize,
        /// Attempts made.
        attempts: usize,
        /// Error of the last attempt.
        source: FilterError,
    },

    /// Extracted samples could not be stacked into a report.
    #[error("cannot assemble extraction report: {0}")]
    Report(String),

    /// The worker pool could not be built.
    #[error("worker pool: {0}")]
    Pool(String),

    /// Reading or writing a persisted artifact failed.
    #[error("failed to persist {path}: {reason}")]
    Persist {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

impl EstimError {
    /// Splits errors into contained failures (`Ok`) and errors that must
    /// reach the caller (`Err`).
    ///
    /// Only cancellation, a linearity mismatch and a free-parameter vector
    /// of the wrong length escape; filter interrupts become
    /// [`EstimError::Cancelled`].
    pub fn into_numeric(self) -> Result<NumericFailure, EstimError> {
        match self {
            Self::Numeric(failure) => Ok(failure),
            Self::Filter(e) if e.is_interrupt() => Err(Self::Cancelled),
            fault @ (Self::Cancelled
            | Self::LinearityMismatch { .. }
            | Self::DimensionMismatch {
                what: PARAMETER_VECTOR,
                ..
            }) => Err(fault),
            Self::Filter(e) => Ok(NumericFailure::Filter(e)),
            Self::System(e) => Ok(NumericFailure::System(e)),
            other => Ok(NumericFailure::Evaluation(other.to_string())),
        }
    }

    /// Whether this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
