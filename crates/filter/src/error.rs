//! Error types for the augur-filter crate.

use crate::kind::FilterKind;

/// Error type for all fallible operations in the augur-filter crate.
///
/// Numerical variants (`NotPositiveDefinite`, `Singular`, `NonFinite`)
/// are expected at unlikely parameter draws and are contained by the
/// likelihood evaluator. `Interrupted` signals cancellation and must be
/// propagated by every caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    /// Returned when a provider cannot build the requested kind.
    #[error("{kind} filters are not available from this provider")]
    Unsupported {
        /// Requested kind.
        kind: FilterKind,
    },

    /// Returned when a filter tag cannot be parsed.
    #[error("unknown filter kind '{0}'")]
    UnknownKind(String),

    /// Returned when a backend is asked for an operation it does not offer.
    #[error("{kind} filters do not support {operation}")]
    UnsupportedOperation {
        /// Kind of the backend.
        kind: FilterKind,
        /// Requested operation.
        operation: &'static str,
    },

    /// Returned when an array does not have the expected dimension.
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// What was checked.
        what: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        got: usize,
    },

    /// Returned when a pass needs a system binding that is missing.
    #[error("no {0} bound to the filter")]
    Unbound(&'static str),

    /// Returned when a Cholesky factorization fails.
    #[error("{context}: matrix is not positive definite")]
    NotPositiveDefinite {
        /// Where the factorization failed.
        context: &'static str,
    },

    /// Returned when a pseudo-inverse cannot be computed.
    #[error("{context}: singular matrix")]
    Singular {
        /// Where the inversion failed.
        context: &'static str,
    },

    /// Returned when an input or intermediate contains NaN or infinity.
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),

    /// Returned when smoothing or drawing is requested before a stored pass.
    #[error("no stored filter history; run a batch pass first")]
    NoHistory,

    /// Returned when the pass was cancelled from outside.
    #[error("filter pass interrupted")]
    Interrupted,

    /// Free-form failure reported by an external backend.
    #[error("filter backend failure: {0}")]
    Backend(String),
}

impl FilterError {
    /// Whether this error is a cancellation signal.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Whether this error stems from the numbers rather than from how the
    /// filter was configured.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::NotPositiveDefinite { .. }
                | Self::Singular { .. }
                | Self::NonFinite(_)
                | Self::Backend(_)
        )
    }
}
