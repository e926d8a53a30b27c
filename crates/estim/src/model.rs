//! The contract a state-space model fulfils for estimation.

use std::fmt;

use augur_filter::{LinearSystem, SystemFunctions};
use augur_prior::PriorSpec;
use ndarray::Array2;

use crate::error::SystemError;

/// Expansion orders used when the model rebuilds its system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearityBudget {
    /// Maximum expansion order.
    pub l_max: usize,
    /// Maximum number of expansion points.
    pub k_max: usize,
}

impl LinearityBudget {
    /// First-order system for the Kalman filter.
    pub const LINEAR: Self = Self { l_max: 1, k_max: 0 };

    /// Piecewise system for the ensemble and particle filters.
    pub const NONLINEAR: Self = Self { l_max: 3, k_max: 16 };

    /// Budget for the given linearity.
    pub fn for_linear(linear: bool) -> Self {
        if linear { Self::LINEAR } else { Self::NONLINEAR }
    }
}

/// A parameterized state-space model.
///
/// Implementations are cloned once per likelihood evaluation and once per
/// extraction task, so `get_sys` may mutate freely.
///
/// The full structural parameter vector has `parameter_names().len()`
/// entries; the free parameters governed by priors sit at
/// `prior_positions()`, in prior declaration order.
pub trait StateSpaceModel: Clone + fmt::Debug + Send + Sync {
    /// Model name, used for default artifact names.
    fn name(&self) -> &str;

    /// State dimension.
    fn dim_x(&self) -> usize;

    /// Number of observables.
    fn dim_z(&self) -> usize;

    /// Observed data, `(periods, dim_z)`; NaN marks a missing value.
    fn data(&self) -> &Array2<f64>;

    /// Full structural parameter vector at the current values.
    fn fixed_parameters(&self) -> Vec<f64>;

    /// Positions of the prior-governed parameters in the full vector.
    fn prior_positions(&self) -> &[usize];

    /// Names of all structural parameters.
    fn parameter_names(&self) -> Vec<String>;

    /// Declarative priors, in free-parameter order.
    fn prior_spec(&self) -> &PriorSpec;

    /// Whether a system has been built.
    fn has_system(&self) -> bool;

    /// Rebuilds the system at the full parameter vector `par`.
    fn get_sys(
        &mut self,
        par: &[f64],
        budget: LinearityBudget,
        reduce: bool,
    ) -> Result<(), SystemError>;

    /// Shock covariance of the current system.
    fn shock_cov(&self) -> Array2<f64>;

    /// Loading of shocks onto states, `(dim_x, n_shocks)`.
    fn shock_loading(&self) -> Array2<f64>;

    /// First-order representation of the current system.
    fn linear_system(&self) -> Result<LinearSystem, SystemError>;

    /// Transition and observation functions; `dispatch` selects the
    /// precompiled variants.
    fn system_functions(&self, dispatch: bool) -> Result<SystemFunctions, SystemError>;

    /// Current value of a named structural parameter.
    fn parameter(&self, name: &str) -> Option<f64>;

    /// Column of the observable that is floored by the observation
    /// constraint.
    fn constrained_observable(&self) -> Option<usize>;

    /// Model-supplied initial state covariance.
    fn initial_covariance(&self) -> Option<Array2<f64>> {
        None
    }
}

/// Writes the free parameters `par` into a copy of `fixed` at `positions`.
pub fn substitute(fixed: &[f64], positions: &[usize], par: &[f64]) -> Vec<f64> {
    let mut full = fixed.to_vec();
    for (&pos, &value) in positions.iter().zip(par) {
        full[pos] = value;
    }
    full
}
