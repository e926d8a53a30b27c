//! Evaluation contexts: self-contained copies of everything one likelihood
//! evaluation or extraction task needs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use augur_filter::FilterState;
use augur_prior::PriorSet;
use rand::RngCore;

use crate::error::{EstimError, NumericFailure, PARAMETER_VECTOR};
use crate::model::{LinearityBudget, StateSpaceModel, substitute};
use crate::runner::{PassResult, RunOptions, run_pass};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), EstimError> {
        if self.is_cancelled() {
            Err(EstimError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A detached copy of a session's model, filter and evaluation settings.
///
/// Every likelihood evaluation and every extraction task works on its own
/// context, so evaluations never observe each other's system rebuilds.
#[derive(Debug, Clone)]
pub struct EvalContext<M> {
    pub(crate) model: M,
    pub(crate) filter: FilterState,
    pub(crate) fixed: Vec<f64>,
    pub(crate) positions: Vec<usize>,
    pub(crate) priors: Option<PriorSet>,
    pub(crate) linear: bool,
    pub(crate) seed: u64,
    pub(crate) run: RunOptions,
    pub(crate) cancel: CancelToken,
}

impl<M: StateSpaceModel> EvalContext<M> {
    /// Builds a context.
    ///
    /// # Errors
    ///
    /// [`EstimError::DimensionMismatch`] if a prior position lies outside
    /// the model's parameter vector.
    pub fn new(model: M, filter: FilterState) -> Result<Self, EstimError> {
        let fixed = model.fixed_parameters();
        let positions = model.prior_positions().to_vec();
        if let Some(&bad) = positions.iter().find(|&&p| p >= fixed.len()) {
            return Err(EstimError::DimensionMismatch {
                what: "prior position",
                expected: fixed.len(),
                got: bad,
            });
        }
        Ok(Self {
            model,
            filter,
            fixed,
            positions,
            priors: None,
            linear: false,
            seed: 0,
            run: RunOptions::likelihood(),
            cancel: CancelToken::new(),
        })
    }

    /// Attaches frozen priors.
    pub fn with_priors(mut self, priors: PriorSet) -> Self {
        self.priors = Some(priors);
        self
    }

    /// Sets the default linearity.
    pub fn with_linear(mut self, linear: bool) -> Self {
        self.linear = linear;
        self
    }

    /// Sets the session seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the dispatch and constraint used by likelihood runs.
    pub fn with_run_options(mut self, run: RunOptions) -> Self {
        self.run = run;
        self
    }

    /// Shares a cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Model copy.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Filter copy.
    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Default linearity.
    pub fn linear(&self) -> bool {
        self.linear
    }

    /// Session seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Frozen priors.
    pub fn priors(&self) -> Result<&PriorSet, EstimError> {
        self.priors.as_ref().ok_or(EstimError::PriorsNotInitialized)
    }

    /// Free parameters at the model's current values.
    pub fn current_parameters(&self) -> Vec<f64> {
        self.positions.iter().map(|&p| self.fixed[p]).collect()
    }

    /// Rebuilds the system at the free parameters `par` and rebinds the
    /// filter.
    ///
    /// # Errors
    ///
    /// [`EstimError::LinearityMismatch`] when `linear` does not match the
    /// filter kind; model and filter failures otherwise.
    pub fn reparameterize(&mut self, par: &[f64], linear: bool) -> Result<(), EstimError> {
        if par.len() != self.positions.len() {
            return Err(EstimError::DimensionMismatch {
                what: PARAMETER_VECTOR,
                expected: self.positions.len(),
                got: par.len(),
            });
        }
        let kind = self.filter.kind();
        if kind.requires_linear() != linear {
            return Err(EstimError::LinearityMismatch { kind, linear });
        }

        let full = substitute(&self.fixed, &self.positions, par);
        self.model
            .get_sys(&full, LinearityBudget::for_linear(linear), true)?;

        let eps_cov = self.model.shock_cov();
        if eps_cov.iter().any(|v| !v.is_finite()) {
            return Err(EstimError::Numeric(NumericFailure::NonFinite(
                "shock covariance",
            )));
        }
        let q = if linear {
            self.filter.bind_linear(self.model.linear_system()?)?;
            let co = self.model.shock_loading().dot(&eps_cov);
            co.dot(&co.t())
        } else {
            eps_cov.dot(&eps_cov)
        };
        self.filter.set_eps_cov(eps_cov)?;
        self.filter.set_q(q)?;
        Ok(())
    }

    /// Runs the filter on this context.
    pub(crate) fn run(
        &mut self,
        opts: &RunOptions,
        rng: &mut dyn RngCore,
    ) -> Result<PassResult, EstimError> {
        run_pass(&self.model, &mut self.filter, opts, rng, &self.cancel)
    }
}
