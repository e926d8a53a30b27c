//! Likelihood, prior and posterior evaluation.
//!
//! Every evaluation runs on a private copy of the [`EvalContext`] with its
//! own seeded generator, so calls are reproducible and never observe each
//! other. Any failure at a parameter draw becomes a log-likelihood of
//! `-inf`. Cancellation, a linearity mismatch and a parameter vector of the
//! wrong length are returned as errors.

use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::context::EvalContext;
use crate::error::EstimError;
use crate::model::StateSpaceModel;
use crate::runner::RunMode;
use crate::seed::SeedPolicy;
use crate::verbosity::Verbosity;

/// Options of [`EvalContext::lprob`].
#[derive(Debug, Clone, PartialEq)]
pub struct LprobOptions {
    linear: Option<bool>,
    verbosity: Option<Verbosity>,
    temperature: f64,
    seed_policy: SeedPolicy,
}

impl LprobOptions {
    /// Session linearity and verbosity, temperature 1, [`SeedPolicy::Set`].
    pub fn new() -> Self {
        Self {
            linear: None,
            verbosity: None,
            temperature: 1.0,
            seed_policy: SeedPolicy::Set,
        }
    }

    /// Overrides the session linearity.
    pub fn with_linear(mut self, linear: bool) -> Self {
        self.linear = Some(linear);
        self
    }

    /// Overrides the session verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }

    /// Sets the likelihood temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the seed policy.
    pub fn with_seed_policy(mut self, seed_policy: SeedPolicy) -> Self {
        self.seed_policy = seed_policy;
        self
    }

    /// Linearity override.
    pub fn linear(&self) -> Option<bool> {
        self.linear
    }

    /// Verbosity override.
    pub fn verbosity(&self) -> Option<Verbosity> {
        self.verbosity
    }

    /// Likelihood temperature.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Seed policy.
    pub fn seed_policy(&self) -> SeedPolicy {
        self.seed_policy
    }

    /// Rejects negative or non-finite temperatures.
    pub fn validate(&self) -> Result<(), EstimError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(EstimError::InvalidOption {
                field: "temperature",
                reason: format!("must be finite and non-negative, got {}", self.temperature),
            });
        }
        Ok(())
    }
}

impl Default for LprobOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: StateSpaceModel> EvalContext<M> {
    /// Data log-likelihood at the free parameters `par`.
    ///
    /// The evaluation runs on a copy of this context with a generator
    /// seeded from `seed`. Numerical failures return `Ok(-inf)`.
    ///
    /// # Errors
    ///
    /// [`EstimError::LinearityMismatch`], [`EstimError::Cancelled`] and a
    /// `par` of the wrong length. Every other failure yields `Ok(-inf)`.
    pub fn llike(
        &self,
        par: &[f64],
        linear: bool,
        verbosity: Verbosity,
        seed: u64,
    ) -> Result<f64, EstimError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ctx = self.clone();
        let opts = self
            .run
            .clone()
            .with_mode(RunMode::Likelihood)
            .with_verbosity(verbosity);

        let result = ctx
            .reparameterize(par, linear)
            .and_then(|()| ctx.run(&opts, &mut rng));

        match result {
            Ok(pass) => Ok(pass.output.loglik().unwrap_or(f64::NEG_INFINITY)),
            Err(err) => {
                let failure = err.into_numeric()?;
                if verbosity.at_least(1) {
                    warn!(%failure, "likelihood evaluation failed");
                }
                if verbosity.at_least(2) {
                    warn!(?par, "parameters at failure");
                    if let Some(priors) = &self.priors {
                        for violation in priors.box_check(par)? {
                            warn!("{violation}");
                        }
                    }
                }
                Ok(f64::NEG_INFINITY)
            }
        }
    }

    /// Joint log prior density at `par`.
    ///
    /// # Errors
    ///
    /// [`EstimError::PriorsNotInitialized`] before priors are frozen, and
    /// dimension mismatches.
    pub fn lprior(&self, par: &[f64]) -> Result<f64, EstimError> {
        Ok(self.priors()?.ln_prior(par)?)
    }

    /// Log posterior density at `par`: prior plus tempered likelihood.
    ///
    /// A non-finite prior is returned without evaluating the likelihood; a
    /// non-finite likelihood is returned without adding the prior.
    pub fn lprob(&self, par: &[f64], opts: &LprobOptions) -> Result<f64, EstimError> {
        opts.validate()?;
        let start = Instant::now();

        let lp = self.lprior(par)?;
        if !lp.is_finite() {
            return Ok(lp);
        }

        let linear = opts.linear.unwrap_or(self.linear);
        let verbosity = opts.verbosity.unwrap_or(self.run.verbosity());
        let ll = if opts.temperature == 0.0 {
            0.0
        } else {
            let seed = opts.seed_policy.resolve(par, self.seed);
            self.llike(par, linear, verbosity, seed)? * opts.temperature
        };
        if !ll.is_finite() {
            return Ok(ll);
        }

        if verbosity.at_least(1) {
            info!(
                elapsed_s = start.elapsed().as_secs_f64(),
                lprior = lp,
                llike = ll,
                "posterior evaluated"
            );
        }
        Ok(lp + ll)
    }
}
