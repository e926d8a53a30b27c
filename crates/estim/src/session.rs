//! The estimation session: one model, its active filter, persisted
//! configuration and the worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use augur_filter::{BuiltinFilters, FilterKind, FilterProvider, FilterState, Trajectory};
use augur_prior::{BoundViolation, PriorSet};
use chrono::Utc;
use ndarray::Array3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::config::{DEFAULT_FILTER_N, EstimOptions, EstimationConfig, PoolSize};
use crate::context::{CancelToken, EvalContext};
use crate::error::EstimError;
use crate::extract::ExtractionReport;
use crate::likelihood::LprobOptions;
use crate::model::{LinearityBudget, StateSpaceModel};
use crate::pool::{Mapper, WorkerPool};
use crate::runner::{FilterOutput, RunMode, RunOptions, run_pass};
use crate::verbosity::Verbosity;

/// An estimation session around a model.
///
/// The session owns the only mutable copy of the model and the active
/// filter. Likelihood evaluations and extraction tasks work on
/// [`EvalContext`] copies and never write back.
#[derive(Debug)]
pub struct Estimation<M> {
    pub(crate) model: M,
    pub(crate) config: EstimationConfig,
    pub(crate) provider: Arc<dyn FilterProvider>,
    pub(crate) filter: Option<FilterState>,
    pub(crate) ll: Option<f64>,
    pub(crate) x: Option<Trajectory>,
    pub(crate) covs: Option<Array3<f64>>,
    pub(crate) pool: Option<WorkerPool>,
    pub(crate) debug: bool,
    pub(crate) verbosity: Verbosity,
    pub(crate) eps_report: Option<ExtractionReport>,
    pub(crate) workdir: PathBuf,
    pub(crate) cancel: CancelToken,
}

impl<M: StateSpaceModel> Estimation<M> {
    /// A session with the built-in filters and an empty configuration.
    pub fn new(model: M, workdir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            config: EstimationConfig::default(),
            provider: Arc::new(BuiltinFilters),
            filter: None,
            ll: None,
            x: None,
            covs: None,
            pool: None,
            debug: false,
            verbosity: Verbosity::SILENT,
            eps_report: None,
            workdir: workdir.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Uses `provider` to build filter backends.
    pub fn with_provider(mut self, provider: Arc<dyn FilterProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Starts from a persisted configuration.
    pub fn with_config(mut self, config: EstimationConfig) -> Self {
        self.config = config;
        self
    }

    /// The model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Estimation configuration.
    pub fn config(&self) -> &EstimationConfig {
        &self.config
    }

    /// Mutable estimation configuration.
    pub fn config_mut(&mut self) -> &mut EstimationConfig {
        &mut self.config
    }

    /// Active filter.
    pub fn filter(&self) -> Option<&FilterState> {
        self.filter.as_ref()
    }

    /// Mutable active filter.
    pub fn filter_mut(&mut self) -> Option<&mut FilterState> {
        self.filter.as_mut()
    }

    /// Log-likelihood of the last likelihood run.
    pub fn ll(&self) -> Option<f64> {
        self.ll
    }

    /// Trajectory of the last filter or smoother run.
    pub fn x(&self) -> Option<&Trajectory> {
        self.x.as_ref()
    }

    /// Covariances of the last Kalman run.
    pub fn covs(&self) -> Option<&Array3<f64>> {
        self.covs.as_ref()
    }

    /// Worker pool, if one is open.
    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    /// Last extraction report.
    pub fn eps_report(&self) -> Option<&ExtractionReport> {
        self.eps_report.as_ref()
    }

    /// Directory relative artifact paths resolve against.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Session verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Sets the session verbosity.
    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// Whether mapping is forced onto the calling thread.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Forces mapping onto the calling thread.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Token that cancels running evaluations of this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Evaluation context copied from the session.
    ///
    /// # Errors
    ///
    /// [`EstimError::NoActiveFilter`] before a filter is created.
    pub fn context(&self) -> Result<EvalContext<M>, EstimError> {
        let filter = self.filter.clone().ok_or(EstimError::NoActiveFilter)?;
        let linear = self
            .config
            .linear
            .unwrap_or(filter.kind().requires_linear());
        let run = RunOptions::likelihood()
            .with_dispatch(self.config.dispatch)
            .with_constraint(self.config.constr_data.clone())
            .with_verbosity(self.verbosity);
        let mut ctx = EvalContext::new(self.model.clone(), filter)?
            .with_linear(linear)
            .with_seed(self.config.seed.unwrap_or(0))
            .with_run_options(run)
            .with_cancel(self.cancel.clone());
        if let Some(priors) = &self.config.prior_set {
            ctx = ctx.with_priors(priors.clone());
        }
        Ok(ctx)
    }

    /// Runs the active filter on the model's data and stores the result:
    /// the log-likelihood in [`ll`](Self::ll), a trajectory in
    /// [`x`](Self::x), Kalman covariances in [`covs`](Self::covs).
    pub fn run_filter(&mut self, opts: &RunOptions) -> Result<FilterOutput, EstimError> {
        let filter = self.filter.as_mut().ok_or(EstimError::NoActiveFilter)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed.unwrap_or(0));
        let pass = run_pass(&self.model, filter, opts, &mut rng, &self.cancel)?;

        match &pass.output {
            FilterOutput::Likelihood(ll) => self.ll = Some(*ll),
            FilterOutput::Trajectory(tr) => self.x = Some(tr.clone()),
        }
        if pass.covs.is_some() {
            self.covs = pass.covs;
        }
        Ok(pass.output)
    }

    /// [`run_filter`](Self::run_filter) in likelihood mode.
    pub fn get_ll(&mut self, opts: RunOptions) -> Result<f64, EstimError> {
        let output = self.run_filter(&opts.with_mode(RunMode::Likelihood))?;
        Ok(output.loglik().unwrap_or(f64::NEG_INFINITY))
    }

    /// Data log-likelihood at `par` with the session's linearity and seed.
    pub fn llike(&self, par: &[f64]) -> Result<f64, EstimError> {
        let ctx = self.context()?;
        ctx.llike(par, ctx.linear(), self.verbosity, ctx.seed())
    }

    /// Joint log prior density at `par`.
    pub fn lprior(&self, par: &[f64]) -> Result<f64, EstimError> {
        Ok(self.config.priors()?.ln_prior(par)?)
    }

    /// Log posterior density at `par`.
    pub fn lprob(&self, par: &[f64], opts: &LprobOptions) -> Result<f64, EstimError> {
        self.context()?.lprob(par, opts)
    }

    /// [`lprob`](Self::lprob) over many vectors through the session mapper.
    /// Results are in input order.
    pub fn lprob_batch(
        &self,
        pars: Vec<Vec<f64>>,
        opts: &LprobOptions,
    ) -> Result<Vec<f64>, EstimError> {
        let ctx = self.context()?;
        self.mapper()
            .map(pars, |par| ctx.lprob(&par, opts))
            .into_iter()
            .collect()
    }

    /// Opens a worker pool, closing any previous one first.
    pub fn create_pool(
        &mut self,
        cores: Option<usize>,
        thread_limit: usize,
    ) -> Result<&WorkerPool, EstimError> {
        self.pool = None;
        let pool = WorkerPool::new(cores, thread_limit)?;
        Ok(self.pool.insert(pool))
    }

    /// Closes the worker pool.
    pub fn close_pool(&mut self) {
        self.pool = None;
    }

    /// Mapper over the pool, or sequential in debug mode or without a pool.
    pub fn mapper(&self) -> Mapper<'_> {
        match &self.pool {
            Some(pool) if !self.debug => pool.mapper(),
            _ => Mapper::Sequential,
        }
    }

    /// Prepares the session for estimation.
    ///
    /// Settings missing from `opts` fall back to the persisted
    /// configuration, then to the defaults. A filter is created (Kalman on
    /// the linear path) and a dry likelihood run at the model's current
    /// parameters must succeed.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`EstimError::MissingPersistedState`] | `load_r` without persisted `filter_r` |
    /// | [`EstimError::InitialLikelihoodZero`] | dry run yields `-inf` |
    /// | [`EstimError::LinearityMismatch`] | nonlinear path with a Kalman filter |
    /// | [`EstimError::DimensionMismatch`] | priors do not match the free parameters |
    #[tracing::instrument(skip_all, fields(model = self.model.name()))]
    pub fn prep_estim(&mut self, opts: EstimOptions) -> Result<(), EstimError> {
        opts.validate()?;

        let n = opts.n().or(self.config.filter_n).unwrap_or(DEFAULT_FILTER_N);
        let linear = opts.linear().or(self.config.linear).unwrap_or(false);
        let seed = opts.seed().or(self.config.seed).unwrap_or(0);
        self.config.filter_n = Some(n);
        self.config.linear = Some(linear);
        self.config.seed = Some(seed);
        self.config.constr_data = opts.constraint().clone();
        self.config.dispatch = opts.dispatch();
        self.config.created = Some(Utc::now());
        self.verbosity = opts.verbosity();
        self.debug = opts.debug();

        if !self.model.has_system() {
            let fixed = self.model.fixed_parameters();
            self.model
                .get_sys(&fixed, LinearityBudget::for_linear(linear), true)?;
        }

        let mut filter_opts = opts.filter().clone();
        if linear {
            filter_opts = filter_opts.with_kind(FilterKind::Kalman);
        } else if let Some(kind) = filter_opts.kind().filter(FilterKind::requires_linear) {
            return Err(EstimError::LinearityMismatch { kind, linear });
        }
        if filter_opts.members().is_none() {
            filter_opts = filter_opts.with_members(n);
        }
        self.create_filter(filter_opts)?;

        match (self.config.filter_r.clone(), opts.load_r()) {
            (Some(r), _) => {
                let filter = self.filter.as_mut().ok_or(EstimError::NoActiveFilter)?;
                filter.set_r(r)?;
            }
            (None, true) => return Err(EstimError::MissingPersistedState("filter_r")),
            (None, false) => {}
        }

        let dry_run = RunOptions::likelihood()
            .with_dispatch(self.config.dispatch)
            .with_constraint(self.config.constr_data.clone())
            .with_verbosity(self.verbosity);
        let ll = self.get_ll(dry_run)?;
        if ll == f64::NEG_INFINITY {
            return Err(EstimError::InitialLikelihoodZero);
        }
        info!(ll, linear, n, "model operational");

        let spec = self.model.prior_spec();
        let free = self.model.prior_positions().len();
        if spec.len() != free {
            return Err(EstimError::DimensionMismatch {
                what: "priors",
                expected: free,
                got: spec.len(),
            });
        }
        self.config.ndim = spec.len();
        self.config.prior_names = spec.names().into_iter().map(str::to_string).collect();
        if self.config.prior_set.is_none() || opts.eval_priors() {
            self.config.prior_set = Some(PriorSet::from_spec(spec)?);
        }

        match opts.pool() {
            PoolSize::Auto => {
                self.create_pool(None, 1)?;
            }
            PoolSize::Cores(cores) => {
                self.create_pool(Some(cores), 1)?;
            }
            PoolSize::Disabled => self.close_pool(),
        }
        Ok(())
    }

    /// Checks `par` (the model's current free parameters when `None`)
    /// against the prior bounds and logs every violation.
    pub fn box_check(&self, par: Option<&[f64]>) -> Result<Vec<BoundViolation>, EstimError> {
        let current: Vec<f64>;
        let par = match par {
            Some(par) => par,
            None => {
                let fixed = self.model.fixed_parameters();
                current = self
                    .model
                    .prior_positions()
                    .iter()
                    .map(|&p| fixed.get(p).copied().unwrap_or(f64::NAN))
                    .collect();
                &current
            }
        };
        let violations = self.config.priors()?.box_check(par)?;
        for violation in &violations {
            warn!("{violation}");
        }
        Ok(violations)
    }
}
