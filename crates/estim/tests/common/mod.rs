//! Shared fixtures: an AR(1) model and a scripted ensemble/particle
//! backend.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use augur_estim::{Estimation, LinearityBudget, StateSpaceModel, SystemError};
use augur_filter::{
    BatchOptions, BatchOutput, BuiltinFilters, FilterBackend, FilterDims, FilterError,
    FilterKind, FilterParams, FilterProvider, LinearSystem, NpasDraw, NpasOptions,
    SmoothRequest, SystemFunctions, Trajectory, eps_fn, observation_fn, transition_fn,
};
use augur_prior::{PriorEntry, PriorSpec};
use ndarray::{Array1, Array2, Array3, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};

pub const PARAMETER_NAMES: [&str; 3] = ["rho", "sigma", "elb_level"];

/// `x_t = rho x_{t-1} + sigma eps_t`, `z_t = x_t + v_t`.
///
/// Free parameters are `rho` and `sigma`; `elb_level` is fixed and floors
/// the observable under the particle constraint.
#[derive(Debug, Clone)]
pub struct ToyModel {
    name: String,
    data: Array2<f64>,
    current: Vec<f64>,
    positions: Vec<usize>,
    priors: PriorSpec,
    built: bool,
    sys_calls: Arc<AtomicUsize>,
}

impl ToyModel {
    pub fn new(periods: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut data = Array2::zeros((periods, 1));
        let mut x = 0.0;
        for t in 0..periods {
            x = 0.5 * x + 0.3 * noise.sample(&mut rng);
            data[[t, 0]] = x + 0.1 * noise.sample(&mut rng);
        }
        let priors = PriorSpec::new()
            .with_entry(PriorEntry::new("rho", "beta", 0.5, 0.2).with_bounds(0.01, 0.99))
            .with_entry(PriorEntry::new("sigma", "inv_gamma", 0.3, 0.2));
        Self {
            name: "toy".to_string(),
            data,
            current: vec![0.5, 0.3, -0.5],
            positions: vec![0, 1],
            priors,
            built: false,
            sys_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Starts from different structural values.
    pub fn with_values(mut self, rho: f64, sigma: f64) -> Self {
        self.current[0] = rho;
        self.current[1] = sigma;
        self
    }

    /// Renames the model; report file names derive from it.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Declares priors that do not match the free parameters.
    pub fn with_priors(mut self, priors: PriorSpec) -> Self {
        self.priors = priors;
        self
    }

    /// Number of `get_sys` calls made by this model and all its clones.
    pub fn sys_calls(&self) -> usize {
        self.sys_calls.load(Ordering::SeqCst)
    }

    fn rho(&self) -> f64 {
        self.current[0]
    }

    fn sigma(&self) -> f64 {
        self.current[1]
    }
}

impl StateSpaceModel for ToyModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim_x(&self) -> usize {
        1
    }

    fn dim_z(&self) -> usize {
        1
    }

    fn data(&self) -> &Array2<f64> {
        &self.data
    }

    fn fixed_parameters(&self) -> Vec<f64> {
        self.current.clone()
    }

    fn prior_positions(&self) -> &[usize] {
        &self.positions
    }

    fn parameter_names(&self) -> Vec<String> {
        PARAMETER_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn prior_spec(&self) -> &PriorSpec {
        &self.priors
    }

    fn has_system(&self) -> bool {
        self.built
    }

    fn get_sys(
        &mut self,
        par: &[f64],
        _budget: LinearityBudget,
        _reduce: bool,
    ) -> Result<(), SystemError> {
        self.sys_calls.fetch_add(1, Ordering::SeqCst);
        let (rho, sigma) = (par[0], par[1]);
        if rho > 0.95 {
            return Err(SystemError::Indeterminate(format!("rho = {rho}")));
        }
        if sigma <= 0.0 {
            return Err(SystemError::NoSolution(format!("sigma = {sigma}")));
        }
        self.current = par.to_vec();
        self.built = true;
        Ok(())
    }

    fn shock_cov(&self) -> Array2<f64> {
        Array2::from_elem((1, 1), self.sigma())
    }

    fn shock_loading(&self) -> Array2<f64> {
        Array2::ones((1, 1))
    }

    fn linear_system(&self) -> Result<LinearSystem, SystemError> {
        if !self.built {
            return Err(SystemError::Unavailable("linear system"));
        }
        LinearSystem::new(Array2::from_elem((1, 1), self.rho()), Array2::ones((1, 1)))
            .map_err(|_| SystemError::NonFinite("linear system"))
    }

    fn system_functions(&self, dispatch: bool) -> Result<SystemFunctions, SystemError> {
        let (rho, sigma) = (self.rho(), self.sigma());
        Ok(SystemFunctions::new(
            transition_fn(move |x, eps| x.mapv(|v| rho * v) + &eps.mapv(|e| sigma * e)),
            observation_fn(|x| x.to_owned()),
        )
        .with_get_eps(eps_fn(move |x_prev, x| {
            (&x.to_owned() - &x_prev.mapv(|v| rho * v)) / sigma
        }))
        .with_dispatched(dispatch))
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        PARAMETER_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.current[i])
    }

    fn constrained_observable(&self) -> Option<usize> {
        Some(0)
    }
}

/// Scripted behaviour of [`MockBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockScript {
    /// Decomposition attempts that fail before one succeeds, per clone.
    pub npas_failures: usize,
    /// Every pass reports an interrupt.
    pub interrupt: bool,
    /// Every pass yields a NaN likelihood.
    pub nan_likelihood: bool,
    /// Passes with `q[0, 0]` above this value yield `+inf`.
    pub overflow_above: Option<f64>,
    /// Passes with `q[0, 0]` above this value fail on a reduced system.
    pub mismatch_above: Option<f64>,
}

/// Options and smoother requests seen by every mock backend of a
/// provider, clones included.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    batches: Arc<Mutex<Vec<BatchOptions>>>,
    smooths: Arc<Mutex<Vec<SmoothRequest>>>,
}

impl CallLog {
    pub fn last_batch(&self) -> Option<BatchOptions> {
        self.batches.lock().unwrap().last().copied()
    }

    pub fn last_smooth(&self) -> Option<SmoothRequest> {
        self.smooths.lock().unwrap().last().copied()
    }

    pub fn smooth_count(&self) -> usize {
        self.smooths.lock().unwrap().len()
    }
}

/// Provider of mock ensemble and particle backends; Kalman comes from the
/// built-in provider.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    pub script: MockScript,
    pub log: CallLog,
}

impl MockProvider {
    pub fn new(script: MockScript) -> Arc<dyn FilterProvider> {
        Self::logged(script, CallLog::default())
    }

    /// Provider whose backends record their calls in `log`.
    pub fn logged(script: MockScript, log: CallLog) -> Arc<dyn FilterProvider> {
        Arc::new(Self { script, log })
    }
}

impl FilterProvider for MockProvider {
    fn build(
        &self,
        kind: FilterKind,
        dims: FilterDims,
        members: Option<usize>,
    ) -> Result<Box<dyn FilterBackend>, FilterError> {
        match kind {
            FilterKind::Kalman => BuiltinFilters.build(kind, dims, members),
            _ => Ok(Box::new(MockBackend {
                kind,
                dims,
                script: self.script,
                log: self.log.clone(),
                attempts: 0,
                stored: None,
            })),
        }
    }
}

/// Gaussian likelihood with variance `q[0, 0]` plus a tiny draw from the
/// caller's generator, so results depend on the seed.
#[derive(Debug, Clone)]
pub struct MockBackend {
    kind: FilterKind,
    dims: FilterDims,
    script: MockScript,
    log: CallLog,
    attempts: usize,
    stored: Option<Array2<f64>>,
}

impl FilterBackend for MockBackend {
    fn kind(&self) -> FilterKind {
        self.kind
    }

    fn batch_filter(
        &mut self,
        params: &FilterParams,
        z: ArrayView2<f64>,
        opts: BatchOptions,
        rng: &mut dyn RngCore,
    ) -> Result<BatchOutput, FilterError> {
        self.log.batches.lock().unwrap().push(opts);
        if self.script.interrupt {
            return Err(FilterError::Interrupted);
        }
        let q = params.q[[0, 0]];
        if self.script.mismatch_above.is_some_and(|limit| q > limit) {
            return Err(FilterError::DimensionMismatch {
                what: "reduced system",
                expected: 1,
                got: 2,
            });
        }
        if q <= 0.0 {
            return Err(FilterError::NotPositiveDefinite {
                context: "process noise covariance",
            });
        }
        let states = Array2::from_elem((z.nrows(), self.dims.dim_x), q);
        if opts.store {
            self.stored = Some(states.clone());
        }
        let loglik = if self.script.nan_likelihood {
            f64::NAN
        } else if self.script.overflow_above.is_some_and(|limit| q > limit) {
            f64::INFINITY
        } else {
            let jitter: f64 = rng.random_range(0.0..1e-3);
            z.iter()
                .filter(|v| v.is_finite())
                .map(|v| -0.5 * (v * v / q + q.ln()))
                .sum::<f64>()
                + jitter
        };
        Ok(BatchOutput {
            states,
            covs: None,
            loglik: opts.calc_ll.then_some(loglik),
        })
    }

    fn smooth(
        &mut self,
        _params: &FilterParams,
        request: SmoothRequest,
        _rng: &mut dyn RngCore,
    ) -> Result<Trajectory, FilterError> {
        self.log.smooths.lock().unwrap().push(request);
        let states = self.stored.clone().ok_or(FilterError::NoHistory)?;
        Ok(Trajectory { states, covs: None })
    }

    fn npas(
        &mut self,
        _params: &FilterParams,
        opts: &NpasOptions,
        rng: &mut dyn RngCore,
    ) -> Result<NpasDraw, FilterError> {
        self.attempts += 1;
        if self.attempts <= self.script.npas_failures {
            return Err(FilterError::Singular {
                context: "mock decomposition",
            });
        }
        let states = self.stored.clone().ok_or(FilterError::NoHistory)?;
        let periods = states.nrows();
        let draw: f64 = rng.random_range(0.0..1e-3);
        let mean = states.mapv(|v| v + draw);
        let resid = match &opts.get_eps {
            Some(get_eps) => {
                let mut resid = Array2::zeros((periods, 1));
                let mut prev = Array1::zeros(self.dims.dim_x);
                for t in 0..periods {
                    let eps = get_eps(prev.view(), mean.row(t));
                    resid.row_mut(t).assign(&eps);
                    prev = mean.row(t).to_owned();
                }
                resid
            }
            None => Array2::zeros((periods, 1)),
        };
        Ok(NpasDraw {
            means: vec![mean],
            covs: Array3::zeros((periods, self.dims.dim_x, self.dims.dim_x)),
            resid: vec![resid],
            flags: vec![false],
        })
    }

    fn clone_box(&self) -> Box<dyn FilterBackend> {
        Box::new(self.clone())
    }
}

/// Session on the toy model with the mock provider.
pub fn mock_session(script: MockScript) -> Estimation<ToyModel> {
    Estimation::new(ToyModel::new(60, 11), std::env::temp_dir())
        .with_provider(MockProvider::new(script))
}

/// Session on the toy model whose mock backends record their calls.
pub fn logged_session(script: MockScript) -> (Estimation<ToyModel>, CallLog) {
    let log = CallLog::default();
    let est = Estimation::new(ToyModel::new(60, 11), std::env::temp_dir())
        .with_provider(MockProvider::logged(script, log.clone()));
    (est, log)
}
