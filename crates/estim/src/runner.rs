//! The filter runner: one batch pass, optionally followed by smoothing,
//! with behaviour selected by filter family.

use std::time::Instant;

use augur_filter::{
    BatchOptions, FilterError, FilterFamily, FilterKind, FilterState, SmoothRequest, Trajectory,
};
use ndarray::{Array2, Array3};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::CancelToken;
use crate::error::EstimError;
use crate::model::StateSpaceModel;
use crate::verbosity::Verbosity;

/// Smoothing lag of the particle smoother when none is given.
pub const DEFAULT_SMOOTHING_LAG: usize = 10;

/// Regularization tolerance of the ensemble smoother.
pub const ENSEMBLE_RCOND: f64 = 1e-14;

/// Parameter whose value floors the constrained observable by default.
pub const DEFAULT_CONSTRAINT_PARAMETER: &str = "elb_level";

/// Smoothing configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Smoothing {
    /// Family default; lag [`DEFAULT_SMOOTHING_LAG`] for particle filters.
    #[default]
    Default,
    /// Explicit particle smoothing lag.
    Lag(usize),
}

impl Smoothing {
    /// Lag passed to the particle smoother.
    pub fn lag(self) -> usize {
        match self {
            Self::Default => DEFAULT_SMOOTHING_LAG,
            Self::Lag(lag) => lag,
        }
    }
}

/// What a filter run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// The data log-likelihood only.
    Likelihood,
    /// The filtered trajectory.
    Filter,
    /// The smoothed trajectory.
    Smooth(Smoothing),
}

/// Observation constraint applied before the data reach the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// Data are passed unchanged.
    #[default]
    None,
    /// The model's constrained observable is floored at the named
    /// parameter's value.
    Floor(String),
}

impl ConstraintMode {
    /// Default for a filter kind: particle filters floor at
    /// [`DEFAULT_CONSTRAINT_PARAMETER`], others leave the data alone.
    pub fn default_for(kind: FilterKind) -> Self {
        match kind.family() {
            FilterFamily::Particle => Self::Floor(DEFAULT_CONSTRAINT_PARAMETER.to_string()),
            FilterFamily::Kalman | FilterFamily::Ensemble => Self::None,
        }
    }
}

/// Options of [`run_filter`](crate::Estimation::run_filter).
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    mode: RunMode,
    dispatch: Option<bool>,
    constraint: Option<ConstraintMode>,
    verbosity: Verbosity,
}

impl RunOptions {
    /// Options for the given mode; dispatch and constraint follow the
    /// filter kind.
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            dispatch: None,
            constraint: None,
            verbosity: Verbosity::SILENT,
        }
    }

    /// Likelihood-only run.
    pub fn likelihood() -> Self {
        Self::new(RunMode::Likelihood)
    }

    /// Smoothed-trajectory run.
    pub fn smooth(smoothing: Smoothing) -> Self {
        Self::new(RunMode::Smooth(smoothing))
    }

    /// Replaces the mode, keeping dispatch and constraint.
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Selects precompiled (`true`) or plain system functions.
    pub fn with_dispatch(mut self, dispatch: bool) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Sets the observation constraint.
    pub fn with_constraint(mut self, constraint: ConstraintMode) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Sets the verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Mode.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Dispatch override.
    pub fn dispatch(&self) -> Option<bool> {
        self.dispatch
    }

    /// Constraint override.
    pub fn constraint(&self) -> Option<&ConstraintMode> {
        self.constraint.as_ref()
    }

    /// Verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::smooth(Smoothing::Default)
    }
}

/// Result of a filter run.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutput {
    /// Data log-likelihood; `-inf` when the pass produced NaN or `+inf`.
    Likelihood(f64),
    /// Filtered or smoothed states.
    Trajectory(Trajectory),
}

impl FilterOutput {
    /// The log-likelihood, if this is a likelihood result.
    pub fn loglik(&self) -> Option<f64> {
        match self {
            Self::Likelihood(ll) => Some(*ll),
            Self::Trajectory(_) => None,
        }
    }

    /// The trajectory, if this is a trajectory result.
    pub fn trajectory(&self) -> Option<&Trajectory> {
        match self {
            Self::Likelihood(_) => None,
            Self::Trajectory(tr) => Some(tr),
        }
    }
}

/// Output of one pass plus the Kalman covariances the session keeps.
#[derive(Debug, Clone)]
pub(crate) struct PassResult {
    pub(crate) output: FilterOutput,
    pub(crate) covs: Option<Array3<f64>>,
}

/// The model's data with the constraint applied. Missing values stay NaN.
pub(crate) fn observations<M: StateSpaceModel>(
    model: &M,
    constraint: &ConstraintMode,
) -> Result<Array2<f64>, EstimError> {
    let mut z = model.data().to_owned();
    if z.ncols() != model.dim_z() {
        return Err(EstimError::DimensionMismatch {
            what: "observation columns",
            expected: model.dim_z(),
            got: z.ncols(),
        });
    }
    if let ConstraintMode::Floor(name) = constraint {
        let col = model.constrained_observable().ok_or_else(|| {
            EstimError::MissingConstraint("model designates no constrained observable".into())
        })?;
        if col >= z.ncols() {
            return Err(EstimError::MissingConstraint(format!(
                "constrained observable {col} out of range"
            )));
        }
        let floor = model
            .parameter(name)
            .ok_or_else(|| EstimError::MissingConstraint(format!("unknown parameter `{name}`")))?;
        z.column_mut(col)
            .mapv_inplace(|v| if v.is_nan() { v } else { v.max(floor) });
    }
    Ok(z)
}

/// Backend interrupts surface as cancellation.
fn pass_error(err: FilterError) -> EstimError {
    if err.is_interrupt() {
        EstimError::Cancelled
    } else {
        EstimError::Filter(err)
    }
}

/// One filter run on `filter` against `model`'s data.
pub(crate) fn run_pass<M: StateSpaceModel>(
    model: &M,
    filter: &mut FilterState,
    opts: &RunOptions,
    rng: &mut dyn RngCore,
    cancel: &CancelToken,
) -> Result<PassResult, EstimError> {
    let start = Instant::now();
    cancel.check()?;

    let kind = filter.kind();
    let constraint = opts
        .constraint
        .clone()
        .unwrap_or_else(|| ConstraintMode::default_for(kind));
    let z = observations(model, &constraint)?;

    let dispatch = opts
        .dispatch
        .unwrap_or(kind.family() == FilterFamily::Particle);
    filter.bind_functions(model.system_functions(dispatch)?);

    let verbose = opts.verbosity.at_least(4);
    let likelihood = opts.mode == RunMode::Likelihood;
    let smoothing = match opts.mode {
        RunMode::Smooth(s) => Some(s),
        RunMode::Likelihood | RunMode::Filter => None,
    };
    let batch_opts = BatchOptions {
        calc_ll: likelihood,
        store: smoothing.is_some(),
        verbose,
    };

    let result = match kind.family() {
        FilterFamily::Kalman => {
            let batch = filter.batch_filter(
                z.view(),
                BatchOptions {
                    calc_ll: true,
                    ..batch_opts
                },
                rng,
            )
            .map_err(pass_error)?;
            if likelihood {
                PassResult {
                    output: FilterOutput::Likelihood(batch.loglik.unwrap_or(f64::NAN)),
                    covs: batch.covs,
                }
            } else if smoothing.is_some() {
                let tr = filter.smooth(
                    SmoothRequest::Rts {
                        pseudo_inverse: true,
                    },
                    rng,
                )
                .map_err(pass_error)?;
                PassResult {
                    covs: tr.covs.clone(),
                    output: FilterOutput::Trajectory(tr),
                }
            } else {
                PassResult {
                    output: FilterOutput::Trajectory(Trajectory {
                        states: batch.states,
                        covs: batch.covs.clone(),
                    }),
                    covs: batch.covs,
                }
            }
        }
        FilterFamily::Particle | FilterFamily::Ensemble => {
            let batch = filter
                .batch_filter(z.view(), batch_opts, rng)
                .map_err(pass_error)?;
            let output = match smoothing {
                _ if likelihood => FilterOutput::Likelihood(batch.loglik.unwrap_or(f64::NAN)),
                Some(s) => {
                    if verbose {
                        info!(
                            elapsed_s = start.elapsed().as_secs_f64(),
                            "filtering done, starting smoothing"
                        );
                    }
                    let request = if kind.family() == FilterFamily::Particle {
                        SmoothRequest::Particle { lag: s.lag() }
                    } else {
                        SmoothRequest::Ensemble {
                            rcond: ENSEMBLE_RCOND,
                        }
                    };
                    FilterOutput::Trajectory(filter.smooth(request, rng).map_err(pass_error)?)
                }
                None => FilterOutput::Trajectory(Trajectory {
                    states: batch.states,
                    covs: batch.covs,
                }),
            };
            PassResult { output, covs: None }
        }
    };

    cancel.check()?;

    let result = match result.output {
        // NaN and overflow to +inf are failed evaluations.
        FilterOutput::Likelihood(ll) if !ll.is_finite() => PassResult {
            output: FilterOutput::Likelihood(f64::NEG_INFINITY),
            ..result
        },
        _ => result,
    };

    if opts.verbosity.at_least(1) {
        let elapsed_s = start.elapsed().as_secs_f64();
        match result.output.loglik() {
            Some(ll) => info!(%kind, elapsed_s, ll, "filtering done"),
            None => info!(%kind, elapsed_s, "filtering done"),
        }
    }
    Ok(result)
}
