//! The filter backend seam and the provider that instantiates backends.

use std::fmt;

use ndarray::{Array2, Array3, ArrayView2};
use rand::RngCore;

use crate::error::FilterError;
use crate::kalman::KalmanFilter;
use crate::kind::FilterKind;
use crate::state::{FilterDims, FilterParams};
use crate::system::EpsFn;

/// Flags for a forward batch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Accumulate the data log-likelihood.
    pub calc_ll: bool,
    /// Keep the per-step history needed by `smooth` and `npas`.
    pub store: bool,
    /// Emit per-step diagnostics.
    pub verbose: bool,
}

impl BatchOptions {
    /// Options for a likelihood-only pass.
    pub fn likelihood() -> Self {
        Self {
            calc_ll: true,
            store: false,
            verbose: false,
        }
    }

    /// Options for a pass whose history will be smoothed or sampled.
    pub fn trajectory() -> Self {
        Self {
            calc_ll: false,
            store: true,
            verbose: false,
        }
    }

    /// Sets the verbose flag.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Result of a forward batch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    /// Filtered state means, `(periods, dim_x)`.
    pub states: Array2<f64>,
    /// Filtered state covariances, `(periods, dim_x, dim_x)`, when the
    /// backend tracks them.
    pub covs: Option<Array3<f64>>,
    /// Data log-likelihood when requested.
    pub loglik: Option<f64>,
}

/// Which smoother to run, with its tuning knob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothRequest {
    /// Rauch-Tung-Striebel backward pass.
    Rts {
        /// Invert the predicted covariance with a pseudo-inverse.
        pseudo_inverse: bool,
    },
    /// Fixed-lag particle smoother.
    Particle {
        /// Smoothing lag in periods.
        lag: usize,
    },
    /// Ensemble smoother.
    Ensemble {
        /// Regularization tolerance for the ensemble inversion.
        rcond: f64,
    },
}

/// A smoothed or filtered state path.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// State means, `(periods, dim_x)`.
    pub states: Array2<f64>,
    /// State covariances, `(periods, dim_x, dim_x)`, when available.
    pub covs: Option<Array3<f64>>,
}

/// Options for drawing smoothed state paths and shocks.
#[derive(Clone)]
pub struct NpasOptions {
    /// Number of paths per draw.
    pub nsamples: usize,
    /// Shock recovery overriding the one bound to the filter.
    pub get_eps: Option<EpsFn>,
    /// Emit per-draw diagnostics.
    pub verbose: bool,
}

impl NpasOptions {
    /// One path, default shock recovery.
    pub fn new() -> Self {
        Self {
            nsamples: 1,
            get_eps: None,
            verbose: false,
        }
    }

    /// Sets the number of paths per draw.
    pub fn with_nsamples(mut self, nsamples: usize) -> Self {
        self.nsamples = nsamples;
        self
    }

    /// Sets the shock recovery function.
    pub fn with_get_eps(mut self, get_eps: EpsFn) -> Self {
        self.get_eps = Some(get_eps);
        self
    }

    /// Sets the verbose flag.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for NpasOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NpasOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NpasOptions")
            .field("nsamples", &self.nsamples)
            .field("get_eps", &self.get_eps.is_some())
            .field("verbose", &self.verbose)
            .finish()
    }
}

/// Output of an `npas` draw.
#[derive(Debug, Clone, PartialEq)]
pub struct NpasDraw {
    /// One `(periods, dim_x)` state path per sample.
    pub means: Vec<Array2<f64>>,
    /// Smoothed state covariances, `(periods, dim_x, dim_x)`.
    pub covs: Array3<f64>,
    /// One `(periods, n_shocks)` residual path per sample.
    pub resid: Vec<Array2<f64>>,
    /// Per-sample flag; `true` when the draw needed regularization.
    pub flags: Vec<bool>,
}

/// A filter implementation.
///
/// Backends keep their own per-pass history but never own randomness: every
/// stochastic call receives the caller's generator.
pub trait FilterBackend: fmt::Debug + Send + Sync {
    /// Kind this backend implements.
    fn kind(&self) -> FilterKind;

    /// Runs the forward pass over `z` (`(periods, dim_z)`; NaN marks a
    /// missing observation).
    fn batch_filter(
        &mut self,
        params: &FilterParams,
        z: ArrayView2<f64>,
        opts: BatchOptions,
        rng: &mut dyn RngCore,
    ) -> Result<BatchOutput, FilterError>;

    /// Smooths the history of the last stored pass.
    fn smooth(
        &mut self,
        params: &FilterParams,
        request: SmoothRequest,
        rng: &mut dyn RngCore,
    ) -> Result<Trajectory, FilterError>;

    /// Draws smoothed state paths and recovers their shocks.
    fn npas(
        &mut self,
        params: &FilterParams,
        opts: &NpasOptions,
        rng: &mut dyn RngCore,
    ) -> Result<NpasDraw, FilterError>;

    /// Object-safe clone.
    fn clone_box(&self) -> Box<dyn FilterBackend>;
}

impl Clone for Box<dyn FilterBackend> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Instantiates backends for the filter factory.
pub trait FilterProvider: fmt::Debug + Send + Sync {
    /// Builds a fresh backend for `kind`.
    ///
    /// # Errors
    ///
    /// [`FilterError::Unsupported`] when this provider has no backend for
    /// `kind`.
    fn build(
        &self,
        kind: FilterKind,
        dims: FilterDims,
        members: Option<usize>,
    ) -> Result<Box<dyn FilterBackend>, FilterError>;
}

/// Provider for the backends shipped with this crate: the linear Kalman
/// filter. Ensemble and particle kinds must come from an external provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFilters;

impl FilterProvider for BuiltinFilters {
    fn build(
        &self,
        kind: FilterKind,
        dims: FilterDims,
        _members: Option<usize>,
    ) -> Result<Box<dyn FilterBackend>, FilterError> {
        match kind {
            FilterKind::Kalman => Ok(Box::new(KalmanFilter::new(dims))),
            other => Err(FilterError::Unsupported { kind: other }),
        }
    }
}
