//! System bindings handed to a filter: the linearized matrices for the
//! Kalman family and the transition/observation closures for the
//! nonlinear families.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::FilterError;

/// State transition `x' = t(x, eps)`.
pub type TransitionFn = Arc<dyn Fn(ArrayView1<f64>, ArrayView1<f64>) -> Array1<f64> + Send + Sync>;

/// Observation `z = o(x)`.
pub type ObservationFn = Arc<dyn Fn(ArrayView1<f64>) -> Array1<f64> + Send + Sync>;

/// Shock recovery `eps = get_eps(x_prev, x)`.
pub type EpsFn = Arc<dyn Fn(ArrayView1<f64>, ArrayView1<f64>) -> Array1<f64> + Send + Sync>;

/// Wraps a closure as a [`TransitionFn`].
pub fn transition_fn<F>(f: F) -> TransitionFn
where
    F: Fn(ArrayView1<f64>, ArrayView1<f64>) -> Array1<f64> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as an [`ObservationFn`].
pub fn observation_fn<F>(f: F) -> ObservationFn
where
    F: Fn(ArrayView1<f64>) -> Array1<f64> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as an [`EpsFn`].
pub fn eps_fn<F>(f: F) -> EpsFn
where
    F: Fn(ArrayView1<f64>, ArrayView1<f64>) -> Array1<f64> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Transition, observation and shock-recovery functions of a system.
///
/// Cloning is cheap: the closures are reference counted.
#[derive(Clone)]
pub struct SystemFunctions {
    t_func: TransitionFn,
    o_func: ObservationFn,
    get_eps: Option<EpsFn>,
    dispatched: bool,
}

impl SystemFunctions {
    /// Creates a binding from a transition and an observation function.
    pub fn new(t_func: TransitionFn, o_func: ObservationFn) -> Self {
        Self {
            t_func,
            o_func,
            get_eps: None,
            dispatched: false,
        }
    }

    /// Attaches a shock-recovery function.
    pub fn with_get_eps(mut self, get_eps: EpsFn) -> Self {
        self.get_eps = Some(get_eps);
        self
    }

    /// Marks the functions as precompiled by the model's dispatcher.
    pub fn with_dispatched(mut self, dispatched: bool) -> Self {
        self.dispatched = dispatched;
        self
    }

    /// Transition function.
    pub fn transition(&self) -> &TransitionFn {
        &self.t_func
    }

    /// Observation function.
    pub fn observation(&self) -> &ObservationFn {
        &self.o_func
    }

    /// Shock-recovery function, if any.
    pub fn get_eps(&self) -> Option<&EpsFn> {
        self.get_eps.as_ref()
    }

    /// Whether these are the dispatcher's precompiled functions.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }
}

impl fmt::Debug for SystemFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemFunctions")
            .field("get_eps", &self.get_eps.is_some())
            .field("dispatched", &self.dispatched)
            .finish_non_exhaustive()
    }
}

/// Linearized system
///
/// ```text
/// x[t] = F x[t-1] + w[t]     w ~ N(0, Q)
/// z[t] = H x[t] + d + v[t]   v ~ N(0, R)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    f: Array2<f64>,
    h: Array2<f64>,
    d: Array1<f64>,
}

impl LinearSystem {
    /// Creates a system with zero observation offset.
    ///
    /// # Errors
    ///
    /// [`FilterError::DimensionMismatch`] if `F` is not square or `H` does
    /// not have `F`'s column count.
    pub fn new(f: Array2<f64>, h: Array2<f64>) -> Result<Self, FilterError> {
        if f.nrows() != f.ncols() {
            return Err(FilterError::DimensionMismatch {
                what: "transition matrix columns",
                expected: f.nrows(),
                got: f.ncols(),
            });
        }
        if h.ncols() != f.nrows() {
            return Err(FilterError::DimensionMismatch {
                what: "observation matrix columns",
                expected: f.nrows(),
                got: h.ncols(),
            });
        }
        let d = Array1::zeros(h.nrows());
        Ok(Self { f, h, d })
    }

    /// Sets the observation offset `d`.
    pub fn with_offset(mut self, d: Array1<f64>) -> Result<Self, FilterError> {
        if d.len() != self.h.nrows() {
            return Err(FilterError::DimensionMismatch {
                what: "observation offset",
                expected: self.h.nrows(),
                got: d.len(),
            });
        }
        self.d = d;
        Ok(self)
    }

    /// Transition matrix `F`.
    pub fn f(&self) -> &Array2<f64> {
        &self.f
    }

    /// Observation matrix `H`.
    pub fn h(&self) -> &Array2<f64> {
        &self.h
    }

    /// Observation offset `d`.
    pub fn d(&self) -> &Array1<f64> {
        &self.d
    }

    /// State dimension.
    pub fn dim_x(&self) -> usize {
        self.f.nrows()
    }

    /// Observation dimension.
    pub fn dim_z(&self) -> usize {
        self.h.nrows()
    }

    /// Whether every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.f.iter().chain(self.h.iter()).chain(self.d.iter()).all(|v| v.is_finite())
    }
}
