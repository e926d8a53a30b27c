//! The filter object a session binds: kind, dimensions, noise
//! covariances, system bindings and the backend that runs the recursions.

use ndarray::{Array2, ArrayView2};
use rand::RngCore;

use crate::backend::{
    BatchOptions, BatchOutput, FilterBackend, NpasDraw, NpasOptions, SmoothRequest, Trajectory,
};
use crate::error::FilterError;
use crate::kind::FilterKind;
use crate::system::{LinearSystem, SystemFunctions};

/// State and observation dimensions of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDims {
    /// State dimension.
    pub dim_x: usize,
    /// Observation dimension.
    pub dim_z: usize,
}

impl FilterDims {
    /// Creates a dimension pair.
    pub fn new(dim_x: usize, dim_z: usize) -> Self {
        Self { dim_x, dim_z }
    }
}

/// Noise covariances and system bindings consumed by a backend.
#[derive(Debug, Clone)]
pub struct FilterParams {
    /// Current state covariance.
    pub p: Array2<f64>,
    /// Initial state covariance, snapshot of `p` at creation.
    pub init_p: Array2<f64>,
    /// Process noise covariance.
    pub q: Array2<f64>,
    /// Measurement noise covariance.
    pub r: Array2<f64>,
    /// Shock covariance.
    pub eps_cov: Array2<f64>,
    /// Linearized system (Kalman family).
    pub linear: Option<LinearSystem>,
    /// Transition and observation functions (nonlinear families).
    pub functions: Option<SystemFunctions>,
}

impl FilterParams {
    /// Identity covariances for the given dimensions, no bindings.
    pub fn identity(dims: FilterDims) -> Self {
        let p = Array2::eye(dims.dim_x);
        Self {
            init_p: p.clone(),
            p,
            q: Array2::eye(dims.dim_x),
            r: Array2::eye(dims.dim_z),
            eps_cov: Array2::eye(dims.dim_x),
            linear: None,
            functions: None,
        }
    }

    /// Fails with [`FilterError::NonFinite`] on the first covariance or
    /// linear system that contains NaN or infinity.
    pub fn check_finite(&self) -> Result<(), FilterError> {
        let finite = |a: &Array2<f64>| a.iter().all(|v| v.is_finite());
        if !finite(&self.init_p) {
            return Err(FilterError::NonFinite("initial state covariance"));
        }
        if !finite(&self.q) {
            return Err(FilterError::NonFinite("process noise covariance"));
        }
        if !finite(&self.r) {
            return Err(FilterError::NonFinite("measurement noise covariance"));
        }
        if self.linear.as_ref().is_some_and(|sys| !sys.is_finite()) {
            return Err(FilterError::NonFinite("linear system matrices"));
        }
        Ok(())
    }
}

/// A configured filter.
///
/// Cloning yields an independent filter, backend history included, so each
/// evaluation can mutate its own copy.
#[derive(Debug, Clone)]
pub struct FilterState {
    kind: FilterKind,
    dims: FilterDims,
    members: Option<usize>,
    params: FilterParams,
    backend: Box<dyn FilterBackend>,
}

impl FilterState {
    /// Wraps a backend with identity covariances.
    ///
    /// # Errors
    ///
    /// [`FilterError::DimensionMismatch`] if a dimension is zero.
    pub fn new(
        kind: FilterKind,
        dims: FilterDims,
        members: Option<usize>,
        backend: Box<dyn FilterBackend>,
    ) -> Result<Self, FilterError> {
        if dims.dim_x == 0 {
            return Err(FilterError::DimensionMismatch {
                what: "state dimension",
                expected: 1,
                got: 0,
            });
        }
        if dims.dim_z == 0 {
            return Err(FilterError::DimensionMismatch {
                what: "observation dimension",
                expected: 1,
                got: 0,
            });
        }
        Ok(Self {
            kind,
            dims,
            members,
            params: FilterParams::identity(dims),
            backend,
        })
    }

    /// Filter kind.
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Dimensions.
    pub fn dims(&self) -> FilterDims {
        self.dims
    }

    /// Ensemble size or particle count.
    pub fn members(&self) -> Option<usize> {
        self.members
    }

    /// Covariances and bindings.
    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Sets `p` and snapshots it as `init_p`.
    pub fn set_initial_covariance(&mut self, p: Array2<f64>) -> Result<(), FilterError> {
        self.check_square("state covariance", &p, self.dims.dim_x)?;
        self.params.init_p = p.clone();
        self.params.p = p;
        Ok(())
    }

    /// Sets the measurement noise covariance.
    pub fn set_r(&mut self, r: Array2<f64>) -> Result<(), FilterError> {
        self.check_square("measurement noise covariance", &r, self.dims.dim_z)?;
        self.params.r = r;
        Ok(())
    }

    /// Sets the process noise covariance.
    ///
    /// Only squareness is checked: nonlinear backends take `q` in shock
    /// space, the Kalman backend checks it against `dim_x` per pass.
    pub fn set_q(&mut self, q: Array2<f64>) -> Result<(), FilterError> {
        self.check_square("process noise covariance", &q, q.nrows())?;
        self.params.q = q;
        Ok(())
    }

    /// Sets the shock covariance.
    pub fn set_eps_cov(&mut self, eps_cov: Array2<f64>) -> Result<(), FilterError> {
        if eps_cov.nrows() != eps_cov.ncols() {
            return Err(FilterError::DimensionMismatch {
                what: "shock covariance columns",
                expected: eps_cov.nrows(),
                got: eps_cov.ncols(),
            });
        }
        self.params.eps_cov = eps_cov;
        Ok(())
    }

    /// Binds the linearized system.
    pub fn bind_linear(&mut self, system: LinearSystem) -> Result<(), FilterError> {
        if system.dim_x() != self.dims.dim_x {
            return Err(FilterError::DimensionMismatch {
                what: "transition matrix",
                expected: self.dims.dim_x,
                got: system.dim_x(),
            });
        }
        if system.dim_z() != self.dims.dim_z {
            return Err(FilterError::DimensionMismatch {
                what: "observation matrix rows",
                expected: self.dims.dim_z,
                got: system.dim_z(),
            });
        }
        self.params.linear = Some(system);
        Ok(())
    }

    /// Binds transition and observation functions.
    pub fn bind_functions(&mut self, functions: SystemFunctions) {
        self.params.functions = Some(functions);
    }

    /// Runs the backend's forward pass.
    ///
    /// # Errors
    ///
    /// [`FilterError::DimensionMismatch`] if `z` does not have `dim_z`
    /// columns, [`FilterError::NonFinite`] for non-finite covariances, and
    /// any backend failure.
    pub fn batch_filter(
        &mut self,
        z: ArrayView2<f64>,
        opts: BatchOptions,
        rng: &mut dyn RngCore,
    ) -> Result<BatchOutput, FilterError> {
        if z.ncols() != self.dims.dim_z {
            return Err(FilterError::DimensionMismatch {
                what: "observation columns",
                expected: self.dims.dim_z,
                got: z.ncols(),
            });
        }
        self.params.check_finite()?;
        self.backend.batch_filter(&self.params, z, opts, rng)
    }

    /// Smooths the last stored pass.
    pub fn smooth(
        &mut self,
        request: SmoothRequest,
        rng: &mut dyn RngCore,
    ) -> Result<Trajectory, FilterError> {
        self.backend.smooth(&self.params, request, rng)
    }

    /// Draws smoothed paths and shocks from the last stored pass.
    pub fn npas(
        &mut self,
        opts: &NpasOptions,
        rng: &mut dyn RngCore,
    ) -> Result<NpasDraw, FilterError> {
        self.backend.npas(&self.params, opts, rng)
    }

    fn check_square(
        &self,
        what: &'static str,
        m: &Array2<f64>,
        n: usize,
    ) -> Result<(), FilterError> {
        if m.nrows() != n {
            return Err(FilterError::DimensionMismatch {
                what,
                expected: n,
                got: m.nrows(),
            });
        }
        if m.ncols() != n {
            return Err(FilterError::DimensionMismatch {
                what,
                expected: n,
                got: m.ncols(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BuiltinFilters, FilterProvider};
    use ndarray::array;

    fn kalman_state(dim_x: usize, dim_z: usize) -> FilterState {
        let dims = FilterDims::new(dim_x, dim_z);
        let backend = BuiltinFilters.build(FilterKind::Kalman, dims, None).unwrap();
        FilterState::new(FilterKind::Kalman, dims, None, backend).unwrap()
    }

    #[test]
    fn zero_dimension_rejected() {
        let dims = FilterDims::new(0, 1);
        let backend = BuiltinFilters
            .build(FilterKind::Kalman, FilterDims::new(1, 1), None)
            .unwrap();
        assert!(FilterState::new(FilterKind::Kalman, dims, None, backend).is_err());
    }

    #[test]
    fn initial_covariance_snapshot() {
        let mut fs = kalman_state(2, 1);
        fs.set_initial_covariance(array![[10.0, 0.0], [0.0, 10.0]]).unwrap();
        assert_eq!(fs.params().p, fs.params().init_p);
        assert_eq!(fs.params().init_p[[0, 0]], 10.0);
    }

    #[test]
    fn wrong_shapes_rejected() {
        let mut fs = kalman_state(2, 1);
        assert!(fs.set_r(Array2::eye(2)).is_err());
        assert!(fs.set_q(Array2::zeros((2, 3))).is_err());
        assert!(fs.set_initial_covariance(Array2::zeros((2, 3))).is_err());
        let sys = LinearSystem::new(Array2::eye(3), Array2::ones((1, 3))).unwrap();
        assert!(fs.bind_linear(sys).is_err());
    }

    #[test]
    fn clones_are_independent() {
        let mut fs = kalman_state(1, 1);
        let mut copy = fs.clone();
        copy.set_q(array![[4.0]]).unwrap();
        fs.set_q(array![[2.0]]).unwrap();
        assert_eq!(copy.params().q[[0, 0]], 4.0);
        assert_eq!(fs.params().q[[0, 0]], 2.0);
    }

    #[test]
    fn non_finite_covariance_detected() {
        let mut params = FilterParams::identity(FilterDims::new(1, 1));
        assert!(params.check_finite().is_ok());
        params.q[[0, 0]] = f64::INFINITY;
        assert_eq!(
            params.check_finite(),
            Err(FilterError::NonFinite("process noise covariance"))
        );
    }
}
