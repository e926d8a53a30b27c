//! Filter creation for a session.

use augur_filter::{FilterDims, FilterKind, FilterState};
use ndarray::{Array2, Axis};
use tracing::info;

use crate::error::EstimError;
use crate::model::StateSpaceModel;
use crate::session::Estimation;

/// Scale of the default initial state covariance.
pub const DEFAULT_P_SCALE: f64 = 10.0;

/// Default scale of [`Estimation::observation_covariance`].
pub const DEFAULT_OBS_SCALE: f64 = 0.1;

/// Options of [`Estimation::create_filter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOptions {
    kind: Option<FilterKind>,
    members: Option<usize>,
    p: Option<Array2<f64>>,
    r: Option<Array2<f64>>,
    seed: Option<u64>,
}

impl FilterOptions {
    /// Ensemble filter with the default size and covariances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter kind.
    pub fn with_kind(mut self, kind: FilterKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the ensemble size or particle count.
    pub fn with_members(mut self, members: usize) -> Self {
        self.members = Some(members);
        self
    }

    /// Overrides the initial state covariance.
    pub fn with_p(mut self, p: Array2<f64>) -> Self {
        self.p = Some(p);
        self
    }

    /// Overrides the measurement noise covariance.
    pub fn with_r(mut self, r: Array2<f64>) -> Self {
        self.r = Some(r);
        self
    }

    /// Overrides the session seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Kind override.
    pub fn kind(&self) -> Option<FilterKind> {
        self.kind
    }

    /// Size override.
    pub fn members(&self) -> Option<usize> {
        self.members
    }

    /// Initial covariance override.
    pub fn p(&self) -> Option<&Array2<f64>> {
        self.p.as_ref()
    }

    /// Measurement covariance override.
    pub fn r(&self) -> Option<&Array2<f64>> {
        self.r.as_ref()
    }

    /// Seed override.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl<M: StateSpaceModel> Estimation<M> {
    /// Builds a filter for the model's current system and makes it the
    /// active filter, replacing any previous one.
    ///
    /// The initial covariance is the override, else the model's, else
    /// [`DEFAULT_P_SCALE`] times the identity. Kalman filters also bind
    /// the linear system and take `q = (G Σ)(G Σ)ᵀ` with shock loading `G`
    /// and shock covariance `Σ`; other kinds take `q = Σ Σ`.
    ///
    /// # Errors
    ///
    /// [`augur_filter::FilterError::Unsupported`] when the provider has no
    /// backend for the kind, and model failures when no system is built.
    #[tracing::instrument(skip_all, fields(model = self.model.name()))]
    pub fn create_filter(&mut self, opts: FilterOptions) -> Result<&FilterState, EstimError> {
        let kind = opts.kind.unwrap_or_default();
        let members = kind.resolve_members(opts.members);
        let dims = FilterDims::new(self.model.dim_x(), self.model.dim_z());

        let backend = self.provider.build(kind, dims, members)?;
        let mut filter = FilterState::new(kind, dims, members, backend)?;

        let p = match opts.p {
            Some(p) => p,
            None => self
                .model
                .initial_covariance()
                .unwrap_or_else(|| Array2::eye(dims.dim_x) * DEFAULT_P_SCALE),
        };
        filter.set_initial_covariance(p)?;
        if let Some(r) = opts.r {
            filter.set_r(r)?;
        }

        let eps_cov = self.model.shock_cov();
        let q = if kind.requires_linear() {
            filter.bind_linear(self.model.linear_system()?)?;
            let co = self.model.shock_loading().dot(&eps_cov);
            co.dot(&co.t())
        } else {
            eps_cov.dot(&eps_cov)
        };
        filter.set_eps_cov(eps_cov)?;
        filter.set_q(q)?;

        if let Some(seed) = opts.seed {
            self.config.seed = Some(seed);
        }

        info!(%kind, ?members, "filter created");
        Ok(self.filter.insert(filter))
    }

    /// Diagonal measurement covariance from the data: each observable's
    /// variance times `scale²`. Missing values are skipped.
    ///
    /// # Errors
    ///
    /// [`EstimError::DimensionMismatch`] if an observable has no data.
    pub fn observation_covariance(&self, scale: f64) -> Result<Array2<f64>, EstimError> {
        let data = self.model.data();
        let mut r = Array2::zeros((data.ncols(), data.ncols()));
        for (j, col) in data.axis_iter(Axis(1)).enumerate() {
            let obs: Vec<f64> = col.iter().copied().filter(|v| v.is_finite()).collect();
            if obs.is_empty() {
                return Err(EstimError::DimensionMismatch {
                    what: "observations per observable",
                    expected: 1,
                    got: 0,
                });
            }
            let n = obs.len() as f64;
            let mean = obs.iter().sum::<f64>() / n;
            let var = obs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            r[[j, j]] = var * scale * scale;
        }
        Ok(r)
    }
}
