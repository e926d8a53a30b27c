//! Linear-Gaussian Kalman filter, RTS smoother and forward-filter
//! backward-sample path draws.
//!
//! The recursion starts from `x = 0` with covariance `init_p` and predicts
//! before each update. Missing observations are NaN entries of `z`; a
//! period with some observed columns is updated on the reduced system.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Array3, ArrayView2};
use rand::RngCore;
use tracing::{debug, trace};

use crate::backend::{
    BatchOptions, BatchOutput, FilterBackend, NpasDraw, NpasOptions, SmoothRequest, Trajectory,
};
use crate::error::FilterError;
use crate::kind::FilterKind;
use crate::linalg::{pinv, sample_mvn, symmetrize, to_array1, to_dmatrix, to_dvector};
use crate::state::{FilterDims, FilterParams};
use crate::system::LinearSystem;

/// Per-period predicted and filtered moments of the last stored pass.
#[derive(Debug, Clone)]
struct KalmanHistory {
    predicted_means: Vec<DVector<f64>>,
    predicted_covs: Vec<DMatrix<f64>>,
    filtered_means: Vec<DVector<f64>>,
    filtered_covs: Vec<DMatrix<f64>>,
}

impl KalmanHistory {
    fn with_capacity(n: usize) -> Self {
        Self {
            predicted_means: Vec::with_capacity(n),
            predicted_covs: Vec::with_capacity(n),
            filtered_means: Vec::with_capacity(n),
            filtered_covs: Vec::with_capacity(n),
        }
    }

    fn len(&self) -> usize {
        self.filtered_means.len()
    }
}

/// Smoother gains `J_t = P_{t|t} F' P_{t+1|t}^+` and the conditional
/// covariances `P_{t|t} - J_t P_{t+1|t} J_t'` used by the backward draw.
struct BackwardTerms {
    gains: Vec<DMatrix<f64>>,
    cond_covs: Vec<DMatrix<f64>>,
}

/// Kalman filter backend.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    dims: FilterDims,
    history: Option<KalmanHistory>,
}

impl KalmanFilter {
    /// Creates a filter with no stored history.
    pub fn new(dims: FilterDims) -> Self {
        Self {
            dims,
            history: None,
        }
    }

    fn system(params: &FilterParams) -> Result<&LinearSystem, FilterError> {
        params
            .linear
            .as_ref()
            .ok_or(FilterError::Unbound("linear system"))
    }

    fn history(&self) -> Result<&KalmanHistory, FilterError> {
        match &self.history {
            Some(h) if h.len() > 0 => Ok(h),
            _ => Err(FilterError::NoHistory),
        }
    }

    fn forward(
        &self,
        params: &FilterParams,
        z: ArrayView2<f64>,
        verbose: bool,
    ) -> Result<(KalmanHistory, f64), FilterError> {
        let sys = Self::system(params)?;
        if z.iter().any(|v| v.is_infinite()) {
            return Err(FilterError::NonFinite("observations"));
        }

        let n = self.dims.dim_x;
        check_dim("process noise covariance", params.q.nrows(), n)?;
        check_dim("measurement noise covariance", params.r.nrows(), self.dims.dim_z)?;
        check_dim("initial state covariance", params.init_p.nrows(), n)?;
        check_dim("transition matrix", sys.dim_x(), n)?;
        check_dim("observation columns", z.ncols(), self.dims.dim_z)?;

        let f = to_dmatrix(sys.f().view());
        let h = to_dmatrix(sys.h().view());
        let d = to_dvector(sys.d().view());
        let q = to_dmatrix(params.q.view());
        let r = to_dmatrix(params.r.view());
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();

        let mut history = KalmanHistory::with_capacity(z.nrows());
        let mut x = DVector::<f64>::zeros(n);
        let mut p = to_dmatrix(params.init_p.view());
        let mut loglik = 0.0;

        for (t, row) in z.outer_iter().enumerate() {
            x = &f * &x;
            p = symmetrize(&(&f * &p * f.transpose() + &q));
            history.predicted_means.push(x.clone());
            history.predicted_covs.push(p.clone());

            let observed: Vec<usize> = (0..row.len()).filter(|&i| !row[i].is_nan()).collect();
            if observed.is_empty() {
                history.filtered_means.push(x.clone());
                history.filtered_covs.push(p.clone());
                continue;
            }

            let mo = observed.len();
            let y_obs = DVector::from_fn(mo, |ii, _| row[observed[ii]] - d[observed[ii]]);
            let h_obs = DMatrix::from_fn(mo, n, |ii, j| h[(observed[ii], j)]);
            let r_obs = DMatrix::from_fn(mo, mo, |ii, jj| r[(observed[ii], observed[jj])]);

            let v = y_obs - &h_obs * &x;
            let s = &h_obs * &p * h_obs.transpose() + &r_obs;
            let chol = s.cholesky().ok_or(FilterError::NotPositiveDefinite {
                context: "innovation covariance",
            })?;

            let quad = v.dot(&chol.solve(&v));
            let l = chol.l();
            let mut logdet = 0.0;
            for i in 0..mo {
                let diag = l[(i, i)];
                if diag <= 0.0 || !diag.is_finite() {
                    return Err(FilterError::NotPositiveDefinite {
                        context: "innovation covariance",
                    });
                }
                logdet += 2.0 * diag.ln();
            }
            let step = -0.5 * (mo as f64 * ln_2pi + logdet + quad);
            loglik += step;
            if verbose {
                trace!(period = t, observed = mo, step, "kalman update");
            }

            let k = chol.solve(&(&p * h_obs.transpose()).transpose()).transpose();
            x = &x + &k * v;
            let i_kh = DMatrix::<f64>::identity(n, n) - &k * &h_obs;
            p = symmetrize(&(&i_kh * &p * i_kh.transpose() + &k * &r_obs * k.transpose()));

            history.filtered_means.push(x.clone());
            history.filtered_covs.push(p.clone());
        }

        if verbose {
            debug!(periods = z.nrows(), loglik, "kalman pass done");
        }
        Ok((history, loglik))
    }

    fn backward_terms(
        f: &DMatrix<f64>,
        history: &KalmanHistory,
        pseudo_inverse: bool,
    ) -> Result<BackwardTerms, FilterError> {
        let t_max = history.len();
        let mut gains = Vec::with_capacity(t_max.saturating_sub(1));
        let mut cond_covs = Vec::with_capacity(t_max.saturating_sub(1));
        for t in 0..t_max.saturating_sub(1) {
            let p_filt = &history.filtered_covs[t];
            let p_pred_next = &history.predicted_covs[t + 1];
            let pf_ft = p_filt * f.transpose();
            let j = if pseudo_inverse {
                pf_ft * pinv(p_pred_next, "predicted state covariance")?
            } else {
                let chol = p_pred_next.clone().cholesky().ok_or(
                    FilterError::NotPositiveDefinite {
                        context: "predicted state covariance",
                    },
                )?;
                chol.solve(&pf_ft.transpose()).transpose()
            };
            cond_covs.push(symmetrize(&(p_filt - &j * p_pred_next * j.transpose())));
            gains.push(j);
        }
        Ok(BackwardTerms { gains, cond_covs })
    }

    fn rts(
        f: &DMatrix<f64>,
        history: &KalmanHistory,
        pseudo_inverse: bool,
    ) -> Result<(Vec<DVector<f64>>, Vec<DMatrix<f64>>), FilterError> {
        let terms = Self::backward_terms(f, history, pseudo_inverse)?;
        let mut means = history.filtered_means.clone();
        let mut covs = history.filtered_covs.clone();
        for t in (0..history.len().saturating_sub(1)).rev() {
            let j = &terms.gains[t];
            let dm = &means[t + 1] - &history.predicted_means[t + 1];
            means[t] = &history.filtered_means[t] + j * dm;
            let dp = &covs[t + 1] - &history.predicted_covs[t + 1];
            covs[t] = symmetrize(&(&history.filtered_covs[t] + j * dp * j.transpose()));
        }
        Ok((means, covs))
    }
}

impl FilterBackend for KalmanFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Kalman
    }

    fn batch_filter(
        &mut self,
        params: &FilterParams,
        z: ArrayView2<f64>,
        opts: BatchOptions,
        _rng: &mut dyn RngCore,
    ) -> Result<BatchOutput, FilterError> {
        let (history, loglik) = self.forward(params, z, opts.verbose)?;
        let states = stack_means(&history.filtered_means, self.dims.dim_x);
        let covs = stack_covs(&history.filtered_covs, self.dims.dim_x);
        self.history = opts.store.then_some(history);
        Ok(BatchOutput {
            states,
            covs: Some(covs),
            loglik: opts.calc_ll.then_some(loglik),
        })
    }

    fn smooth(
        &mut self,
        params: &FilterParams,
        request: SmoothRequest,
        _rng: &mut dyn RngCore,
    ) -> Result<Trajectory, FilterError> {
        let pseudo_inverse = match request {
            SmoothRequest::Rts { pseudo_inverse } => pseudo_inverse,
            SmoothRequest::Particle { .. } => {
                return Err(FilterError::UnsupportedOperation {
                    kind: FilterKind::Kalman,
                    operation: "fixed-lag particle smoothing",
                });
            }
            SmoothRequest::Ensemble { .. } => {
                return Err(FilterError::UnsupportedOperation {
                    kind: FilterKind::Kalman,
                    operation: "ensemble smoothing",
                });
            }
        };
        let f = to_dmatrix(Self::system(params)?.f().view());
        let history = self.history()?;
        let (means, covs) = Self::rts(&f, history, pseudo_inverse)?;
        Ok(Trajectory {
            states: stack_means(&means, self.dims.dim_x),
            covs: Some(stack_covs(&covs, self.dims.dim_x)),
        })
    }

    fn npas(
        &mut self,
        params: &FilterParams,
        opts: &NpasOptions,
        rng: &mut dyn RngCore,
    ) -> Result<NpasDraw, FilterError> {
        if opts.nsamples == 0 {
            return Err(FilterError::DimensionMismatch {
                what: "npas sample count",
                expected: 1,
                got: 0,
            });
        }
        let sys = Self::system(params)?;
        let f = to_dmatrix(sys.f().view());
        let history = self.history()?;
        let t_max = history.len();
        let n = self.dims.dim_x;

        let (_, smoothed_covs) = Self::rts(&f, history, true)?;
        let terms = Self::backward_terms(&f, history, true)?;
        let get_eps = opts.get_eps.as_ref();

        let mut means = Vec::with_capacity(opts.nsamples);
        let mut resid = Vec::with_capacity(opts.nsamples);
        let mut flags = Vec::with_capacity(opts.nsamples);

        for sample in 0..opts.nsamples {
            let mut path = vec![DVector::<f64>::zeros(n); t_max];
            let (last, mut flagged) = sample_mvn(
                rng,
                &history.filtered_means[t_max - 1],
                &history.filtered_covs[t_max - 1],
            )?;
            path[t_max - 1] = last;
            for t in (0..t_max - 1).rev() {
                let dm = &path[t + 1] - &history.predicted_means[t + 1];
                let mean = &history.filtered_means[t] + &terms.gains[t] * dm;
                let (draw, jittered) = sample_mvn(rng, &mean, &terms.cond_covs[t])?;
                path[t] = draw;
                flagged |= jittered;
            }

            let mut shocks: Vec<Array1<f64>> = Vec::with_capacity(t_max);
            let zero = DVector::<f64>::zeros(n);
            for t in 0..t_max {
                let prev = if t == 0 { &zero } else { &path[t - 1] };
                let eps = match get_eps {
                    Some(g) => g(to_array1(prev).view(), to_array1(&path[t]).view()),
                    None => to_array1(&(&path[t] - &f * prev)),
                };
                shocks.push(eps);
            }
            let resid_path = stack_rows(&shocks)?;

            if opts.verbose {
                debug!(sample, flagged, "npas draw");
            }
            means.push(stack_means(&path, n));
            resid.push(resid_path);
            flags.push(flagged);
        }

        Ok(NpasDraw {
            means,
            covs: stack_covs(&smoothed_covs, n),
            resid,
            flags,
        })
    }

    fn clone_box(&self) -> Box<dyn FilterBackend> {
        Box::new(self.clone())
    }
}

fn check_dim(what: &'static str, got: usize, expected: usize) -> Result<(), FilterError> {
    if got == expected {
        Ok(())
    } else {
        Err(FilterError::DimensionMismatch {
            what,
            expected,
            got,
        })
    }
}

fn stack_means(means: &[DVector<f64>], n: usize) -> Array2<f64> {
    Array2::from_shape_fn((means.len(), n), |(t, i)| means[t][i])
}

fn stack_covs(covs: &[DMatrix<f64>], n: usize) -> Array3<f64> {
    Array3::from_shape_fn((covs.len(), n, n), |(t, i, j)| covs[t][(i, j)])
}

fn stack_rows(rows: &[Array1<f64>]) -> Result<Array2<f64>, FilterError> {
    let width = rows.first().map_or(0, |r| r.len());
    let mut out = Array2::zeros((rows.len(), width));
    for (t, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(FilterError::DimensionMismatch {
                what: "recovered shocks",
                expected: width,
                got: row.len(),
            });
        }
        out.row_mut(t).assign(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::eps_fn;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ar1_params(phi: f64, q: f64, r: f64, p0: f64) -> FilterParams {
        let dims = FilterDims::new(1, 1);
        let mut params = FilterParams::identity(dims);
        params.q = array![[q]];
        params.r = array![[r]];
        params.init_p = array![[p0]];
        params.p = array![[p0]];
        params.linear = Some(LinearSystem::new(array![[phi]], array![[1.0]]).unwrap());
        params
    }

    fn scalar_reference(y: &[f64], phi: f64, q: f64, r: f64, p0: f64) -> (Vec<f64>, f64) {
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let (mut m, mut p, mut ll) = (0.0, p0, 0.0);
        let mut filtered = Vec::new();
        for &obs in y {
            m *= phi;
            p = phi * phi * p + q;
            if !obs.is_nan() {
                let s = p + r;
                let v = obs - m;
                ll += -0.5 * (ln_2pi + s.ln() + v * v / s);
                let k = p / s;
                m += k * v;
                p *= 1.0 - k;
            }
            filtered.push(m);
        }
        (filtered, ll)
    }

    fn observations() -> Array2<f64> {
        array![[0.3], [0.1], [f64::NAN], [-0.4], [0.2], [0.5]]
    }

    #[test]
    fn matches_scalar_recursion() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let z = observations();
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let out = kf
            .batch_filter(&params, z.view(), BatchOptions::likelihood(), &mut rng)
            .unwrap();

        let y: Vec<f64> = z.column(0).to_vec();
        let (expected, ll) = scalar_reference(&y, 0.8, 0.5, 0.2, 10.0);
        assert_abs_diff_eq!(out.loglik.unwrap(), ll, epsilon = 1e-10);
        for (t, m) in expected.iter().enumerate() {
            assert_abs_diff_eq!(out.states[[t, 0]], *m, epsilon = 1e-10);
        }
    }

    #[test]
    fn shock_space_q_rejected() {
        let mut params = ar1_params(0.8, 0.5, 0.2, 10.0);
        params.q = Array2::eye(2);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let err = kf
            .batch_filter(&params, observations().view(), BatchOptions::likelihood(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, FilterError::DimensionMismatch { expected: 1, got: 2, .. }));
    }

    #[test]
    fn unbound_system_is_an_error() {
        let mut params = ar1_params(0.8, 0.5, 0.2, 10.0);
        params.linear = None;
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let err = kf
            .batch_filter(&params, observations().view(), BatchOptions::likelihood(), &mut rng)
            .unwrap_err();
        assert_eq!(err, FilterError::Unbound("linear system"));
    }

    #[test]
    fn indefinite_noise_fails_update() {
        let params = ar1_params(0.8, 0.5, -20.0, 1.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let err = kf
            .batch_filter(&params, observations().view(), BatchOptions::likelihood(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, FilterError::NotPositiveDefinite { .. }));
    }

    #[test]
    fn smoothing_requires_history() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        kf.batch_filter(&params, observations().view(), BatchOptions::likelihood(), &mut rng)
            .unwrap();
        let err = kf
            .smooth(&params, SmoothRequest::Rts { pseudo_inverse: true }, &mut rng)
            .unwrap_err();
        assert_eq!(err, FilterError::NoHistory);
    }

    #[test]
    fn rts_last_period_equals_filtered() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let out = kf
            .batch_filter(&params, observations().view(), BatchOptions::trajectory(), &mut rng)
            .unwrap();
        let pinv = kf
            .smooth(&params, SmoothRequest::Rts { pseudo_inverse: true }, &mut rng)
            .unwrap();
        let chol = kf
            .smooth(&params, SmoothRequest::Rts { pseudo_inverse: false }, &mut rng)
            .unwrap();
        let last = out.states.nrows() - 1;
        assert_abs_diff_eq!(pinv.states[[last, 0]], out.states[[last, 0]], epsilon = 1e-12);
        for t in 0..=last {
            assert_abs_diff_eq!(pinv.states[[t, 0]], chol.states[[t, 0]], epsilon = 1e-9);
        }
        let covs = pinv.covs.unwrap();
        let filtered = out.covs.unwrap();
        for t in 0..last {
            assert!(covs[[t, 0, 0]] <= filtered[[t, 0, 0]] + 1e-12);
        }
    }

    #[test]
    fn particle_smoothing_not_offered() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let err = kf
            .smooth(&params, SmoothRequest::Particle { lag: 10 }, &mut rng)
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedOperation { .. }));
    }

    #[test]
    fn npas_is_reproducible_per_seed() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        kf.batch_filter(&params, observations().view(), BatchOptions::trajectory(), &mut rng)
            .unwrap();
        let opts = NpasOptions::new().with_nsamples(2);

        let a = kf.npas(&params, &opts, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = kf.npas(&params, &opts, &mut StdRng::seed_from_u64(7)).unwrap();
        let c = kf.npas(&params, &opts, &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.means[0], c.means[0]);
        assert_eq!(a.means.len(), 2);
        assert_eq!(a.means[0].dim(), (6, 1));
        assert_eq!(a.covs.dim(), (6, 1, 1));
        assert_eq!(a.flags, vec![false, false]);
    }

    #[test]
    fn npas_residuals_invert_transition() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        kf.batch_filter(&params, observations().view(), BatchOptions::trajectory(), &mut rng)
            .unwrap();
        let draw = kf
            .npas(&params, &NpasOptions::new(), &mut StdRng::seed_from_u64(1))
            .unwrap();
        let path = &draw.means[0];
        let resid = &draw.resid[0];
        assert_abs_diff_eq!(resid[[0, 0]], path[[0, 0]], epsilon = 1e-12);
        for t in 1..path.nrows() {
            assert_abs_diff_eq!(
                resid[[t, 0]],
                path[[t, 0]] - 0.8 * path[[t - 1, 0]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn npas_uses_supplied_shock_recovery() {
        let params = ar1_params(0.8, 0.5, 0.2, 10.0);
        let mut kf = KalmanFilter::new(FilterDims::new(1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        kf.batch_filter(&params, observations().view(), BatchOptions::trajectory(), &mut rng)
            .unwrap();
        let opts = NpasOptions::new().with_get_eps(eps_fn(|_prev, _x| array![1.0, 2.0]));
        let draw = kf.npas(&params, &opts, &mut rng).unwrap();
        assert_eq!(draw.resid[0].dim(), (6, 2));
        assert_eq!(draw.resid[0].row(3), array![1.0, 2.0]);
    }
}
