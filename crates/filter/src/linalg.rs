//! Conversions between `ndarray` and `nalgebra` plus the few dense
//! kernels the Kalman backend needs.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::error::FilterError;

/// Relative tolerance for the pseudo-inverse.
const PINV_RCOND: f64 = 1e-14;

/// Diagonal jitter ladder, relative to the mean diagonal magnitude.
const JITTER_LADDER: [f64; 5] = [1e-12, 1e-10, 1e-8, 1e-6, 1e-4];

pub(crate) fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub(crate) fn to_dvector(a: ArrayView1<f64>) -> DVector<f64> {
    DVector::from_iterator(a.len(), a.iter().copied())
}

pub(crate) fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub(crate) fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    Array1::from_iter(v.iter().copied())
}

pub(crate) fn symmetrize(p: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (p + p.transpose())
}

/// Moore-Penrose pseudo-inverse with tolerance scaled to the largest entry.
pub(crate) fn pinv(m: &DMatrix<f64>, context: &'static str) -> Result<DMatrix<f64>, FilterError> {
    let scale = m.amax().max(1.0);
    m.clone()
        .pseudo_inverse(PINV_RCOND * scale)
        .map_err(|_| FilterError::Singular { context })
}

/// Draws from `N(mean, cov)`.
///
/// Falls back to adding diagonal jitter when `cov` is only positive
/// semi-definite; the returned flag is `true` when jitter was needed.
pub(crate) fn sample_mvn(
    rng: &mut dyn RngCore,
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
) -> Result<(DVector<f64>, bool), FilterError> {
    let n = mean.len();
    let (l, jittered) = cholesky_with_jitter(cov)?;
    let z = DVector::<f64>::from_fn(n, |_, _| StandardNormal.sample(&mut *rng));
    Ok((mean + l * z, jittered))
}

fn cholesky_with_jitter(cov: &DMatrix<f64>) -> Result<(DMatrix<f64>, bool), FilterError> {
    if let Some(chol) = cov.clone().cholesky() {
        return Ok((chol.l(), false));
    }
    let n = cov.nrows();
    let scale = (cov.trace().abs() / n.max(1) as f64).max(f64::MIN_POSITIVE);
    for eps in JITTER_LADDER {
        let jittered = cov + DMatrix::identity(n, n) * (eps * scale);
        if let Some(chol) = jittered.cholesky() {
            return Ok((chol.l(), true));
        }
    }
    Err(FilterError::NotPositiveDefinite {
        context: "state draw covariance",
    })
}
