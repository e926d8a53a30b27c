//! Persisted estimation state and the options of session setup.

use std::fmt;
use std::path::Path;

use augur_prior::PriorSet;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::EstimError;
use crate::factory::FilterOptions;
use crate::runner::ConstraintMode;
use crate::verbosity::Verbosity;

/// Ensemble size used by `prep_estim` when none was given before.
pub const DEFAULT_FILTER_N: usize = 300;

/// Estimation state that survives between sessions.
///
/// Written by `prep_estim` and read back by later runs; persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimationConfig {
    /// Number of free parameters.
    #[serde(default)]
    pub ndim: usize,
    /// Free parameter names in prior order.
    #[serde(default)]
    pub prior_names: Vec<String>,
    /// Frozen priors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_set: Option<PriorSet>,
    /// Ensemble size or particle count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_n: Option<usize>,
    /// Whether the linear (Kalman) path is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linear: Option<bool>,
    /// Session seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Observation constraint used by likelihood runs.
    #[serde(default)]
    pub constr_data: ConstraintMode,
    /// Whether likelihood runs use precompiled system functions.
    #[serde(default)]
    pub dispatch: bool,
    /// Persisted measurement noise covariance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_r: Option<Array2<f64>>,
    /// When the configuration was last prepared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl EstimationConfig {
    /// Reads a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, EstimError> {
        let text = std::fs::read_to_string(path).map_err(|e| persist_error(path, e))?;
        serde_json::from_str(&text).map_err(|e| persist_error(path, e))
    }

    /// Writes this configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), EstimError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| persist_error(path, e))?;
        std::fs::write(path, text).map_err(|e| persist_error(path, e))
    }

    /// Frozen priors.
    pub fn priors(&self) -> Result<&PriorSet, EstimError> {
        self.prior_set.as_ref().ok_or(EstimError::PriorsNotInitialized)
    }

    /// Lower and upper prior bounds.
    pub fn prior_bounds(&self) -> Result<(Vec<f64>, Vec<f64>), EstimError> {
        Ok(self.priors()?.bounds())
    }

    /// Initial values of the free parameters.
    pub fn init_value(&self) -> Result<Vec<f64>, EstimError> {
        Ok(self.priors()?.init_value())
    }
}

pub(crate) fn persist_error(path: &Path, err: impl fmt::Display) -> EstimError {
    EstimError::Persist {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Worker pool sizing for `prep_estim`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolSize {
    /// One worker per available core.
    #[default]
    Auto,
    /// A fixed number of workers.
    Cores(usize),
    /// No pool; work runs on the calling thread.
    Disabled,
}

/// Options of `prep_estim`.
///
/// # Example
///
/// ```
/// use augur_estim::{EstimOptions, PoolSize};
///
/// let opts = EstimOptions::new()
///     .with_n(200)
///     .with_linear(true)
///     .with_pool(PoolSize::Disabled);
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EstimOptions {
    n: Option<usize>,
    linear: Option<bool>,
    load_r: bool,
    seed: Option<u64>,
    eval_priors: bool,
    dispatch: bool,
    constraint: ConstraintMode,
    pool: PoolSize,
    verbosity: Verbosity,
    debug: bool,
    filter: FilterOptions,
}

impl EstimOptions {
    /// Previous settings where present, otherwise the defaults.
    pub fn new() -> Self {
        Self {
            n: None,
            linear: None,
            load_r: false,
            seed: None,
            eval_priors: false,
            dispatch: false,
            constraint: ConstraintMode::None,
            pool: PoolSize::Auto,
            verbosity: Verbosity::SILENT,
            debug: false,
            filter: FilterOptions::new(),
        }
    }

    /// Sets the ensemble size or particle count.
    pub fn with_n(mut self, n: usize) -> Self {
        self.n = Some(n);
        self
    }

    /// Selects the linear (Kalman) or nonlinear path.
    pub fn with_linear(mut self, linear: bool) -> Self {
        self.linear = Some(linear);
        self
    }

    /// Requires the persisted measurement noise covariance.
    pub fn with_load_r(mut self, load_r: bool) -> Self {
        self.load_r = load_r;
        self
    }

    /// Sets the session seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Re-freezes priors even if frozen ones exist.
    pub fn with_eval_priors(mut self, eval_priors: bool) -> Self {
        self.eval_priors = eval_priors;
        self
    }

    /// Uses precompiled system functions in likelihood runs.
    pub fn with_dispatch(mut self, dispatch: bool) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the observation constraint of likelihood runs.
    pub fn with_constraint(mut self, constraint: ConstraintMode) -> Self {
        self.constraint = constraint;
        self
    }

    /// Sets the worker pool size.
    pub fn with_pool(mut self, pool: PoolSize) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Debug mode: all mapping runs sequentially.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Filter options; kind is forced to Kalman on the linear path.
    pub fn with_filter(mut self, filter: FilterOptions) -> Self {
        self.filter = filter;
        self
    }

    /// Ensemble size override.
    pub fn n(&self) -> Option<usize> {
        self.n
    }

    /// Linearity override.
    pub fn linear(&self) -> Option<bool> {
        self.linear
    }

    /// Whether the persisted R is required.
    pub fn load_r(&self) -> bool {
        self.load_r
    }

    /// Seed override.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Whether priors are re-frozen.
    pub fn eval_priors(&self) -> bool {
        self.eval_priors
    }

    /// Dispatch flag.
    pub fn dispatch(&self) -> bool {
        self.dispatch
    }

    /// Observation constraint.
    pub fn constraint(&self) -> &ConstraintMode {
        &self.constraint
    }

    /// Pool size.
    pub fn pool(&self) -> PoolSize {
        self.pool
    }

    /// Verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Filter options.
    pub fn filter(&self) -> &FilterOptions {
        &self.filter
    }

    /// Rejects a zero ensemble size or a zero-core pool.
    pub fn validate(&self) -> Result<(), EstimError> {
        if self.n == Some(0) {
            return Err(EstimError::InvalidOption {
                field: "n",
                reason: "ensemble size must be positive".into(),
            });
        }
        if self.pool == PoolSize::Cores(0) {
            return Err(EstimError::InvalidOption {
                field: "pool",
                reason: "pool needs at least one core".into(),
            });
        }
        Ok(())
    }
}

impl Default for EstimOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_prior::{PriorEntry, PriorSpec};
    use ndarray::array;

    fn priors() -> PriorSet {
        let spec = PriorSpec::new()
            .with_entry(PriorEntry::new("rho", "beta", 0.5, 0.2).with_bounds(0.01, 0.99))
            .with_entry(PriorEntry::new("sigma", "inv_gamma", 0.3, 0.2));
        PriorSet::from_spec(&spec).unwrap()
    }

    #[test]
    fn test_options_defaults() {
        let opts = EstimOptions::default();
        assert_eq!(opts.n(), None);
        assert_eq!(opts.linear(), None);
        assert!(!opts.load_r());
        assert!(!opts.dispatch());
        assert_eq!(opts.constraint(), &ConstraintMode::None);
        assert_eq!(opts.pool(), PoolSize::Auto);
        assert!(!opts.debug());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_validate() {
        assert!(EstimOptions::new().with_n(0).validate().is_err());
        assert!(EstimOptions::new().with_pool(PoolSize::Cores(0)).validate().is_err());
        assert!(EstimOptions::new().with_pool(PoolSize::Cores(2)).validate().is_ok());
    }

    #[test]
    fn test_config_without_priors() {
        let cfg = EstimationConfig::default();
        assert!(matches!(cfg.prior_bounds(), Err(EstimError::PriorsNotInitialized)));
        assert!(matches!(cfg.init_value(), Err(EstimError::PriorsNotInitialized)));
    }

    #[test]
    fn test_config_bounds_from_priors() {
        let cfg = EstimationConfig {
            prior_set: Some(priors()),
            ..Default::default()
        };
        let (lo, hi) = cfg.prior_bounds().unwrap();
        assert_eq!(lo[0], 0.01);
        assert_eq!(hi[0], 0.99);
        assert_eq!(cfg.init_value().unwrap().len(), 2);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimation.json");
        let cfg = EstimationConfig {
            ndim: 2,
            prior_names: vec!["rho".into(), "sigma".into()],
            prior_set: Some(priors()),
            filter_n: Some(300),
            linear: Some(false),
            seed: Some(7),
            constr_data: ConstraintMode::Floor("elb_level".into()),
            dispatch: true,
            filter_r: Some(array![[0.01]]),
            created: Some(Utc::now()),
        };
        cfg.save(&path).unwrap();
        let back = EstimationConfig::load(&path).unwrap();
        assert_eq!(back.ndim, 2);
        assert_eq!(back.prior_names, cfg.prior_names);
        assert_eq!(back.filter_n, Some(300));
        assert_eq!(back.seed, Some(7));
        assert_eq!(back.constr_data, cfg.constr_data);
        assert!(back.dispatch);
        assert_eq!(back.filter_r, cfg.filter_r);
        assert_eq!(back.created, cfg.created);
        assert_eq!(back.priors().unwrap().names(), cfg.priors().unwrap().names());
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let err = serde_json::from_str::<EstimationConfig>(r#"{"ndim": 1, "bogus": 2}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(
            EstimationConfig::load(&path),
            Err(EstimError::Persist { .. })
        ));
    }
}
