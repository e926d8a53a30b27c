//! # augur-estim
//!
//! Prior, likelihood and posterior evaluation for state-space models, plus
//! smoothed shock extraction over parameter samples.
//!
//! ## Workflow
//!
//! ```mermaid
//! graph LR
//!     A["Estimation::new(model, dir)"] -->|"prep_estim(opts)?"| B["filter + priors + pool"]
//!     B --> C[".lprob(&par, &opts)?"]
//!     B --> D[".lprob_batch(pars, &opts)?"]
//!     B --> E[".extract(opts)?"]
//!     E --> F["ExtractionReport (JSON)"]
//! ```
//!
//! Every likelihood evaluation runs on its own [`EvalContext`] copy with a
//! generator seeded for that call:
//!
//! | Seed policy | Seed of the evaluation |
//! |-------------|------------------------|
//! | `set` | session seed |
//! | `vec` | derived from the parameter digits |
//! | `rand` | `vec` plus a random offset |
//!
//! Numerical failures at a draw give a log-likelihood of `-inf`. Faults in
//! the session setup and cancellation are returned as [`EstimError`].
//!
//! ## Quick Start
//!
//! ```
//! use augur_estim::{LprobOptions, SeedPolicy, Verbosity};
//!
//! let policy: SeedPolicy = "vec".parse().unwrap();
//! let opts = LprobOptions::new()
//!     .with_seed_policy(policy)
//!     .with_temperature(0.5)
//!     .with_verbosity(Verbosity::new(1));
//! assert!(opts.validate().is_ok());
//! assert_eq!(policy.resolve(&[0.5, 0.2], 0), policy.resolve(&[0.5, 0.2], 9));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Estimation<M: StateSpaceModel>                       (session.rs)
//!   ├─ create_filter / observation_covariance          (factory.rs)
//!   ├─ run_filter / get_ll ── run_pass                 (runner.rs)
//!   ├─ llike / lprior / lprob ── EvalContext           (likelihood.rs, context.rs)
//!   ├─ create_pool / mapper ── WorkerPool, Mapper      (pool.rs)
//!   ├─ extract ── ExtractionReport                     (extract.rs)
//!   └─ EstimationConfig, EstimOptions                  (config.rs)
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod factory;
pub mod likelihood;
pub mod model;
pub mod pool;
pub mod runner;
pub mod seed;
pub mod session;
pub mod verbosity;

pub use config::{DEFAULT_FILTER_N, EstimOptions, EstimationConfig, PoolSize};
pub use context::{CancelToken, EvalContext};
pub use error::{EstimError, NumericFailure, SystemError};
pub use extract::{
    ExtractOptions, ExtractionReport, MAX_NPAS_ATTEMPTS, Sample, SampleRecord, StorePath,
};
pub use factory::{DEFAULT_OBS_SCALE, DEFAULT_P_SCALE, FilterOptions};
pub use likelihood::LprobOptions;
pub use model::{LinearityBudget, StateSpaceModel, substitute};
pub use pool::{Mapper, WorkerPool};
pub use runner::{
    ConstraintMode, DEFAULT_CONSTRAINT_PARAMETER, DEFAULT_SMOOTHING_LAG, ENSEMBLE_RCOND,
    FilterOutput, RunMode, RunOptions, Smoothing,
};
pub use seed::{SeedPolicy, seed_from_parameters};
pub use session::Estimation;
pub use verbosity::Verbosity;
