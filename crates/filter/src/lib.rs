//! Filters for state-space likelihood evaluation.
//!
//! A [`FilterState`] bundles a [`FilterKind`], the model's dimensions, the
//! noise covariances and a [`FilterBackend`] that runs the recursions. The
//! kind is a closed enum; its static properties live in a capability table:
//!
//! | Kind | Tag | Requires linear system | Default members |
//! |------|-----|------------------------|-----------------|
//! | Kalman | `KalmanFilter` | yes | none |
//! | Ensemble | `TEnKF` | no | 500 |
//! | ParticleBootstrap | `ParticleFilter` | no | 10000 |
//! | ParticleAuxiliary | `AuxiliaryParticleFilter` | no | 10000 |
//!
//! Backends are built by a [`FilterProvider`]. [`BuiltinFilters`] ships the
//! linear Kalman filter; ensemble and particle recursions are supplied by
//! external providers implementing the same traits.
//!
//! Backends never own randomness. Every call that may draw takes the
//! caller's generator as `&mut dyn RngCore`.
//!
//! # Quick start
//!
//! ```
//! use augur_filter::{
//!     BatchOptions, BuiltinFilters, FilterDims, FilterKind, FilterProvider, FilterState,
//!     LinearSystem,
//! };
//! use ndarray::array;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let dims = FilterDims::new(1, 1);
//! let backend = BuiltinFilters.build(FilterKind::Kalman, dims, None).unwrap();
//! let mut filter = FilterState::new(FilterKind::Kalman, dims, None, backend).unwrap();
//! filter
//!     .bind_linear(LinearSystem::new(array![[0.9]], array![[1.0]]).unwrap())
//!     .unwrap();
//!
//! let z = array![[0.1], [0.3], [-0.2]];
//! let mut rng = StdRng::seed_from_u64(0);
//! let out = filter
//!     .batch_filter(z.view(), BatchOptions::likelihood(), &mut rng)
//!     .unwrap();
//! assert!(out.loglik.unwrap().is_finite());
//! ```
//!
//! # Architecture
//!
//! ```text
//! FilterState
//!   ├─ FilterParams       p, init_p, q, r, eps_cov, bindings   (state.rs)
//!   ├─ LinearSystem       F, H, d                              (system.rs)
//!   ├─ SystemFunctions    t_func, o_func, get_eps              (system.rs)
//!   └─ Box<dyn FilterBackend>
//!        └─ KalmanFilter  batch, RTS, FFBS draws               (kalman.rs)
//! ```

pub mod backend;
pub mod error;
pub mod kalman;
pub mod kind;
pub mod state;
pub mod system;

pub(crate) mod linalg;

pub use backend::{
    BatchOptions, BatchOutput, BuiltinFilters, FilterBackend, FilterProvider, NpasDraw,
    NpasOptions, SmoothRequest, Trajectory,
};
pub use error::FilterError;
pub use kalman::KalmanFilter;
pub use kind::{
    Capabilities, DEFAULT_ENSEMBLE_MEMBERS, DEFAULT_PARTICLES, FilterFamily, FilterKind,
};
pub use state::{FilterDims, FilterParams, FilterState};
pub use system::{
    EpsFn, LinearSystem, ObservationFn, SystemFunctions, TransitionFn, eps_fn, observation_fn,
    transition_fn,
};
