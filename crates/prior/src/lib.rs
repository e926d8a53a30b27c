//! # augur-prior
//!
//! Declarative priors for Bayesian estimation of state-space models.
//!
//! ## Workflow
//!
//! ```mermaid
//! graph LR
//!     A["PriorSpec (TOML [[prior]])"] -->|"PriorSet::from_spec()?"| B["PriorSet"]
//!     B --> C[".init_value()"]
//!     B --> D[".bounds()"]
//!     B --> E[".ln_prior(&par)?"]
//!     B --> F[".box_check(&par)?"]
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use augur_prior::{PriorEntry, PriorSet, PriorSpec};
//!
//! let spec = PriorSpec::new()
//!     .with_entry(PriorEntry::new("rho", "beta", 0.5, 0.2).with_bounds(0.0, 0.99))
//!     .with_entry(PriorEntry::new("sigma", "inv_gamma", 0.1, 0.25));
//! let priors = PriorSet::from_spec(&spec).unwrap();
//! let lp = priors.ln_prior(&priors.init_value()).unwrap();
//! assert!(lp.is_finite());
//! ```
//!
//! ## Distribution Catalogue
//!
//! | Tag | Support | Moment matching |
//! |-----|---------|-----------------|
//! | `normal` | ℝ | `N(mean, std²)` |
//! | `beta` | (0, 1) | `κ = m(1-m)/s² - 1`, `a = mκ`, `b = (1-m)κ` |
//! | `gamma` | (0, ∞) | `shape = m²/s²`, `rate = m/s²` |
//! | `inv_gamma` | (0, ∞) | `shape = m²/s² + 2`, `rate = m(shape-1)` |
//! | `uniform` | `m ± √3·s` | |

mod dist;
mod error;
mod set;
mod spec;

pub use dist::{DistKind, PriorDist};
pub use error::PriorError;
pub use set::{BoundSide, BoundViolation, FrozenPrior, PriorSet};
pub use spec::{PriorEntry, PriorSpec};
