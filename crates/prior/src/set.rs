//! Frozen priors, bounds and initial values.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dist::{DistKind, PriorDist};
use crate::error::PriorError;
use crate::spec::{PriorEntry, PriorSpec};

/// A prior whose distribution has been built and whose bounds and
/// initial value have been resolved.
#[derive(Debug, Clone)]
pub struct FrozenPrior {
    entry: PriorEntry,
    dist: PriorDist,
    lower: f64,
    upper: f64,
    init: f64,
}

impl FrozenPrior {
    /// Freezes a single entry.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`PriorError::UnknownDistribution`] | tag not in the catalogue |
    /// | [`PriorError::Malformed`] | moments not attainable by the family |
    /// | [`PriorError::InvalidBounds`] | `lower >= upper` or NaN bound |
    /// | [`PriorError::InitOutOfBounds`] | initial value outside the bounds |
    pub fn freeze(entry: &PriorEntry) -> Result<Self, PriorError> {
        let kind: DistKind =
            entry
                .dist
                .parse()
                .map_err(|dist| PriorError::UnknownDistribution {
                    name: entry.name.clone(),
                    dist,
                })?;
        let dist = PriorDist::from_moments(kind, entry.mean, entry.std).map_err(|reason| {
            PriorError::Malformed {
                name: entry.name.clone(),
                reason,
            }
        })?;

        let (support_lo, support_hi) = dist.support();
        let lower = entry.lower.unwrap_or(support_lo);
        let upper = entry.upper.unwrap_or(support_hi);
        if lower.is_nan() || upper.is_nan() || lower >= upper {
            return Err(PriorError::InvalidBounds {
                name: entry.name.clone(),
                lower,
                upper,
            });
        }

        let init = entry.init.unwrap_or(entry.mean);
        if !init.is_finite() || init < lower || init > upper {
            return Err(PriorError::InitOutOfBounds {
                name: entry.name.clone(),
                init,
                lower,
                upper,
            });
        }

        Ok(Self {
            entry: entry.clone(),
            dist,
            lower,
            upper,
            init,
        })
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Distribution family.
    pub fn kind(&self) -> DistKind {
        self.dist.kind()
    }

    /// Prior mean as declared.
    pub fn mean(&self) -> f64 {
        self.entry.mean
    }

    /// Prior standard deviation as declared.
    pub fn std(&self) -> f64 {
        self.entry.std
    }

    /// Lower bound.
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper bound.
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Initial value.
    pub fn init_value(&self) -> f64 {
        self.init
    }

    /// Declarative entry this prior was frozen from.
    pub fn entry(&self) -> &PriorEntry {
        &self.entry
    }

    /// Log-density at `x`; `-inf` outside `[lower, upper]` or for non-finite `x`.
    pub fn ln_pdf(&self, x: f64) -> f64 {
        if !x.is_finite() || x < self.lower || x > self.upper {
            return f64::NEG_INFINITY;
        }
        self.dist.ln_pdf(x)
    }
}

/// Which bound a parameter violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    /// Below the lower bound.
    Lower,
    /// Above the upper bound.
    Upper,
}

/// A single box-constraint violation reported by [`PriorSet::box_check`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundViolation {
    /// Parameter name.
    pub name: String,
    /// Offending value.
    pub value: f64,
    /// The bound that was crossed.
    pub bound: f64,
    /// Side of the violation.
    pub side: BoundSide,
}

impl fmt::Display for BoundViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rel, tag) = match self.side {
            BoundSide::Lower => ("lower", "lb"),
            BoundSide::Upper => ("higher", "ub"),
        };
        write!(
            f,
            "parameter {} of {:.5} {} than {} of {}",
            self.name, self.value, rel, tag, self.bound
        )
    }
}

/// Ordered set of frozen priors.
///
/// Serializes as its declarative [`PriorSpec`] and is re-frozen on
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PriorSpec", into = "PriorSpec")]
pub struct PriorSet {
    priors: Vec<FrozenPrior>,
}

impl PriorSet {
    /// Freezes every entry of `spec`, preserving declaration order.
    ///
    /// # Errors
    ///
    /// [`PriorError::EmptySpec`], [`PriorError::DuplicateName`], or the
    /// first error raised by [`FrozenPrior::freeze`].
    pub fn from_spec(spec: &PriorSpec) -> Result<Self, PriorError> {
        if spec.is_empty() {
            return Err(PriorError::EmptySpec);
        }
        let mut seen = HashSet::new();
        let mut priors = Vec::with_capacity(spec.len());
        for entry in spec.entries() {
            if !seen.insert(entry.name.as_str()) {
                return Err(PriorError::DuplicateName {
                    name: entry.name.clone(),
                });
            }
            priors.push(FrozenPrior::freeze(entry)?);
        }
        Ok(Self { priors })
    }

    /// Number of priors (the dimension of a parameter vector).
    pub fn len(&self) -> usize {
        self.priors.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    /// Frozen priors in order.
    pub fn priors(&self) -> &[FrozenPrior] {
        &self.priors
    }

    /// Parameter names in order.
    pub fn names(&self) -> Vec<String> {
        self.priors.iter().map(|p| p.name().to_string()).collect()
    }

    /// Initial values in order.
    pub fn init_value(&self) -> Vec<f64> {
        self.priors.iter().map(FrozenPrior::init_value).collect()
    }

    /// Lower and upper bounds in order.
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        self.priors.iter().map(|p| (p.lower(), p.upper())).unzip()
    }

    /// Joint log prior density: the sum of the per-coordinate log-densities.
    pub fn ln_prior(&self, par: &[f64]) -> Result<f64, PriorError> {
        self.check_len(par)?;
        Ok(self
            .priors
            .iter()
            .zip(par)
            .map(|(prior, &x)| prior.ln_pdf(x))
            .sum())
    }

    /// Lists every coordinate of `par` lying outside its bounds.
    pub fn box_check(&self, par: &[f64]) -> Result<Vec<BoundViolation>, PriorError> {
        self.check_len(par)?;
        let mut violations = Vec::new();
        for (prior, &value) in self.priors.iter().zip(par) {
            if value < prior.lower() {
                violations.push(BoundViolation {
                    name: prior.name().to_string(),
                    value,
                    bound: prior.lower(),
                    side: BoundSide::Lower,
                });
            }
            if value > prior.upper() {
                violations.push(BoundViolation {
                    name: prior.name().to_string(),
                    value,
                    bound: prior.upper(),
                    side: BoundSide::Upper,
                });
            }
        }
        Ok(violations)
    }

    /// Declarative spec this set was frozen from.
    pub fn spec(&self) -> PriorSpec {
        PriorSpec::from(
            self.priors
                .iter()
                .map(|p| p.entry().clone())
                .collect::<Vec<_>>(),
        )
    }

    fn check_len(&self, par: &[f64]) -> Result<(), PriorError> {
        if par.len() != self.priors.len() {
            return Err(PriorError::DimensionMismatch {
                expected: self.priors.len(),
                got: par.len(),
            });
        }
        Ok(())
    }
}

impl TryFrom<PriorSpec> for PriorSet {
    type Error = PriorError;

    fn try_from(spec: PriorSpec) -> Result<Self, Self::Error> {
        Self::from_spec(&spec)
    }
}

impl From<PriorSet> for PriorSpec {
    fn from(set: PriorSet) -> Self {
        set.spec()
    }
}
