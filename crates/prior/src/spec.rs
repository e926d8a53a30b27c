//! Declarative prior specification.

use serde::{Deserialize, Serialize};

/// One declared prior: a parameter name, a distribution family given by
/// its first two moments, and optional bounds and initial value.
///
/// In TOML the entries form an array of tables, which fixes their order:
///
/// ```toml
/// [[prior]]
/// name = "rho"
/// dist = "beta"
/// mean = 0.5
/// std = 0.2
/// lower = 0.0
/// upper = 0.99
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriorEntry {
    /// Parameter name.
    pub name: String,
    /// Distribution tag (`normal`, `beta`, `gamma`, `inv_gamma`, `uniform`).
    pub dist: String,
    /// Prior mean.
    pub mean: f64,
    /// Prior standard deviation.
    pub std: f64,
    /// Initial value; defaults to the prior mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<f64>,
    /// Lower bound; defaults to the lower end of the support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    /// Upper bound; defaults to the upper end of the support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl PriorEntry {
    /// Creates an entry without bounds or initial value.
    pub fn new(name: impl Into<String>, dist: impl Into<String>, mean: f64, std: f64) -> Self {
        Self {
            name: name.into(),
            dist: dist.into(),
            mean,
            std,
            init: None,
            lower: None,
            upper: None,
        }
    }

    /// Sets the initial value.
    pub fn with_init(mut self, init: f64) -> Self {
        self.init = Some(init);
        self
    }

    /// Sets both bounds.
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }
}

/// Ordered collection of [`PriorEntry`] values.
///
/// Index `i` of every derived vector (frozen priors, bounds, initial
/// values, parameter vectors) refers to entry `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorSpec {
    entries: Vec<PriorEntry>,
}

impl PriorSpec {
    /// Creates an empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn with_entry(mut self, entry: PriorEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Returns the entries in declaration order.
    pub fn entries(&self) -> &[PriorEntry] {
        &self.entries
    }

    /// Returns the parameter names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of declared priors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<PriorEntry>> for PriorSpec {
    fn from(entries: Vec<PriorEntry>) -> Self {
        Self { entries }
    }
}
