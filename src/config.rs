use augur_prior::PriorSpec;
use serde::Deserialize;

/// Top-level Augur configuration.
///
/// ```toml
/// seed = 7
///
/// [estimation]
/// filter = "TEnKF"
/// members = 300
///
/// [[prior]]
/// name = "rho"
/// dist = "beta"
/// mean = 0.5
/// std = 0.2
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AugurConfig {
    /// Session seed.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Estimation settings.
    #[serde(default)]
    pub estimation: EstimationToml,

    /// Declared priors, in parameter order.
    #[serde(default)]
    pub prior: PriorSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimationToml {
    /// Filter kind name, e.g. `"KalmanFilter"`, `"TEnKF"` or `"PF"`.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub members: Option<usize>,
    #[serde(default)]
    pub linear: Option<bool>,
    #[serde(default)]
    pub load_r: bool,
    #[serde(default)]
    pub eval_priors: bool,
    #[serde(default)]
    pub dispatch: bool,
    /// `"none"` or the name of the parameter that floors the observable.
    #[serde(default = "default_constraint")]
    pub constraint: String,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default)]
    pub cores: Option<usize>,
    #[serde(default = "default_seed_policy")]
    pub seed_policy: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for EstimationToml {
    fn default() -> Self {
        Self {
            filter: None,
            members: None,
            linear: None,
            load_r: false,
            eval_priors: false,
            dispatch: false,
            constraint: default_constraint(),
            parallel: default_parallel(),
            cores: None,
            seed_policy: default_seed_policy(),
            temperature: default_temperature(),
        }
    }
}

fn default_constraint() -> String {
    "none".to_string()
}
fn default_parallel() -> bool {
    true
}
fn default_seed_policy() -> String {
    "set".to_string()
}
fn default_temperature() -> f64 {
    1.0
}
