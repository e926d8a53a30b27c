//! Pure conversion functions: TOML config structs -> crate API config types.

use anyhow::{Context, Result, bail};

use augur_estim::{
    ConstraintMode, EstimOptions, FilterOptions, LprobOptions, PoolSize, SeedPolicy,
};
use augur_filter::FilterKind;

use crate::config::{AugurConfig, EstimationToml};

/// Parses a filter kind name into the corresponding enum variant.
pub fn parse_filter_kind(s: &str) -> Result<FilterKind> {
    s.parse::<FilterKind>()
        .with_context(|| format!("invalid [estimation].filter: {s:?}"))
}

/// Parses the observation constraint: `"none"` or a parameter name.
pub fn parse_constraint(s: &str) -> Result<ConstraintMode> {
    match s.trim() {
        "" => bail!("empty [estimation].constraint; use \"none\" or a parameter name"),
        "none" => Ok(ConstraintMode::None),
        name => Ok(ConstraintMode::Floor(name.to_string())),
    }
}

/// Parses a seed policy name into the corresponding enum variant.
pub fn parse_seed_policy(s: &str) -> Result<SeedPolicy> {
    s.parse::<SeedPolicy>()
        .with_context(|| format!("invalid [estimation].seed_policy: {s:?}"))
}

/// Chooses the worker pool size.
pub fn parse_pool(est: &EstimationToml) -> Result<PoolSize> {
    match (est.parallel, est.cores) {
        (false, Some(_)) => bail!("[estimation].cores is set but parallel = false"),
        (false, None) => Ok(PoolSize::Disabled),
        (true, Some(n)) => Ok(PoolSize::Cores(n)),
        (true, None) => Ok(PoolSize::Auto),
    }
}

/// Builds [`EstimOptions`] from the TOML configuration.
pub fn build_estim_options(config: &AugurConfig) -> Result<EstimOptions> {
    let est = &config.estimation;
    let mut filter = FilterOptions::new();
    if let Some(ref name) = est.filter {
        filter = filter.with_kind(parse_filter_kind(name)?);
    }
    if let Some(members) = est.members {
        filter = filter.with_members(members);
    }

    let mut opts = EstimOptions::new()
        .with_load_r(est.load_r)
        .with_eval_priors(est.eval_priors)
        .with_dispatch(est.dispatch)
        .with_constraint(parse_constraint(&est.constraint)?)
        .with_pool(parse_pool(est)?)
        .with_filter(filter);
    if let Some(members) = est.members {
        opts = opts.with_n(members);
    }
    if let Some(linear) = est.linear {
        opts = opts.with_linear(linear);
    }
    if let Some(seed) = config.seed {
        opts = opts.with_seed(seed);
    }
    opts.validate().context("invalid [estimation] section")?;
    Ok(opts)
}

/// Builds [`LprobOptions`] from the TOML estimation section.
pub fn build_lprob_options(est: &EstimationToml) -> Result<LprobOptions> {
    let mut opts = LprobOptions::new()
        .with_temperature(est.temperature)
        .with_seed_policy(parse_seed_policy(&est.seed_policy)?);
    if let Some(linear) = est.linear {
        opts = opts.with_linear(linear);
    }
    opts.validate().context("invalid [estimation] section")?;
    Ok(opts)
}
