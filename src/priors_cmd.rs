//! Priors command: freeze the declared priors and check the estimation settings.

use anyhow::{Context, Result, bail};
use tracing::{info, info_span, warn};

use augur_estim::EstimationConfig;
use augur_prior::PriorSet;

use crate::cli::PriorsArgs;
use crate::config::AugurConfig;
use crate::convert;

/// Run the prior check.
pub fn run(args: PriorsArgs) -> Result<()> {
    let _cmd = info_span!("priors").entered();
    let toml_str = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read config file: {}", args.config.display()))?;
    let config: AugurConfig = toml::from_str(&toml_str).context("failed to parse TOML config")?;

    if config.prior.is_empty() {
        bail!("no [[prior]] entries in {}", args.config.display());
    }
    let estim = convert::build_estim_options(&config)?;
    let lprob = convert::build_lprob_options(&config.estimation)?;
    info!(
        kind = ?estim.filter().kind(),
        seed_policy = %lprob.seed_policy(),
        temperature = lprob.temperature(),
        "estimation settings valid"
    );

    let priors = PriorSet::from_spec(&config.prior).context("failed to freeze priors")?;
    info!(n_priors = priors.len(), "priors frozen");

    println!(
        "{:<16} {:<10} {:>10} {:>10} {:>12} {:>12} {:>10}",
        "name", "dist", "mean", "std", "lower", "upper", "init"
    );
    for p in priors.priors() {
        println!(
            "{:<16} {:<10} {:>10.4} {:>10.4} {:>12.4} {:>12.4} {:>10.4}",
            p.name(),
            p.kind().tag(),
            p.mean(),
            p.std(),
            p.lower(),
            p.upper(),
            p.init_value()
        );
    }

    if !args.at.is_empty() {
        for violation in priors.box_check(&args.at)? {
            warn!("{violation}");
        }
        let lp = priors
            .ln_prior(&args.at)
            .context("cannot evaluate the prior at --at")?;
        println!("ln prior at {:?}: {lp}", args.at);
    }

    if let Some(ref path) = args.output {
        let session = EstimationConfig {
            ndim: priors.len(),
            prior_names: priors.names(),
            filter_n: estim.n(),
            linear: estim.linear(),
            seed: estim.seed(),
            constr_data: estim.constraint().clone(),
            dispatch: estim.dispatch(),
            prior_set: Some(priors),
            ..Default::default()
        };
        session
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "session configuration written");
    }

    Ok(())
}
