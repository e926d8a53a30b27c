use tracing_subscriber::EnvFilter;

/// Workspace crates whose events reach the subscriber.
const CRATE_TARGETS: &[&str] = &["augur", "augur_estim", "augur_filter", "augur_prior"];

/// Level for a `-v` count: none -> warn, `-v` -> info, `-vv` -> debug,
/// more -> trace.
fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn directives(verbosity: u8) -> String {
    let level = level_for(verbosity);
    CRATE_TARGETS
        .iter()
        .map(|t| format!("{t}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `-v`.
///
/// Events go to stderr; stdout carries command output only.
pub fn init(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
