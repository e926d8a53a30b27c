use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Augur likelihood engine for state-space models.
#[derive(Parser)]
#[command(
    name = "augur",
    version,
    about = "Bayesian likelihood evaluation for state-space models"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Freeze the declared priors and check the estimation settings.
    Priors(PriorsArgs),
    /// Summarize a persisted shock-extraction report.
    Report(ReportArgs),
}

/// Arguments for the `priors` subcommand.
#[derive(clap::Args)]
pub struct PriorsArgs {
    /// Path to TOML configuration file.
    #[arg(short, long, default_value = "augur.toml")]
    pub config: PathBuf,

    /// Evaluate the log prior density at this comma-separated parameter vector.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub at: Vec<f64>,

    /// Write the frozen session configuration as JSON.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the `report` subcommand.
#[derive(clap::Args)]
pub struct ReportArgs {
    /// Path to the extraction report JSON.
    pub path: PathBuf,

    /// Path for the summary JSON output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
