//! Report command: summarize a persisted shock-extraction report.

use std::fs::File;
use std::io::BufWriter;

use anyhow::{Context, Result, bail};
use ndarray::Axis;
use serde::Serialize;
use tracing::{info, info_span};

use augur_estim::ExtractionReport;

use crate::cli::ReportArgs;

/// Aggregate view of an [`ExtractionReport`].
#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub samples: usize,
    pub periods: usize,
    pub dim_x: usize,
    pub n_shocks: usize,
    /// Distinct parameter vectors; `None` entries count as one.
    pub parameter_sets: usize,
    /// Samples with at least one flagged period.
    pub flagged_samples: usize,
    /// Mean smoothed state per dimension, over samples and periods.
    pub state_mean: Vec<f64>,
    /// Standard deviation of each recovered shock, over samples and periods.
    pub shock_std: Vec<f64>,
}

impl ReportSummary {
    pub fn from_report(report: &ExtractionReport) -> Result<Self> {
        if report.is_empty() {
            bail!("extraction report holds no samples");
        }
        let (samples, periods, dim_x) = report.means.dim();
        let n_shocks = report.resid.len_of(Axis(2));

        let mut parameter_sets: Vec<&Option<Vec<f64>>> = Vec::new();
        for par in &report.pars {
            if !parameter_sets.contains(&par) {
                parameter_sets.push(par);
            }
        }

        let state_mean = report
            .means
            .mean_axis(Axis(0))
            .and_then(|m| m.mean_axis(Axis(0)))
            .map(|m| m.to_vec())
            .context("report has no periods")?;
        let shock_std = report
            .resid
            .axis_iter(Axis(2))
            .map(|shock| shock.std(0.0))
            .collect();

        Ok(Self {
            samples,
            periods,
            dim_x,
            n_shocks,
            parameter_sets: parameter_sets.len(),
            flagged_samples: report.flags.iter().filter(|f| f.iter().any(|b| *b)).count(),
            state_mean,
            shock_std,
        })
    }
}

/// Run the report summary.
pub fn run(args: ReportArgs) -> Result<()> {
    let _cmd = info_span!("report").entered();
    info!(path = %args.path.display(), "reading extraction report");
    let report = ExtractionReport::load(&args.path)
        .with_context(|| format!("failed to read report: {}", args.path.display()))?;
    let summary = ReportSummary::from_report(&report)?;

    println!(
        "{} samples, {} periods, {} states, {} shocks",
        summary.samples, summary.periods, summary.dim_x, summary.n_shocks
    );
    println!("parameter sets:  {}", summary.parameter_sets);
    println!("flagged samples: {}", summary.flagged_samples);
    println!("state mean:      {:.4?}", summary.state_mean);
    println!("shock std:       {:.4?}", summary.shock_std);

    if let Some(ref path) = args.output {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summary)
            .context("failed to write summary JSON")?;
        info!(path = %path.display(), "summary written");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn report() -> ExtractionReport {
        let mut means = Array3::zeros((3, 4, 2));
        means.index_axis_mut(Axis(2), 0).fill(1.0);
        means.index_axis_mut(Axis(2), 1).fill(-2.0);
        let mut resid = Array3::zeros((3, 4, 1));
        resid[[0, 0, 0]] = 1.0;
        resid[[0, 1, 0]] = -1.0;
        ExtractionReport {
            pars: vec![Some(vec![0.5]), Some(vec![0.5]), None],
            means,
            covs: Array4::zeros((3, 4, 2, 2)),
            resid,
            flags: vec![vec![false; 4], vec![false, true, false, false], vec![false; 4]],
        }
    }

    #[test]
    fn summary_aggregates() {
        let s = ReportSummary::from_report(&report()).unwrap();
        assert_eq!((s.samples, s.periods, s.dim_x, s.n_shocks), (3, 4, 2, 1));
        assert_eq!(s.parameter_sets, 2);
        assert_eq!(s.flagged_samples, 1);
        assert_eq!(s.state_mean, vec![1.0, -2.0]);
        // Two of twelve values are ±1 around a zero mean.
        assert!((s.shock_std[0] - (2.0f64 / 12.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn empty_report_is_rejected() {
        let empty = ExtractionReport {
            pars: Vec::new(),
            means: Array3::zeros((0, 0, 0)),
            covs: Array4::zeros((0, 0, 0, 0)),
            resid: Array3::zeros((0, 0, 0)),
            flags: Vec::new(),
        };
        assert!(ReportSummary::from_report(&empty).is_err());
    }
}
