//! Smoothed shock extraction over a grid of parameter vectors.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use augur_filter::{FilterError, NpasDraw, NpasOptions};
use ndarray::{Array2, Array3, Array4, ArrayView, Axis, Dimension, RemoveAxis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::persist_error;
use crate::context::EvalContext;
use crate::error::EstimError;
use crate::model::StateSpaceModel;
use crate::runner::{RunOptions, Smoothing};
use crate::session::Estimation;
use crate::verbosity::Verbosity;

/// Attempts of the shock decomposition per task before the error is
/// returned.
pub const MAX_NPAS_ATTEMPTS: usize = 4;

/// Parameter vectors to extract shocks for.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Sample {
    /// The model's current parameters, without rebuilding the system.
    #[default]
    Current,
    /// A single free-parameter vector.
    One(Vec<f64>),
    /// Many free-parameter vectors.
    Many(Vec<Vec<f64>>),
}

impl Sample {
    fn into_vectors(self) -> Vec<Option<Vec<f64>>> {
        match self {
            Self::Current => vec![None],
            Self::One(par) => vec![Some(par)],
            Self::Many(pars) => pars.into_iter().map(Some).collect(),
        }
    }
}

/// Where to persist the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorePath {
    /// `<model name>_eps.json` in the session directory.
    Default,
    /// An explicit path; relative paths resolve against the session
    /// directory and the extension is set to `json`.
    Path(PathBuf),
}

/// Options of [`Estimation::extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    sample: Sample,
    nsamples: usize,
    precalc: bool,
    seed: u64,
    store_path: Option<StorePath>,
    verbosity: Verbosity,
    debug: bool,
    npas: NpasOptions,
}

impl ExtractOptions {
    /// Current parameters, one replicate, precomputed shock recovery,
    /// seed 0, nothing persisted.
    pub fn new() -> Self {
        Self {
            sample: Sample::Current,
            nsamples: 1,
            precalc: true,
            seed: 0,
            store_path: None,
            verbosity: Verbosity::SILENT,
            debug: false,
            npas: NpasOptions::new(),
        }
    }

    /// Sets the parameter vectors.
    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.sample = sample;
        self
    }

    /// Sets the number of replicates per parameter vector.
    pub fn with_nsamples(mut self, nsamples: usize) -> Self {
        self.nsamples = nsamples;
        self
    }

    /// Whether the shock recovery bound to the filter is used.
    pub fn with_precalc(mut self, precalc: bool) -> Self {
        self.precalc = precalc;
        self
    }

    /// Sets the base seed of the decomposition draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Persists the report.
    pub fn with_store_path(mut self, store_path: StorePath) -> Self {
        self.store_path = Some(store_path);
        self
    }

    /// Sets the verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Runs the tasks on the calling thread and switches the session to
    /// debug mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Options forwarded to the decomposition.
    pub fn with_npas(mut self, npas: NpasOptions) -> Self {
        self.npas = npas;
        self
    }

    /// Parameter vectors.
    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    /// Replicates per vector.
    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    /// Whether precomputed shock recovery is used.
    pub fn precalc(&self) -> bool {
        self.precalc
    }

    /// Base seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Persistence target.
    pub fn store_path(&self) -> Option<&StorePath> {
        self.store_path.as_ref()
    }

    /// Verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Decomposition options.
    pub fn npas(&self) -> &NpasOptions {
        &self.npas
    }

    /// Rejects zero replicates and an empty grid.
    pub fn validate(&self) -> Result<(), EstimError> {
        if self.nsamples == 0 {
            return Err(EstimError::InvalidOption {
                field: "nsamples",
                reason: "at least one replicate is required".into(),
            });
        }
        if matches!(&self.sample, Sample::Many(pars) if pars.is_empty()) {
            return Err(EstimError::InvalidOption {
                field: "sample",
                reason: "no parameter vectors given".into(),
            });
        }
        Ok(())
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one `(parameter vector, replicate)` task.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Parameter vector, `None` for the current parameters.
    pub par: Option<Vec<f64>>,
    /// Drawn state path, `(periods, dim_x)`.
    pub mean: Array2<f64>,
    /// Smoothed state covariances, `(periods, dim_x, dim_x)`.
    pub cov: Array3<f64>,
    /// Recovered shocks, `(periods, n_shocks)`.
    pub resid: Array2<f64>,
    /// Regularization flags of the draw.
    pub flags: Vec<bool>,
}

impl SampleRecord {
    fn from_draw(par: Option<Vec<f64>>, draw: NpasDraw) -> Result<Self, EstimError> {
        let NpasDraw {
            means,
            covs,
            resid,
            flags,
        } = draw;
        let mean = means
            .into_iter()
            .next()
            .ok_or_else(|| EstimError::Report("decomposition returned no state path".into()))?;
        let resid = resid
            .into_iter()
            .next()
            .ok_or_else(|| EstimError::Report("decomposition returned no shocks".into()))?;
        Ok(Self {
            par,
            mean,
            cov: covs,
            resid,
            flags,
        })
    }
}

/// Extracted shocks, stacked over tasks along the first axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Parameter vector of each task.
    pub pars: Vec<Option<Vec<f64>>>,
    /// `(tasks, periods, dim_x)`.
    pub means: Array3<f64>,
    /// `(tasks, periods, dim_x, dim_x)`.
    pub covs: Array4<f64>,
    /// `(tasks, periods, n_shocks)`.
    pub resid: Array3<f64>,
    /// Flags of each task.
    pub flags: Vec<Vec<bool>>,
}

impl ExtractionReport {
    /// Stacks task records in order.
    ///
    /// # Errors
    ///
    /// [`EstimError::Report`] if `records` is empty or shapes differ.
    pub fn from_records(records: Vec<SampleRecord>) -> Result<Self, EstimError> {
        if records.is_empty() {
            return Err(EstimError::Report("no samples".into()));
        }
        let means = stack(records.iter().map(|r| r.mean.view()).collect())?;
        let covs = stack(records.iter().map(|r| r.cov.view()).collect())?;
        let resid = stack(records.iter().map(|r| r.resid.view()).collect())?;
        let (pars, flags) = records.into_iter().map(|r| (r.par, r.flags)).unzip();
        Ok(Self {
            pars,
            means,
            covs,
            resid,
            flags,
        })
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.pars.len()
    }

    /// Returns `true` if the report holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.pars.is_empty()
    }

    /// Writes the report as JSON.
    pub fn save(&self, path: &Path) -> Result<(), EstimError> {
        let file = File::create(path).map_err(|e| persist_error(path, e))?;
        serde_json::to_writer(BufWriter::new(file), self).map_err(|e| persist_error(path, e))
    }

    /// Reads a report written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, EstimError> {
        let file = File::open(path).map_err(|e| persist_error(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| persist_error(path, e))
    }
}

fn stack<D>(views: Vec<ArrayView<'_, f64, D>>) -> Result<ndarray::Array<f64, D::Larger>, EstimError>
where
    D: Dimension,
    D::Larger: RemoveAxis,
{
    ndarray::stack(Axis(0), &views).map_err(|e| EstimError::Report(e.to_string()))
}

/// One task: rebuild, smooth, then decompose with retries.
fn extract_one<M: StateSpaceModel>(
    base: &EvalContext<M>,
    index: usize,
    par: Option<Vec<f64>>,
    replicate: usize,
    opts: &ExtractOptions,
) -> Result<SampleRecord, EstimError> {
    let mut ctx = base.clone();
    ctx.cancel.check()?;

    if let Some(par) = &par {
        let linear = ctx.linear;
        ctx.reparameterize(par, linear)?;
    }

    let mut run_rng = StdRng::seed_from_u64(ctx.seed);
    ctx.run(&RunOptions::smooth(Smoothing::Default), &mut run_rng)?;

    let mut npas = opts.npas.clone().with_nsamples(1);
    npas.get_eps = if opts.precalc {
        npas.get_eps.or_else(|| {
            ctx.filter
                .params()
                .functions
                .as_ref()
                .and_then(|f| f.get_eps().cloned())
        })
    } else {
        None
    };
    npas.verbose = opts.verbosity.at_least(4);

    let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(replicate as u64));
    let mut attempt = 0;
    loop {
        attempt += 1;
        ctx.cancel.check()?;
        match ctx.filter.npas(&npas, &mut rng) {
            Ok(draw) => return SampleRecord::from_draw(par, draw),
            Err(FilterError::Interrupted) => return Err(EstimError::Cancelled),
            Err(e) if attempt < MAX_NPAS_ATTEMPTS => {
                debug!(index, attempt, error = %e, "decomposition failed, retrying");
            }
            Err(source) => {
                return Err(EstimError::Extraction {
                    index,
                    attempts: attempt,
                    source,
                });
            }
        }
    }
}

impl<M: StateSpaceModel> Estimation<M> {
    /// Extracts smoothed shocks for every `(parameter vector, replicate)`
    /// pair, in grid order.
    ///
    /// Tasks run through [`mapper`](Self::mapper) on independent copies of
    /// the session. The worker pool is closed afterwards. The report is
    /// stored on the session and persisted when a store path is given.
    ///
    /// # Errors
    ///
    /// [`EstimError::Extraction`] when a decomposition fails
    /// [`MAX_NPAS_ATTEMPTS`] times, [`EstimError::Cancelled`] on
    /// cancellation, and any rebuild or filter error of a task.
    #[tracing::instrument(skip_all, fields(model = self.model.name(), nsamples = opts.nsamples))]
    pub fn extract(&mut self, opts: ExtractOptions) -> Result<ExtractionReport, EstimError> {
        opts.validate()?;
        self.debug |= opts.debug;
        let start = Instant::now();

        let tasks: Vec<(usize, Option<Vec<f64>>, usize)> = opts
            .sample
            .clone()
            .into_vectors()
            .into_iter()
            .flat_map(|par| (0..opts.nsamples).map(move |rep| (par.clone(), rep)))
            .enumerate()
            .map(|(index, (par, rep))| (index, par, rep))
            .collect();
        let total = tasks.len();

        let ctx = self.context()?;
        let done = AtomicUsize::new(0);
        let verbose = opts.verbosity.at_least(1);
        let results = self.mapper().map(tasks, |(index, par, rep)| {
            let record = extract_one(&ctx, index, par, rep, &opts);
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if verbose {
                debug!(finished, total, "sample extracted");
            }
            record
        });
        self.close_pool();

        let records = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        let report = ExtractionReport::from_records(records)?;

        if let Some(store) = &opts.store_path {
            let path = self.report_path(store);
            report.save(&path)?;
            info!(path = %path.display(), "extraction report written");
        }
        if verbose {
            info!(
                samples = total,
                elapsed_s = start.elapsed().as_secs_f64(),
                "extraction done"
            );
        }

        self.eps_report = Some(report.clone());
        Ok(report)
    }

    /// Resolved file path of a report.
    ///
    /// An `npz` or `json` extension becomes `json`; any other name gets
    /// `.json` appended. Relative paths are taken from the working
    /// directory.
    pub fn report_path(&self, store: &StorePath) -> PathBuf {
        let path = match store {
            StorePath::Default => PathBuf::from(format!("{}_eps", self.model.name())),
            StorePath::Path(p) => p.clone(),
        };
        let path = match path.extension().and_then(|e| e.to_str()) {
            Some("npz" | "json") => path.with_extension("json"),
            _ => {
                let mut name = path.into_os_string();
                name.push(".json");
                PathBuf::from(name)
            }
        };
        if path.is_absolute() {
            path
        } else {
            self.workdir.join(path)
        }
    }
}
