//! Shock extraction over parameter grids.

mod common;

use approx::assert_abs_diff_eq;
use augur_estim::{
    EstimError, EstimOptions, Estimation, ExtractOptions, ExtractionReport, FilterOptions,
    PoolSize, Sample, StorePath,
};
use augur_filter::{FilterError, FilterKind};
use common::{MockProvider, MockScript, ToyModel};

fn particle_in(script: MockScript, pool: PoolSize, dir: &std::path::Path) -> Estimation<ToyModel> {
    let mut est =
        Estimation::new(ToyModel::new(40, 5), dir).with_provider(MockProvider::new(script));
    est.prep_estim(
        EstimOptions::new()
            .with_n(100)
            .with_pool(pool)
            .with_filter(FilterOptions::new().with_kind(FilterKind::ParticleBootstrap)),
    )
    .unwrap();
    est
}

fn particle(script: MockScript, pool: PoolSize) -> Estimation<ToyModel> {
    particle_in(script, pool, &std::env::temp_dir())
}

fn grid() -> Vec<Vec<f64>> {
    vec![vec![0.5, 0.2], vec![0.6, 0.3], vec![0.7, 0.4]]
}

#[test]
fn grid_order_is_preserved() {
    let mut est = particle(MockScript::default(), PoolSize::Cores(3));
    let report = est
        .extract(
            ExtractOptions::new()
                .with_sample(Sample::Many(grid()))
                .with_nsamples(2),
        )
        .unwrap();

    let [p1, p2, p3] = [grid()[0].clone(), grid()[1].clone(), grid()[2].clone()];
    assert_eq!(
        report.pars,
        vec![
            Some(p1.clone()),
            Some(p1),
            Some(p2.clone()),
            Some(p2),
            Some(p3.clone()),
            Some(p3)
        ]
    );
    assert_eq!(report.means.shape(), &[6, 40, 1]);
    assert_eq!(report.covs.shape(), &[6, 40, 1, 1]);
    assert_eq!(report.resid.shape(), &[6, 40, 1]);
    assert_eq!(report.flags.len(), 6);

    // Mock states carry q = sigma² of the task's parameters.
    for (i, sigma) in [0.2, 0.2, 0.3, 0.3, 0.4, 0.4].into_iter().enumerate() {
        assert_abs_diff_eq!(report.means[[i, 0, 0]], sigma * sigma, epsilon = 1e-3);
    }
    // Replicates draw with different seeds.
    assert_ne!(report.means[[0, 0, 0]], report.means[[1, 0, 0]]);
}

#[test]
fn pool_is_closed_after_extraction() {
    let mut est = particle(MockScript::default(), PoolSize::Cores(2));
    assert!(est.pool().is_some());
    est.extract(ExtractOptions::new()).unwrap();
    assert!(est.pool().is_none());
    assert!(est.eps_report().is_some());
}

#[test]
fn sequential_and_parallel_agree() {
    let opts = ExtractOptions::new()
        .with_sample(Sample::Many(grid()))
        .with_nsamples(2)
        .with_seed(17);

    let mut parallel = particle(MockScript::default(), PoolSize::Cores(3));
    assert!(parallel.mapper().is_parallel());
    let a = parallel.extract(opts.clone()).unwrap();

    let mut sequential = particle(MockScript::default(), PoolSize::Cores(3));
    let b = sequential.extract(opts.with_debug(true)).unwrap();
    assert!(sequential.is_debug());
    assert!(!sequential.mapper().is_parallel());

    assert_eq!(a, b);
}

#[test]
fn three_failures_are_retried() {
    let mut est = particle(
        MockScript {
            npas_failures: 3,
            ..Default::default()
        },
        PoolSize::Disabled,
    );
    let report = est
        .extract(ExtractOptions::new().with_sample(Sample::Many(grid())))
        .unwrap();
    assert_eq!(report.len(), 3);
}

#[test]
fn fourth_failure_is_returned() {
    let mut est = particle(
        MockScript {
            npas_failures: 4,
            ..Default::default()
        },
        PoolSize::Disabled,
    );
    let err = est
        .extract(ExtractOptions::new().with_sample(Sample::One(vec![0.5, 0.2])))
        .unwrap_err();
    match err {
        EstimError::Extraction {
            index,
            attempts,
            source,
        } => {
            assert_eq!(index, 0);
            assert_eq!(attempts, 4);
            assert!(matches!(source, FilterError::Singular { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cancelled_extraction_is_not_retried() {
    let mut est = particle(MockScript::default(), PoolSize::Disabled);
    est.cancel_token().cancel();
    let err = est.extract(ExtractOptions::new()).unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn precalc_controls_shock_recovery() {
    let mut est = particle(MockScript::default(), PoolSize::Disabled);
    let with = est.extract(ExtractOptions::new()).unwrap();
    assert_eq!(with.pars, vec![None]);
    assert!(with.resid.iter().any(|v| *v != 0.0));

    let without = est
        .extract(ExtractOptions::new().with_precalc(false))
        .unwrap();
    assert!(without.resid.iter().all(|v| *v == 0.0));
}

#[test]
fn report_persisted_relative_to_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let mut est = particle_in(MockScript::default(), PoolSize::Disabled, dir.path());

    let report = est
        .extract(
            ExtractOptions::new()
                .with_sample(Sample::One(vec![0.6, 0.3]))
                .with_store_path(StorePath::Path("shocks.npz".into())),
        )
        .unwrap();
    let path = dir.path().join("shocks.json");
    assert!(path.exists());
    assert_eq!(ExtractionReport::load(&path).unwrap(), report);

    est.extract(ExtractOptions::new().with_store_path(StorePath::Default))
        .unwrap();
    assert!(dir.path().join("toy_eps.json").exists());
}

#[test]
fn kalman_extraction() {
    let mut est = Estimation::new(ToyModel::new(40, 5), std::env::temp_dir());
    est.prep_estim(
        EstimOptions::new()
            .with_linear(true)
            .with_pool(PoolSize::Disabled),
    )
    .unwrap();
    let report = est
        .extract(
            ExtractOptions::new()
                .with_sample(Sample::One(vec![0.6, 0.3]))
                .with_nsamples(2),
        )
        .unwrap();
    assert_eq!(report.means.shape(), &[2, 40, 1]);
    assert!(report.means.iter().all(|v| v.is_finite()));
    assert!(report.resid.iter().all(|v| v.is_finite()));
    assert!(report.covs.iter().all(|v| v.is_finite() && *v >= 0.0));
}

#[test]
fn report_names_keep_inner_dots() {
    let dir = tempfile::tempdir().unwrap();
    let est = Estimation::new(ToyModel::new(20, 1).with_name("nk.v2"), dir.path());

    assert_eq!(
        est.report_path(&StorePath::Default),
        dir.path().join("nk.v2_eps.json")
    );
    assert_eq!(
        est.report_path(&StorePath::Path("run.1".into())),
        dir.path().join("run.1.json")
    );
    assert_eq!(
        est.report_path(&StorePath::Path("shocks.npz".into())),
        dir.path().join("shocks.json")
    );
    assert_eq!(
        est.report_path(&StorePath::Path("/abs/out.json".into())),
        std::path::PathBuf::from("/abs/out.json")
    );
}

#[test]
fn dotted_model_name_persists_under_its_full_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut est = Estimation::new(ToyModel::new(30, 5).with_name("nk.v2"), dir.path())
        .with_provider(MockProvider::new(MockScript::default()));
    est.prep_estim(
        EstimOptions::new()
            .with_n(50)
            .with_pool(PoolSize::Disabled),
    )
    .unwrap();
    est.extract(ExtractOptions::new().with_store_path(StorePath::Default))
        .unwrap();
    assert!(dir.path().join("nk.v2_eps.json").exists());
    assert!(!dir.path().join("nk.json").exists());
}
