//! Integration tests for the matrix sweep against the scripted runtime.

use std::sync::Arc;
use std::time::Duration;

use xval_engine::{
    CatalogError, LogLayout, MatrixOrchestrator, PairRunner, RunConfig, RunError, Stage,
    StaticCatalog, SweepError, SweepReport,
};
use xval_runtime::fakes::{ImageScript, RuntimeCall, ScriptedRuntime};

fn clients() -> StaticCatalog {
    StaticCatalog::default()
        .with_image("alpha", "clients/alpha")
        .with_image("beta", "clients/beta")
}

fn validators() -> StaticCatalog {
    StaticCatalog::default()
        .with_image("devp2p/discv4", "validators/discv4")
        .with_image("rpc", "validators/rpc")
}

fn healthy_runtime() -> Arc<ScriptedRuntime> {
    Arc::new(
        ScriptedRuntime::new()
            .with_image("clients/alpha", ImageScript::ready_client())
            .with_image("clients/beta", ImageScript::ready_client().with_ready_after(4))
            .with_image("validators/discv4", ImageScript::validator(0))
            .with_image("validators/rpc", ImageScript::validator(0)),
    )
}

fn orchestrator(
    rt: &Arc<ScriptedRuntime>,
    clients: StaticCatalog,
    validators: StaticCatalog,
    config: RunConfig,
    root: &std::path::Path,
) -> MatrixOrchestrator {
    MatrixOrchestrator::new(
        Arc::new(clients),
        Arc::new(validators),
        PairRunner::new(rt.clone(), rt.clone(), config),
        LogLayout::new(root),
    )
}

/// Test: the matrix has one verdict per client × validator
#[tokio::test(start_paused = true)]
async fn test_matrix_shape_matches_catalogs() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    let matrix = orch.sweep(".", ".").await.expect("sweep failed");

    assert_eq!(matrix.len(), 2);
    assert_eq!(matrix.cell_count(), 4);
    assert!(matrix.all_passed());
    for (_, _, verdict) in matrix.iter() {
        assert!(verdict.end >= verdict.start);
    }
    assert!(rt.live_containers().is_empty());
    assert_eq!(rt.created_count(), 8);
}

/// Test: one ready client and one that never listens, against one validator
#[tokio::test(start_paused = true)]
async fn test_ready_and_never_ready_clients() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = Arc::new(
        ScriptedRuntime::new()
            .with_image("clients/alpha", ImageScript::ready_client())
            .with_image("clients/beta", ImageScript::never_ready())
            .with_image("validators/discv4", ImageScript::validator(0)),
    );
    let config = RunConfig::default().with_readiness_timeout(Duration::from_secs(30));
    let orch = orchestrator(
        &rt,
        clients(),
        StaticCatalog::default().with_image("V1", "validators/discv4"),
        config,
        tmp.path(),
    );

    let matrix = orch.sweep(".", ".").await.expect("sweep failed");

    let a = matrix.get("alpha", "V1").expect("alpha verdict");
    let b = matrix.get("beta", "V1").expect("beta verdict");
    assert!(a.success);
    assert!(a.error.is_none());
    assert!(!b.success);
    assert_eq!(
        b.error,
        Some(RunError::Timeout {
            stage: Stage::Readiness,
            limit_ms: 30_000
        })
    );
    // The never-ready client never got a validator.
    assert_eq!(rt.containers_of("validators/discv4").len(), 1);
    assert!(rt.live_containers().is_empty());
}

/// Test: a failing pair does not stop the sweep
#[tokio::test(start_paused = true)]
async fn test_failures_do_not_terminate_sweep() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = Arc::new(
        ScriptedRuntime::new()
            .with_image("clients/alpha", ImageScript::crashing(1, 3))
            .with_image("clients/beta", ImageScript::ready_client())
            .with_image("validators/discv4", ImageScript::validator(137))
            .with_image("validators/rpc", ImageScript::validator(0)),
    );
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    let matrix = orch.sweep(".", ".").await.expect("sweep failed");

    assert_eq!(matrix.cell_count(), 4);
    assert_eq!(
        matrix.get("alpha", "rpc").unwrap().error,
        Some(RunError::Terminated { exit_code: 3 })
    );
    let discv4 = matrix.get("beta", "devp2p/discv4").unwrap();
    assert!(!discv4.success);
    assert!(discv4.error.is_none());
    assert_eq!(discv4.exit_code, Some(137));
    assert!(matrix.get("beta", "rpc").unwrap().passed());
    assert_eq!(matrix.passed_count(), 1);
}

/// Test: sequential sweeps run validator-major in enumeration order
#[tokio::test(start_paused = true)]
async fn test_sequential_enumeration_order() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    orch.sweep(".", ".").await.expect("sweep failed");

    let created: Vec<String> = rt
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RuntimeCall::Create { image } => Some(image),
            _ => None,
        })
        .collect();
    assert_eq!(
        created,
        vec![
            "clients/alpha",
            "validators/discv4",
            "clients/beta",
            "validators/discv4",
            "clients/alpha",
            "validators/rpc",
            "clients/beta",
            "validators/rpc",
        ]
    );
}

/// Test: a parallel sweep produces the same outcomes as a sequential one
#[tokio::test(start_paused = true)]
async fn test_parallel_sweep_matches_sequential() {
    let script = || {
        Arc::new(
            ScriptedRuntime::new()
                .with_image("clients/alpha", ImageScript::ready_client())
                .with_image("clients/beta", ImageScript::ready_client().with_ready_after(3))
                .with_image("validators/discv4", ImageScript::validator(1))
                .with_image("validators/rpc", ImageScript::validator(0)),
        )
    };
    let seq_dir = tempfile::tempdir().unwrap();
    let par_dir = tempfile::tempdir().unwrap();
    let seq_rt = script();
    let par_rt = script();

    let sequential = orchestrator(&seq_rt, clients(), validators(), RunConfig::default(), seq_dir.path())
        .sweep(".", ".")
        .await
        .unwrap();
    let parallel = orchestrator(&par_rt, clients(), validators(), RunConfig::default(), par_dir.path())
        .with_parallelism(4)
        .sweep(".", ".")
        .await
        .unwrap();

    let outcomes = |m: &xval_engine::ResultMatrix| {
        m.iter()
            .map(|(c, v, verdict)| (c.to_string(), v.to_string(), verdict.success, verdict.exit_code))
            .collect::<Vec<_>>()
    };
    assert_eq!(outcomes(&sequential), outcomes(&parallel));
    assert_eq!(parallel.cell_count(), 4);
    assert!(par_rt.live_containers().is_empty());
}

/// Test: an empty client match is rejected before any container exists
#[tokio::test]
async fn test_no_clients_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    let err = orch.sweep("^erigon$", ".").await.unwrap_err();

    assert!(matches!(err, SweepError::NoClients(_)));
    assert_eq!(rt.created_count(), 0);
}

/// Test: an empty validator match is rejected before any container exists
#[tokio::test]
async fn test_no_validators_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), StaticCatalog::default(), RunConfig::default(), tmp.path());

    let err = orch.sweep(".", ".").await.unwrap_err();

    assert!(matches!(err, SweepError::NoValidators(_)));
    assert_eq!(rt.created_count(), 0);
}

/// Test: an invalid pattern is a configuration error
#[tokio::test]
async fn test_invalid_pattern_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    let err = orch.sweep(".", "[rpc").await.unwrap_err();

    assert!(matches!(
        err,
        SweepError::Catalog(CatalogError::InvalidPattern { .. })
    ));
    assert_eq!(rt.created_count(), 0);
}

/// Test: pair logs land under validators/<validator>/<client>
#[tokio::test(start_paused = true)]
async fn test_log_layout_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    orch.sweep("alpha", "discv4").await.expect("sweep failed");

    let pair_dir = tmp.path().join("validators").join("devp2p_discv4").join("alpha");
    assert!(pair_dir.join("client.log").is_file());
    assert!(pair_dir.join("validator.log").is_file());
    assert!(!tmp.path().join("validators").join("rpc").exists());
}

/// Test: cancelling a sweep mid-pair still removes its containers
#[tokio::test(start_paused = true)]
async fn test_cancelled_sweep_removes_containers() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = Arc::new(
        ScriptedRuntime::new()
            .with_image("clients/alpha", ImageScript::ready_client())
            .with_image("validators/rpc", ImageScript::validator(0).hanging()),
    );
    let orch = orchestrator(
        &rt,
        StaticCatalog::default().with_image("alpha", "clients/alpha"),
        StaticCatalog::default().with_image("rpc", "validators/rpc"),
        RunConfig::default(),
        tmp.path(),
    );

    let cancelled = tokio::time::timeout(Duration::from_secs(10), orch.sweep(".", ".")).await;
    assert!(cancelled.is_err(), "hanging validator should outlive the timeout");
    assert_eq!(rt.created_count(), 2);

    orch.finish_cleanup().await;
    assert!(rt.live_containers().is_empty());
}

/// Test: ids that flatten to the same log directory are rejected up front
#[tokio::test]
async fn test_colliding_log_dirs_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = Arc::new(
        ScriptedRuntime::new()
            .with_image("clients/geth", ImageScript::ready_client())
            .with_image("validators/rpc", ImageScript::validator(0)),
    );
    let orch = orchestrator(
        &rt,
        StaticCatalog::default()
            .with_image("geth/dev", "clients/geth")
            .with_image("geth_dev", "clients/geth"),
        StaticCatalog::default().with_image("rpc", "validators/rpc"),
        RunConfig::default(),
        tmp.path(),
    );

    let err = orch.sweep(".", ".").await.unwrap_err();

    let SweepError::LogLayout { source, .. } = &err else {
        panic!("expected a log layout error, got {err:?}");
    };
    assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
    assert_eq!(rt.created_count(), 0);
    assert!(!tmp.path().join("validators").exists());
}

/// Test: a validator id of `..` cannot write outside the log tree
#[tokio::test]
async fn test_dot_dot_id_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("logs");
    let rt = healthy_runtime();
    let orch = orchestrator(
        &rt,
        clients(),
        StaticCatalog::default().with_image("..", "validators/rpc"),
        RunConfig::default(),
        &root,
    );

    let err = orch.sweep(".", ".").await.unwrap_err();

    assert!(matches!(err, SweepError::LogLayout { .. }));
    assert_eq!(rt.created_count(), 0);
    assert!(!tmp.path().join("alpha").exists());
}

/// Test: a finished sweep serializes into the CI report
#[tokio::test(start_paused = true)]
async fn test_report_from_sweep() {
    let tmp = tempfile::tempdir().unwrap();
    let rt = healthy_runtime();
    let orch = orchestrator(&rt, clients(), validators(), RunConfig::default(), tmp.path());

    let matrix = orch.sweep(".", ".").await.expect("sweep failed");
    let report = SweepReport::new(matrix);
    let path = orch.layout().results_path();
    xval_engine::write_sweep_report_json(&path, &report).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["summary"]["total"], 4);
    assert_eq!(raw["summary"]["failed"], 0);
    assert_eq!(raw["results"]["alpha"]["rpc"]["success"], true);
    assert_eq!(
        raw["results"]["beta"]["devp2p/discv4"]["identity_handoff"]["status"],
        "copied"
    );
}
