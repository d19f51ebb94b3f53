//! xval - client × validator cross-execution CLI
//!
//! The `xval` command runs protocol validators against client
//! implementations, every pair in its own pair of containers.
//!
//! ## Commands
//!
//! - `validate`: Run the client × validator matrix and write `results.json`
//! - `list`: Show which clients and validators a manifest provides

mod manifest;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use uuid::Uuid;

use manifest::Manifest;
use xval_engine::config::{parse_override, CLIENT_RPC_PORT, DEFAULT_HOST_ALIAS};
use xval_engine::{
    render_summary_md, write_sweep_report_json, LogLayout, MatrixOrchestrator, PairRunner,
    ResultMatrix, RunConfig, SweepReport,
};
use xval_runtime::{ContainerRuntime, DockerRuntime, PortDialer, TcpDialer};

#[derive(Parser)]
#[command(name = "xval")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-validate client images against validator images", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every matching client against every matching validator
    Validate(ValidateArgs),

    /// List clients and validators matching the patterns
    List {
        /// Image manifest (TOML)
        #[arg(long, env = "XVAL_MANIFEST", default_value = "xval.toml")]
        manifest: PathBuf,

        /// Regular expression selecting clients
        #[arg(long, default_value = ".")]
        clients: String,

        /// Regular expression selecting validators
        #[arg(long, default_value = ".")]
        validators: String,
    },
}

#[derive(Args, Debug, Clone)]
struct ValidateArgs {
    /// Image manifest (TOML)
    #[arg(long, env = "XVAL_MANIFEST", default_value = "xval.toml")]
    manifest: PathBuf,

    /// Regular expression selecting clients
    #[arg(long, default_value = ".")]
    clients: String,

    /// Regular expression selecting validators
    #[arg(long, default_value = ".")]
    validators: String,

    /// Root directory for pair logs and results.json
    #[arg(long, env = "XVAL_LOGDIR", default_value = "workspace/logs")]
    logdir: PathBuf,

    /// Extra client environment entry (repeatable)
    #[arg(long = "override", value_name = "KEY=VALUE", value_parser = parse_override)]
    overrides: Vec<String>,

    /// Alias under which validators reach the docker host
    #[arg(long, default_value = DEFAULT_HOST_ALIAS)]
    host_alias: String,

    /// Client port probed for readiness
    #[arg(long, default_value_t = CLIENT_RPC_PORT)]
    client_port: u16,

    /// Delay between readiness probes
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// Give up on a client that is not ready after this long (default: wait while it runs)
    #[arg(long)]
    readiness_timeout_secs: Option<u64>,

    /// Give up on a validator that runs longer than this (default: no limit)
    #[arg(long)]
    validator_timeout_secs: Option<u64>,

    /// Pairs run at the same time
    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// Attach containers to an existing docker network
    #[arg(long, conflicts_with = "isolated_network")]
    network: Option<String>,

    /// Create a private network for this sweep and remove it afterwards
    #[arg(long)]
    isolated_network: bool,
}

impl ValidateArgs {
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::default()
            .with_host_alias(self.host_alias.clone())
            .with_overrides(self.overrides.clone())
            .with_client_port(self.client_port)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
        if let Some(secs) = self.readiness_timeout_secs {
            config = config.with_readiness_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.validator_timeout_secs {
            config = config.with_validator_timeout(Duration::from_secs(secs));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    xval_engine::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate(args) => cmd_validate(&args).await,
        Commands::List {
            manifest,
            clients,
            validators,
        } => cmd_list(&manifest, &clients, &validators),
    }
}

/// Run the matrix against the local docker daemon.
async fn cmd_validate(args: &ValidateArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;

    let docker = DockerRuntime::connect_local().context("Failed to connect to docker daemon")?;
    docker.ping().await.context("Docker daemon is not responding")?;

    let (docker, private_network) = match (&args.network, args.isolated_network) {
        (Some(name), _) => (docker.with_network(name.clone()), None),
        (None, true) => {
            let name = format!("xval-{}", Uuid::new_v4());
            let id = docker
                .create_network(&name)
                .await
                .with_context(|| format!("Failed to create network {}", name))?;
            (docker.with_network(name), Some(id))
        }
        (None, false) => (docker, None),
    };
    let docker = Arc::new(docker);

    let outcome = run_validation(
        docker.clone(),
        Arc::new(TcpDialer::default()),
        &manifest,
        args,
        interrupted(),
    )
    .await;

    if let Some(id) = private_network {
        if let Err(e) = docker.remove_network(&id).await {
            warn!(network = %id, error = %e, "failed to remove private network");
        }
    }

    let matrix = outcome?;
    report_outcome(&matrix)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Sweep the matrix and write the report artifacts under the log root.
///
/// If `shutdown` resolves first the sweep is abandoned; containers of the
/// pairs in flight are removed before this returns.
async fn run_validation(
    runtime: Arc<dyn ContainerRuntime>,
    dialer: Arc<dyn PortDialer>,
    manifest: &Manifest,
    args: &ValidateArgs,
    shutdown: impl Future<Output = ()>,
) -> Result<ResultMatrix> {
    std::fs::create_dir_all(&args.logdir)
        .with_context(|| format!("Failed to create log directory {:?}", args.logdir))?;

    let layout = LogLayout::new(&args.logdir);
    let runner = PairRunner::new(runtime, dialer, args.run_config());
    let orchestrator = MatrixOrchestrator::new(
        Arc::new(manifest.client_catalog()),
        Arc::new(manifest.validator_catalog()),
        runner,
        layout.clone(),
    )
    .with_parallelism(args.parallelism);

    let swept = tokio::select! {
        swept = orchestrator.sweep(&args.clients, &args.validators) => Some(swept),
        () = shutdown => None,
    };
    orchestrator.finish_cleanup().await;

    let Some(swept) = swept else {
        warn!("interrupted, containers of unfinished pairs removed");
        anyhow::bail!("Validation sweep interrupted");
    };
    let matrix = swept.context("Validation sweep failed")?;

    let report = SweepReport::new(matrix);
    let results_path = layout.results_path();
    write_sweep_report_json(&results_path, &report)?;
    let summary_path = layout.root().join("summary.md");
    std::fs::write(&summary_path, render_summary_md(&report))
        .with_context(|| format!("write {:?}", summary_path))?;
    info!(path = ?results_path, "wrote results");

    Ok(report.results)
}

fn report_outcome(matrix: &ResultMatrix) -> Result<()> {
    for (client, validator, verdict) in matrix.iter() {
        let status = if verdict.passed() { "PASS" } else { "FAIL" };
        println!(
            "{}  {} × {}  ({:.1}s)",
            status,
            client,
            validator,
            verdict.elapsed().as_secs_f64()
        );
    }
    println!(
        "\n{} pairs: {} passed, {} failed",
        matrix.cell_count(),
        matrix.passed_count(),
        matrix.failed_count()
    );

    if !matrix.all_passed() {
        anyhow::bail!(
            "{} of {} pairs failed",
            matrix.failed_count(),
            matrix.cell_count()
        );
    }
    Ok(())
}

/// Show which clients and validators the patterns select.
fn cmd_list(manifest_path: &Path, clients: &str, validators: &str) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let clients = manifest
        .client_catalog()
        .matching(clients)
        .context("Invalid client pattern")?;
    let validators = manifest
        .validator_catalog()
        .matching(validators)
        .context("Invalid validator pattern")?;

    println!("Clients ({}):", clients.len());
    for (id, image) in &clients {
        println!("  {:<24} {}", id, image);
    }
    println!("Validators ({}):", validators.len());
    for (id, image) in &validators {
        println!("  {:<24} {}", id, image);
    }
    Ok(())
}
