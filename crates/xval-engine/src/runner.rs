//! Pair execution: drive one client and one validator through their
//! lifecycle and produce a verdict.

use crate::config::{RunConfig, ENV_CLIENT_ID, ENV_CLIENT_IP, ENV_HOST_ALIAS};
use crate::layout::PairLogs;
use crate::obs;
use crate::probe::{Prober, ReadinessOutcome};
use crate::verdict::{IdentityHandoff, Role, RunError, RunVerdict, Stage};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xval_runtime::{
    ContainerId, ContainerRuntime, ContainerSpec, LogStream, PortDialer, RuntimeError,
};

/// One (client, validator) combination and the images behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub client: String,
    pub client_image: String,
    pub validator: String,
    pub validator_image: String,
}

/// Runs pairs against a container runtime.
///
/// [`PairRunner::run`] never fails: every problem ends up in the verdict,
/// and every container it created is removed before it returns. A run that
/// is cancelled instead hands its removals to [`PairRunner::finish_cleanup`].
pub struct PairRunner {
    runtime: Arc<dyn ContainerRuntime>,
    prober: Prober,
    config: RunConfig,
    pending: Arc<PendingRemovals>,
}

impl PairRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        dialer: Arc<dyn PortDialer>,
        config: RunConfig,
    ) -> Self {
        let prober = Prober::new(runtime.clone(), dialer, config.probe.clone());
        Self {
            runtime,
            prober,
            config,
            pending: Arc::default(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one pair to completion and return its verdict.
    pub async fn run(&self, pair: &PairSpec, logs: &PairLogs) -> RunVerdict {
        info!("running client validation");
        let start = Utc::now();
        let mut scope = ContainerScope::new(self.runtime.clone(), self.pending.clone());
        let mut handoff = None;

        let outcome = self.drive(pair, logs, &mut scope, &mut handoff).await;
        let end = Utc::now();
        scope.release().await;

        match outcome {
            Ok(exit_code) => RunVerdict::completed(start, end, exit_code, handoff),
            Err(error) => RunVerdict::failed(start, end, error, handoff),
        }
    }

    /// Wait for the removals scheduled by cancelled runs.
    ///
    /// Call this before the tokio runtime goes away; removals still queued
    /// when it shuts down are lost along with their containers.
    pub async fn finish_cleanup(&self) {
        self.pending.drain().await;
    }

    async fn drive(
        &self,
        pair: &PairSpec,
        logs: &PairLogs,
        scope: &mut ContainerScope,
        handoff: &mut Option<IdentityHandoff>,
    ) -> Result<i64, RunError> {
        let rt = self.runtime.as_ref();

        debug!("creating client container");
        let client_spec = ContainerSpec::new(&pair.client_image)
            .with_env_entries(self.config.overrides.iter().cloned());
        let client = rt
            .create(&client_spec)
            .await
            .map_err(|e| fail_with(Role::Client, e, |role, reason| RunError::Create { role, reason }))?;
        scope.register(Role::Client, client.clone());
        debug!(id = %client.short(), "created client container");

        debug!(id = %client.short(), "running client container");
        let client_logs = rt
            .start(&client, &logs.client_log)
            .await
            .map_err(|e| fail_with(Role::Client, e, |role, reason| RunError::Start { role, reason }))?;
        scope.keep(client_logs);

        let state = rt
            .inspect(&client)
            .await
            .map_err(|e| fail_with(Role::Client, e, |role, reason| RunError::Inspect { role, reason }))?;
        let Some(client_ip) = state.ip_address else {
            warn!(id = %client.short(), "client container has no address");
            return Err(RunError::MissingAddress { role: Role::Client });
        };

        match self.prober.wait_ready(&client, self.config.client_port).await {
            ReadinessOutcome::Ready { waited, attempts } => {
                debug!(id = %client.short(), waited_ms = waited.as_millis() as u64, attempts, "client container online");
            }
            ReadinessOutcome::ProcessExited { exit_code } => {
                warn!(id = %client.short(), exit_code, "client container terminated");
                return Err(RunError::Terminated { exit_code });
            }
            ReadinessOutcome::ProbeError(reason) => {
                warn!(id = %client.short(), error = %reason, "failed to inspect client");
                return Err(RunError::Probe { reason });
            }
            ReadinessOutcome::TimedOut { limit } => {
                warn!(id = %client.short(), limit_ms = limit.as_millis() as u64, "client never became ready");
                return Err(RunError::Timeout {
                    stage: Stage::Readiness,
                    limit_ms: limit.as_millis() as u64,
                });
            }
        }

        debug!("creating validator container");
        let validator_spec = ContainerSpec::new(&pair.validator_image)
            .with_env(ENV_CLIENT_IP, client_ip.to_string())
            .with_env(ENV_CLIENT_ID, client.as_str())
            .with_env(ENV_HOST_ALIAS, &self.config.host_alias);
        let validator = rt.create(&validator_spec).await.map_err(|e| {
            fail_with(Role::Validator, e, |role, reason| RunError::Create { role, reason })
        })?;
        scope.register(Role::Validator, validator.clone());
        debug!(id = %validator.short(), "created validator container");

        *handoff = Some(self.hand_off_identity(&client, &validator).await);

        debug!(id = %validator.short(), "running validator container");
        let mut validator_logs = rt.start(&validator, &logs.validator_log).await.map_err(|e| {
            fail_with(Role::Validator, e, |role, reason| RunError::Start { role, reason })
        })?;

        let waited = match self.config.validator_timeout() {
            Some(limit) => tokio::time::timeout(limit, rt.wait_for_exit(&mut validator_logs))
                .await
                .map_err(|_| RunError::Timeout {
                    stage: Stage::Validation,
                    limit_ms: limit.as_millis() as u64,
                })?,
            None => rt.wait_for_exit(&mut validator_logs).await,
        };
        scope.keep(validator_logs);
        waited.map_err(|e| {
            warn!(id = %validator.short(), error = %e, "failed waiting for validator");
            RunError::Wait {
                reason: e.to_string(),
            }
        })?;

        let state = rt.inspect(&validator).await.map_err(|e| {
            fail_with(Role::Validator, e, |role, reason| RunError::Inspect { role, reason })
        })?;
        debug!(id = %validator.short(), exit_code = state.exit_code, "validator container finished");
        Ok(state.exit_code)
    }

    /// Copy the identity script from client to validator.
    ///
    /// Never fatal; absence only degrades checks that need the node identity.
    async fn hand_off_identity(&self, client: &ContainerId, validator: &ContainerId) -> IdentityHandoff {
        let path = &self.config.identity_script;
        match self.runtime.copy_file(client, validator, path).await {
            Ok(()) => {
                debug!(id = %validator.short(), path = %path, "identity script copied");
                IdentityHandoff::Copied
            }
            Err(RuntimeError::PathNotFound { .. }) => {
                warn!(
                    id = %validator.short(),
                    path = %path,
                    "client ships no identity script; discovery checks cannot identify the target node"
                );
                IdentityHandoff::Absent
            }
            Err(e) => {
                warn!(id = %validator.short(), path = %path, error = %e, "failed to copy identity script");
                IdentityHandoff::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn fail_with(
    role: Role,
    err: RuntimeError,
    make: impl FnOnce(Role, String) -> RunError,
) -> RunError {
    warn!(role = %role, error = %err, "container operation failed");
    make(role, err.to_string())
}

// ---------------------------------------------------------------------------
// ContainerScope
// ---------------------------------------------------------------------------

/// Containers (and their log streams) owned by one pair run.
///
/// [`ContainerScope::release`] force-removes the containers in reverse
/// creation order. A scope dropped without being released, because the pair
/// future was cancelled, spawns the removals on the ambient tokio runtime and
/// parks the task handle in `pending`.
pub(crate) struct ContainerScope {
    runtime: Arc<dyn ContainerRuntime>,
    pending: Arc<PendingRemovals>,
    containers: Vec<(Role, ContainerId)>,
    streams: Vec<LogStream>,
}

impl ContainerScope {
    pub(crate) fn new(runtime: Arc<dyn ContainerRuntime>, pending: Arc<PendingRemovals>) -> Self {
        Self {
            runtime,
            pending,
            containers: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, role: Role, id: ContainerId) {
        self.containers.push((role, id));
    }

    /// Keep a log stream alive until the containers are gone.
    pub(crate) fn keep(&mut self, stream: LogStream) {
        self.streams.push(stream);
    }

    pub(crate) async fn release(mut self) {
        let containers = std::mem::take(&mut self.containers);
        remove_containers(self.runtime.as_ref(), containers).await;
    }
}

impl Drop for ContainerScope {
    fn drop(&mut self) {
        if self.containers.is_empty() {
            return;
        }
        let containers = std::mem::take(&mut self.containers);
        let runtime = self.runtime.clone();
        let cleanup = async move {
            remove_containers(runtime.as_ref(), containers).await;
        };

        debug!("pair cancelled, scheduling container removal");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            self.pending.push(handle.spawn(cleanup));
            return;
        }
        // Outside any runtime (e.g. teardown after the executor is gone):
        // block on a throwaway one.
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(cleanup),
            Err(e) => warn!(error = %e, "no async runtime for cleanup, containers leaked"),
        }
    }
}

/// Removal tasks spawned by dropped scopes.
#[derive(Debug, Default)]
pub(crate) struct PendingRemovals {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PendingRemovals {
    fn push(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn take(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Await every queued removal, including ones queued while draining.
    pub(crate) async fn drain(&self) {
        loop {
            let batch = self.take();
            if batch.is_empty() {
                return;
            }
            debug!(tasks = batch.len(), "waiting for scheduled container removal");
            for task in batch {
                if let Err(e) = task.await {
                    warn!(error = %e, "container removal task failed");
                }
            }
        }
    }
}

async fn remove_containers(runtime: &dyn ContainerRuntime, containers: Vec<(Role, ContainerId)>) {
    for (role, id) in containers.into_iter().rev() {
        debug!(role = %role, id = %id.short(), "deleting container");
        match runtime.remove(&id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(role = %role, id = %id.short(), "container already gone");
            }
            Err(e) => obs::emit_teardown_error(role, id.short(), &e),
        }
    }
}
