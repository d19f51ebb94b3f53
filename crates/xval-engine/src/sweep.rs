//! Matrix orchestration: run every (client, validator) pair and collect the
//! verdicts.

use crate::catalog::ImageCatalog;
use crate::error::SweepError;
use crate::layout::{ensure_distinct, sanitize, LogLayout, PairLogs};
use crate::matrix::ResultMatrix;
use crate::obs;
use crate::runner::{PairRunner, PairSpec};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};

/// Cross-executes validators against clients.
///
/// Pairs are enumerated validator-major: every client is run against the
/// first validator before the second validator starts. With a parallelism of
/// one that is also the execution order; above one, up to that many pairs
/// run at a time and verdicts are collected as they complete.
pub struct MatrixOrchestrator {
    clients: Arc<dyn ImageCatalog>,
    validators: Arc<dyn ImageCatalog>,
    runner: PairRunner,
    layout: LogLayout,
    parallelism: usize,
}

impl MatrixOrchestrator {
    pub fn new(
        clients: Arc<dyn ImageCatalog>,
        validators: Arc<dyn ImageCatalog>,
        runner: PairRunner,
        layout: LogLayout,
    ) -> Self {
        Self {
            clients,
            validators,
            runner,
            layout,
            parallelism: 1,
        }
    }

    /// Run up to `n` pairs concurrently. Zero is treated as one.
    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.parallelism = n.max(1);
        self
    }

    pub fn layout(&self) -> &LogLayout {
        &self.layout
    }

    /// Wait for the container removals of pairs cut short by a cancelled
    /// sweep. See [`PairRunner::finish_cleanup`].
    pub async fn finish_cleanup(&self) {
        self.runner.finish_cleanup().await;
    }

    /// Resolve both patterns and run the full cross product.
    ///
    /// Returns an error only when nothing can be run: no clients or no
    /// validators matched, a pattern is invalid, or the log tree cannot be
    /// laid out (unwritable root, ids sharing a log directory). Once pairs start, the
    /// matrix is always complete.
    pub async fn sweep(
        &self,
        client_pattern: &str,
        validator_pattern: &str,
    ) -> Result<ResultMatrix, SweepError> {
        info!(pattern = %client_pattern, "resolving clients for validation");
        let clients = self.clients.resolve(client_pattern).await?;
        if clients.is_empty() {
            return Err(SweepError::NoClients(client_pattern.to_string()));
        }

        info!(pattern = %validator_pattern, "resolving validators");
        let validators = self.validators.resolve(validator_pattern).await?;
        if validators.is_empty() {
            return Err(SweepError::NoValidators(validator_pattern.to_string()));
        }

        ensure_distinct(validators.keys())
            .and_then(|()| ensure_distinct(clients.keys()))
            .map_err(|source| SweepError::LogLayout {
                path: self.layout.validators_root(),
                source,
            })?;

        let mut jobs: Vec<(PairSpec, PairLogs)> = Vec::with_capacity(clients.len() * validators.len());
        for (validator, validator_image) in &validators {
            self.layout
                .prepare_validator(validator)
                .map_err(|source| SweepError::LogLayout {
                    path: self.layout.validator_dir(validator),
                    source,
                })?;
            for (client, client_image) in &clients {
                let logs = self
                    .layout
                    .prepare_pair(validator, client)
                    .map_err(|source| SweepError::LogLayout {
                        path: self.layout.validator_dir(validator).join(sanitize(client)),
                        source,
                    })?;
                jobs.push((
                    PairSpec {
                        client: client.clone(),
                        client_image: client_image.clone(),
                        validator: validator.clone(),
                        validator_image: validator_image.clone(),
                    },
                    logs,
                ));
            }
        }

        let started = Instant::now();
        obs::emit_sweep_started(clients.len(), validators.len(), self.parallelism);

        let runner = &self.runner;
        let mut verdicts = stream::iter(jobs)
            .map(move |(pair, logs)| async move {
                let span = obs::pair_span(&pair.client, &pair.validator);
                let verdict = runner.run(&pair, &logs).instrument(span).await;
                obs::emit_pair_finished(&pair.client, &pair.validator, &verdict);
                (pair, verdict)
            })
            .buffer_unordered(self.parallelism);

        let mut matrix = ResultMatrix::new();
        while let Some((pair, verdict)) = verdicts.next().await {
            matrix.record(&pair.client, &pair.validator, verdict)?;
        }

        obs::emit_sweep_finished(
            matrix.cell_count(),
            matrix.passed_count(),
            matrix.failed_count(),
            started.elapsed().as_millis() as u64,
        );
        Ok(matrix)
    }
}
