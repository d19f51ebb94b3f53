//! Structured observability hooks for sweep and pair lifecycle events.
//!
//! This module provides:
//! - Pair-scoped tracing spans via [`pair_span`]
//! - Emission functions for key lifecycle events: sweep start/finish, pair
//!   finish, teardown failures
//!
//! Events carry an `event` field (`sweep.started`, `pair.finished`, ...) so
//! JSON output can be filtered without parsing messages.

use crate::verdict::{Role, RunVerdict};
use tracing::{error, info};

/// Span tagging every log line of one pair with its client and validator.
///
/// Attach with `Instrument::instrument`; the span is never held across an
/// `.await` as an entered guard.
pub fn pair_span(client: &str, validator: &str) -> tracing::Span {
    tracing::info_span!("xval.pair", client = %client, validator = %validator)
}

/// Emit event: sweep started with its matrix dimensions.
pub fn emit_sweep_started(clients: usize, validators: usize, parallelism: usize) {
    info!(
        event = "sweep.started",
        clients = clients,
        validators = validators,
        pairs = clients * validators,
        parallelism = parallelism,
    );
}

/// Emit event: one pair produced its verdict.
///
/// Passing pairs log at `info`, failing pairs at `error`.
pub fn emit_pair_finished(client: &str, validator: &str, verdict: &RunVerdict) {
    let elapsed_ms = verdict.elapsed().as_millis() as u64;
    if verdict.passed() {
        info!(
            event = "pair.finished",
            client = %client,
            validator = %validator,
            elapsed_ms = elapsed_ms,
            "validation passed"
        );
    } else {
        let reason = verdict
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| match verdict.exit_code {
                Some(code) => format!("validator exited with code {}", code),
                None => "unknown".to_string(),
            });
        error!(
            event = "pair.finished",
            client = %client,
            validator = %validator,
            elapsed_ms = elapsed_ms,
            reason = %reason,
            "validation failed"
        );
    }
}

/// Emit event: sweep finished with totals.
pub fn emit_sweep_finished(total: usize, passed: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "sweep.finished",
        total = total,
        passed = passed,
        failed = failed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a container could not be removed during teardown.
pub fn emit_teardown_error(role: Role, id: &str, error: &dyn std::fmt::Display) {
    error!(event = "pair.teardown_error", role = %role, id = %id, error = %error, "failed to delete container");
}
