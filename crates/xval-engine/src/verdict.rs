//! Per-pair verdicts and the failure taxonomy stored in them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a pair a container belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Validator,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Validator => "validator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Blocking phase a deadline applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the client to accept connections.
    Readiness,
    /// Waiting for the validator to terminate.
    Validation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Readiness => f.write_str("readiness wait"),
            Stage::Validation => f.write_str("validator run"),
        }
    }
}

/// Why a pair could not produce a pass/fail outcome.
///
/// A validator exiting nonzero is not an error; it is recorded as
/// `success = false` with no error attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    #[error("failed to create {role} container: {reason}")]
    Create { role: Role, reason: String },

    #[error("failed to start {role} container: {reason}")]
    Start { role: Role, reason: String },

    #[error("failed to inspect {role} container: {reason}")]
    Inspect { role: Role, reason: String },

    #[error("{role} container has no network address")]
    MissingAddress { role: Role },

    #[error("client container terminated unexpectedly (exit code {exit_code})")]
    Terminated { exit_code: i64 },

    #[error("readiness probe failed: {reason}")]
    Probe { reason: String },

    #[error("failed waiting for validator to exit: {reason}")]
    Wait { reason: String },

    #[error("{stage} timed out after {limit_ms}ms")]
    Timeout { stage: Stage, limit_ms: u64 },
}

impl RunError {
    /// Whether this failure came from a deadline rather than a hard error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout { .. })
    }

    /// Container role the failure is attributed to.
    pub fn role(&self) -> Role {
        match self {
            RunError::Create { role, .. }
            | RunError::Start { role, .. }
            | RunError::Inspect { role, .. }
            | RunError::MissingAddress { role } => *role,
            RunError::Terminated { .. } | RunError::Probe { .. } => Role::Client,
            RunError::Timeout { stage, .. } => match stage {
                Stage::Readiness => Role::Client,
                Stage::Validation => Role::Validator,
            },
            RunError::Wait { .. } => Role::Validator,
        }
    }
}

/// Outcome of handing the client's identity script to the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdentityHandoff {
    /// Script copied into the validator.
    Copied,
    /// Client does not ship the script; identity-dependent checks degrade.
    Absent,
    /// Copy was attempted and failed for another reason.
    Failed { reason: String },
}

/// Recorded outcome of one (client, validator) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunVerdict {
    /// When the pair started (before the client was created).
    pub start: DateTime<Utc>,

    /// When the outcome was decided (before teardown).
    pub end: DateTime<Utc>,

    /// Validator exited with code zero.
    pub success: bool,

    /// Harness failure that prevented a clean run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,

    /// Validator exit code, when it was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,

    /// Identity script handoff, when it was attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_handoff: Option<IdentityHandoff>,
}

impl RunVerdict {
    /// Verdict for a validator that ran to completion.
    pub fn completed(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exit_code: i64,
        identity_handoff: Option<IdentityHandoff>,
    ) -> Self {
        Self {
            start,
            end: end.max(start),
            success: exit_code == 0,
            error: None,
            exit_code: Some(exit_code),
            identity_handoff,
        }
    }

    /// Verdict for a pair that was aborted by `error`.
    pub fn failed(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        error: RunError,
        identity_handoff: Option<IdentityHandoff>,
    ) -> Self {
        Self {
            start,
            end: end.max(start),
            success: false,
            error: Some(error),
            exit_code: None,
            identity_handoff,
        }
    }

    /// Whether this pair passed. Any recorded error is a failure.
    pub fn passed(&self) -> bool {
        self.success && self.error.is_none()
    }

    /// Wall-clock time the pair took.
    pub fn elapsed(&self) -> std::time::Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }
}
