//! Runtime trait definitions for xval
//!
//! These traits define the collaborator contracts the pair engine drives:
//! - `ContainerRuntime`: container lifecycle (create/start/inspect/remove/copy/wait)
//! - `PortDialer`: TCP reachability checks used by the readiness prober
//!
//! All traits are async and backend-agnostic. A Docker backend lives in
//! `docker`, in-memory fakes for testing live in `fakes`.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::RuntimeError;

/// Result type for runtime operations
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

// ---------------------------------------------------------------------------
// Container identity and description
// ---------------------------------------------------------------------------

/// Daemon-assigned container identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        ContainerId(id.into())
    }

    /// Return the full identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 chars), used to correlate log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to create: an image plus `KEY=VALUE` environment entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: Vec::new(),
        }
    }

    /// Add a single `key=value` environment entry.
    pub fn with_env(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.env.push(format!("{}={}", key, value.as_ref()));
        self
    }

    /// Append pre-formatted `KEY=VALUE` entries.
    pub fn with_env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Look up the value of an environment entry by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Snapshot of a container's run state as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i64,
    pub ip_address: Option<IpAddr>,
}

// ---------------------------------------------------------------------------
// LogStream: scoped log attachment
// ---------------------------------------------------------------------------

/// Handle to a container's output being copied into a log file.
///
/// The pump task is aborted when the handle is dropped, so a stream never
/// outlives the scope that started the container.
#[derive(Debug)]
pub struct LogStream {
    container: ContainerId,
    path: PathBuf,
    pump: Option<JoinHandle<RuntimeResult<u64>>>,
}

impl LogStream {
    /// Wrap a spawned pump task that writes `container`'s output into `path`.
    pub fn spawn(
        container: ContainerId,
        path: PathBuf,
        pump: JoinHandle<RuntimeResult<u64>>,
    ) -> Self {
        Self {
            container,
            path,
            pump: Some(pump),
        }
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the pump to drain and return the number of bytes written.
    ///
    /// Only meaningful once the container has exited; on a live container this
    /// blocks for as long as the container keeps producing output.
    pub async fn finish(&mut self) -> RuntimeResult<u64> {
        match self.pump.take() {
            Some(pump) => pump
                .await
                .map_err(|e| RuntimeError::LogStream(e.to_string()))?,
            None => Ok(0),
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// ContainerRuntime: lifecycle driver
// ---------------------------------------------------------------------------

/// Container daemon contract.
///
/// Guarantees:
/// - `create` does not start the container.
/// - `start` returns once the process is launched; output is streamed to the
///   given log file until the container exits or the stream is dropped.
/// - `remove(force = true)` removes the container even if it is running and
///   returns `RuntimeError::ContainerNotFound` if it is already gone.
/// - `copy_file` returns `RuntimeError::PathNotFound` when the source path is
///   absent, so callers can tell "not provided" from "failed".
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerId>;

    /// Start a container and stream its output into `log_path`.
    async fn start(&self, id: &ContainerId, log_path: &Path) -> RuntimeResult<LogStream>;

    /// Report the container's current run state.
    async fn inspect(&self, id: &ContainerId) -> RuntimeResult<ContainerState>;

    /// Remove a container, killing it first when `force` is set.
    async fn remove(&self, id: &ContainerId, force: bool) -> RuntimeResult<()>;

    /// Copy the file at `path` from `src` into the same location in `dst`.
    async fn copy_file(&self, src: &ContainerId, dst: &ContainerId, path: &str)
        -> RuntimeResult<()>;

    /// Block until the container behind `stream` has terminated.
    async fn wait_for_exit(&self, stream: &mut LogStream) -> RuntimeResult<()>;
}

// ---------------------------------------------------------------------------
// PortDialer: reachability probe
// ---------------------------------------------------------------------------

/// Attempts a TCP connection; success means something is listening.
#[async_trait]
pub trait PortDialer: Send + Sync {
    /// Connect to `addr` and close the connection immediately.
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<()>;
}

/// Real-socket dialer with a per-attempt connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl PortDialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<()> {
        let stream = tokio::time::timeout(self.connect_timeout, tokio::net::TcpStream::connect(addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        drop(stream);
        Ok(())
    }
}
