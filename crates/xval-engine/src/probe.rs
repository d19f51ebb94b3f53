//! Readiness probing: wait until a container listens on a port or dies.

use crate::config::ProbeConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use xval_runtime::{ContainerId, ContainerRuntime, PortDialer};

/// Terminal result of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// A connection to the port succeeded.
    Ready { waited: Duration, attempts: u32 },
    /// The process stopped before it became ready.
    ProcessExited { exit_code: i64 },
    /// The container could not be inspected.
    ProbeError(String),
    /// The configured deadline elapsed first.
    TimedOut { limit: Duration },
}

impl ReadinessOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessOutcome::Ready { .. })
    }
}

/// Polls one container until it accepts TCP connections on a port.
///
/// Each tick inspects the container first, so a process that has already
/// exited is never reported ready by a stale listener. Only then is the port
/// dialed; a tick that finds no address yet skips the dial.
pub struct Prober {
    runtime: Arc<dyn ContainerRuntime>,
    dialer: Arc<dyn PortDialer>,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        dialer: Arc<dyn PortDialer>,
        config: ProbeConfig,
    ) -> Self {
        Self {
            runtime,
            dialer,
            config,
        }
    }

    /// Wait for `id` to listen on `port`, bounded by the configured deadline.
    pub async fn wait_ready(&self, id: &ContainerId, port: u16) -> ReadinessOutcome {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.poll(id, port))
                .await
                .unwrap_or(ReadinessOutcome::TimedOut { limit }),
            None => self.poll(id, port).await,
        }
    }

    async fn poll(&self, id: &ContainerId, port: u16) -> ReadinessOutcome {
        let started = Instant::now();
        let interval = self.config.poll_interval();
        let mut attempts = 0u32;

        loop {
            let state = match self.runtime.inspect(id).await {
                Ok(state) => state,
                Err(e) => return ReadinessOutcome::ProbeError(e.to_string()),
            };
            if !state.running {
                return ReadinessOutcome::ProcessExited {
                    exit_code: state.exit_code,
                };
            }

            if let Some(ip) = state.ip_address {
                attempts += 1;
                match self.dialer.dial(SocketAddr::new(ip, port)).await {
                    Ok(()) => {
                        let waited = started.elapsed();
                        debug!(id = %id.short(), attempts, waited_ms = waited.as_millis() as u64, "port open");
                        return ReadinessOutcome::Ready { waited, attempts };
                    }
                    Err(e) => trace!(id = %id.short(), error = %e, "port not ready"),
                }
            } else {
                trace!(id = %id.short(), "no address yet");
            }

            tokio::time::sleep(interval).await;
        }
    }
}
