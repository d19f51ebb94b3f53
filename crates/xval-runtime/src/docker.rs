//! Docker-backed ContainerRuntime implementation
//!
//! Talks to the local daemon through `bollard`. Container output is followed
//! by a spawned pump task and written verbatim into the per-pair log file.

use std::path::Path;

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse, HostConfig, NetworkCreateRequest};
use bollard::query_parameters::{
    CreateContainerOptions, DownloadFromContainerOptionsBuilder, InspectContainerOptions,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    UploadToContainerOptionsBuilder, WaitContainerOptions,
};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::runtime_traits::{
    ContainerId, ContainerRuntime, ContainerSpec, ContainerState, LogStream, RuntimeResult,
};

/// `bollard`-backed implementation of [`ContainerRuntime`].
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    network: Option<String>,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect_local() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            network: None,
        })
    }

    /// Attach every container created from now on to `network`.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> RuntimeResult<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Create a bridge network and return its id.
    pub async fn create_network(&self, name: &str) -> RuntimeResult<String> {
        let network = self
            .docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                ..Default::default()
            })
            .await?;
        if network.id.is_empty() {
            return Err(RuntimeError::Daemon(format!(
                "network {} created without an id",
                name
            )));
        }
        info!(network = %name, id = %network.id, "created private network");
        Ok(network.id)
    }

    /// Remove a network created by [`DockerRuntime::create_network`].
    pub async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.docker.remove_network(id).await?;
        debug!(id = %id, "removed network");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerId> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            host_config: self.network.as_ref().map(|network| HostConfig {
                network_mode: Some(network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(|e| {
                if is_missing(&e) {
                    RuntimeError::ImageNotFound(spec.image.clone())
                } else {
                    e.into()
                }
            })?;
        Ok(ContainerId::new(created.id))
    }

    async fn start(&self, id: &ContainerId, log_path: &Path) -> RuntimeResult<LogStream> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(|e| missing_container(e, id))?;

        let file = tokio::fs::File::create(log_path).await?;
        let docker = self.docker.clone();
        let container = id.as_str().to_string();
        let pump = tokio::spawn(async move { pump_logs(docker, container, file).await });

        Ok(LogStream::spawn(id.clone(), log_path.to_path_buf(), pump))
    }

    async fn inspect(&self, id: &ContainerId) -> RuntimeResult<ContainerState> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| missing_container(e, id))?;
        Ok(container_state(&response, self.network.as_deref()))
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(force).build();
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| missing_container(e, id))
    }

    async fn copy_file(
        &self,
        src: &ContainerId,
        dst: &ContainerId,
        path: &str,
    ) -> RuntimeResult<()> {
        let options = DownloadFromContainerOptionsBuilder::default().path(path).build();
        let mut archive = Box::pin(
            self.docker
                .download_from_container(src.as_str(), Some(options)),
        );

        // The daemon hands back a tar archive holding the single file.
        let mut tar = Vec::new();
        while let Some(chunk) = archive.next().await {
            match chunk {
                Ok(bytes) => tar.extend_from_slice(&bytes),
                Err(e) if is_missing(&e) => {
                    return Err(RuntimeError::PathNotFound {
                        container: src.to_string(),
                        path: path.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        let dest_dir = parent_dir(path);
        let options = UploadToContainerOptionsBuilder::default()
            .path(&dest_dir)
            .build();
        self.docker
            .upload_to_container(dst.as_str(), Some(options), bollard::body_full(Bytes::from(tar)))
            .await
            .map_err(|e| missing_container(e, dst))?;

        debug!(src = %src.short(), dst = %dst.short(), path = %path, "copied file between containers");
        Ok(())
    }

    async fn wait_for_exit(&self, stream: &mut LogStream) -> RuntimeResult<()> {
        let id = stream.container().clone();
        let mut waits = Box::pin(
            self.docker
                .wait_container(id.as_str(), None::<WaitContainerOptions>),
        );

        while let Some(outcome) = waits.next().await {
            match outcome {
                Ok(response) => {
                    debug!(id = %id.short(), status = response.status_code, "container exited")
                }
                // Nonzero exits surface as an error here; the caller reads the
                // exit code through inspect.
                Err(BollardError::DockerContainerWaitError { code, .. }) => {
                    debug!(id = %id.short(), status = code, "container exited")
                }
                Err(e) => return Err(missing_container(e, &id)),
            }
        }

        if let Err(e) = stream.finish().await {
            warn!(id = %id.short(), error = %e, "log stream ended with error");
        }
        Ok(())
    }
}

/// Copy followed stdout/stderr into `file` until the container stops.
async fn pump_logs(docker: Docker, container: String, mut file: tokio::fs::File) -> RuntimeResult<u64> {
    let options = LogsOptionsBuilder::default()
        .follow(true)
        .stdout(true)
        .stderr(true)
        .build();
    let mut logs = Box::pin(docker.logs(&container, Some(options)));

    let mut written = 0u64;
    while let Some(chunk) = logs.next().await {
        let bytes = chunk
            .map_err(|e| RuntimeError::LogStream(e.to_string()))?
            .into_bytes();
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn is_missing(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn missing_container(err: BollardError, id: &ContainerId) -> RuntimeError {
    if is_missing(&err) {
        RuntimeError::ContainerNotFound(id.to_string())
    } else {
        err.into()
    }
}

/// Directory the archive must be extracted into so `path` lands in place.
fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string())
}

/// Fold an inspect response into the runtime-neutral [`ContainerState`].
///
/// The address is taken from `network` when one is configured, otherwise from
/// the first endpoint that has one.
fn container_state(response: &ContainerInspectResponse, network: Option<&str>) -> ContainerState {
    let state = response.state.as_ref();
    let running = state.and_then(|s| s.running).unwrap_or(false);
    let exit_code = state.and_then(|s| s.exit_code).unwrap_or(-1);

    let endpoints = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.as_ref());
    let preferred = network
        .and_then(|name| endpoints?.get(name))
        .and_then(|endpoint| endpoint.ip_address.clone());
    let fallback = endpoints.and_then(|nets| {
        nets.values()
            .filter_map(|endpoint| endpoint.ip_address.clone())
            .find(|ip| !ip.is_empty())
    });
    let ip_address = [preferred, fallback]
        .into_iter()
        .flatten()
        .find(|ip| !ip.is_empty())
        .and_then(|ip| ip.parse().ok());

    ContainerState {
        running,
        exit_code,
        ip_address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{EndpointSettings, NetworkSettings};
    use std::collections::HashMap;
    use std::net::IpAddr;

    fn inspect_response(
        running: bool,
        exit_code: i64,
        networks: &[(&str, &str)],
    ) -> ContainerInspectResponse {
        let networks: HashMap<String, EndpointSettings> = networks
            .iter()
            .map(|(name, ip)| {
                (
                    name.to_string(),
                    EndpointSettings {
                        ip_address: Some(ip.to_string()),
                        ..Default::default()
                    },
                )
            })
            .collect();
        ContainerInspectResponse {
            state: Some(bollard::models::ContainerState {
                running: Some(running),
                exit_code: Some(exit_code),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/enode.sh"), "/");
        assert_eq!(parent_dir("/opt/hive/enode.sh"), "/opt/hive");
        assert_eq!(parent_dir("enode.sh"), "/");
    }

    #[test]
    fn test_container_state_running_with_address() {
        let response = inspect_response(true, 0, &[("bridge", "172.17.0.2")]);
        let state = container_state(&response, None);
        assert!(state.running);
        assert_eq!(state.exit_code, 0);
        assert_eq!(state.ip_address, Some("172.17.0.2".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_container_state_prefers_configured_network() {
        let response = inspect_response(true, 0, &[("xval-net", "10.10.0.5")]);
        let state = container_state(&response, Some("xval-net"));
        assert_eq!(state.ip_address, Some("10.10.0.5".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_container_state_exited_without_address() {
        let response = inspect_response(false, 137, &[("bridge", "")]);
        let state = container_state(&response, None);
        assert!(!state.running);
        assert_eq!(state.exit_code, 137);
        assert_eq!(state.ip_address, None);
    }

    #[test]
    fn test_container_state_missing_state_is_not_running() {
        let state = container_state(&ContainerInspectResponse::default(), None);
        assert!(!state.running);
        assert_eq!(state.exit_code, -1);
        assert!(state.ip_address.is_none());
    }

    #[test]
    fn test_missing_container_maps_404() {
        let err = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        let mapped = missing_container(err, &ContainerId::new("deadbeef00"));
        assert!(matches!(mapped, RuntimeError::ContainerNotFound(_)));

        let err = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        let mapped = missing_container(err, &ContainerId::new("deadbeef00"));
        assert!(matches!(mapped, RuntimeError::Daemon(_)));
    }
}
