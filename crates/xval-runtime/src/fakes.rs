//! In-memory fakes for runtime traits (testing only)
//!
//! `ScriptedRuntime` satisfies both [`ContainerRuntime`] and [`PortDialer`]
//! without a daemon. Each image is given an [`ImageScript`] describing how
//! its containers behave; every call is recorded for later assertions.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::runtime_traits::*;

// ---------------------------------------------------------------------------
// ImageScript
// ---------------------------------------------------------------------------

/// Behaviour of every container created from one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageScript {
    /// `create` fails with a daemon error.
    pub fail_create: bool,
    /// `start` fails with a daemon error.
    pub fail_start: bool,
    /// The container accepts connections from this dial attempt onwards
    /// (1 = first dial). `None` never accepts.
    pub ready_after_dials: Option<u32>,
    /// The process dies after this many inspections have reported it
    /// running. `None` keeps running until waited on.
    pub exit_after_inspections: Option<u32>,
    /// Exit code reported once the process has stopped.
    pub exit_code: i64,
    /// Whether the container ships the identity script.
    pub has_identity_script: bool,
    /// Copying out of this container fails with a daemon error.
    pub fail_copy: bool,
    /// `wait_for_exit` never returns.
    pub hang_on_wait: bool,
    /// `wait_for_exit` fails with a daemon error.
    pub fail_wait: bool,
    /// `inspect` fails once the process has stopped.
    pub fail_inspect_after_exit: bool,
    /// `inspect` never reports a network address.
    pub no_address: bool,
}

impl Default for ImageScript {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_start: false,
            ready_after_dials: Some(1),
            exit_after_inspections: None,
            exit_code: 0,
            has_identity_script: false,
            fail_copy: false,
            hang_on_wait: false,
            fail_wait: false,
            fail_inspect_after_exit: false,
            no_address: false,
        }
    }
}

impl ImageScript {
    /// A client that listens on the first dial and ships `/enode.sh`.
    pub fn ready_client() -> Self {
        Self {
            has_identity_script: true,
            ..Self::default()
        }
    }

    /// A client that stays up but never accepts connections.
    pub fn never_ready() -> Self {
        Self {
            ready_after_dials: None,
            ..Self::default()
        }
    }

    /// A client that dies after `inspections` healthy inspections.
    pub fn crashing(inspections: u32, exit_code: i64) -> Self {
        Self {
            ready_after_dials: None,
            exit_after_inspections: Some(inspections),
            exit_code,
            ..Self::default()
        }
    }

    /// A validator that exits with `exit_code`.
    pub fn validator(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_ready_after(mut self, dials: u32) -> Self {
        self.ready_after_dials = Some(dials);
        self
    }

    pub fn with_identity_script(mut self, present: bool) -> Self {
        self.has_identity_script = present;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_on_wait = true;
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    pub fn failing_inspect_after_exit(mut self) -> Self {
        self.fail_inspect_after_exit = true;
        self
    }

    pub fn without_address(mut self) -> Self {
        self.no_address = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Recorded calls
// ---------------------------------------------------------------------------

/// One call made against the fake, in order of arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create { image: String },
    Start { id: ContainerId },
    Inspect { id: ContainerId },
    Remove { id: ContainerId, force: bool },
    Copy { src: ContainerId, dst: ContainerId, path: String },
    Wait { id: ContainerId },
    Dial { addr: SocketAddr },
}

#[derive(Debug)]
struct FakeContainer {
    image: String,
    spec: ContainerSpec,
    ip: IpAddr,
    started: bool,
    running: bool,
    removed: bool,
    inspections: u32,
    dials: u32,
    copied_in: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u32,
    containers: HashMap<String, FakeContainer>,
    calls: Vec<RuntimeCall>,
}

// ---------------------------------------------------------------------------
// ScriptedRuntime
// ---------------------------------------------------------------------------

/// In-memory container runtime driven by per-image scripts.
///
/// Images without a script cannot be created (`RuntimeError::ImageNotFound`).
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    scripts: HashMap<String, ImageScript>,
    fail_remove: bool,
    state: Mutex<FakeState>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behaviour of `image`.
    pub fn with_image(mut self, image: impl Into<String>, script: ImageScript) -> Self {
        self.scripts.insert(image.into(), script);
        self
    }

    /// Make every `remove` call fail with a daemon error.
    pub fn failing_removal(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script(&self, image: &str) -> Option<&ImageScript> {
        self.scripts.get(image)
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    /// Number of containers created.
    pub fn created_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Containers that were created and not yet removed.
    pub fn live_containers(&self) -> Vec<ContainerId> {
        let state = self.state();
        let mut live: Vec<ContainerId> = state
            .containers
            .iter()
            .filter(|(_, c)| !c.removed)
            .map(|(id, _)| ContainerId::new(id.clone()))
            .collect();
        live.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        live
    }

    /// Number of `remove` calls issued for `id`.
    pub fn removal_attempts(&self, id: &ContainerId) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Remove { id: removed, .. } if removed == id))
            .count()
    }

    /// The `ContainerSpec` a container was created with.
    pub fn spec_of(&self, id: &ContainerId) -> Option<ContainerSpec> {
        self.state()
            .containers
            .get(id.as_str())
            .map(|c| c.spec.clone())
    }

    /// Ids of containers created from `image`, in creation order.
    pub fn containers_of(&self, image: &str) -> Vec<ContainerId> {
        let state = self.state();
        let mut ids: Vec<(&String, &FakeContainer)> = state
            .containers
            .iter()
            .filter(|(_, c)| c.image == image)
            .collect();
        ids.sort_by(|a, b| a.0.cmp(b.0));
        ids.into_iter()
            .map(|(id, _)| ContainerId::new(id.clone()))
            .collect()
    }

    /// Paths copied into `id`.
    pub fn copied_into(&self, id: &ContainerId) -> Vec<String> {
        self.state()
            .containers
            .get(id.as_str())
            .map(|c| c.copied_in.clone())
            .unwrap_or_default()
    }

    /// Number of dial attempts recorded.
    pub fn dial_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Dial { .. }))
            .count()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerId> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Create {
            image: spec.image.clone(),
        });

        let script = self
            .script(&spec.image)
            .ok_or_else(|| RuntimeError::ImageNotFound(spec.image.clone()))?;
        if script.fail_create {
            return Err(RuntimeError::Daemon(format!(
                "scripted create failure for {}",
                spec.image
            )));
        }

        state.next_id += 1;
        let n = state.next_id;
        let id = format!("{:08x}{:056x}", n, n);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, (n / 250) as u8, (n % 250) as u8 + 2));
        state.containers.insert(
            id.clone(),
            FakeContainer {
                image: spec.image.clone(),
                spec: spec.clone(),
                ip,
                started: false,
                running: false,
                removed: false,
                inspections: 0,
                dials: 0,
                copied_in: Vec::new(),
            },
        );
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId, log_path: &Path) -> RuntimeResult<LogStream> {
        let image = {
            let mut state = self.state();
            state.calls.push(RuntimeCall::Start { id: id.clone() });
            let container = live_container(&mut state, id)?;
            let image = container.image.clone();
            if self.script(&image).is_some_and(|s| s.fail_start) {
                return Err(RuntimeError::Daemon(format!(
                    "scripted start failure for {}",
                    image
                )));
            }
            container.started = true;
            container.running = true;
            image
        };

        tokio::fs::write(log_path, format!("{} started as {}\n", image, id)).await?;
        let pump = tokio::spawn(async { Ok(0) });
        Ok(LogStream::spawn(id.clone(), log_path.to_path_buf(), pump))
    }

    async fn inspect(&self, id: &ContainerId) -> RuntimeResult<ContainerState> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Inspect { id: id.clone() });
        let container = live_container(&mut state, id)?;
        let script = self.script(&container.image).cloned().unwrap_or_default();

        if container.running {
            container.inspections += 1;
            if let Some(limit) = script.exit_after_inspections {
                if container.inspections > limit {
                    container.running = false;
                }
            }
        }

        if script.fail_inspect_after_exit && container.started && !container.running {
            return Err(RuntimeError::Daemon(format!(
                "scripted inspect failure for {}",
                id.short()
            )));
        }

        let exit_code = if container.running || !container.started {
            0
        } else {
            script.exit_code
        };
        Ok(ContainerState {
            running: container.running,
            exit_code,
            ip_address: (container.started && !script.no_address).then_some(container.ip),
        })
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> RuntimeResult<()> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Remove {
            id: id.clone(),
            force,
        });
        if self.fail_remove {
            return Err(RuntimeError::Daemon("scripted removal failure".to_string()));
        }
        let container = live_container(&mut state, id)?;
        if container.running && !force {
            return Err(RuntimeError::Daemon(format!(
                "container {} is running",
                id.short()
            )));
        }
        container.running = false;
        container.removed = true;
        Ok(())
    }

    async fn copy_file(
        &self,
        src: &ContainerId,
        dst: &ContainerId,
        path: &str,
    ) -> RuntimeResult<()> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Copy {
            src: src.clone(),
            dst: dst.clone(),
            path: path.to_string(),
        });

        let source = live_container(&mut state, src)?;
        let script = self.script(&source.image).cloned().unwrap_or_default();
        if script.fail_copy {
            return Err(RuntimeError::Daemon("scripted copy failure".to_string()));
        }
        if !script.has_identity_script {
            return Err(RuntimeError::PathNotFound {
                container: src.to_string(),
                path: path.to_string(),
            });
        }

        let target = live_container(&mut state, dst)?;
        target.copied_in.push(path.to_string());
        Ok(())
    }

    async fn wait_for_exit(&self, stream: &mut LogStream) -> RuntimeResult<()> {
        let id = stream.container().clone();
        let hang = {
            let mut state = self.state();
            state.calls.push(RuntimeCall::Wait { id: id.clone() });
            let container = live_container(&mut state, &id)?;
            let script = self.script(&container.image).cloned().unwrap_or_default();
            if script.fail_wait {
                return Err(RuntimeError::Daemon("scripted wait failure".to_string()));
            }
            let hang = script.hang_on_wait;
            if !hang {
                container.running = false;
            }
            hang
        };

        if hang {
            std::future::pending::<()>().await;
        }
        stream.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl PortDialer for ScriptedRuntime {
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<()> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Dial { addr });

        let container = state
            .containers
            .values_mut()
            .find(|c| c.ip == addr.ip() && !c.removed);
        let Some(container) = container else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "no container at address",
            ));
        };
        if !container.running {
            return Err(std::io::ErrorKind::ConnectionRefused.into());
        }

        container.dials += 1;
        let ready_after = self
            .scripts
            .get(&container.image)
            .and_then(|s| s.ready_after_dials);
        match ready_after {
            Some(n) if container.dials >= n => Ok(()),
            _ => Err(std::io::ErrorKind::ConnectionRefused.into()),
        }
    }
}

fn live_container<'a>(
    state: &'a mut FakeState,
    id: &ContainerId,
) -> RuntimeResult<&'a mut FakeContainer> {
    state
        .containers
        .get_mut(id.as_str())
        .filter(|c| !c.removed)
        .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> ScriptedRuntime {
        ScriptedRuntime::new()
            .with_image("client", ImageScript::ready_client().with_ready_after(2))
            .with_image("validator", ImageScript::validator(3))
    }

    #[tokio::test]
    async fn test_unknown_image_is_not_found() {
        let rt = runtime();
        let err = rt.create(&ContainerSpec::new("missing")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn test_dial_honours_ready_after() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime();
        let id = rt.create(&ContainerSpec::new("client")).await.unwrap();
        let _logs = rt.start(&id, &dir.path().join("client.log")).await.unwrap();
        let ip = rt.inspect(&id).await.unwrap().ip_address.unwrap();
        let addr = SocketAddr::new(ip, 8545);

        assert!(rt.dial(addr).await.is_err());
        assert!(rt.dial(addr).await.is_ok());
        assert_eq!(rt.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime();
        let id = rt.create(&ContainerSpec::new("validator")).await.unwrap();
        let mut logs = rt.start(&id, &dir.path().join("v.log")).await.unwrap();

        assert!(rt.inspect(&id).await.unwrap().running);
        rt.wait_for_exit(&mut logs).await.unwrap();
        let state = rt.inspect(&id).await.unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, 3);
    }

    #[tokio::test]
    async fn test_crashing_container_stops_after_inspections() {
        let dir = tempfile::tempdir().unwrap();
        let rt = ScriptedRuntime::new().with_image("crash", ImageScript::crashing(1, 2));
        let id = rt.create(&ContainerSpec::new("crash")).await.unwrap();
        let _logs = rt.start(&id, &dir.path().join("c.log")).await.unwrap();

        assert!(rt.inspect(&id).await.unwrap().running);
        let state = rt.inspect(&id).await.unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, 2);
    }

    #[tokio::test]
    async fn test_second_removal_is_not_found() {
        let rt = runtime();
        let id = rt.create(&ContainerSpec::new("client")).await.unwrap();
        rt.remove(&id, true).await.unwrap();
        let err = rt.remove(&id, true).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(rt.removal_attempts(&id), 2);
        assert!(rt.live_containers().is_empty());
    }

    #[tokio::test]
    async fn test_copy_without_script_is_path_not_found() {
        let rt = ScriptedRuntime::new()
            .with_image("bare", ImageScript::default())
            .with_image("validator", ImageScript::validator(0));
        let src = rt.create(&ContainerSpec::new("bare")).await.unwrap();
        let dst = rt.create(&ContainerSpec::new("validator")).await.unwrap();

        let err = rt.copy_file(&src, &dst, "/enode.sh").await.unwrap_err();
        assert!(matches!(err, RuntimeError::PathNotFound { .. }));
        assert!(rt.copied_into(&dst).is_empty());
    }

    #[tokio::test]
    async fn test_scripted_wait_and_inspect_failures() {
        let dir = tempfile::tempdir().unwrap();
        let rt = ScriptedRuntime::new()
            .with_image("stuck", ImageScript::validator(0).failing_wait())
            .with_image("opaque", ImageScript::validator(0).failing_inspect_after_exit());

        let stuck = rt.create(&ContainerSpec::new("stuck")).await.unwrap();
        let mut logs = rt.start(&stuck, &dir.path().join("s.log")).await.unwrap();
        let err = rt.wait_for_exit(&mut logs).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Daemon(_)));

        let opaque = rt.create(&ContainerSpec::new("opaque")).await.unwrap();
        let mut logs = rt.start(&opaque, &dir.path().join("o.log")).await.unwrap();
        assert!(rt.inspect(&opaque).await.unwrap().running);
        rt.wait_for_exit(&mut logs).await.unwrap();
        assert!(matches!(
            rt.inspect(&opaque).await.unwrap_err(),
            RuntimeError::Daemon(_)
        ));
    }
}
