//! xval-runtime: Container Runtime Layer for xval
//!
//! This crate defines the contract between the pair engine and the container
//! daemon, and ships the implementations of it.
//!
//! ## Layer 0 - Container Runtime
//!
//! Focus: Container lifecycle, log capture, and reachability checks.
//!
//! ## Key Components
//!
//! - `ContainerRuntime`: create/start/inspect/remove/copy/wait contract
//! - `PortDialer` / `TcpDialer`: TCP reachability used for readiness probing
//! - `DockerRuntime`: `bollard`-backed implementation against a real daemon
//! - `fakes::ScriptedRuntime`: in-memory implementation for tests

pub mod docker;
mod error;
pub mod fakes;
pub mod runtime_traits;

pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use runtime_traits::{
    ContainerId, ContainerRuntime, ContainerSpec, ContainerState, LogStream, PortDialer,
    RuntimeResult, TcpDialer,
};
