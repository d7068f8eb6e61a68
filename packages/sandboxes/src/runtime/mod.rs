// ABOUTME: Container runtime trait and shared request/response types
// ABOUTME: Keeps the orchestrator independent of the container engine in use

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::RuntimeError;

pub mod docker;

pub use docker::DockerRuntime;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Everything needed to create one sandbox container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    /// Host directory bind-mounted read-write into the container
    pub workspace_host_path: String,
    /// Mount point inside the container; also the working directory
    pub container_mount_path: String,
    pub labels: HashMap<String, String>,
}

/// Demultiplexed output of one exec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Capability boundary over a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container; returns its handle
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, container_id: &str) -> Result<()>;

    /// Run `argv` in a running container and wait for end of output.
    /// Imposes no deadline of its own.
    async fn exec(&self, container_id: &str, argv: Vec<String>) -> Result<ExecOutput>;

    /// Combined stdout/stderr logs of the container's main process
    async fn logs(&self, container_id: &str) -> Result<Vec<u8>>;

    /// Stop, forcing termination once `grace_period` has elapsed
    async fn stop(&self, container_id: &str, grace_period: Duration) -> Result<()>;

    async fn remove(&self, container_id: &str) -> Result<()>;
}
