// ABOUTME: Docker implementation of the container runtime via bollard
// ABOUTME: Creates sandbox containers with a workspace bind mount and demultiplexes exec output

use super::{ContainerRuntime, ContainerSpec, ExecOutput, Result};
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Label applied to every Relaybox container
pub const MANAGED_LABEL: &str = "relaybox.managed";

pub struct DockerRuntime {
    docker: Docker,
    pull_missing_images: bool,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and verify it answers
    ///
    /// On Unix: /var/run/docker.sock
    /// On Windows: npipe:////./pipe/docker_engine
    pub async fn connect() -> Result<Self> {
        #[cfg(unix)]
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;

        #[cfg(windows)]
        let docker = Docker::connect_with_named_pipe_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;

        docker.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            RuntimeError::Connection(e.to_string())
        })?;

        info!("Successfully connected to Docker daemon");
        Ok(Self::with_client(docker))
    }

    /// Wrap an existing client without pinging it
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            pull_missing_images: false,
            pull_timeout: Duration::from_secs(600),
        }
    }

    /// Pull images that are missing locally instead of failing creation
    pub fn with_image_pull(mut self, enabled: bool, timeout: Duration) -> Self {
        self.pull_missing_images = enabled;
        self.pull_timeout = timeout;
        self
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::Provision(format!(
                "cannot inspect image {}: {}",
                image, e
            ))),
        }
    }

    /// Make sure `image` is available locally, pulling it when allowed
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        if !self.pull_missing_images {
            return Err(RuntimeError::Provision(format!(
                "Image {} not found locally. Please pull it first with: docker pull {}",
                image, image
            )));
        }

        info!("Pulling image {} (timeout: {:?})", image, self.pull_timeout);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        let pull = async {
            while let Some(progress) = stream.next().await {
                let info = progress.map_err(|e| {
                    RuntimeError::Provision(format!("Failed to pull image {}: {}", image, e))
                })?;
                if let Some(error) = info.error {
                    return Err(RuntimeError::Provision(format!(
                        "Failed to pull image {}: {}",
                        image, error
                    )));
                }
            }
            Ok(())
        };

        match tokio::time::timeout(self.pull_timeout, pull).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Provision(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

/// Translate a sandbox spec into a bollard container config
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut labels = spec.labels.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    let mut env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.sort();

    let host_config = HostConfig {
        binds: Some(vec![format!(
            "{}:{}:rw",
            spec.workspace_host_path, spec.container_mount_path
        )]),
        network_mode: Some("bridge".to_string()),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: Some(0),
        }),
        privileged: Some(false),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        working_dir: Some(spec.container_mount_path.clone()),
        labels: Some(labels),
        host_config: Some(host_config),
        // Keeps the image's default shell alive between execs
        tty: Some(true),
        open_stdin: Some(true),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        debug!("Creating container {} with image {}", spec.name, spec.image);

        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| {
                error!("Failed to create container {}: {}", spec.name, e);
                RuntimeError::Provision(e.to_string())
            })?;

        for warning in &response.warnings {
            warn!("Docker warning for {}: {}", spec.name, warning);
        }

        info!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        debug!("Starting container {}", container_id);

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                error!("Failed to start container {}: {}", container_id, e);
                RuntimeError::Start {
                    container_id: container_id.to_string(),
                    reason: e.to_string(),
                }
            })?;

        info!("Started container {}", container_id);
        Ok(())
    }

    async fn exec(&self, container_id: &str, argv: Vec<String>) -> Result<ExecOutput> {
        debug!("Executing in container {}: {:?}", container_id, argv);

        let exec_error = |e: BollardError| RuntimeError::Exec {
            container_id: container_id.to_string(),
            reason: e.to_string(),
        };

        let exec_config = CreateExecOptions {
            cmd: Some(argv),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(exec_error)?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(exec_error)?;

        let mut output = ExecOutput::default();

        match start_result {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(msg) = stream.next().await {
                    match msg.map_err(exec_error)? {
                        LogOutput::StdOut { message } => output.stdout.extend_from_slice(&message),
                        LogOutput::StdErr { message } => output.stderr.extend_from_slice(&message),
                        LogOutput::Console { message } => output.stdout.extend_from_slice(&message),
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Exec {
                    container_id: container_id.to_string(),
                    reason: "Exec was detached unexpectedly".to_string(),
                });
            }
        }

        debug!(
            "Exec in {} finished ({} bytes stdout, {} bytes stderr)",
            container_id,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }

    async fn logs(&self, container_id: &str) -> Result<Vec<u8>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut data = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => data.extend_from_slice(&message),
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    return Err(RuntimeError::Logs {
                        container_id: container_id.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        Ok(data)
    }

    async fn stop(&self, container_id: &str, grace_period: Duration) -> Result<()> {
        debug!(
            "Stopping container {} (grace: {}s)",
            container_id,
            grace_period.as_secs()
        );

        let options = StopContainerOptions {
            t: grace_period.as_secs() as i64,
        };

        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(_) => {}
            // Already stopped is not an error
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => debug!("Container {} already stopped", container_id),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => debug!("Container {} no longer exists", container_id),
            Err(e) => {
                error!("Failed to stop container {}: {}", container_id, e);
                return Err(RuntimeError::Teardown {
                    container_id: container_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        info!("Stopped container {}", container_id);
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        debug!("Removing container {}", container_id);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => {}
            // Already removed is not an error
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => debug!("Container {} already removed", container_id),
            Err(e) => {
                error!("Failed to remove container {}: {}", container_id, e);
                return Err(RuntimeError::Teardown {
                    container_id: container_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        info!("Removed container {}", container_id);
        Ok(())
    }
}
