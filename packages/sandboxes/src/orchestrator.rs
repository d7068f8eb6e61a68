// ABOUTME: Sandbox orchestration for conversation threads
// ABOUTME: Provisions per-thread sandboxes, runs commands under a deadline, and harvests artifacts

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use relaybox_config::constants::{SANDBOX_SESSION_ID, SANDBOX_THREAD_ID};

use crate::artifact::{classify_files, Artifact};
use crate::config::SandboxConfig;
use crate::error::{Result, RuntimeError, SandboxError};
use crate::registry::SessionRegistry;
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput};
use crate::types::{ExecutionResult, Session, SessionStatus, StopAllReport};
use crate::workspace::{validate_identifier, WorkspaceStore};

/// Labels applied to sandbox containers for tracking
const SESSION_LABEL: &str = "relaybox.session_id";
const THREAD_LABEL: &str = "relaybox.thread_id";

/// Directory inside the sandbox holding seeded messages; outside the workspace
const MESSAGE_DIR: &str = "/tmp";

/// Owns the thread -> sandbox lifecycle
pub struct SandboxOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    workspaces: WorkspaceStore,
    registry: Arc<SessionRegistry>,
    config: SandboxConfig,
}

impl SandboxOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        let workspaces = WorkspaceStore::new(
            config.workspace_root.clone(),
            config.max_file_bytes,
            config.max_workspace_bytes,
        );

        Self {
            runtime,
            workspaces,
            registry: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn workspaces(&self) -> &WorkspaceStore {
        &self.workspaces
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `text` through the sandboxed tool in the thread's sandbox
    ///
    /// Execution flow:
    /// 1. Attach to the thread's running session or provision a new one
    /// 2. Seed the message into a uniquely named file inside the sandbox
    /// 3. Run the tool on that file under the configured deadline
    /// 4. Snapshot and classify the workspace files
    pub async fn process_command(
        &self,
        thread_id: &str,
        channel_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<ExecutionResult> {
        validate_identifier(thread_id)?;

        let session = self
            .registry
            .create_or_attach(thread_id, || self.provision(thread_id, channel_id, user_id))
            .await?;

        info!(
            "Processing command for thread {} in container {}",
            thread_id, session.container_id
        );

        let message_path = format!("{}/relaybox-msg-{}.txt", MESSAGE_DIR, nanoid::nanoid!(12));
        self.exec_with_deadline(&session, seed_message_command(text, &message_path))
            .await?;

        let output = self
            .exec_with_deadline(
                &session,
                tool_command(
                    &self.config.tool_command,
                    &self.config.permission_mode,
                    &message_path,
                ),
            )
            .await?;

        let mut result = ExecutionResult::from_output(&session.id, &output.stdout, &output.stderr);

        match self.workspaces.list_files(&session.id).await {
            Ok(files) => result.artifacts = classify_files(files),
            Err(e) => {
                warn!("Failed to read workspace for session {}: {}", session.id, e);
                result.artifacts_error = Some(e.to_string());
            }
        }

        info!(
            "Command finished for thread {} (success: {}, artifacts: {})",
            thread_id,
            result.success,
            result.artifacts.len()
        );
        Ok(result)
    }

    /// Tear down the thread's sandbox; succeeds when there is none
    pub async fn stop_session(&self, thread_id: &str) -> Result<()> {
        self.evict(thread_id, None).await.map(|_| ())
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        self.registry.list_all().await
    }

    pub async fn get_session(&self, thread_id: &str) -> Option<Session> {
        self.registry.get_by_thread(thread_id).await
    }

    /// Stop every registered session, counting failures instead of aborting
    pub async fn stop_all(&self) -> StopAllReport {
        let mut report = StopAllReport::default();

        for session in self.registry.list_all().await {
            match self.evict(&session.thread_id, Some(&session.container_id)).await {
                Ok(true) => report.stopped += 1,
                Ok(false) => debug!("Session {} already gone", session.id),
                Err(e) => {
                    warn!("Failed to stop session {}: {}", session.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Stopped {} sessions ({} failed)",
            report.stopped, report.failed
        );
        report
    }

    /// Evict every session older than `max_age`; returns the evicted session IDs
    pub async fn cleanup_old_sessions(&self, max_age: Duration) -> Vec<String> {
        self.cleanup_old_sessions_at(Utc::now(), max_age).await
    }

    /// Same as [`cleanup_old_sessions`](Self::cleanup_old_sessions) with an explicit clock reading
    pub async fn cleanup_old_sessions_at(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Vec<String> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut evicted = Vec::new();

        for session in self.registry.list_all().await {
            let age = session.age_at(now);
            if age <= max_age {
                continue;
            }

            info!(
                "Evicting session {} (age: {}m)",
                session.id,
                age.num_minutes()
            );

            // Passing the container ID skips sessions replaced since the snapshot
            match self.evict(&session.thread_id, Some(&session.container_id)).await {
                Ok(true) => evicted.push(session.id),
                Ok(false) => debug!("Session {} changed before eviction", session.id),
                Err(e) => warn!("Failed to evict session {}: {}", session.id, e),
            }
        }

        if !evicted.is_empty() {
            info!("Cleaned up {} old sessions", evicted.len());
        }
        evicted
    }

    /// Container logs of the thread's sandbox
    pub async fn session_logs(&self, thread_id: &str) -> Result<Vec<u8>> {
        let session = self
            .registry
            .get_by_thread(thread_id)
            .await
            .ok_or_else(|| SandboxError::SessionNotFound(thread_id.to_string()))?;

        Ok(self.runtime.logs(&session.container_id).await?)
    }

    /// Read one file from the thread's workspace for a file-serving adapter
    pub async fn read_workspace_file(&self, thread_id: &str, relative_path: &str) -> Result<Vec<u8>> {
        self.workspaces.read_file(thread_id, relative_path).await
    }

    /// Every file currently in the thread's workspace, classified
    pub async fn session_artifacts(&self, thread_id: &str) -> Result<Vec<Artifact>> {
        let files = self.workspaces.list_files(thread_id).await?;
        Ok(classify_files(files))
    }

    // ==================== Private Helper Methods ====================

    /// Create workspace and container for a thread, rolling back on failure
    async fn provision(&self, thread_id: &str, channel_id: &str, user_id: &str) -> Result<Session> {
        info!("Provisioning sandbox for thread {}", thread_id);

        let workspace = self
            .workspaces
            .ensure(thread_id)
            .await
            .map_err(|e| SandboxError::provision(thread_id, e))?;
        debug!("Workspace for thread {} at {}", thread_id, workspace.display());

        let spec = self.container_spec(thread_id);
        let container_id = self.runtime.create(&spec).await.map_err(|e| {
            error!("Failed to create container for thread {}: {}", thread_id, e);
            SandboxError::provision(thread_id, e.into())
        })?;

        if let Err(e) = self.runtime.start(&container_id).await {
            error!("Failed to start container {}: {}", container_id, e);
            if let Err(cleanup) = self.runtime.remove(&container_id).await {
                error!(
                    "Rollback left container {} behind: {}",
                    container_id, cleanup
                );
            }
            return Err(SandboxError::provision(thread_id, e.into()));
        }

        Ok(Session {
            id: thread_id.to_string(),
            container_id,
            thread_id: thread_id.to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            status: SessionStatus::Running,
            created_at: Utc::now(),
        })
    }

    fn container_spec(&self, thread_id: &str) -> ContainerSpec {
        let mut env = HashMap::new();
        if let Some(api_key) = &self.config.api_key {
            env.insert(self.config.api_key_env_name.clone(), api_key.clone());
        }
        env.insert(SANDBOX_SESSION_ID.to_string(), thread_id.to_string());
        env.insert(SANDBOX_THREAD_ID.to_string(), thread_id.to_string());

        let labels = HashMap::from([
            (SESSION_LABEL.to_string(), thread_id.to_string()),
            (THREAD_LABEL.to_string(), thread_id.to_string()),
        ]);

        ContainerSpec {
            name: container_name(thread_id),
            image: self.config.image.clone(),
            env,
            workspace_host_path: self
                .config
                .bind_root()
                .join(thread_id)
                .display()
                .to_string(),
            container_mount_path: self.config.container_workspace.clone(),
            labels,
        }
    }

    /// Run one exec, tearing the sandbox down when it overruns the deadline
    async fn exec_with_deadline(&self, session: &Session, argv: Vec<String>) -> Result<ExecOutput> {
        let deadline = self.config.exec_timeout;

        match tokio::time::timeout(deadline, self.runtime.exec(&session.container_id, argv)).await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                error!("Exec failed in session {}: {}", session.id, e);
                Err(SandboxError::Exec(e))
            }
            Err(_) => {
                warn!(
                    "Exec in session {} exceeded {:?}, stopping container {}",
                    session.id, deadline, session.container_id
                );
                // Keeps waiting requests from attaching to the hung container
                self.registry
                    .mark_failed(&session.id, &session.container_id)
                    .await;
                if let Err(e) = self.evict_timed_out(session).await {
                    error!("Failed to stop unresponsive session {}: {}", session.id, e);
                }
                Err(SandboxError::ExecTimeout { timeout: deadline })
            }
        }
    }

    /// Tear down a session whose exec overran its deadline.
    ///
    /// The captured container is always stopped and removed. The registry
    /// entry is dropped only while it still points at that container, since a
    /// waiting request may already have provisioned a replacement.
    async fn evict_timed_out(&self, session: &Session) -> Result<()> {
        let _guard = self.registry.lock_thread(&session.thread_id).await;

        let still_registered = self
            .registry
            .get_by_thread(&session.thread_id)
            .await
            .is_some_and(|current| current.container_id == session.container_id);

        let teardown = self.teardown_container(&session.container_id).await;

        if still_registered {
            self.registry.remove(&session.id).await;
            if self.config.reap_workspaces {
                if let Err(e) = self.workspaces.remove(&session.id).await {
                    warn!("Failed to remove workspace for {}: {}", session.id, e);
                }
            }
        } else {
            debug!(
                "Session {} was replaced, only removing container {}",
                session.id, session.container_id
            );
        }

        teardown.map_err(SandboxError::Teardown)
    }

    /// Tear down the thread's session under its lock.
    ///
    /// With `expected_container`, only a session still bound to that container
    /// is evicted. Returns whether a session was removed. The registry entry is
    /// removed even when container teardown fails.
    async fn evict(&self, thread_id: &str, expected_container: Option<&str>) -> Result<bool> {
        let _guard = self.registry.lock_thread(thread_id).await;

        let Some(session) = self.registry.get_by_thread(thread_id).await else {
            debug!("No session to stop for thread {}", thread_id);
            return Ok(false);
        };
        if let Some(expected) = expected_container {
            if session.container_id != expected {
                return Ok(false);
            }
        }

        let teardown = self.teardown_container(&session.container_id).await;

        if session.is_running() {
            self.registry
                .set_status(&session.id, SessionStatus::Completed)
                .await;
        }
        self.registry.remove(&session.id).await;

        if self.config.reap_workspaces {
            if let Err(e) = self.workspaces.remove(&session.id).await {
                warn!("Failed to remove workspace for {}: {}", session.id, e);
            }
        }

        match teardown {
            Ok(()) => {
                info!("Session {} stopped", session.id);
                Ok(true)
            }
            Err(e) => Err(SandboxError::Teardown(e)),
        }
    }

    /// Stop then remove a container, attempting removal even when stop fails
    async fn teardown_container(&self, container_id: &str) -> std::result::Result<(), RuntimeError> {
        let stopped = self
            .runtime
            .stop(container_id, self.config.stop_grace_period)
            .await;
        if let Err(e) = &stopped {
            warn!("Stop failed for {}, forcing removal: {}", container_id, e);
        }

        self.runtime.remove(container_id).await?;
        stopped
    }
}

/// Docker-safe container name for a thread, unique per provisioning
fn container_name(thread_id: &str) -> String {
    let sanitized: String = thread_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .take(48)
        .collect();
    let suffix: String = nanoid::nanoid!(8, &nanoid::alphabet::SAFE)
        .chars()
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .collect();
    format!("relaybox-{}-{}", sanitized, suffix)
}

/// Quote a string for POSIX sh as one single-quoted word
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Write `text` verbatim to `path` inside the sandbox
fn seed_message_command(text: &str, path: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("printf '%s' {} > {}", shell_quote(text), shell_quote(path)),
    ]
}

/// Invoke the tool with the seeded message as a single argument, then discard the file
fn tool_command(tool: &str, permission_mode: &str, message_path: &str) -> Vec<String> {
    let path = shell_quote(message_path);
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "{} \"$(cat {})\" --permission-mode {}; status=$?; rm -f {}; exit $status",
            tool,
            path,
            shell_quote(permission_mode),
            path
        ),
    ]
}
