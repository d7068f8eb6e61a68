// ABOUTME: Error types for sandbox session management
// ABOUTME: Separates engine, workspace, and orchestration failures so callers can react per kind

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a container runtime implementation
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Container could not be created (image missing, engine unreachable, bad mount)
    #[error("Failed to create container: {0}")]
    Provision(String),

    /// Container was created but refused to start
    #[error("Failed to start container {container_id}: {reason}")]
    Start {
        container_id: String,
        reason: String,
    },

    /// Exec could not be opened or its stream broke before completion
    #[error("Exec failed in container {container_id}: {reason}")]
    Exec {
        container_id: String,
        reason: String,
    },

    /// Log retrieval failed
    #[error("Failed to fetch logs for container {container_id}: {reason}")]
    Logs {
        container_id: String,
        reason: String,
    },

    /// Stop or remove failed
    #[error("Failed to tear down container {container_id}: {reason}")]
    Teardown {
        container_id: String,
        reason: String,
    },

    /// The engine could not be reached at all
    #[error("Docker connection error: {0}")]
    Connection(String),
}

/// Failures while reading or preparing a session workspace
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Workspace I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace walk failed: {0}")]
    Walk(String),

    #[error("File {path} is {size} bytes, over the per-file limit of {limit} bytes")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("Workspace {session_id} exceeds the read budget of {limit} bytes")]
    BudgetExceeded { session_id: String, limit: u64 },

    #[error("Path escapes the session workspace: {0}")]
    PathEscape(String),

    #[error("File not found in workspace: {0}")]
    FileNotFound(String),
}

/// Main error type for sandbox session operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Sandbox could not be provisioned; nothing was left registered
    #[error("Provisioning failed for thread {thread_id}: {source}")]
    Provision {
        thread_id: String,
        #[source]
        source: Box<SandboxError>,
    },

    /// Command could not be executed; the session stays usable
    #[error("Execution failed: {0}")]
    Exec(#[source] RuntimeError),

    /// Command exceeded its deadline and the sandbox was torn down
    #[error("Execution timed out after {timeout:?}")]
    ExecTimeout { timeout: std::time::Duration },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Teardown failed: {0}")]
    Teardown(#[source] RuntimeError),

    #[error("No live session for thread: {0}")]
    SessionNotFound(String),

    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl SandboxError {
    pub(crate) fn provision(thread_id: &str, source: SandboxError) -> Self {
        SandboxError::Provision {
            thread_id: thread_id.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether this error left the thread's sandbox usable for another attempt
    pub fn session_survives(&self) -> bool {
        matches!(self, SandboxError::Exec(_) | SandboxError::Workspace(_))
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
