// ABOUTME: Core type definitions for sandbox sessions
// ABOUTME: Defines session records, execution results, and batch teardown reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::artifact::Artifact;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Sandbox is provisioned and accepting commands
    Running,
    /// Sandbox was stopped or evicted
    Completed,
    /// Sandbox hit an unrecoverable execution error
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One sandbox bound to one conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session ID; equal to the thread ID
    pub id: String,
    /// Handle returned by the container runtime
    pub container_id: String,
    pub thread_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Time elapsed since the session was created, as seen at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

/// Who asked for a command; recorded on the session that serves it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub thread_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
}

/// Result of running one command in a thread's sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub session_id: String,
    /// True iff the tool wrote nothing to stderr
    pub success: bool,
    /// Tool stdout
    pub output: String,
    /// Tool stderr, when non-empty
    pub error: Option<String>,
    /// Files found in the workspace after the command ran
    pub artifacts: Vec<Artifact>,
    /// Set when the workspace could not be read; `artifacts` is then empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_error: Option<String>,
}

impl ExecutionResult {
    /// Build a result from raw exec output, applying the stderr success heuristic
    pub fn from_output(session_id: &str, stdout: &[u8], stderr: &[u8]) -> Self {
        let output = String::from_utf8_lossy(stdout).into_owned();
        let error = if stderr.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(stderr).into_owned())
        };

        Self {
            session_id: session_id.to_string(),
            success: error.is_none(),
            output,
            error,
            artifacts: Vec::new(),
            artifacts_error: None,
        }
    }

    /// Whether the artifact list reflects a successful workspace read
    pub fn artifacts_available(&self) -> bool {
        self.artifacts_error.is_none()
    }
}

/// Outcome of stopping every registered session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAllReport {
    pub stopped: usize,
    pub failed: usize,
}
