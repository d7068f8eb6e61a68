// ABOUTME: Runtime configuration for sandbox sessions
// ABOUTME: Loads image, workspace, credential, timing, and budget settings from the environment

use relaybox_config::constants::*;
use relaybox_config::{
    parse_env_flag, parse_env_opt, parse_env_or_default, parse_env_or_default_with_validation,
};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_IMAGE: &str = "relaybox-sandbox:latest";
const DEFAULT_WORKSPACE_ROOT: &str = "/data/workspaces";
const DEFAULT_CONTAINER_WORKSPACE: &str = "/workspace";
const DEFAULT_TOOL_COMMAND: &str = "claude -p";
const DEFAULT_PERMISSION_MODE: &str = "acceptEdits";

/// Upper bound for the session age limit (one year)
const MAX_SESSION_AGE_MINUTES: u64 = 365 * 24 * 60;

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Image every sandbox is created from
    pub image: String,
    /// Pull the image when it is not present locally
    pub pull_missing_images: bool,
    pub image_pull_timeout: Duration,

    /// Directory holding one workspace per session, as seen by this process
    pub workspace_root: PathBuf,
    /// Same directory as seen by the Docker daemon, when it differs
    pub workspace_host_root: Option<PathBuf>,
    /// Mount point of the workspace inside the sandbox
    pub container_workspace: String,
    pub max_file_bytes: u64,
    pub max_workspace_bytes: u64,
    /// Delete the workspace directory when its session is torn down
    pub reap_workspaces: bool,

    /// Upstream credential forwarded into every sandbox
    pub api_key: Option<String>,
    pub api_key_env_name: String,

    /// Shell command prefix of the sandboxed tool; the message is appended as one argument
    pub tool_command: String,
    pub permission_mode: String,

    pub exec_timeout: Duration,
    pub stop_grace_period: Duration,
    pub cleanup_interval: Duration,
    pub max_session_age: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            pull_missing_images: false,
            image_pull_timeout: Duration::from_secs(600),
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            workspace_host_root: None,
            container_workspace: DEFAULT_CONTAINER_WORKSPACE.to_string(),
            max_file_bytes: 5 * 1024 * 1024,
            max_workspace_bytes: 50 * 1024 * 1024,
            reap_workspaces: false,
            api_key: None,
            api_key_env_name: ANTHROPIC_API_KEY.to_string(),
            tool_command: DEFAULT_TOOL_COMMAND.to_string(),
            permission_mode: DEFAULT_PERMISSION_MODE.to_string(),
            exec_timeout: Duration::from_secs(15 * 60),
            stop_grace_period: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60 * 60),
            max_session_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl SandboxConfig {
    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let exec_timeout_secs = parse_env_or_default_with_validation(
            RELAYBOX_EXEC_TIMEOUT_SECS,
            defaults.exec_timeout.as_secs(),
            |v| v > 0,
        );
        let stop_grace_secs = parse_env_or_default_with_validation(
            RELAYBOX_STOP_GRACE_SECS,
            defaults.stop_grace_period.as_secs(),
            |v| v <= 300,
        );
        let cleanup_interval_minutes = parse_env_or_default_with_validation(
            RELAYBOX_CLEANUP_INTERVAL_MINUTES,
            defaults.cleanup_interval.as_secs() / 60,
            |v| (1..=24 * 60).contains(&v),
        );
        let max_session_age_minutes = parse_env_or_default_with_validation(
            RELAYBOX_MAX_SESSION_AGE_MINUTES,
            defaults.max_session_age.as_secs() / 60,
            |v| (1..=MAX_SESSION_AGE_MINUTES).contains(&v),
        );
        let pull_timeout_secs = parse_env_or_default_with_validation(
            RELAYBOX_IMAGE_PULL_TIMEOUT_SECS,
            defaults.image_pull_timeout.as_secs(),
            |v| v > 0,
        );

        Self {
            image: parse_env_opt(RELAYBOX_IMAGE).unwrap_or(defaults.image),
            pull_missing_images: parse_env_flag(
                RELAYBOX_PULL_MISSING_IMAGES,
                defaults.pull_missing_images,
            ),
            image_pull_timeout: Duration::from_secs(pull_timeout_secs),
            workspace_root: parse_env_opt(RELAYBOX_WORKSPACE_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            workspace_host_root: parse_env_opt(RELAYBOX_WORKSPACE_HOST_ROOT).map(PathBuf::from),
            container_workspace: parse_env_opt(RELAYBOX_CONTAINER_WORKSPACE)
                .unwrap_or(defaults.container_workspace),
            max_file_bytes: parse_env_or_default(RELAYBOX_MAX_FILE_BYTES, defaults.max_file_bytes),
            max_workspace_bytes: parse_env_or_default(
                RELAYBOX_MAX_WORKSPACE_BYTES,
                defaults.max_workspace_bytes,
            ),
            reap_workspaces: parse_env_flag(RELAYBOX_REAP_WORKSPACES, defaults.reap_workspaces),
            api_key: parse_env_opt(ANTHROPIC_API_KEY),
            api_key_env_name: parse_env_opt(RELAYBOX_API_KEY_ENV_NAME)
                .unwrap_or(defaults.api_key_env_name),
            tool_command: parse_env_opt(RELAYBOX_TOOL_COMMAND).unwrap_or(defaults.tool_command),
            permission_mode: parse_env_opt(RELAYBOX_PERMISSION_MODE)
                .unwrap_or(defaults.permission_mode),
            exec_timeout: Duration::from_secs(exec_timeout_secs),
            stop_grace_period: Duration::from_secs(stop_grace_secs),
            cleanup_interval: Duration::from_secs(cleanup_interval_minutes.saturating_mul(60)),
            max_session_age: Duration::from_secs(max_session_age_minutes.saturating_mul(60)),
        }
    }

    /// Workspace root path to hand to the Docker daemon for bind mounts
    pub fn bind_root(&self) -> &PathBuf {
        self.workspace_host_root
            .as_ref()
            .unwrap_or(&self.workspace_root)
    }
}
