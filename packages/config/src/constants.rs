// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Relaybox

// Sandbox Image & Tooling
pub const RELAYBOX_IMAGE: &str = "RELAYBOX_IMAGE";
pub const RELAYBOX_PULL_MISSING_IMAGES: &str = "RELAYBOX_PULL_MISSING_IMAGES";
pub const RELAYBOX_IMAGE_PULL_TIMEOUT_SECS: &str = "RELAYBOX_IMAGE_PULL_TIMEOUT_SECS";
pub const RELAYBOX_TOOL_COMMAND: &str = "RELAYBOX_TOOL_COMMAND";
pub const RELAYBOX_PERMISSION_MODE: &str = "RELAYBOX_PERMISSION_MODE";

// Workspace Volume
pub const RELAYBOX_WORKSPACE_ROOT: &str = "RELAYBOX_WORKSPACE_ROOT";
pub const RELAYBOX_WORKSPACE_HOST_ROOT: &str = "RELAYBOX_WORKSPACE_HOST_ROOT";
pub const RELAYBOX_CONTAINER_WORKSPACE: &str = "RELAYBOX_CONTAINER_WORKSPACE";
pub const RELAYBOX_MAX_FILE_BYTES: &str = "RELAYBOX_MAX_FILE_BYTES";
pub const RELAYBOX_MAX_WORKSPACE_BYTES: &str = "RELAYBOX_MAX_WORKSPACE_BYTES";
pub const RELAYBOX_REAP_WORKSPACES: &str = "RELAYBOX_REAP_WORKSPACES";

// Upstream Credential
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const RELAYBOX_API_KEY_ENV_NAME: &str = "RELAYBOX_API_KEY_ENV_NAME";

// Lifecycle Timing
pub const RELAYBOX_EXEC_TIMEOUT_SECS: &str = "RELAYBOX_EXEC_TIMEOUT_SECS";
pub const RELAYBOX_STOP_GRACE_SECS: &str = "RELAYBOX_STOP_GRACE_SECS";
pub const RELAYBOX_CLEANUP_INTERVAL_MINUTES: &str = "RELAYBOX_CLEANUP_INTERVAL_MINUTES";
pub const RELAYBOX_MAX_SESSION_AGE_MINUTES: &str = "RELAYBOX_MAX_SESSION_AGE_MINUTES";

// Environment injected into every sandbox
pub const SANDBOX_SESSION_ID: &str = "SESSION_ID";
pub const SANDBOX_THREAD_ID: &str = "THREAD_ID";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
