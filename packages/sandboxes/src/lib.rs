// ABOUTME: Per-thread sandbox session lifecycle management for Relaybox
// ABOUTME: Maps conversation threads to isolated Docker sandboxes and harvests their workspace files

pub mod artifact;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod workspace;

// Re-export commonly used types
pub use artifact::{classify_files, classify_path, Artifact, ArtifactKind, WorkspaceFile};
pub use cleanup::{CleanupHandle, CleanupScheduler};
pub use config::SandboxConfig;
pub use error::{Result, RuntimeError, SandboxError, WorkspaceError};
pub use orchestrator::SandboxOrchestrator;
pub use registry::SessionRegistry;
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, ExecOutput};
pub use types::{CommandRequest, ExecutionResult, Session, SessionStatus, StopAllReport};
pub use workspace::{validate_identifier, WorkspaceStore};
