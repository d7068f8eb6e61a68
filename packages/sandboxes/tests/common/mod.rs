// ABOUTME: Recording container runtime shared by the integration tests
// ABOUTME: Simulates the engine in-process and records every call it receives

#![allow(dead_code)]

use async_trait::async_trait;
use relaybox_sandboxes::runtime::Result;
use relaybox_sandboxes::{
    ContainerRuntime, ContainerSpec, ExecOutput, RuntimeError, SandboxConfig,
    SandboxOrchestrator,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Exec(String),
    Logs(String),
    Stop(String),
    Remove(String),
}

/// In-process runtime; tool execs write `tool_files` into the host workspace
#[derive(Default)]
pub struct RecordingRuntime {
    pub calls: Mutex<Vec<Call>>,
    pub specs: Mutex<HashMap<String, ContainerSpec>>,
    pub tool_files: Mutex<Vec<(String, Vec<u8>)>>,
    pub tool_stdout: Mutex<Vec<u8>>,
    pub tool_stderr: Mutex<Vec<u8>>,
    pub create_delay: Mutex<Option<Duration>>,
    pub exec_delay: Mutex<Option<Duration>>,
    pub stop_delay: Mutex<Option<Duration>>,
    pub fail_start: AtomicBool,
    pub fail_exec: AtomicBool,
    pub fail_remove: AtomicBool,
    pub wipe_workspace_on_exec: AtomicBool,
    next_id: AtomicUsize,
}

impl RecordingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn spec_for(&self, container_id: &str) -> ContainerSpec {
        self.specs.lock().unwrap()[container_id].clone()
    }

    pub fn write_on_tool_run(&self, path: &str, content: &[u8]) {
        self.tool_files
            .lock()
            .unwrap()
            .push((path.to_string(), content.to_vec()));
    }

    /// Position of the first call equal to `call`
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = format!("container-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.specs.lock().unwrap().insert(id.clone(), spec.clone());
        self.record(Call::Create(id.clone()));
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.record(Call::Start(container_id.to_string()));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Start {
                container_id: container_id.to_string(),
                reason: "port already allocated".to_string(),
            });
        }
        Ok(())
    }

    async fn exec(&self, container_id: &str, argv: Vec<String>) -> Result<ExecOutput> {
        self.record(Call::Exec(container_id.to_string()));

        let delay = *self.exec_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_exec.load(Ordering::SeqCst) {
            return Err(RuntimeError::Exec {
                container_id: container_id.to_string(),
                reason: "container is not running".to_string(),
            });
        }

        let is_tool_run = argv.last().is_some_and(|c| c.contains("--permission-mode"));
        if !is_tool_run {
            return Ok(ExecOutput::default());
        }

        let workspace = PathBuf::from(&self.spec_for(container_id).workspace_host_path);
        for (path, content) in self.tool_files.lock().unwrap().iter() {
            let target = workspace.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(target, content).unwrap();
        }
        if self.wipe_workspace_on_exec.load(Ordering::SeqCst) {
            std::fs::remove_dir_all(&workspace).unwrap();
        }

        Ok(ExecOutput {
            stdout: self.tool_stdout.lock().unwrap().clone(),
            stderr: self.tool_stderr.lock().unwrap().clone(),
        })
    }

    async fn logs(&self, container_id: &str) -> Result<Vec<u8>> {
        self.record(Call::Logs(container_id.to_string()));
        Ok(b"sandbox ready\n".to_vec())
    }

    async fn stop(&self, container_id: &str, _grace_period: Duration) -> Result<()> {
        self.record(Call::Stop(container_id.to_string()));
        let delay = *self.stop_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.record(Call::Remove(container_id.to_string()));
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(RuntimeError::Teardown {
                container_id: container_id.to_string(),
                reason: "removal already in progress".to_string(),
            });
        }
        Ok(())
    }
}

pub fn test_config(root: &TempDir) -> SandboxConfig {
    SandboxConfig {
        workspace_root: root.path().to_path_buf(),
        api_key: Some("sk-test".to_string()),
        exec_timeout: Duration::from_secs(5),
        ..SandboxConfig::default()
    }
}

pub fn setup() -> (Arc<SandboxOrchestrator>, Arc<RecordingRuntime>, TempDir) {
    let root = TempDir::new().unwrap();
    setup_with(test_config(&root), root)
}

pub fn setup_with(
    config: SandboxConfig,
    root: TempDir,
) -> (Arc<SandboxOrchestrator>, Arc<RecordingRuntime>, TempDir) {
    let runtime = RecordingRuntime::new();
    let orchestrator = Arc::new(SandboxOrchestrator::new(runtime.clone(), config));
    (orchestrator, runtime, root)
}
