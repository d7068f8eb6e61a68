// ABOUTME: Background eviction of sandbox sessions past their maximum age
// ABOUTME: Runs an interval sweep over the orchestrator until its handle is shut down

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::orchestrator::SandboxOrchestrator;

/// Periodic age-based eviction
pub struct CleanupScheduler;

impl CleanupScheduler {
    /// Start sweeping every `interval`, evicting sessions older than `max_age`.
    ///
    /// The first sweep runs one full interval after spawning. A sweep still in
    /// progress when the next tick is due causes that tick to be skipped.
    pub fn spawn(
        orchestrator: Arc<SandboxOrchestrator>,
        interval: Duration,
        max_age: Duration,
    ) -> CleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                "Started session cleanup task (interval: {}s, max age: {}s)",
                interval.as_secs(),
                max_age.as_secs()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = orchestrator.cleanup_old_sessions(max_age).await;
                        if evicted.is_empty() {
                            debug!("Cleanup sweep found no expired sessions");
                        } else {
                            info!("Cleanup sweep evicted sessions: {:?}", evicted);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Session cleanup task stopped");
        });

        CleanupHandle {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Start with the interval and age limit from the orchestrator's configuration
    pub fn spawn_from_config(orchestrator: Arc<SandboxOrchestrator>) -> CleanupHandle {
        let interval = orchestrator.config().cleanup_interval;
        let max_age = orchestrator.config().max_session_age;
        Self::spawn(orchestrator, interval, max_age)
    }
}

/// Controls a running cleanup task; dropping it stops the task
pub struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Signal the task to stop and wait for an in-flight sweep to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Cleanup task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
