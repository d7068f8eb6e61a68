// ABOUTME: In-memory registry mapping conversation threads to live sandbox sessions
// ABOUTME: Serializes create-or-attach and teardown per thread while leaving other threads unblocked

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{Session, SessionStatus};

/// Held while a thread's session is being created or torn down
pub type ThreadGuard = OwnedMutexGuard<()>;

/// Single source of truth for which threads own a live sandbox
#[derive(Default)]
pub struct SessionRegistry {
    /// Sessions keyed by session ID (which equals the thread ID)
    sessions: RwLock<HashMap<String, Session>>,
    /// One mutex per thread ID; entries nobody holds are pruned on removal
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the per-thread lock shared by creation and teardown paths
    pub async fn lock_thread(&self, thread_id: &str) -> ThreadGuard {
        let lock = {
            let mut locks = self.thread_locks.lock().await;
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn get_by_thread(&self, thread_id: &str) -> Option<Session> {
        self.sessions.read().await.get(thread_id).cloned()
    }

    /// Return the thread's running session, or provision one with `factory`.
    ///
    /// Concurrent callers for the same thread run `factory` at most once; the
    /// others wait and receive the session it produced. A factory error leaves
    /// nothing registered. A non-running entry is replaced; tearing down its
    /// container is the job of whoever marked it.
    pub async fn create_or_attach<F, Fut>(&self, thread_id: &str, factory: F) -> Result<Session>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let _guard = self.lock_thread(thread_id).await;

        if let Some(existing) = self.get_by_thread(thread_id).await {
            if existing.is_running() {
                debug!("Attaching to existing session for thread {}", thread_id);
                return Ok(existing);
            }
            warn!(
                "Replacing {} session {} for thread {}",
                existing.status, existing.id, thread_id
            );
        }

        let session = factory().await?;
        self.sessions
            .write()
            .await
            .insert(thread_id.to_string(), session.clone());

        info!(
            "Registered session {} (container {}) for thread {}",
            session.id, session.container_id, thread_id
        );
        Ok(session)
    }

    /// Mark a session failed only while it is still bound to `container_id`.
    ///
    /// Needs no thread lock; a replacement session is never touched.
    pub async fn mark_failed(&self, session_id: &str, container_id: &str) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(session) if session.container_id == container_id => {
                session.status = SessionStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Update a session's status; returns false when the session is unknown
    pub async fn set_status(&self, session_id: &str, status: SessionStatus) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(session) => {
                session.status = status;
                true
            }
            None => false,
        }
    }

    /// Delete a session entry; absent entries are ignored
    pub async fn remove(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            debug!("Removed session {} from registry", session_id);
        }

        // Only entries referenced by nobody but the map are dropped
        self.thread_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);

        removed
    }

    /// Consistent snapshot of every registered session
    pub async fn list_all(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RuntimeError, SandboxError};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn session(thread_id: &str, container_id: &str) -> Session {
        Session {
            id: thread_id.to_string(),
            container_id: container_id.to_string(),
            thread_id: thread_id.to_string(),
            channel_id: "C1".to_string(),
            user_id: "U1".to_string(),
            status: SessionStatus::Running,
            created_at: Utc::now(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_runs_factory_once() {
        let registry = Arc::new(SessionRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .create_or_attach("t1", || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(session("t1", &format!("container-{}", n)))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut container_ids = Vec::new();
        for handle in handles {
            container_ids.push(handle.await.unwrap().container_id);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(container_ids.iter().all(|id| id == "container-0"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_other_threads_are_not_blocked() {
        let registry = Arc::new(SessionRegistry::new());
        let _held = registry.lock_thread("t1").await;

        let created = tokio::time::timeout(
            Duration::from_secs(1),
            registry.create_or_attach("t2", || async { Ok(session("t2", "c2")) }),
        )
        .await
        .expect("t2 must not wait on t1")
        .unwrap();

        assert_eq!(created.container_id, "c2");
    }

    #[tokio::test]
    async fn test_factory_error_registers_nothing() {
        let registry = SessionRegistry::new();

        let result = registry
            .create_or_attach("t1", || async {
                Err(SandboxError::Runtime(RuntimeError::Provision(
                    "no image".to_string(),
                )))
            })
            .await;

        assert!(result.is_err());
        assert!(registry.get_by_thread("t1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_session_is_replaced() {
        let registry = SessionRegistry::new();
        registry
            .create_or_attach("t1", || async { Ok(session("t1", "old")) })
            .await
            .unwrap();
        assert!(registry.set_status("t1", SessionStatus::Failed).await);

        let replaced = registry
            .create_or_attach("t1", || async { Ok(session("t1", "new")) })
            .await
            .unwrap();
        assert_eq!(replaced.container_id, "new");
    }

    #[tokio::test]
    async fn test_mark_failed_ignores_replacement() {
        let registry = SessionRegistry::new();
        registry
            .create_or_attach("t1", || async { Ok(session("t1", "old")) })
            .await
            .unwrap();
        assert!(registry.mark_failed("t1", "old").await);

        registry
            .create_or_attach("t1", || async { Ok(session("t1", "new")) })
            .await
            .unwrap();

        // A late failure for the old container must not poison the new session
        assert!(!registry.mark_failed("t1", "old").await);
        assert!(!registry.mark_failed("missing", "old").await);
        let current = registry.get_by_thread("t1").await.unwrap();
        assert_eq!(current.container_id, "new");
        assert!(current.is_running());
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let registry = SessionRegistry::new();
        registry
            .create_or_attach("t1", || async { Ok(session("t1", "c1")) })
            .await
            .unwrap();

        assert!(registry.remove("unknown").await.is_none());
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("t1").await.is_some());
        assert!(registry.list_all().await.is_empty());
        assert!(!registry.set_status("t1", SessionStatus::Completed).await);
    }

    #[tokio::test]
    async fn test_removal_prunes_idle_locks() {
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            registry
                .create_or_attach(id, || async move { Ok(session(id, "c")) })
                .await
                .unwrap();
        }
        let held = registry.lock_thread("a").await;
        registry.remove("b").await;

        let locks = registry.thread_locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("a"));
        drop(locks);
        drop(held);
    }
}
