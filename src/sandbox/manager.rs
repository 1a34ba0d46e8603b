//! Per-task sandbox registry.
//!
//! # Invariants
//! - At most one live sandbox per task id.
//! - Operations on one id never block on another id: the registry map is only
//!   locked long enough to look up or insert a per-id slot, and all remote
//!   calls happen under that slot's own lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{EnvironmentSpec, SandboxError, SandboxHandle, SandboxProvider};

type Slot = Arc<Mutex<Option<SandboxHandle>>>;

/// Acquires, reuses, stops and releases one sandbox per task id.
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the sandbox for `task_id`, creating it on first use and
    /// restarting it if it was stopped.
    pub async fn acquire(
        &self,
        task_id: &str,
        spec: &EnvironmentSpec,
    ) -> Result<SandboxHandle, SandboxError> {
        loop {
            let slot = self.slot_or_insert(task_id).await;
            let mut guard = slot.lock().await;

            // A concurrent release may have unregistered this slot while we waited.
            if !self.is_registered(task_id, &slot).await {
                continue;
            }

            if let Some(handle) = guard.as_ref() {
                let state = handle.state().await?;
                if !state.is_running() {
                    tracing::info!(task_id, ?state, "Restarting stopped sandbox");
                    handle.start().await?;
                }
                return Ok(handle.clone());
            }

            let name = format!("agent-{}", task_id);
            tracing::info!(task_id, sandbox = %name, "Creating sandbox");
            match self.provider.create(&name, spec).await {
                Ok(handle) => {
                    tracing::info!(task_id, sandbox_id = handle.id(), "Sandbox ready");
                    *guard = Some(handle.clone());
                    return Ok(handle);
                }
                Err(e) => {
                    self.unregister(task_id, &slot).await;
                    return Err(e);
                }
            }
        }
    }

    /// Delete the sandbox for `task_id` and forget it. Never fails.
    pub async fn release(&self, task_id: &str) {
        let Some(slot) = self.slots.lock().await.get(task_id).cloned() else {
            return;
        };
        let handle = {
            let mut guard = slot.lock().await;
            self.unregister(task_id, &slot).await;
            guard.take()
        };

        if let Some(handle) = handle {
            match handle.delete().await {
                Ok(()) => tracing::info!(task_id, sandbox_id = handle.id(), "Sandbox released"),
                Err(e) => tracing::error!(task_id, "Error deleting sandbox: {}", e),
            }
        }
    }

    /// Pause the sandbox for `task_id` without deleting it. Never fails.
    pub async fn stop(&self, task_id: &str) {
        let Some(handle) = self.get(task_id).await else {
            return;
        };
        match handle.stop().await {
            Ok(()) => tracing::info!(task_id, sandbox_id = handle.id(), "Sandbox stopped"),
            Err(e) => tracing::warn!(task_id, "Error stopping sandbox: {}", e),
        }
    }

    /// The live sandbox for `task_id`, if any.
    pub async fn get(&self, task_id: &str) -> Option<SandboxHandle> {
        let slot = self.slots.lock().await.get(task_id).cloned()?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Task ids that currently hold (or are creating) a sandbox, sorted.
    pub async fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn slot_or_insert(&self, task_id: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn is_registered(&self, task_id: &str, slot: &Slot) -> bool {
        self.slots
            .lock()
            .await
            .get(task_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn unregister(&self, task_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        if slots
            .get(task_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxState;
    use crate::test_support::FakeProvider;

    fn manager() -> (Arc<FakeProvider>, SandboxManager) {
        let provider = Arc::new(FakeProvider::default());
        let manager = SandboxManager::new(provider.clone());
        (provider, manager)
    }

    #[tokio::test]
    async fn acquire_twice_reuses_running_sandbox() {
        let (provider, manager) = manager();
        let spec = EnvironmentSpec::default();

        let first = manager.acquire("task-1", &spec).await.unwrap();
        let second = manager.acquire("task-1", &spec).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.created_names(), vec!["agent-task-1".to_string()]);
    }

    #[tokio::test]
    async fn acquire_restarts_stopped_sandbox() {
        let (provider, manager) = manager();
        let spec = EnvironmentSpec::default();

        manager.acquire("task-1", &spec).await.unwrap();
        manager.stop("task-1").await;
        let sandbox = provider.sandbox("agent-task-1").unwrap();
        assert_eq!(sandbox.current_state(), SandboxState::Stopped);

        manager.acquire("task-1", &spec).await.unwrap();
        assert_eq!(sandbox.current_state(), SandboxState::Started);
        assert_eq!(sandbox.start_calls(), 1);
        assert_eq!(provider.created_names().len(), 1);
    }

    #[tokio::test]
    async fn release_deletes_and_is_idempotent() {
        let (provider, manager) = manager();
        manager
            .acquire("task-1", &EnvironmentSpec::default())
            .await
            .unwrap();

        manager.release("task-1").await;
        manager.release("task-1").await;

        let sandbox = provider.sandbox("agent-task-1").unwrap();
        assert_eq!(sandbox.delete_calls(), 1);
        assert!(manager.get("task-1").await.is_none());
        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn release_swallows_delete_failure() {
        let (provider, manager) = manager();
        provider.fail_deletes();
        manager
            .acquire("task-1", &EnvironmentSpec::default())
            .await
            .unwrap();

        manager.release("task-1").await;

        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_entry() {
        let (provider, manager) = manager();
        provider.fail_creates();

        let err = manager
            .acquire("task-1", &EnvironmentSpec::default())
            .await
            .err()
            .unwrap();

        assert!(err.to_string().contains("create failed"));
        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn distinct_ids_get_distinct_sandboxes() {
        let (provider, manager) = manager();
        let manager = Arc::new(manager);
        let spec = EnvironmentSpec::default();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                let spec = spec.clone();
                tokio::spawn(async move { manager.acquire(&format!("t{}", i), &spec).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(manager.list_active().await.len(), 8);
        assert_eq!(provider.created_names().len(), 8);

        manager.release("t3").await;
        assert_eq!(manager.list_active().await.len(), 7);
        assert!(manager.get("t4").await.is_some());
    }

    #[tokio::test]
    async fn a_slow_create_does_not_block_other_ids() {
        let (provider, manager) = manager();
        let manager = Arc::new(manager);
        let gate = provider.hold_create("agent-slow");

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire("slow", &EnvironmentSpec::default()).await })
        };
        while !manager.list_active().await.contains(&"slow".to_string()) {
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let limit = std::time::Duration::from_secs(2);
        tokio::time::timeout(limit, async {
            manager
                .acquire("fast", &EnvironmentSpec::default())
                .await
                .unwrap();
            assert!(manager.get("fast").await.is_some());
            manager.stop("fast").await;
            manager.release("fast").await;
            assert!(manager.get("fast").await.is_none());
        })
        .await
        .expect("operations on another id waited for the pending create");

        assert!(!slow.is_finished());
        assert_eq!(provider.created_names(), vec!["agent-fast".to_string()]);

        gate.notify_one();
        let handle = tokio::time::timeout(limit, slow)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(handle.id(), "agent-slow");
        assert_eq!(manager.list_active().await, vec!["slow".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_acquire_of_same_id_creates_once() {
        let (provider, manager) = manager();
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .acquire("shared", &EnvironmentSpec::default())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(provider.created_names().len(), 1);
    }
}
