//! Phased termination, serialized per task by the lock manager.
//!
//! `terminate` is the only read-then-write path on `status`, so it runs
//! under the per-task lease: two concurrent termination requests must not
//! reach different decisions from stale reads. Heartbeats deliberately
//! bypass the lock — a lost heartbeat is tolerated, a blocked termination
//! is not.

use tracing::info;

use crate::error::TaskError;
use crate::lock::LockManager;
use crate::tasks::model::TaskStatus;
use crate::tasks::registry::{TaskRegistry, lock_name};

/// Phase recorded when the caller does not supply one.
pub const DEFAULT_PHASE: &str = "soft";

/// Request termination of a task.
///
/// Returns the acknowledgement message for the caller:
/// - unknown id → [`TaskError::NotFound`];
/// - already `stopped` → `"<id> already stopped"`, no mutation;
/// - still `queued` (nothing is running yet) → straight to `stopped`;
/// - otherwise → `terminating`; the executing worker observes the status,
///   performs the shutdown for the recorded phase, and reports `stopped`
///   via [`TaskRegistry::set_status`]. This crate never signals processes
///   itself.
pub async fn terminate(
    registry: &TaskRegistry,
    lock: &LockManager,
    id: &str,
    phase: Option<&str>,
) -> Result<String, TaskError> {
    let phase = phase.unwrap_or(DEFAULT_PHASE).to_string();
    lock.with_lock(&lock_name(id), async {
        let status = registry
            .status(id)
            .await?
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;

        if status == TaskStatus::Stopped {
            return Ok(format!("{id} already stopped"));
        }

        let target = if status == TaskStatus::Queued {
            // Never picked up: no worker to wind down.
            TaskStatus::Stopped
        } else {
            TaskStatus::Terminating
        };
        registry.set_status(id, target, Some(&phase)).await?;
        info!(task_id = %id, phase = %phase, from = %status, to = %target, "Termination requested");
        Ok(format!("terminating {id}"))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvStore, MemoryStore};
    use crate::tasks::model::TaskContent;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn fixture() -> (Arc<TaskRegistry>, LockManager) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let registry = Arc::new(TaskRegistry::new(Arc::clone(&store)));
        let lock = LockManager::new(store, Duration::from_secs(5), Duration::from_secs(5));
        (registry, lock)
    }

    async fn queued_task(registry: &TaskRegistry, id: &str) {
        let content =
            TaskContent::validate(json!({"options": {}, "docker": {"image": "x"}})).unwrap();
        registry
            .create(id, "r", "train", &content, HashMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (registry, lock) = fixture();
        let err = terminate(&registry, &lock, "ghost", None).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn queued_task_stops_immediately() {
        let (registry, lock) = fixture();
        queued_task(&registry, "t1").await;
        let msg = terminate(&registry, &lock, "t1", None).await.unwrap();
        assert_eq!(msg, "terminating t1");
        assert_eq!(
            registry.status("t1").await.unwrap(),
            Some(TaskStatus::Stopped)
        );
    }

    #[tokio::test]
    async fn running_task_moves_to_terminating_with_phase() {
        let (registry, lock) = fixture();
        queued_task(&registry, "t1").await;
        registry
            .set_status("t1", TaskStatus::Running, None)
            .await
            .unwrap();

        terminate(&registry, &lock, "t1", Some("hard")).await.unwrap();
        let record = registry.info("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Terminating);
        assert_eq!(record.message.as_deref(), Some("hard"));
    }

    #[tokio::test]
    async fn second_terminate_is_an_idempotent_no_op() {
        let (registry, lock) = fixture();
        queued_task(&registry, "t1").await;
        terminate(&registry, &lock, "t1", None).await.unwrap();

        let msg = terminate(&registry, &lock, "t1", Some("hard")).await.unwrap();
        assert_eq!(msg, "t1 already stopped");
        // No regression, message untouched by the no-op.
        let record = registry.info("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Stopped);
        assert_eq!(record.message.as_deref(), Some(DEFAULT_PHASE));
    }

    #[tokio::test]
    async fn concurrent_terminates_yield_one_winning_phase() {
        let (registry, lock) = fixture();
        queued_task(&registry, "t1").await;
        registry
            .set_status("t1", TaskStatus::Running, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for phase in ["soft", "hard", "soft", "hard"] {
            let registry = Arc::clone(&registry);
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                terminate(&registry, &lock, "t1", Some(phase)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        // All calls succeed; the record reflects exactly one phase, never a
        // mixed or partial state.
        let record = registry.info("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Terminating);
        let message = record.message.unwrap();
        assert!(message == "soft" || message == "hard");
    }
}
