//! Task registry — durable task records, heartbeats, and per-task blobs.
//!
//! The registry owns the store key layout and never caches task state in
//! memory: the shared store is the single source of truth, so any number
//! of control plane processes can serve the same task set.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::TaskError;
use crate::store::KvStore;
use crate::tasks::model::{LOG_FILENAME, TaskContent, TaskRecord, TaskStatus};

fn task_key(id: &str) -> String {
    format!("task:{id}")
}

fn files_key(id: &str) -> String {
    format!("files:{id}")
}

/// Lock name for a task, as passed to [`crate::lock::LockManager::with_lock`].
pub fn lock_name(id: &str) -> String {
    format!("task:{id}")
}

/// Store-backed task registry.
pub struct TaskRegistry {
    store: Arc<dyn KvStore>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persist a new task with `status = queued` and store the submitted
    /// files as blobs. The content must already have passed
    /// [`TaskContent::validate`]; duplicate ids are rejected with
    /// [`TaskError::Conflict`].
    pub async fn create(
        &self,
        id: &str,
        resource: &str,
        service: &str,
        content: &TaskContent,
        files: HashMap<String, Vec<u8>>,
    ) -> Result<(), TaskError> {
        let key = task_key(id);
        if self.store.exists(&key).await? {
            return Err(TaskError::Conflict { id: id.to_string() });
        }
        let fields = vec![
            ("service".to_string(), service.to_string()),
            ("resource".to_string(), resource.to_string()),
            ("status".to_string(), TaskStatus::Queued.as_str().to_string()),
            ("content".to_string(), content.as_value().to_string()),
            ("queued_time".to_string(), Utc::now().to_rfc3339()),
        ];
        self.store.hash_set(&key, fields).await?;
        for (name, data) in files {
            self.store.blob_set(&files_key(id), &name, &data).await?;
        }
        info!(task_id = %id, service, resource, "Task created");
        Ok(())
    }

    /// O(1) presence check.
    pub async fn exists(&self, id: &str) -> Result<bool, TaskError> {
        Ok(self.store.exists(&task_key(id)).await?)
    }

    /// Full typed record, or `None` for an unknown id (absence is a normal
    /// outcome the boundary layer turns into a 404).
    pub async fn info(&self, id: &str) -> Result<Option<TaskRecord>, TaskError> {
        let fields = self.store.hash_get_all(&task_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(TaskRecord::from_fields(id, &fields)?))
    }

    /// Field-scoped read: only the requested fields, raw as stored.
    /// Requested fields absent from the record are omitted from the map.
    pub async fn info_fields(
        &self,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<HashMap<String, String>>, TaskError> {
        let mut all = self.store.hash_get_all(&task_key(id)).await?;
        if all.is_empty() {
            return Ok(None);
        }
        all.retain(|k, _| fields.contains(&k.as_str()));
        Ok(Some(all))
    }

    /// Current status, or `None` for an unknown id.
    pub async fn status(&self, id: &str) -> Result<Option<TaskStatus>, TaskError> {
        match self.store.hash_get(&task_key(id), "status").await? {
            Some(raw) => Ok(Some(TaskStatus::parse(&raw).ok_or_else(|| {
                crate::error::StoreError::Decode(format!("task {id} has unknown status {raw:?}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Record a status transition with an optional diagnostic message.
    /// Used by the termination machine and by workers reporting progress
    /// (queued → running, terminating → stopped).
    pub async fn set_status(
        &self,
        id: &str,
        status: TaskStatus,
        message: Option<&str>,
    ) -> Result<(), TaskError> {
        let key = task_key(id);
        if !self.store.exists(&key).await? {
            return Err(TaskError::NotFound { id: id.to_string() });
        }
        let mut fields = vec![("status".to_string(), status.as_str().to_string())];
        if let Some(message) = message {
            fields.push(("message".to_string(), message.to_string()));
        }
        self.store.hash_set(&key, fields).await?;
        info!(task_id = %id, status = %status, "Status updated");
        Ok(())
    }

    /// Record a heartbeat from the process executing the task.
    ///
    /// Updates `last_heartbeat` to now; optionally resets the liveness
    /// window and the container id (a changed container id signals a
    /// container restart under the same task). No lock is taken: heartbeat
    /// loss is tolerated and the policy is last-arrival-wins — timestamps
    /// are assigned here at write time, so a stale write is superseded by
    /// the next beat. Beats are accepted for any existing task, including
    /// stopped ones; they never touch `status`.
    pub async fn beat(
        &self,
        id: &str,
        duration: Option<u64>,
        container_id: Option<&str>,
    ) -> Result<(), TaskError> {
        let key = task_key(id);
        if !self.store.exists(&key).await? {
            return Err(TaskError::NotFound { id: id.to_string() });
        }
        let mut fields = vec![("last_heartbeat".to_string(), Utc::now().to_rfc3339())];
        if let Some(duration) = duration {
            fields.push(("heartbeat_timeout".to_string(), duration.to_string()));
        }
        if let Some(container_id) = container_id {
            fields.push(("container_id".to_string(), container_id.to_string()));
        }
        self.store.hash_set(&key, fields).await?;
        debug!(task_id = %id, ?duration, ?container_id, "Heartbeat");
        Ok(())
    }

    /// Remove a task and all of its artifacts.
    ///
    /// Refused ([`TaskError::NotDeletable`]) unless the task is in a
    /// terminal state, so an external worker never loses the record it is
    /// still reporting against. On success the record, its blobs, and any
    /// lease are removed.
    pub async fn delete(&self, id: &str) -> Result<(), TaskError> {
        let status = self
            .status(id)
            .await?
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;
        if !status.is_terminal() {
            return Err(TaskError::NotDeletable {
                id: id.to_string(),
                reason: format!("task is {status}, not stopped"),
            });
        }
        self.store.delete(&task_key(id)).await?;
        self.store.delete(&files_key(id)).await?;
        self.store.delete(&format!("lock:{}", lock_name(id))).await?;
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Ids of tasks whose key matches the glob `pattern`.
    ///
    /// Single-pass cursor scan with no snapshot isolation: tasks created
    /// or deleted while the scan runs may or may not appear.
    pub async fn scan_ids(&self, pattern: &str) -> Result<Vec<String>, TaskError> {
        let keys = self.store.scan(&task_key(pattern)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("task:").map(str::to_string))
            .collect())
    }

    // ── Blobs ───────────────────────────────────────────────────────

    /// Store (or overwrite) a named file for a task.
    pub async fn set_file(&self, id: &str, filename: &str, data: &[u8]) -> Result<(), TaskError> {
        if !self.exists(id).await? {
            return Err(TaskError::NotFound { id: id.to_string() });
        }
        self.store.blob_set(&files_key(id), filename, data).await?;
        Ok(())
    }

    /// Read a named file. `None` when the task has no such file.
    pub async fn get_file(&self, id: &str, filename: &str) -> Result<Option<Vec<u8>>, TaskError> {
        if !self.exists(id).await? {
            return Err(TaskError::NotFound { id: id.to_string() });
        }
        Ok(self.store.blob_get(&files_key(id), filename).await?)
    }

    /// Read the execution log (the reserved `log` blob). Whatever process
    /// produces the log owns its write pattern; this only returns the
    /// bytes currently stored under that name.
    pub async fn get_log(&self, id: &str) -> Result<Option<Vec<u8>>, TaskError> {
        self.get_file(id, LOG_FILENAME).await
    }
}
