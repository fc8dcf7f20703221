//! Task record schema and submission validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, TaskError};

/// Reserved blob name holding the execution log.
pub const LOG_FILENAME: &str = "log";

/// Task ids are capped to bound store key size.
pub const MAX_TASK_ID_LEN: usize = 35;

/// Lifecycle status of a task.
///
/// Monotonic except for idempotent re-entry into `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting to be picked up by a worker.
    Queued,
    /// A worker is executing the job.
    Running,
    /// A termination request was recorded; the worker is shutting down.
    Terminating,
    /// Terminal. Further termination requests are no-ops.
    Stopped,
}

impl TaskStatus {
    /// Terminal statuses allow deletion and make `terminate` a no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "terminating" => Some(Self::Terminating),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a persisted task record.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub service: String,
    /// Opaque scheduling tag computed at creation; never reinterpreted here.
    pub resource: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The submitted document, augmented with `service` at creation time.
    pub content: serde_json::Value,
    pub queued_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Liveness window in seconds, reported by the executing worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl TaskRecord {
    /// Rebuild a typed record from stored hash fields.
    pub fn from_fields(
        task_id: &str,
        fields: &std::collections::HashMap<String, String>,
    ) -> Result<Self, StoreError> {
        let required = |name: &str| -> Result<String, StoreError> {
            fields.get(name).cloned().ok_or_else(|| {
                StoreError::Decode(format!("task {task_id} record is missing field {name}"))
            })
        };
        let status_raw = required("status")?;
        let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
            StoreError::Decode(format!("task {task_id} has unknown status {status_raw:?}"))
        })?;
        let content = serde_json::from_str(&required("content")?)
            .map_err(|e| StoreError::Decode(format!("task {task_id} content: {e}")))?;
        let queued_time = parse_datetime(task_id, "queued_time", &required("queued_time")?)?;
        let last_heartbeat = match fields.get("last_heartbeat") {
            Some(raw) => Some(parse_datetime(task_id, "last_heartbeat", raw)?),
            None => None,
        };
        let heartbeat_timeout = match fields.get("heartbeat_timeout") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                StoreError::Decode(format!("task {task_id} heartbeat_timeout {raw:?}"))
            })?),
            None => None,
        };
        Ok(Self {
            task_id: task_id.to_string(),
            service: required("service")?,
            resource: required("resource")?,
            status,
            message: fields.get("message").filter(|m| !m.is_empty()).cloned(),
            content,
            queued_time,
            last_heartbeat,
            heartbeat_timeout,
            container_id: fields.get("container_id").cloned(),
        })
    }
}

fn parse_datetime(task_id: &str, field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("task {task_id} {field} {raw:?}: {e}")))
}

/// The submitted job document: an `options` mapping plus a docker-style
/// execution spec, stored verbatim (plus `service`) and returned on query.
#[derive(Debug, Clone)]
pub struct TaskContent(serde_json::Value);

impl TaskContent {
    /// Validate a submission before anything is persisted.
    ///
    /// `content.options` must be a JSON object and `content.docker` must be
    /// present; anything else is rejected with [`TaskError::Validation`].
    pub fn validate(content: serde_json::Value) -> Result<Self, TaskError> {
        match content.get("options") {
            Some(options) if options.is_object() => {}
            _ => return Err(TaskError::Validation("invalid options field".to_string())),
        }
        if content.get("docker").is_none() {
            return Err(TaskError::Validation("missing docker field".to_string()));
        }
        Ok(Self(content))
    }

    /// The validated `options` mapping.
    pub fn options(&self) -> &serde_json::Value {
        &self.0["options"]
    }

    /// Stamp the owning service into the document. Done once at launch so
    /// the stored content records which service it was submitted to.
    pub fn tag_service(&mut self, service: &str) {
        if let Some(obj) = self.0.as_object_mut() {
            obj.insert("service".to_string(), serde_json::Value::String(service.into()));
        }
    }

    /// Optional caller-supplied label used to prefix the task id.
    pub fn trainer_id(&self) -> Option<&str> {
        self.0.get("trainer_id").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Generate a task id: a random uuid, optionally prefixed with a short
/// caller label, truncated to [`MAX_TASK_ID_LEN`] to bound key size.
pub fn generate_task_id(label: Option<&str>) -> String {
    let uuid = Uuid::new_v4().to_string();
    let id = match label {
        Some(label) => format!("{label}_{uuid}"),
        None => uuid,
    };
    id.chars().take(MAX_TASK_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Terminating,
            TaskStatus::Stopped,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("paused"), None);
    }

    #[test]
    fn status_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Terminating).unwrap(),
            "\"terminating\""
        );
    }

    #[test]
    fn only_stopped_is_terminal() {
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Terminating.is_terminal());
    }

    #[test]
    fn content_requires_options_mapping() {
        let err = TaskContent::validate(json!({"options": 3, "docker": {}})).unwrap_err();
        assert!(matches!(err, TaskError::Validation(m) if m == "invalid options field"));
        let err = TaskContent::validate(json!({"docker": {}})).unwrap_err();
        assert!(matches!(err, TaskError::Validation(m) if m == "invalid options field"));
    }

    #[test]
    fn content_requires_docker() {
        let err = TaskContent::validate(json!({"options": {}})).unwrap_err();
        assert!(matches!(err, TaskError::Validation(m) if m == "missing docker field"));
    }

    #[test]
    fn content_tags_service() {
        let mut content =
            TaskContent::validate(json!({"options": {"gpu": 1}, "docker": {"image": "x"}}))
                .unwrap();
        content.tag_service("train");
        assert_eq!(content.as_value()["service"], "train");
    }

    #[test]
    fn task_id_respects_label_and_cap() {
        let id = generate_task_id(None);
        assert_eq!(id.len(), MAX_TASK_ID_LEN); // uuid is 36 chars, capped
        let id = generate_task_id(Some("alice"));
        assert!(id.starts_with("alice_"));
        assert!(id.len() <= MAX_TASK_ID_LEN);
        let id = generate_task_id(Some(&"x".repeat(60)));
        assert_eq!(id.len(), MAX_TASK_ID_LEN);
    }

    #[test]
    fn record_from_fields_and_back() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("service".to_string(), "train".to_string());
        fields.insert("resource".to_string(), "gpu-pool".to_string());
        fields.insert("status".to_string(), "queued".to_string());
        fields.insert(
            "content".to_string(),
            r#"{"options":{},"docker":{"image":"x"}}"#.to_string(),
        );
        fields.insert("queued_time".to_string(), Utc::now().to_rfc3339());

        let record = TaskRecord::from_fields("t1", &fields).unwrap();
        assert_eq!(record.service, "train");
        assert_eq!(record.status, TaskStatus::Queued);
        assert!(record.last_heartbeat.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("container_id").is_none());
    }

    #[test]
    fn record_rejects_bad_status() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("service".to_string(), "train".to_string());
        fields.insert("resource".to_string(), "r".to_string());
        fields.insert("status".to_string(), "exploded".to_string());
        fields.insert("content".to_string(), "{}".to_string());
        fields.insert("queued_time".to_string(), Utc::now().to_rfc3339());
        assert!(TaskRecord::from_fields("t1", &fields).is_err());
    }
}
