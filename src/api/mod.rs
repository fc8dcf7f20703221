//! HTTP boundary — axum routes for clients and workers.
//!
//! Handlers translate typed outcomes from the task layer into status
//! codes; the core itself never speaks HTTP. All state is injected through
//! [`ApiState`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::{ServiceError, TaskError};
use crate::lock::LockManager;
use crate::services::{Service, ServiceRegistry};
use crate::tasks::{self, TaskContent, TaskRegistry, generate_task_id};

/// Shared state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub services: Arc<ServiceRegistry>,
    pub registry: Arc<TaskRegistry>,
    pub lock: LockManager,
}

/// Error response: a status code plus a `{"message": ...}` body.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn unknown_service(name: &str) -> Self {
        Self::not_found(format!("invalid service name: {name}"))
    }

    fn unknown_task(id: &str) -> Self {
        Self::not_found(format!("task {id} unknown"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let status = match &err {
            TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
            TaskError::Conflict { .. } => StatusCode::CONFLICT,
            TaskError::Validation(_) | TaskError::NotDeletable { .. } => StatusCode::BAD_REQUEST,
            // Transient: the lease was contended for the whole wait; retry.
            TaskError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "Store failure");
            return Self {
                status,
                message: "internal store error".to_string(),
            };
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match err {
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

/// Build the full route set.
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/list_services", get(list_services))
        .route("/describe/{service}", get(describe))
        .route("/check/{service}", get(check))
        .route("/launch/{service}", axum::routing::post(launch))
        .route("/status/{task_id}", get(status))
        .route("/del/{task_id}", get(del_task))
        .route("/list_tasks/{pattern}", get(list_tasks))
        .route("/terminate/{task_id}", get(terminate_task))
        .route("/beat/{task_id}", get(beat))
        .route("/log/{task_id}", get(get_log))
        .route("/file/{task_id}/{filename}", get(get_file).post(post_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn lookup_service(state: &ApiState, name: &str) -> Result<Arc<dyn Service>, ApiError> {
    state
        .services
        .get(name)
        .ok_or_else(|| ApiError::unknown_service(name))
}

async fn list_services(State(state): State<ApiState>) -> Json<Value> {
    Json(json!(state.services.display_names()))
}

async fn describe(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let svc = lookup_service(&state, &service)?;
    Ok(Json(svc.describe()))
}

async fn check(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let svc = lookup_service(&state, &service)?;
    // A missing or non-JSON body means "no options".
    let options: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| json!({}))
    };
    let details = svc.check(&options)?;
    Ok(Json(json!({ "message": details })))
}

/// Submission body: either raw JSON, or multipart form data with a
/// `content` field holding the JSON document plus any number of file
/// parts stored as task blobs.
async fn launch(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    req: Request,
) -> Result<Json<String>, ApiError> {
    let svc = lookup_service(&state, &service)?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    let submitted: Option<Value> = if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?;
        let mut content = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "content" {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("unreadable content field: {e}")))?;
                content = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| ApiError::bad_request(format!("invalid content JSON: {e}")))?,
                );
            } else {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("unreadable file part: {e}")))?;
                files.insert(name, data.to_vec());
            }
        }
        content
    } else {
        let bytes = Bytes::from_request(req, &())
            .await
            .map_err(|e| ApiError::bad_request(format!("unreadable body: {e}")))?;
        if bytes.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?,
            )
        }
    };

    let submitted = submitted.ok_or_else(|| ApiError::bad_request("missing content in request"))?;
    let mut content = TaskContent::validate(submitted)?;
    content.tag_service(&service);

    let task_id = generate_task_id(content.trainer_id());
    let resource = svc.resource_from_options(content.options());
    state
        .registry
        .create(&task_id, &resource, &service, &content, files)
        .await?;
    Ok(Json(task_id))
}

async fn status(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.registry.info(&task_id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(ApiError::unknown_task(&task_id)),
    }
}

async fn del_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.delete(&task_id).await?;
    Ok(Json(json!({ "message": format!("deleted {task_id}") })))
}

/// Fields surfaced by `/list_tasks`, plus the derived `image`.
const SUMMARY_FIELDS: &[&str] = &["queued_time", "service", "content", "status", "message"];

async fn list_tasks(
    State(state): State<ApiState>,
    Path(pattern): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut summaries = Vec::new();
    for task_id in state.registry.scan_ids(&pattern).await? {
        // A task may vanish between the scan and the read; skip it.
        let Some(fields) = state.registry.info_fields(&task_id, SUMMARY_FIELDS).await? else {
            continue;
        };
        let image = fields
            .get("content")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|content| {
                content
                    .get("docker")
                    .and_then(|d| d.get("image"))
                    .and_then(|i| i.as_str())
                    .map(str::to_string)
            });
        summaries.push(json!({
            "task_id": task_id,
            "queued_time": fields.get("queued_time"),
            "service": fields.get("service"),
            "status": fields.get("status"),
            "message": fields.get("message"),
            "image": image,
        }));
    }
    Ok(Json(Value::Array(summaries)))
}

#[derive(Deserialize)]
struct TerminateParams {
    phase: Option<String>,
}

async fn terminate_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Query(params): Query<TerminateParams>,
) -> Result<Json<Value>, ApiError> {
    let message = tasks::terminate(
        &state.registry,
        &state.lock,
        &task_id,
        params.phase.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "message": message })))
}

#[derive(Deserialize)]
struct BeatParams {
    duration: Option<String>,
    container_id: Option<String>,
}

async fn beat(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Query(params): Query<BeatParams>,
) -> Result<Json<Value>, ApiError> {
    let duration = match params.duration.as_deref() {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| ApiError::bad_request("invalid duration value"))?,
        ),
        None => None,
    };
    state
        .registry
        .beat(&task_id, duration, params.container_id.as_deref())
        .await?;
    Ok(Json(json!({ "message": "beat recorded" })))
}

async fn get_log(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.registry.get_log(&task_id).await? {
        Some(bytes) => Ok(([(header::CONTENT_TYPE, "text/plain")], bytes).into_response()),
        None => Err(ApiError::not_found(format!("no logs for task {task_id}"))),
    }
}

async fn get_file(
    State(state): State<ApiState>,
    Path((task_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match state.registry.get_file(&task_id, &filename).await? {
        Some(bytes) => {
            Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
        }
        None => Err(ApiError::not_found(format!(
            "cannot find file {filename} for task {task_id}"
        ))),
    }
}

async fn post_file(
    State(state): State<ApiState>,
    Path((task_id, filename)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    state.registry.set_file(&task_id, &filename, &body).await?;
    Ok(Json(json!({ "message": format!("stored {filename}") })))
}
