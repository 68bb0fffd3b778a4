//! HTTP surface for ingestd.
//!
//! A compact Axum router over the ingestion service:
//!
//! - `POST /batches` – Submit a batch of files. Small batches (at most the
//!   streaming threshold) are processed inline and answered as an SSE stream
//!   of milestone events; larger batches are queued and answered `202` with a
//!   job id.
//! - `GET /jobs/{id}` / `DELETE /jobs/{id}` – Poll or cancel a queued job.
//! - `POST /queues` and friends – Manage per-user upload queues: add files,
//!   reorder, pause/resume, cleanup, delete, and dispatch the front item
//!   through the pipeline.
//! - `GET /metrics` – Scheduler, pipeline, and tracker counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery
//!   by tools/hosts.

use crate::pipeline::batch::FileSpec;
use crate::queue::{QueueError, QueueSnapshot};
use crate::scheduler::job::{JobPriority, JobSnapshot, SchedulerError};
use crate::service::{BatchSubmission, IngestService, ServiceMetrics};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use uuid::Uuid;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router(service: IngestService) -> Router {
    Router::new()
        .route("/batches", post(submit_batch))
        .route("/jobs/:id", get(job_status).delete(cancel_job))
        .route("/queues", post(create_queue).get(list_queues))
        .route("/queues/:id", get(queue_status).delete(remove_queue))
        .route("/queues/:id/files", post(add_queue_file))
        .route("/queues/:id/reorder", post(reorder_queue))
        .route("/queues/:id/pause", post(pause_queue))
        .route("/queues/:id/resume", post(resume_queue))
        .route("/queues/:id/cleanup", post(cleanup_queue))
        .route("/queues/:id/dispatch", post(dispatch_queue))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for `POST /batches`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBatchRequest {
    /// Owner the batch (and its tracker) belongs to.
    owner_id: String,
    /// Admission priority for the queued path.
    #[serde(default)]
    priority: JobPriority,
    /// Files to process.
    files: Vec<FileSpec>,
}

/// Response body for the queued path of `POST /batches`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueuedBatchResponse {
    job_id: Uuid,
    status: &'static str,
}

/// Submit a batch, routing by size: small batches answer as an SSE stream of
/// milestone events, larger batches are accepted with `202` and a job id.
async fn submit_batch(
    State(service): State<IngestService>,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<Response, AppError> {
    if request.files.is_empty() {
        return Err(AppError::BadRequest("batch contains no files".to_string()));
    }

    match service.submit_batch(&request.owner_id, request.priority, request.files)? {
        BatchSubmission::Streamed(stream) => {
            let events = stream.map(|event| {
                let framed = Event::default().event(event.name()).json_data(&event);
                Ok::<_, Infallible>(framed.unwrap_or_else(|error| {
                    tracing::error!(%error, "Failed to frame batch event");
                    Event::default().event("error")
                }))
            });
            Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
        }
        BatchSubmission::Queued(job_id) => {
            tracing::info!(job = %job_id, "Batch queued");
            Ok((
                StatusCode::ACCEPTED,
                Json(QueuedBatchResponse {
                    job_id,
                    status: "queued",
                }),
            )
                .into_response())
        }
    }
}

/// Snapshot a job's current state.
async fn job_status(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, AppError> {
    Ok(Json(service.job_status(id)?))
}

/// Request cooperative cancellation of a job.
async fn cancel_job(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.cancel_job(id)?;
    Ok(StatusCode::ACCEPTED)
}

/// Request body for `POST /queues`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueueRequest {
    owner_id: String,
    name: String,
}

/// Response body for `POST /queues`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueueResponse {
    queue_id: Uuid,
}

/// Create an upload queue for an owner.
async fn create_queue(
    State(service): State<IngestService>,
    Json(request): Json<CreateQueueRequest>,
) -> (StatusCode, Json<CreateQueueResponse>) {
    let queue_id = service.queues().create(&request.owner_id, &request.name);
    (StatusCode::CREATED, Json(CreateQueueResponse { queue_id }))
}

/// Query string for `GET /queues`.
#[derive(Deserialize)]
struct ListQueuesQuery {
    owner: String,
}

/// Response body for `GET /queues`.
#[derive(Serialize)]
struct ListQueuesResponse {
    queues: Vec<QueueSnapshot>,
}

/// List the queues owned by the given user.
async fn list_queues(
    State(service): State<IngestService>,
    Query(query): Query<ListQueuesQuery>,
) -> Json<ListQueuesResponse> {
    Json(ListQueuesResponse {
        queues: service.queues().list(&query.owner),
    })
}

/// Snapshot one queue.
async fn queue_status(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueSnapshot>, AppError> {
    Ok(Json(service.queues().status(id)?))
}

/// Delete a queue entirely.
async fn remove_queue(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.queues().remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body for `POST /queues/{id}/files`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFileRequest {
    file_name: String,
    path: String,
}

/// Response body for `POST /queues/{id}/files`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddFileResponse {
    item_id: Uuid,
}

/// Append a file at the back of a queue.
async fn add_queue_file(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddFileRequest>,
) -> Result<(StatusCode, Json<AddFileResponse>), AppError> {
    let item_id = service
        .queues()
        .add_file(id, &request.file_name, &request.path)?;
    Ok((StatusCode::CREATED, Json(AddFileResponse { item_id })))
}

/// Request body for `POST /queues/{id}/reorder`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderRequest {
    item_id: Uuid,
    new_position: usize,
}

/// Move a queue item to a new position.
async fn reorder_queue(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<QueueSnapshot>, AppError> {
    Ok(Json(service.queues().reorder(
        id,
        request.item_id,
        request.new_position,
    )?))
}

/// Stop dispatching from a queue.
async fn pause_queue(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.queues().pause(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resume dispatching from a queue.
async fn resume_queue(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.queues().resume(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run the front pending item of a queue through the pipeline. Answers `204`
/// when the queue is paused or fully drained.
async fn dispatch_queue(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    match service.dispatch_next(id).await? {
        Some(result) => Ok(Json(result).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Response body for `POST /queues/{id}/cleanup`.
#[derive(Serialize)]
struct CleanupResponse {
    removed: usize,
}

/// Remove terminal items from a queue and compact positions.
async fn cleanup_queue(
    State(service): State<IngestService>,
    Path(id): Path<Uuid>,
) -> Result<Json<CleanupResponse>, AppError> {
    let removed = service.queues().cleanup(id)?;
    Ok(Json(CleanupResponse { removed }))
}

/// Return scheduler, pipeline, and tracker counters.
async fn get_metrics(State(service): State<IngestService>) -> Json<ServiceMetrics> {
    Json(service.metrics())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "submit_batch",
                method: "POST",
                path: "/batches",
                description: "Submit files for ingestion. Small batches answer as an SSE stream of milestone events; larger batches answer 202 with { \"jobId\": uuid }.",
                request_example: Some(json!({
                    "ownerId": "user-42",
                    "priority": "normal",
                    "files": [{ "fileName": "notes.md", "path": "/uploads/notes.md" }]
                })),
            },
            CommandDescriptor {
                name: "job_status",
                method: "GET",
                path: "/jobs/{id}",
                description: "Return the current snapshot of a queued or finished job.",
                request_example: None,
            },
            CommandDescriptor {
                name: "cancel_job",
                method: "DELETE",
                path: "/jobs/{id}",
                description: "Request cooperative cancellation; observed between pipeline stages.",
                request_example: None,
            },
            CommandDescriptor {
                name: "create_queue",
                method: "POST",
                path: "/queues",
                description: "Create a named upload queue for an owner.",
                request_example: Some(json!({
                    "ownerId": "user-42",
                    "name": "thesis uploads"
                })),
            },
            CommandDescriptor {
                name: "reorder_queue",
                method: "POST",
                path: "/queues/{id}/reorder",
                description: "Move a pending item to a new position; positions stay dense and unique.",
                request_example: Some(json!({
                    "itemId": "00000000-0000-0000-0000-000000000000",
                    "newPosition": 0
                })),
            },
            CommandDescriptor {
                name: "dispatch_queue",
                method: "POST",
                path: "/queues/{id}/dispatch",
                description: "Run the front pending item of a queue through the pipeline; 204 when nothing is pending.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return scheduler, pipeline, and tracker counters for observability.",
                request_example: None,
            },
        ],
    })
}

/// Error wrapper mapping domain errors to HTTP status codes.
enum AppError {
    Scheduler(SchedulerError),
    Queue(QueueError),
    BadRequest(String),
}

impl From<SchedulerError> for AppError {
    fn from(inner: SchedulerError) -> Self {
        Self::Scheduler(inner)
    }
}

impl From<QueueError> for AppError {
    fn from(inner: QueueError) -> Self {
        Self::Queue(inner)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Scheduler(SchedulerError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("job {id} not found"))
            }
            Self::Scheduler(error @ SchedulerError::QueueFull { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, error.to_string())
            }
            Self::Queue(QueueError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("queue {id} not found"))
            }
            Self::Queue(error @ QueueError::ItemNotFound(_)) => {
                (StatusCode::NOT_FOUND, error.to_string())
            }
            Self::Queue(error @ QueueError::InvalidPosition { .. }) => {
                (StatusCode::BAD_REQUEST, error.to_string())
            }
            Self::Queue(error @ QueueError::CannotReorder(_)) => {
                (StatusCode::CONFLICT, error.to_string())
            }
            Self::Queue(error @ QueueError::Poisoned) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chunking::Chunk;
    use crate::pipeline::collaborators::{
        DocumentMeta, ExtractionError, FileValidator, StoreError, TextExtractor,
        ValidationReport, VectorSink,
    };
    use crate::service::ServiceOptions;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct AcceptAll;

    #[async_trait]
    impl FileValidator for AcceptAll {
        async fn validate(&self, _file: &FileSpec) -> ValidationReport {
            ValidationReport {
                is_valid: true,
                ..ValidationReport::default()
            }
        }
    }

    struct StaticExtractor;

    #[async_trait]
    impl TextExtractor for StaticExtractor {
        async fn extract(&self, _path: &str) -> Result<String, ExtractionError> {
            Ok("alpha beta gamma delta".to_string())
        }
    }

    struct AcceptingSink;

    #[async_trait]
    impl VectorSink for AcceptingSink {
        async fn store(
            &self,
            _namespace: &str,
            _meta: &DocumentMeta,
            chunks: &[Chunk],
        ) -> Result<Vec<String>, StoreError> {
            Ok(chunks.iter().map(|_| Uuid::new_v4().to_string()).collect())
        }
    }

    fn test_service() -> IngestService {
        IngestService::with_collaborators(
            ServiceOptions::default(),
            Arc::new(AcceptAll),
            Arc::new(StaticExtractor),
            Arc::new(AcceptingSink),
        )
    }

    fn json_request(method: Method, uri: &str, payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn large_batch_is_accepted_with_a_job_id() {
        let service = test_service();
        let app = create_router(service.clone());

        let files: Vec<serde_json::Value> = (0..5)
            .map(|index| {
                json!({ "fileName": format!("f{index}.txt"), "path": format!("/uploads/f{index}.txt") })
            })
            .collect();
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/batches",
                json!({ "ownerId": "user-1", "files": files }),
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        let job_id: Uuid = body["jobId"]
            .as_str()
            .expect("job id string")
            .parse()
            .expect("uuid");
        assert_eq!(body["status"], "queued");

        // the job becomes queryable and eventually terminal
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if service.job_status(job_id).expect("job present").is_complete {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job finished");
    }

    #[tokio::test]
    async fn small_batch_answers_as_an_event_stream() {
        let app = create_router(test_service());
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/batches",
                json!({
                    "ownerId": "user-1",
                    "files": [{ "fileName": "a.txt", "path": "/uploads/a.txt" }]
                }),
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("stream drained");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: batch-started"));
        assert!(text.contains("event: file-completed"));
        assert!(text.contains("event: batch-completed"));
        assert!(text.contains("event: end"));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let app = create_router(test_service());
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/batches",
                json!({ "ownerId": "user-1", "files": [] }),
            ))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_job_maps_to_404() {
        let app = create_router(test_service());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queue_surface_round_trip() {
        let app = create_router(test_service());

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/queues",
                json!({ "ownerId": "user-1", "name": "uploads" }),
            ))
            .await
            .expect("create queue");
        assert_eq!(response.status(), StatusCode::CREATED);
        let queue_id = json_body(response).await["queueId"]
            .as_str()
            .expect("queue id")
            .to_string();

        let mut item_ids = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let response = app
                .clone()
                .oneshot(json_request(
                    Method::POST,
                    &format!("/queues/{queue_id}/files"),
                    json!({ "fileName": name, "path": format!("/uploads/{name}") }),
                ))
                .await
                .expect("add file");
            assert_eq!(response.status(), StatusCode::CREATED);
            item_ids.push(
                json_body(response).await["itemId"]
                    .as_str()
                    .expect("item id")
                    .to_string(),
            );
        }

        // move the last item to the front
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/queues/{queue_id}/reorder"),
                json!({ "itemId": item_ids[2], "newPosition": 0 }),
            ))
            .await
            .expect("reorder");
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = json_body(response).await;
        assert_eq!(snapshot["items"][0]["fileName"], "c.txt");
        assert_eq!(snapshot["items"][0]["position"], 0);

        // out-of-range target position is a client error
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/queues/{queue_id}/reorder"),
                json!({ "itemId": item_ids[0], "newPosition": 3 }),
            ))
            .await
            .expect("reorder out of range");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/queues/{queue_id}/pause"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("pause");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/queues/{queue_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("delete");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn queue_dispatch_processes_the_front_item() {
        let app = create_router(test_service());

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/queues",
                json!({ "ownerId": "user-1", "name": "uploads" }),
            ))
            .await
            .expect("create queue");
        let queue_id = json_body(response).await["queueId"]
            .as_str()
            .expect("queue id")
            .to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                &format!("/queues/{queue_id}/files"),
                json!({ "fileName": "a.txt", "path": "/uploads/a.txt" }),
            ))
            .await
            .expect("add file");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/queues/{queue_id}/dispatch"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("dispatch");
        assert_eq!(response.status(), StatusCode::OK);
        let result = json_body(response).await;
        assert_eq!(result["fileName"], "a.txt");
        assert_eq!(result["succeeded"], true);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/queues/{queue_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("status");
        let snapshot = json_body(response).await;
        assert_eq!(snapshot["items"][0]["status"], "completed");

        // a drained queue answers 204
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/queues/{queue_id}/dispatch"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("dispatch again");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_counters() {
        let app = create_router(test_service());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ingest"]["jobsSubmitted"], 0);
        assert_eq!(body["runningJobs"], 0);
    }

    #[tokio::test]
    async fn commands_catalog_exposes_batch_submission() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let submit = commands
            .iter()
            .find(|command| command.name == "submit_batch")
            .expect("submit command present");
        assert_eq!(submit.method, "POST");
        assert_eq!(submit.path, "/batches");
        assert!(commands.len() >= 5);
    }
}
