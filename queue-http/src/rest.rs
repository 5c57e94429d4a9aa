use axum::extract::{Path, Query, State};
use axum::Json;
use queue_core::backend::QueueBackend;
use queue_core::types::{JobId, JobStatus, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

fn parse_status(raw: &str) -> Result<JobStatus, ApiError> {
    match raw {
        "pending" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Processing),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "retry" => Ok(JobStatus::Retry),
        "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
        other => Err(ApiError::bad_request(format!("unknown status '{other}'"))),
    }
}

fn envelope(data: Value, meta: Option<Value>) -> Json<Value> {
    let mut body = json!({ "success": true, "data": data });
    if let Some(meta) = meta {
        body["meta"] = meta;
    }
    Json(body)
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

#[instrument(skip(state))]
pub async fn get_stats<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.engine.stats().await?;
    Ok(envelope(serde_json::to_value(stats).map_err(|e| ApiError::internal(e.to_string()))?, None))
}

#[instrument(skip(state))]
pub async fn list_jobs<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let status_name = status.map(|s| s.name());
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let jobs = state.engine.list_jobs(status_name, query.job_type.as_deref(), limit, offset).await?;
    let meta = json!({ "limit": limit, "offset": offset, "count": jobs.len() });
    Ok(envelope(serde_json::to_value(jobs).map_err(|e| ApiError::internal(e.to_string()))?, Some(meta)))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    pub priority: Option<u8>,
    pub delay_seconds: Option<i64>,
    pub dedup_key: Option<String>,
    pub max_attempts: Option<u32>,
    /// Optional client-supplied correlation token for audit logging.
    /// Idempotency itself comes from `dedup_key`, not this field.
    pub client_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
}

#[instrument(skip(state, body), fields(job_type = %body.job_type, client_token = body.client_token.as_deref()))]
pub async fn create_job<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Json(body): Json<CreateJobRequest>,
) -> Result<Json<Value>, ApiError> {
    let priority = match body.priority {
        Some(value) => Priority::new(value)?,
        None => queue_core::types::priority_for_job_type(&body.job_type),
    };
    let delay = chrono::Duration::seconds(body.delay_seconds.unwrap_or(0));

    let job_id = state
        .engine
        .enqueue_job(body.job_type, body.payload, priority, delay, body.dedup_key, body.max_attempts)
        .await?;

    let response = CreateJobResponse { job_id: job_id.to_string() };
    Ok(envelope(serde_json::to_value(response).map_err(|e| ApiError::internal(e.to_string()))?, None))
}

#[instrument(skip(state))]
pub async fn get_job<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state.engine.get_record(&JobId::from_string(id)).await?;
    Ok(envelope(serde_json::to_value(record).map_err(|e| ApiError::internal(e.to_string()))?, None))
}

/// `POST /queue/jobs/{id}/retry` - only valid from `failed`; retrying a
/// job that isn't failed is a state conflict, not a silent reset.
#[instrument(skip(state))]
pub async fn retry_job<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::from_string(id);
    let record = state.engine.get_record(&job_id).await?;
    if record.status != JobStatus::Failed {
        return Err(ApiError::conflict(format!("job is {} , not failed; cannot retry", record.status)));
    }
    state.engine.reset(&job_id).await?;
    Ok(envelope(json!({ "job_id": job_id.to_string(), "status": "pending" }), None))
}

/// `POST /queue/jobs/{id}/cancel` - idempotent: cancelling an
/// already-terminal job is a no-op success, not an error.
#[instrument(skip(state))]
pub async fn cancel_job<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::from_string(id);
    let cancelled = state.engine.cancel(&job_id).await?;
    Ok(envelope(json!({ "job_id": job_id.to_string(), "cancelled": cancelled }), None))
}

/// `POST /queue/jobs/{id}/reset` - management override, moves any
/// non-terminal row back to `pending` with a clean attempt counter.
#[instrument(skip(state))]
pub async fn reset_job<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::from_string(id);
    state.engine.reset(&job_id).await?;
    Ok(envelope(json!({ "job_id": job_id.to_string(), "status": "pending" }), None))
}

/// `POST /queue/jobs/{id}/delete` - there is no row-level delete in the
/// backend beyond terminal retention sweeps, so this cancels the job
/// (idempotent, same as `cancel`) rather than removing the row.
#[instrument(skip(state))]
pub async fn delete_job<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::from_string(id);
    state.engine.cancel(&job_id).await?;
    Ok(envelope(json!({ "job_id": job_id.to_string(), "deleted": true }), None))
}

#[instrument(skip(state))]
pub async fn pause_queue<B: QueueBackend + 'static>(State(state): State<AppState<B>>) -> Json<Value> {
    state.paused.store(true, std::sync::atomic::Ordering::SeqCst);
    envelope(json!({ "paused": true }), None)
}

#[instrument(skip(state))]
pub async fn resume_queue<B: QueueBackend + 'static>(State(state): State<AppState<B>>) -> Json<Value> {
    state.paused.store(false, std::sync::atomic::Ordering::SeqCst);
    envelope(json!({ "paused": false }), None)
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    pub status: String,
}

/// `POST /queue/clear?status={completed|failed}` - deletes every
/// terminal row in that status, regardless of age. Rejects a
/// non-terminal status (400) rather than silently clearing nothing.
#[instrument(skip(state))]
pub async fn clear_queue<B: QueueBackend + 'static>(
    State(state): State<AppState<B>>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = parse_status(&query.status)?;
    if !status.is_terminal() {
        return Err(ApiError::bad_request(format!("cannot clear non-terminal status '{}'", query.status)));
    }
    let deleted = state.engine.clear(status).await?;
    Ok(envelope(json!({ "deleted": deleted }), None))
}
