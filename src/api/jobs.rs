use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value as JsonValue};

use super::AppState;
use crate::error::AppError;
use crate::workers::{JobStatus, JobTrigger};

/// GET /api/admin/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobStatus>> {
    Json(state.scheduler.list().await)
}

/// GET /api/admin/jobs/{name}
pub async fn get_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    Ok(Json(state.scheduler.status(&name).await?))
}

/// POST /api/admin/jobs/{name}/trigger
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobTrigger>, AppError> {
    Ok(Json(state.scheduler.trigger(&name)?))
}

/// POST /api/admin/jobs/{name}/start
pub async fn start_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JsonValue>, AppError> {
    state.scheduler.start_job(&name).await?;
    Ok(Json(json!({ "job_name": name, "status": "started" })))
}

/// POST /api/admin/jobs/{name}/stop
pub async fn stop_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JsonValue>, AppError> {
    state.scheduler.stop_job(&name).await?;
    Ok(Json(json!({ "job_name": name, "status": "stopped" })))
}
