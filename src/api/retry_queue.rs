use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::payments::types::{RetryQueueStats, RetryTask};

/// GET /api/admin/retry-queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<RetryQueueStats>, AppError> {
    Ok(Json(state.retry_queue.stats().await?))
}

/// POST /api/admin/retry-queue/{id}/retry
pub async fn force_retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RetryTask>, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| AppError::invalid_field("id", "not a valid task id"))?;
    let task = state
        .retry_queue
        .force_retry(id)
        .await
        .map_err(|e| AppError::from(e).with_context(format!("forced retry of task {}", id)))?;
    Ok(Json(task))
}
