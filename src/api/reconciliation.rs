use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::reconciliation::{to_csv, ReconciliationReport, ReconciliationRequest};

fn with_request_id(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// POST /api/admin/reconciliation
pub async fn run_reconciliation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReconciliationRequest>,
) -> Result<Json<ReconciliationReport>, AppError> {
    let report = state
        .reconciliation
        .reconcile(&request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(report))
}

/// GET /api/admin/reconciliation/export
pub async fn export_reconciliation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(mut request): Query<ReconciliationRequest>,
) -> Result<Response, AppError> {
    // Exports are read-only.
    request.auto_fix = false;
    let report = state
        .reconciliation
        .reconcile(&request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    let filename = format!(
        "reconciliation-{}-{}.csv",
        request.start_date.format("%Y%m%d"),
        request.end_date.format("%Y%m%d")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        to_csv(&report.discrepancies),
    )
        .into_response())
}
