use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::info;

use super::AppState;

/// POST /webhooks/payments
///
/// Always answers 200 so the gateway does not redeliver events the engine
/// has already decided about; the outcome is carried in the body.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(state.signature_header.as_ref())
        .and_then(|v| v.to_str().ok());

    info!(bytes = body.len(), signed = signature.is_some(), "Received payment webhook");

    let ack = state.webhooks.handle(&body, signature).await;
    (StatusCode::OK, Json(ack))
}
