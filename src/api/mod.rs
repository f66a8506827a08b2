//! HTTP surface: the gateway webhook endpoint, admin endpoints and health.

pub mod jobs;
pub mod reconciliation;
pub mod retry_queue;
pub mod webhooks;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::health::{self, HealthChecker};
use crate::services::{ReconciliationService, RetryQueueProcessor, WebhookProcessor};
use crate::workers::JobScheduler;

#[derive(Clone)]
pub struct AppState {
    pub webhooks: Arc<WebhookProcessor>,
    /// Header carrying the gateway's HMAC signature
    pub signature_header: Arc<str>,
    pub reconciliation: Arc<ReconciliationService>,
    pub scheduler: Arc<JobScheduler>,
    pub retry_queue: Arc<RetryQueueProcessor>,
    pub health: Arc<HealthChecker>,
}

impl FromRef<AppState> for Arc<HealthChecker> {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/reconciliation", post(reconciliation::run_reconciliation))
        .route("/reconciliation/export", get(reconciliation::export_reconciliation))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{name}", get(jobs::get_job))
        .route("/jobs/{name}/trigger", post(jobs::trigger_job))
        .route("/jobs/{name}/start", post(jobs::start_job))
        .route("/jobs/{name}/stop", post(jobs::stop_job))
        .route("/retry-queue/stats", get(retry_queue::queue_stats))
        .route("/retry-queue/{id}/retry", post(retry_queue::force_retry));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/webhooks/payments", post(webhooks::handle_webhook))
        .nest("/api/admin", admin)
        .with_state(state)
}
