//! Health check module
//! Provides health status for the application and its dependencies

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::repository::{LedgerStore, RetryTaskStore};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the ledger store and the retry queue
#[derive(Clone)]
pub struct HealthChecker {
    ledger: Arc<dyn LedgerStore>,
    tasks: Arc<dyn RetryTaskStore>,
    check_timeout: Duration,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn LedgerStore>, tasks: Arc<dyn RetryTaskStore>) -> Self {
        Self {
            ledger,
            tasks,
            check_timeout: Duration::from_secs(5),
        }
    }

    pub async fn check_ledger(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(self.check_timeout, self.ledger.ping()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                info!("Ledger health check: OK ({}ms)", elapsed);
                ComponentHealth::up(Some(elapsed))
            }
            Ok(Err(e)) => {
                error!("Ledger health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Ledger health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }

    /// Exhausted tasks need manual attention but do not make the service unhealthy.
    pub async fn check_retry_queue(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(self.check_timeout, self.tasks.stats()).await {
            Ok(Ok(stats)) => {
                let elapsed = start.elapsed().as_millis();
                if stats.failed > 0 {
                    warn!(failed = stats.failed, "Retry queue has exhausted tasks");
                    ComponentHealth::warning(
                        Some(elapsed),
                        Some(format!("{} tasks failed permanently", stats.failed)),
                    )
                } else {
                    ComponentHealth::up(Some(elapsed))
                }
            }
            Ok(Err(e)) => {
                error!("Retry queue health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Retry queue health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        health_status
            .checks
            .insert("ledger".to_string(), self.check_ledger().await);
        health_status
            .checks
            .insert("retry_queue".to_string(), self.check_retry_queue().await);

        let states: Vec<&ComponentState> =
            health_status.checks.values().map(|c| &c.status).collect();
        health_status.status = if states.iter().any(|s| **s == ComponentState::Down) {
            HealthState::Unhealthy
        } else if states.iter().any(|s| **s == ComponentState::Warning) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

/// GET /health
pub async fn health(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let status = checker.check_health().await;
    let code = if status.status == HealthState::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status))
}

/// GET /health/live
pub async fn live() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// GET /health/ready
pub async fn ready(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let ledger = checker.check_ledger().await;
    if ledger.status == ComponentState::Up {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "details": ledger.details })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryLedgerStore, InMemoryRetryTaskStore};

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.details, Some("Slow response".to_string()));
    }

    #[tokio::test]
    async fn in_memory_stores_are_healthy() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryRetryTaskStore::new()),
        );
        let status = checker.check_health().await;
        assert!(status.is_healthy());
        assert_eq!(status.checks.len(), 2);
    }
}
