use crate::config::RetryQueueConfig;
use crate::database::error::DatabaseError;
use crate::database::repository::RetryTaskStore;
use crate::payments::types::{EntityRef, RetryQueueStats, RetryTask};
use crate::services::invoice::InvoiceDispatcher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Totals for one processing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryPassSummary {
    pub claimed: usize,
    pub sent: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// The pass did not run because another one was still in flight
    pub skipped: bool,
}

/// Clears the in-flight flag when a pass ends, including on early return.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RetryQueueProcessor {
    tasks: Arc<dyn RetryTaskStore>,
    invoices: Arc<InvoiceDispatcher>,
    batch_size: usize,
    retry_delay: chrono::Duration,
    claim_lease: chrono::Duration,
    in_flight: AtomicBool,
}

impl RetryQueueProcessor {
    pub fn new(
        tasks: Arc<dyn RetryTaskStore>,
        invoices: Arc<InvoiceDispatcher>,
        config: &RetryQueueConfig,
    ) -> Self {
        Self {
            tasks,
            invoices,
            batch_size: config.batch_size,
            retry_delay: chrono::Duration::from_std(config.retry_delay)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            claim_lease: chrono::Duration::from_std(config.claim_lease)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
            in_flight: AtomicBool::new(false),
        }
    }

    pub async fn process_due(&self) -> Result<RetryPassSummary, DatabaseError> {
        self.process_due_at(Utc::now()).await
    }

    pub async fn process_due_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<RetryPassSummary, DatabaseError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("retry queue pass already running, skipping");
            return Ok(RetryPassSummary {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = InFlight(&self.in_flight);

        let claimed = self
            .tasks
            .claim_due(now, now - self.claim_lease, self.batch_size)
            .await?;
        let mut summary = RetryPassSummary {
            claimed: claimed.len(),
            ..Default::default()
        };

        for task in claimed {
            match self.process_task(&task, now).await {
                Ok(TaskResult::Sent) => summary.sent += 1,
                Ok(TaskResult::Rescheduled) => summary.rescheduled += 1,
                Ok(TaskResult::Failed) => summary.failed += 1,
                Err(e) => {
                    // The task stays `processing` until its claim lease runs out.
                    error!(task_id = %task.id, error = %e, "failed to persist retry task outcome");
                }
            }
        }

        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                sent = summary.sent,
                rescheduled = summary.rescheduled,
                failed = summary.failed,
                "retry queue pass completed"
            );
        }
        Ok(summary)
    }

    async fn process_task(
        &self,
        task: &RetryTask,
        now: DateTime<Utc>,
    ) -> Result<TaskResult, DatabaseError> {
        let target = EntityRef::new(task.target_type, task.target_id.clone());
        let delivery = self
            .invoices
            .dispatch(task.task_type, &target, &task.recipient_email)
            .await;

        let err = match delivery {
            Ok(()) => {
                self.tasks.mark_sent(task.id, now).await?;
                info!(
                    task_id = %task.id,
                    task_type = task.task_type.as_str(),
                    target = %target,
                    attempts = task.attempts,
                    "retry task sent"
                );
                return Ok(TaskResult::Sent);
            }
            Err(e) => e,
        };

        let attempts = task.attempts + 1;
        if attempts >= task.max_attempts {
            self.tasks
                .record_failure(task.id, attempts, &err.to_string(), None, now)
                .await?;
            error!(
                task_id = %task.id,
                task_type = task.task_type.as_str(),
                target = %target,
                attempts,
                error = %err,
                "retry task exhausted"
            );
            Ok(TaskResult::Failed)
        } else {
            let retry_at = now + self.retry_delay;
            self.tasks
                .record_failure(task.id, attempts, &err.to_string(), Some(retry_at), now)
                .await?;
            warn!(
                task_id = %task.id,
                attempts,
                max_attempts = task.max_attempts,
                retry_at = %retry_at,
                error = %err,
                "retry task rescheduled"
            );
            Ok(TaskResult::Rescheduled)
        }
    }

    pub async fn stats(&self) -> Result<RetryQueueStats, DatabaseError> {
        self.tasks.stats().await
    }

    /// Makes a task due immediately, whatever its current status.
    pub async fn force_retry(&self, id: Uuid) -> Result<RetryTask, DatabaseError> {
        let task = self.tasks.force_retry(id, Utc::now()).await?;
        info!(task_id = %id, attempts = task.attempts, "retry task forced");
        Ok(task)
    }
}

enum TaskResult {
    Sent,
    Rescheduled,
    Failed,
}
