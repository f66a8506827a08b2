use crate::config::RetryQueueConfig;
use crate::database::repository::RetryTaskStore;
use crate::payments::types::{EntityType, LedgerEntry, NewRetryTask, RetryTaskType};
use crate::services::commerce::{AccountingEntry, CommerceHooks};
use crate::services::invoice::InvoiceDispatcher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened to the document triggered by a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Sent,
    Queued { task_id: Uuid },
    /// Delivery failed and the retry task could not be stored either
    Dropped { reason: String },
    Skipped { reason: String },
}

pub struct SideEffectOrchestrator {
    commerce: Arc<dyn CommerceHooks>,
    invoices: Arc<InvoiceDispatcher>,
    tasks: Arc<dyn RetryTaskStore>,
    max_attempts: u32,
    initial_delay: chrono::Duration,
}

impl SideEffectOrchestrator {
    pub fn new(
        commerce: Arc<dyn CommerceHooks>,
        invoices: Arc<InvoiceDispatcher>,
        tasks: Arc<dyn RetryTaskStore>,
        config: &RetryQueueConfig,
    ) -> Self {
        Self {
            commerce,
            invoices,
            tasks,
            max_attempts: config.max_attempts,
            initial_delay: chrono::Duration::from_std(config.initial_delay)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Runs after a fresh transition to `paid`.
    pub async fn on_paid(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> DocumentOutcome {
        if entry.entity_type == EntityType::Order {
            if let Err(e) = self.commerce.clear_cart(entry).await {
                warn!(entity = %entry.entity(), error = %e, "failed to clear cart");
            }
        }
        if let Err(e) = self
            .commerce
            .record_transaction(entry, AccountingEntry::Payment)
            .await
        {
            warn!(entity = %entry.entity(), error = %e, "failed to record accounting transaction");
        }

        self.send_or_enqueue(InvoiceDispatcher::invoice_kind(entry), entry, now)
            .await
    }

    /// Runs after a fresh transition to `refunded`.
    pub async fn on_refunded(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> DocumentOutcome {
        if let Err(e) = self
            .commerce
            .record_transaction(entry, AccountingEntry::Refund)
            .await
        {
            warn!(entity = %entry.entity(), error = %e, "failed to record refund transaction");
        }

        self.send_or_enqueue(RetryTaskType::CreditNote, entry, now)
            .await
    }

    /// Runs after a fresh transition to `failed`.
    pub async fn on_failed(&self, entry: &LedgerEntry) {
        if entry.entity_type != EntityType::Order {
            return;
        }
        if let Err(e) = self.commerce.restore_cart(entry).await {
            warn!(entity = %entry.entity(), error = %e, "failed to restore cart");
        }
    }

    async fn send_or_enqueue(
        &self,
        task_type: RetryTaskType,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> DocumentOutcome {
        let recipient = match entry.customer_email.as_deref() {
            Some(email) if !email.trim().is_empty() => email.to_string(),
            _ => {
                warn!(entity = %entry.entity(), task_type = task_type.as_str(), "no recipient; document skipped");
                return DocumentOutcome::Skipped {
                    reason: "no customer email".to_string(),
                };
            }
        };

        let error = match self.invoices.deliver(task_type, entry, Some(&recipient)).await {
            Ok(()) => return DocumentOutcome::Sent,
            Err(e) => e,
        };

        warn!(
            entity = %entry.entity(),
            task_type = task_type.as_str(),
            error = %error,
            "document delivery failed, queueing retry"
        );

        let task = NewRetryTask {
            task_type,
            target: entry.entity(),
            recipient_email: recipient,
            max_attempts: self.max_attempts,
            last_error: Some(error.to_string()),
            scheduled_for: now + self.initial_delay,
        };
        match self.tasks.enqueue(task, now).await {
            Ok(task) => {
                info!(task_id = %task.id, entity = %entry.entity(), "retry task queued");
                DocumentOutcome::Queued { task_id: task.id }
            }
            Err(e) => {
                error!(entity = %entry.entity(), error = %e, "failed to queue retry task");
                DocumentOutcome::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }
}
