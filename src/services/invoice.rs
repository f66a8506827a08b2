//! Invoice and credit-note rendering.
//!
//! Documents are always re-derived from the current ledger entry, so a task
//! retried hours later reflects the persisted payment rather than a snapshot.

use crate::database::repository::LedgerStore;
use crate::payments::types::{EntityRef, EntityType, LedgerEntry, PaymentStatus, RetryTaskType};
use crate::services::notification::{DeliveryError, Notification, NotificationType, Notifier};
use std::sync::Arc;
use tracing::info;

pub struct InvoiceDispatcher {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl InvoiceDispatcher {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { ledger, notifier }
    }

    /// Invoice kind issued when `entry` becomes paid.
    pub fn invoice_kind(entry: &LedgerEntry) -> RetryTaskType {
        match entry.entity_type {
            EntityType::Order => RetryTaskType::Invoice,
            EntityType::Subscription => RetryTaskType::SubscriptionInvoice,
        }
    }

    pub fn render(task_type: RetryTaskType, entry: &LedgerEntry) -> Result<Notification, DeliveryError> {
        let payment = entry.payment.as_ref().ok_or_else(|| {
            DeliveryError::ArtifactUnavailable(format!("{} has no payment", entry.entity()))
        })?;
        let payment_id = payment.gateway_payment_id.as_deref().unwrap_or("-");

        let (kind, subject, body) = match task_type {
            RetryTaskType::Invoice | RetryTaskType::SubscriptionInvoice => {
                if !matches!(payment.status, PaymentStatus::Paid | PaymentStatus::Refunded) {
                    return Err(DeliveryError::ArtifactUnavailable(format!(
                        "{} is not paid (status {})",
                        entry.entity(),
                        payment.status
                    )));
                }
                let kind = if task_type == RetryTaskType::Invoice {
                    NotificationType::Invoice
                } else {
                    NotificationType::SubscriptionInvoice
                };
                (
                    kind,
                    format!("Invoice for {}", entry.reference_code),
                    format!(
                        "Received {} {} (payment {})",
                        payment.amount_major(),
                        payment.currency,
                        payment_id
                    ),
                )
            }
            RetryTaskType::CreditNote => {
                if payment.status != PaymentStatus::Refunded {
                    return Err(DeliveryError::ArtifactUnavailable(format!(
                        "{} is not refunded (status {})",
                        entry.entity(),
                        payment.status
                    )));
                }
                (
                    NotificationType::CreditNote,
                    format!("Credit note for {}", entry.reference_code),
                    format!(
                        "Refunded {} {} (refund {})",
                        payment.amount_major(),
                        payment.currency,
                        payment.refund_id.as_deref().unwrap_or("-")
                    ),
                )
            }
        };

        Notification::for_entry(kind, entry, subject, body)
    }

    /// Renders from an already loaded entry and delivers it.
    pub async fn deliver(
        &self,
        task_type: RetryTaskType,
        entry: &LedgerEntry,
        recipient: Option<&str>,
    ) -> Result<(), DeliveryError> {
        let mut notification = Self::render(task_type, entry)?;
        if let Some(recipient) = recipient {
            notification = notification.to_recipient(recipient);
        }
        self.notifier.send(&notification).await?;
        info!(
            entity = %entry.entity(),
            task_type = task_type.as_str(),
            "document delivered"
        );
        Ok(())
    }

    /// Loads the target from the ledger and delivers the document.
    pub async fn dispatch(
        &self,
        task_type: RetryTaskType,
        target: &EntityRef,
        recipient: &str,
    ) -> Result<(), DeliveryError> {
        let entry = self
            .ledger
            .get(target)
            .await
            .map_err(|e| DeliveryError::ArtifactUnavailable(e.to_string()))?
            .ok_or_else(|| DeliveryError::ArtifactUnavailable(format!("{} not found", target)))?;
        self.deliver(task_type, &entry, Some(recipient)).await
    }
}
