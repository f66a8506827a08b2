use crate::payments::types::{minor_to_major, EntityRef, LedgerEntry};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Invoice,
    SubscriptionInvoice,
    CreditNote,
    PaymentRetry,
    OrderPaymentRetry,
    FinalPaymentFailure,
    PaymentReminder,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Invoice => "invoice",
            NotificationType::SubscriptionInvoice => "subscription_invoice",
            NotificationType::CreditNote => "credit_note",
            NotificationType::PaymentRetry => "payment_retry",
            NotificationType::OrderPaymentRetry => "order_payment_retry",
            NotificationType::FinalPaymentFailure => "final_payment_failure",
            NotificationType::PaymentReminder => "payment_reminder",
        }
    }
}

/// A rendered message ready for delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub kind: NotificationType,
    pub recipient: String,
    pub entity: EntityRef,
    pub reference_code: String,
    pub subject: String,
    pub body: String,
    pub amount: Decimal,
    pub currency: String,
}

impl Notification {
    /// Builds a notification addressed to the entry's customer.
    pub fn for_entry(
        kind: NotificationType,
        entry: &LedgerEntry,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, DeliveryError> {
        let recipient = entry
            .customer_email
            .clone()
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| DeliveryError::MissingRecipient(entry.entity().to_string()))?;

        let (amount_minor, currency) = match &entry.payment {
            Some(payment) => (payment.amount_minor, payment.currency.clone()),
            None => (entry.amount_minor, entry.currency.clone()),
        };

        Ok(Self {
            kind,
            recipient,
            entity: entry.entity(),
            reference_code: entry.reference_code.clone(),
            subject: subject.into(),
            body: body.into(),
            amount: minor_to_major(amount_minor),
            currency,
        })
    }

    pub fn to_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("No recipient address for {0}")]
    MissingRecipient(String),
    #[error("Artifact unavailable: {0}")]
    ArtifactUnavailable(String),
    #[error("Delivery failed: {0}")]
    Transport(String),
}

/// Outbound channel for customer-facing messages (email, SMS, push).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes every notification to the structured log instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        match notification.kind {
            NotificationType::FinalPaymentFailure => {
                warn!(
                    entity = %notification.entity,
                    recipient = %notification.recipient,
                    reference = %notification.reference_code,
                    "🔔 NOTIFICATION: {} - {}", notification.subject, notification.body
                );
            }
            _ => {
                info!(
                    entity = %notification.entity,
                    recipient = %notification.recipient,
                    reference = %notification.reference_code,
                    kind = notification.kind.as_str(),
                    amount = %notification.amount,
                    currency = %notification.currency,
                    "🔔 NOTIFICATION: {} - {}", notification.subject, notification.body
                );
            }
        }
        Ok(())
    }
}
