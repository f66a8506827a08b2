use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// Converts a gateway/ledger amount in minor units into major units.
///
/// `amount_major = amount_minor / 100`
pub fn minor_to_major(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, 2)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Order,
    Subscription,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Order => "order",
            EntityType::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "order" | "orders" => Ok(EntityType::Order),
            "subscription" | "subscriptions" => Ok(EntityType::Subscription),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported entity type: {}", value),
                field: Some("entity_type".to_string()),
            }),
        }
    }
}

/// Identity of the aggregate that owns a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    pub fn order(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Order, entity_id)
    }

    pub fn subscription(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Subscription, entity_id)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Authorized,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PaymentStatus::Pending),
            "authorized" => Some(PaymentStatus::Authorized),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingPayment,
    Active,
    PaymentFailed,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingPayment => "pending_payment",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PaymentFailed => "payment_failed",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending_payment" => Some(SubscriptionStatus::PendingPayment),
            "active" => Some(SubscriptionStatus::Active),
            "payment_failed" => Some(SubscriptionStatus::PaymentFailed),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    /// Terminal states are never picked up by the payment retry jobs again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::PaymentFailed | SubscriptionStatus::Expired
        )
    }
}

/// Internal record of a single payment's lifecycle for one order or subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        entity: &EntityRef,
        provider: impl Into<String>,
        amount_minor: i64,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type: entity.entity_type,
            entity_id: entity.entity_id.clone(),
            gateway_order_id: None,
            gateway_payment_id: None,
            amount_minor,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            provider: provider.into(),
            paid_at: None,
            failure_reason: None,
            refund_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn amount_major(&self) -> Decimal {
        minor_to_major(self.amount_minor)
    }
}

/// Audit trail entry kept alongside the ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentHistoryEntry {
    pub event: String,
    pub status: Option<PaymentStatus>,
    pub gateway_payment_id: Option<String>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PaymentHistoryEntry {
    pub fn new(event: impl Into<String>, status: Option<PaymentStatus>, now: DateTime<Utc>) -> Self {
        Self {
            event: event.into(),
            status,
            gateway_payment_id: None,
            note: None,
            recorded_at: now,
        }
    }

    pub fn with_payment_id(mut self, payment_id: Option<String>) -> Self {
        self.gateway_payment_id = payment_id;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// The document the ledger store keeps per order or subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub reference_code: String,
    pub customer_email: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub subscription_status: Option<SubscriptionStatus>,
    pub payment: Option<PaymentIntent>,
    pub payment_history: Vec<PaymentHistoryEntry>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        entity: EntityRef,
        reference_code: impl Into<String>,
        amount_minor: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let subscription_status = match entity.entity_type {
            EntityType::Subscription => Some(SubscriptionStatus::PendingPayment),
            EntityType::Order => None,
        };
        Self {
            entity_type: entity.entity_type,
            entity_id: entity.entity_id,
            reference_code: reference_code.into(),
            customer_email: None,
            amount_minor,
            currency: "INR".to_string(),
            subscription_status,
            payment: None,
            payment_history: Vec::new(),
            retry_count: 0,
            last_retry_at: None,
            reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    pub fn with_payment(mut self, payment: PaymentIntent) -> Self {
        self.payment = Some(payment);
        self
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_id.clone())
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.payment.as_ref().map(|p| p.status)
    }

    pub fn gateway_payment_id(&self) -> Option<&str> {
        self.payment
            .as_ref()
            .and_then(|p| p.gateway_payment_id.as_deref())
    }
}

/// Inbound webhook body as delivered by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: JsonValue,
}

/// Event types the router knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    PaymentAuthorized,
    PaymentCaptured,
    PaymentFailed,
    PaymentPending,
    OrderPaid,
    RefundCreated,
    RefundProcessed,
    RefundFailed,
    SettlementProcessed,
    DisputeCreated,
    DisputeWon,
    DisputeLost,
}

impl GatewayEventKind {
    pub fn parse(event: &str) -> Option<Self> {
        match event.trim() {
            "payment.authorized" => Some(GatewayEventKind::PaymentAuthorized),
            "payment.captured" => Some(GatewayEventKind::PaymentCaptured),
            "payment.failed" => Some(GatewayEventKind::PaymentFailed),
            "payment.pending" => Some(GatewayEventKind::PaymentPending),
            "order.paid" => Some(GatewayEventKind::OrderPaid),
            "refund.created" => Some(GatewayEventKind::RefundCreated),
            "refund.processed" => Some(GatewayEventKind::RefundProcessed),
            "refund.failed" => Some(GatewayEventKind::RefundFailed),
            "settlement.processed" => Some(GatewayEventKind::SettlementProcessed),
            "dispute.created" => Some(GatewayEventKind::DisputeCreated),
            "dispute.won" => Some(GatewayEventKind::DisputeWon),
            "dispute.lost" => Some(GatewayEventKind::DisputeLost),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayEventKind::PaymentAuthorized => "payment.authorized",
            GatewayEventKind::PaymentCaptured => "payment.captured",
            GatewayEventKind::PaymentFailed => "payment.failed",
            GatewayEventKind::PaymentPending => "payment.pending",
            GatewayEventKind::OrderPaid => "order.paid",
            GatewayEventKind::RefundCreated => "refund.created",
            GatewayEventKind::RefundProcessed => "refund.processed",
            GatewayEventKind::RefundFailed => "refund.failed",
            GatewayEventKind::SettlementProcessed => "settlement.processed",
            GatewayEventKind::DisputeCreated => "dispute.created",
            GatewayEventKind::DisputeWon => "dispute.won",
            GatewayEventKind::DisputeLost => "dispute.lost",
        }
    }

    /// Disputes and settlements are recorded but never move payment status.
    pub fn is_audit_only(&self) -> bool {
        matches!(
            self,
            GatewayEventKind::RefundCreated
                | GatewayEventKind::RefundFailed
                | GatewayEventKind::SettlementProcessed
                | GatewayEventKind::DisputeCreated
                | GatewayEventKind::DisputeWon
                | GatewayEventKind::DisputeLost
        )
    }
}

/// Authoritative payment record as reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
    pub error_description: Option<String>,
}

impl GatewayPayment {
    pub fn amount_major(&self) -> Decimal {
        minor_to_major(self.amount_minor)
    }
}

/// Gateway-side order created when a payment is retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetryTaskType {
    Invoice,
    CreditNote,
    SubscriptionInvoice,
}

impl RetryTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryTaskType::Invoice => "invoice",
            RetryTaskType::CreditNote => "credit_note",
            RetryTaskType::SubscriptionInvoice => "subscription_invoice",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "invoice" => Some(RetryTaskType::Invoice),
            "credit_note" => Some(RetryTaskType::CreditNote),
            "subscription_invoice" => Some(RetryTaskType::SubscriptionInvoice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetryTaskStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl RetryTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryTaskStatus::Pending => "pending",
            RetryTaskStatus::Processing => "processing",
            RetryTaskStatus::Sent => "sent",
            RetryTaskStatus::Failed => "failed",
        }
    }

    pub fn from_db_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RetryTaskStatus::Pending),
            "processing" => Some(RetryTaskStatus::Processing),
            "sent" => Some(RetryTaskStatus::Sent),
            "failed" => Some(RetryTaskStatus::Failed),
            _ => None,
        }
    }
}

/// Durable side-effect task owned by the retry queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryTask {
    pub id: Uuid,
    pub task_type: RetryTaskType,
    pub target_type: EntityType,
    pub target_id: String,
    pub recipient_email: String,
    pub status: RetryTaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRetryTask {
    pub task_type: RetryTaskType,
    pub target: EntityRef,
    pub recipient_email: String,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryQueueStats {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
}
