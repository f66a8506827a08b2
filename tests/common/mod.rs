//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderpay_backend::config::{JobsConfig, ReconciliationConfig, RetryQueueConfig};
use orderpay_backend::database::memory::{InMemoryLedgerStore, InMemoryRetryTaskStore};
use orderpay_backend::database::repository::{LedgerStore, RetryTaskStore};
use orderpay_backend::payments::error::{PaymentError, PaymentResult};
use orderpay_backend::payments::provider::PaymentGateway;
use orderpay_backend::payments::signature::SignatureVerifier;
use orderpay_backend::payments::types::{
    CreateOrderRequest, EntityRef, GatewayOrder, GatewayPayment, LedgerEntry, PaymentIntent,
    PaymentStatus,
};
use orderpay_backend::payments::utils::hmac_sha256_hex;
use orderpay_backend::services::commerce::LoggingCommerceHooks;
use orderpay_backend::services::invoice::InvoiceDispatcher;
use orderpay_backend::services::notification::{DeliveryError, Notification, Notifier};
use orderpay_backend::services::{
    ReconciliationService, RetryQueueProcessor, SideEffectOrchestrator, WebhookProcessor,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn sign(body: &[u8]) -> String {
    hmac_sha256_hex(body, WEBHOOK_SECRET).expect("hmac accepts any key length")
}

pub fn ts(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, GatewayPayment>>,
    broken: Mutex<Vec<String>>,
    slow: Mutex<Vec<String>>,
    pub orders_created: Mutex<Vec<CreateOrderRequest>>,
    pub fail_orders: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_payment(&self, id: &str, order_id: Option<&str>, status: &str, amount_minor: i64) {
        self.payments.lock().unwrap().insert(
            id.to_string(),
            GatewayPayment {
                id: id.to_string(),
                order_id: order_id.map(str::to_string),
                status: status.to_string(),
                amount_minor,
                currency: "INR".to_string(),
                error_description: None,
            },
        );
    }

    /// Lookups of `id` fail with a server error.
    pub fn break_payment(&self, id: &str) {
        self.broken.lock().unwrap().push(id.to_string());
    }

    /// Lookups of `id` hang for a long time.
    pub fn slow_payment(&self, id: &str) {
        self.slow.lock().unwrap().push(id.to_string());
    }

    pub fn created_orders(&self) -> usize {
        self.orders_created.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> &str {
        "razorpay"
    }

    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<GatewayPayment> {
        if self.slow.lock().unwrap().iter().any(|id| id == payment_id) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.broken.lock().unwrap().iter().any(|id| id == payment_id) {
            return Err(PaymentError::ProviderError {
                provider: "razorpay".to_string(),
                message: "HTTP 502 Bad Gateway".to_string(),
                provider_code: Some("502".to_string()),
                retryable: true,
            });
        }
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound {
                resource: "payment".to_string(),
                id: payment_id.to_string(),
            })
    }

    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<GatewayOrder> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(PaymentError::NetworkError {
                message: "connection reset".to_string(),
            });
        }
        let mut orders = self.orders_created.lock().unwrap();
        let order = GatewayOrder {
            id: format!("order_retry_{}", orders.len() + 1),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: "created".to_string(),
        };
        orders.push(request);
        Ok(order)
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Records every delivered notification; fails while `failing` is set.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub failing: AtomicBool,
    pub attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("smtp unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn order(id: &str, amount_minor: i64, now: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry::new(EntityRef::order(id), format!("ORD-{}", id), amount_minor, now)
        .with_customer_email("buyer@example.com")
}

pub fn subscription(id: &str, amount_minor: i64, now: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry::new(
        EntityRef::subscription(id),
        format!("SUB-{}", id),
        amount_minor,
        now,
    )
    .with_customer_email("member@example.com")
}

/// Attaches a payment intent in `status`, created and updated at `at`.
pub fn with_intent(
    entry: LedgerEntry,
    status: PaymentStatus,
    gateway_order_id: Option<&str>,
    gateway_payment_id: Option<&str>,
    at: DateTime<Utc>,
) -> LedgerEntry {
    let mut intent = PaymentIntent::new(&entry.entity(), "razorpay", entry.amount_minor, "INR", at);
    intent.status = status;
    intent.gateway_order_id = gateway_order_id.map(str::to_string);
    intent.gateway_payment_id = gateway_payment_id.map(str::to_string);
    if status == PaymentStatus::Paid {
        intent.paid_at = Some(at);
    }
    entry.with_payment(intent)
}

pub fn body(event: &str, payload: JsonValue) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "event": event, "payload": payload }))
        .expect("serializable event")
}

pub fn captured_payload(payment_id: &str, order_id: &str, amount: i64, notes: JsonValue) -> JsonValue {
    serde_json::json!({
        "payment": { "entity": {
            "id": payment_id,
            "order_id": order_id,
            "amount": amount,
            "currency": "INR",
            "status": "captured",
            "notes": notes
        }}
    })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub ledger: Arc<InMemoryLedgerStore>,
    pub tasks: Arc<InMemoryRetryTaskStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub invoices: Arc<InvoiceDispatcher>,
    pub webhooks: Arc<WebhookProcessor>,
    pub retry_queue: Arc<RetryQueueProcessor>,
    pub reconciliation: Arc<ReconciliationService>,
    pub retry_config: RetryQueueConfig,
    pub jobs_config: JobsConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::build(notifier, ReconciliationConfig::default(), false)
    }

    pub fn build(
        notifier: RecordingNotifier,
        reconciliation_config: ReconciliationConfig,
        auto_capture: bool,
    ) -> Self {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let tasks = Arc::new(InMemoryRetryTaskStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(notifier);
        let retry_config = RetryQueueConfig::default();

        let ledger_dyn: Arc<dyn LedgerStore> = ledger.clone();
        let tasks_dyn: Arc<dyn RetryTaskStore> = tasks.clone();
        let notifier_dyn: Arc<dyn Notifier> = notifier.clone();
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

        let invoices = Arc::new(InvoiceDispatcher::new(ledger_dyn.clone(), notifier_dyn));
        let side_effects = Arc::new(SideEffectOrchestrator::new(
            Arc::new(LoggingCommerceHooks::default()),
            invoices.clone(),
            tasks_dyn.clone(),
            &retry_config,
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            SignatureVerifier::new(WEBHOOK_SECRET),
            ledger_dyn.clone(),
            side_effects,
            "razorpay",
            auto_capture,
        ));
        let retry_queue = Arc::new(RetryQueueProcessor::new(
            tasks_dyn,
            invoices.clone(),
            &retry_config,
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            ledger_dyn,
            gateway_dyn,
            &reconciliation_config,
        ));

        Self {
            ledger,
            tasks,
            gateway,
            notifier,
            invoices,
            webhooks,
            retry_queue,
            reconciliation,
            retry_config,
            jobs_config: JobsConfig::default(),
        }
    }

    pub async fn seed(&self, entry: LedgerEntry) {
        self.ledger.insert(entry).await.expect("seed ledger entry");
    }

    pub async fn entry(&self, entity: &EntityRef) -> LedgerEntry {
        self.ledger
            .get(entity)
            .await
            .expect("ledger read")
            .expect("entry exists")
    }

    pub async fn deliver(
        &self,
        event: &str,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> orderpay_backend::services::WebhookAck {
        let raw = body(event, payload);
        let signature = sign(&raw);
        self.webhooks.handle_at(&raw, Some(&signature), now).await
    }
}
