//! Scheduled payment retry, reminder, expiry and reconciliation jobs.
//!
//! Every status change goes through a guarded ledger update, so a webhook
//! that lands while a job is running always wins over the job's write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{JobsConfig, ReconciliationConfig};
use crate::database::repository::{GuardedUpdate, LedgerFilter, LedgerPatch, LedgerStore, StatusGuard};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateOrderRequest, EntityType, LedgerEntry, PaymentHistoryEntry, PaymentStatus,
    SubscriptionStatus,
};
use crate::services::notification::{Notification, NotificationType, Notifier};
use crate::services::reconciliation::{ReconciliationRequest, ReconciliationScope, ReconciliationService};
use crate::workers::scheduler::{JobError, JobReport, ScheduledJob};

pub const SUBSCRIPTION_PAYMENT_RETRY: &str = "subscription-payment-retry";
pub const ORDER_PAYMENT_RETRY: &str = "order-payment-retry";
pub const PAYMENT_REMINDER: &str = "payment-reminder";
pub const STALE_PAYMENT_EXPIRY: &str = "stale-payment-expiry";
pub const DAILY_RECONCILIATION: &str = "daily-reconciliation";

pub const EXPIRED_REASON: &str = "Payment expired";

async fn notify(
    notifier: &dyn Notifier,
    kind: NotificationType,
    entry: &LedgerEntry,
    subject: String,
    body: String,
) -> bool {
    let result = match Notification::for_entry(kind, entry, subject, body) {
        Ok(notification) => notifier.send(&notification).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(entity = %entry.entity(), kind = kind.as_str(), error = %e, "notification not delivered");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// subscription-payment-retry
// ---------------------------------------------------------------------------

pub struct SubscriptionPaymentRetryJob {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    config: JobsConfig,
}

impl SubscriptionPaymentRetryJob {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: JobsConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            config,
        }
    }

    async fn retry(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> Result<bool, JobError> {
        let attempt = entry.retry_count + 1;
        let (amount_minor, currency) = match &entry.payment {
            Some(p) => (p.amount_minor, p.currency.clone()),
            None => (entry.amount_minor, entry.currency.clone()),
        };

        let order = self
            .gateway
            .create_order(CreateOrderRequest {
                amount_minor,
                currency,
                receipt: format!("{}-retry-{}", entry.reference_code, attempt),
                notes: json!({
                    "entity_type": entry.entity_type.as_str(),
                    "entity_id": entry.entity_id,
                    "retry_attempt": attempt,
                }),
            })
            .await?;

        let patch = LedgerPatch {
            status: Some(PaymentStatus::Pending),
            gateway_order_id: Some(order.id.clone()),
            clear_failure_reason: true,
            retry_count: Some(attempt),
            last_retry_at: Some(now),
            clear_reminder: true,
            history: Some(
                PaymentHistoryEntry::new("payment.retry", Some(PaymentStatus::Pending), now)
                    .with_note(format!("Retry {} with gateway order {}", attempt, order.id)),
            ),
            ..Default::default()
        };

        match self
            .ledger
            .update(&entry.entity(), &StatusGuard::exactly(PaymentStatus::Failed), patch, now)
            .await?
        {
            GuardedUpdate::Applied(updated) => {
                info!(
                    entity = %entry.entity(),
                    attempt,
                    gateway_order_id = %order.id,
                    "subscription payment retry created"
                );
                notify(
                    self.notifier.as_ref(),
                    NotificationType::PaymentRetry,
                    &updated,
                    format!("Payment retry for {}", updated.reference_code),
                    format!(
                        "Your payment failed. Attempt {} of {} is ready (order {}).",
                        attempt, self.config.max_retry_attempts, order.id
                    ),
                )
                .await;
                Ok(true)
            }
            GuardedUpdate::Rejected { current } => {
                info!(entity = %entry.entity(), current = ?current, "status changed before retry, skipping");
                Ok(false)
            }
        }
    }

    async fn give_up(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> Result<bool, JobError> {
        let patch = LedgerPatch {
            subscription_status: Some(SubscriptionStatus::PaymentFailed),
            history: Some(
                PaymentHistoryEntry::new("subscription.payment_failed", Some(PaymentStatus::Failed), now)
                    .with_note(format!("Gave up after {} retries", entry.retry_count)),
            ),
            ..Default::default()
        };

        match self
            .ledger
            .update(&entry.entity(), &StatusGuard::exactly(PaymentStatus::Failed), patch, now)
            .await?
        {
            GuardedUpdate::Applied(updated) => {
                warn!(entity = %entry.entity(), retries = entry.retry_count, "subscription payment failed permanently");
                notify(
                    self.notifier.as_ref(),
                    NotificationType::FinalPaymentFailure,
                    &updated,
                    format!("Subscription {} payment failed", updated.reference_code),
                    "We could not collect your payment after several attempts.".to_string(),
                )
                .await;
                Ok(true)
            }
            GuardedUpdate::Rejected { .. } => Ok(false),
        }
    }
}

#[async_trait]
impl ScheduledJob for SubscriptionPaymentRetryJob {
    fn name(&self) -> &'static str {
        SUBSCRIPTION_PAYMENT_RETRY
    }

    fn schedule(&self) -> &str {
        &self.config.subscription_retry_cron
    }

    async fn run_at(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let mut report = JobReport::default();
        let max = self.config.max_retry_attempts;

        let retryable = self
            .ledger
            .find(&LedgerFilter {
                entity_type: Some(EntityType::Subscription),
                statuses: vec![PaymentStatus::Failed],
                payment_updated_after: Some(now - self.config.subscription_retry_window),
                retry_count_below: Some(max),
                exclude_terminal_subscriptions: true,
                limit: Some(self.config.batch_size),
                ..Default::default()
            })
            .await?;

        for entry in &retryable {
            report.examined += 1;
            match self.retry(entry, now).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(entity = %entry.entity(), error = %e, "subscription retry failed");
                    report.failed += 1;
                }
            }
        }

        let exhausted = self
            .ledger
            .find(&LedgerFilter {
                entity_type: Some(EntityType::Subscription),
                statuses: vec![PaymentStatus::Failed],
                retry_count_at_least: Some(max),
                exclude_terminal_subscriptions: true,
                limit: Some(self.config.batch_size),
                ..Default::default()
            })
            .await?;

        for entry in &exhausted {
            report.examined += 1;
            match self.give_up(entry, now).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(entity = %entry.entity(), error = %e, "failed to close out subscription");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// order-payment-retry
// ---------------------------------------------------------------------------

pub struct OrderPaymentRetryJob {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    config: JobsConfig,
}

impl OrderPaymentRetryJob {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>, config: JobsConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }
}

#[async_trait]
impl ScheduledJob for OrderPaymentRetryJob {
    fn name(&self) -> &'static str {
        ORDER_PAYMENT_RETRY
    }

    fn schedule(&self) -> &str {
        &self.config.order_retry_cron
    }

    async fn run_at(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let mut report = JobReport::default();
        let entries = self
            .ledger
            .find(&LedgerFilter {
                entity_type: Some(EntityType::Order),
                statuses: vec![PaymentStatus::Failed],
                payment_updated_after: Some(now - self.config.order_retry_window),
                retry_count_below: Some(self.config.max_retry_attempts),
                limit: Some(self.config.batch_size),
                ..Default::default()
            })
            .await?;

        for entry in entries {
            report.examined += 1;
            let attempt = entry.retry_count + 1;
            let patch = LedgerPatch {
                retry_count: Some(attempt),
                last_retry_at: Some(now),
                history: Some(
                    PaymentHistoryEntry::new("payment.retry_notice", Some(PaymentStatus::Failed), now)
                        .with_note(format!("Retry notice {}", attempt)),
                ),
                ..Default::default()
            };

            let updated = match self
                .ledger
                .update(&entry.entity(), &StatusGuard::exactly(PaymentStatus::Failed), patch, now)
                .await
            {
                Ok(GuardedUpdate::Applied(updated)) => updated,
                Ok(GuardedUpdate::Rejected { .. }) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(entity = %entry.entity(), error = %e, "failed to record order retry");
                    report.failed += 1;
                    continue;
                }
            };

            let delivered = notify(
                self.notifier.as_ref(),
                NotificationType::OrderPaymentRetry,
                &updated,
                format!("Complete your payment for {}", updated.reference_code),
                "Your payment did not go through. You can retry from your order page.".to_string(),
            )
            .await;
            if delivered {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// payment-reminder
// ---------------------------------------------------------------------------

pub struct PaymentReminderJob {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    config: JobsConfig,
}

impl PaymentReminderJob {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>, config: JobsConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }
}

#[async_trait]
impl ScheduledJob for PaymentReminderJob {
    fn name(&self) -> &'static str {
        PAYMENT_REMINDER
    }

    fn schedule(&self) -> &str {
        &self.config.reminder_cron
    }

    async fn run_at(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let mut report = JobReport::default();
        let entries = self
            .ledger
            .find(&LedgerFilter {
                statuses: vec![PaymentStatus::Pending],
                payment_created_before: Some(now - self.config.reminder_after),
                payment_created_after: Some(now - self.config.reminder_max_age),
                reminder_not_sent: true,
                limit: Some(self.config.batch_size),
                ..Default::default()
            })
            .await?;

        for entry in entries {
            report.examined += 1;
            // Stamped only after delivery so a failed send is retried next run.
            if !notify(
                self.notifier.as_ref(),
                NotificationType::PaymentReminder,
                &entry,
                format!("Payment pending for {}", entry.reference_code),
                "Your payment is still pending. Complete it to avoid cancellation.".to_string(),
            )
            .await
            {
                report.failed += 1;
                continue;
            }

            let patch = LedgerPatch {
                reminder_sent_at: Some(now),
                ..Default::default()
            };
            match self
                .ledger
                .update(&entry.entity(), &StatusGuard::exactly(PaymentStatus::Pending), patch, now)
                .await
            {
                Ok(GuardedUpdate::Applied(_)) => report.succeeded += 1,
                Ok(GuardedUpdate::Rejected { current }) => {
                    info!(entity = %entry.entity(), status = ?current, "payment settled while reminding");
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(entity = %entry.entity(), error = %e, "failed to stamp reminder");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// stale-payment-expiry
// ---------------------------------------------------------------------------

pub struct StalePaymentExpiryJob {
    ledger: Arc<dyn LedgerStore>,
    config: JobsConfig,
}

impl StalePaymentExpiryJob {
    pub fn new(ledger: Arc<dyn LedgerStore>, config: JobsConfig) -> Self {
        Self { ledger, config }
    }
}

#[async_trait]
impl ScheduledJob for StalePaymentExpiryJob {
    fn name(&self) -> &'static str {
        STALE_PAYMENT_EXPIRY
    }

    fn schedule(&self) -> &str {
        &self.config.expiry_cron
    }

    async fn run_at(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let open = [PaymentStatus::Pending, PaymentStatus::Authorized];
        let mut report = JobReport::default();
        let entries = self
            .ledger
            .find(&LedgerFilter {
                statuses: open.to_vec(),
                payment_created_before: Some(now - self.config.pending_expiry),
                limit: Some(self.config.batch_size),
                ..Default::default()
            })
            .await?;

        for entry in entries {
            report.examined += 1;
            let patch = LedgerPatch {
                status: Some(PaymentStatus::Failed),
                failure_reason: Some(EXPIRED_REASON.to_string()),
                subscription_status: Some(SubscriptionStatus::Expired),
                history: Some(
                    PaymentHistoryEntry::new("payment.expired", Some(PaymentStatus::Failed), now)
                        .with_payment_id(entry.gateway_payment_id().map(str::to_string))
                        .with_note(EXPIRED_REASON),
                ),
                ..Default::default()
            };

            match self
                .ledger
                .update(&entry.entity(), &StatusGuard::from_statuses(&open, false), patch, now)
                .await
            {
                Ok(GuardedUpdate::Applied(_)) => {
                    info!(entity = %entry.entity(), "stale payment expired");
                    report.succeeded += 1;
                }
                Ok(GuardedUpdate::Rejected { current }) => {
                    info!(entity = %entry.entity(), current = ?current, "payment moved on, not expiring");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(entity = %entry.entity(), error = %e, "failed to expire payment");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// daily-reconciliation
// ---------------------------------------------------------------------------

pub struct DailyReconciliationJob {
    reconciliation: Arc<ReconciliationService>,
    schedule: String,
    auto_fix: bool,
}

impl DailyReconciliationJob {
    pub fn new(
        reconciliation: Arc<ReconciliationService>,
        jobs: &JobsConfig,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            reconciliation,
            schedule: jobs.reconciliation_cron.clone(),
            auto_fix: config.scheduled_auto_fix,
        }
    }
}

#[async_trait]
impl ScheduledJob for DailyReconciliationJob {
    fn name(&self) -> &'static str {
        DAILY_RECONCILIATION
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn run_at(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let request = ReconciliationRequest {
            start_date: now - chrono::Duration::hours(24),
            end_date: now,
            scope: ReconciliationScope::All,
            auto_fix: self.auto_fix,
        };
        let report = self.reconciliation.reconcile_at(&request, now).await?;

        if report.unmatched > 0 {
            warn!(
                unmatched = report.unmatched,
                match_rate = report.match_rate,
                "daily reconciliation found discrepancies"
            );
        }
        Ok(JobReport {
            examined: report.total_records,
            succeeded: report.matched,
            failed: report.unmatched,
            skipped: 0,
        })
    }
}
