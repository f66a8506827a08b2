mod common;

use chrono::Duration;
use common::*;
use orderpay_backend::config::ReconciliationConfig;
use orderpay_backend::database::repository::LedgerStore;
use orderpay_backend::payments::provider::PaymentGateway;
use orderpay_backend::payments::types::{EntityRef, LedgerEntry, PaymentStatus, SubscriptionStatus};
use orderpay_backend::services::notification::{NotificationType, Notifier};
use orderpay_backend::workers::payment_jobs::{
    DailyReconciliationJob, OrderPaymentRetryJob, PaymentReminderJob, StalePaymentExpiryJob,
    SubscriptionPaymentRetryJob, DAILY_RECONCILIATION, EXPIRED_REASON, PAYMENT_REMINDER,
    STALE_PAYMENT_EXPIRY,
};
use orderpay_backend::workers::scheduler::{JobScheduler, ScheduledJob};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const NOW: &str = "2024-03-10T12:00:00Z";

fn ledger(h: &Harness) -> Arc<dyn LedgerStore> {
    h.ledger.clone()
}

fn notifier(h: &Harness) -> Arc<dyn Notifier> {
    h.notifier.clone()
}

fn gateway(h: &Harness) -> Arc<dyn PaymentGateway> {
    h.gateway.clone()
}

fn subscription_retry(h: &Harness) -> SubscriptionPaymentRetryJob {
    SubscriptionPaymentRetryJob::new(ledger(h), gateway(h), notifier(h), h.jobs_config.clone())
}

fn failed_subscription(id: &str, retries: u32, at: chrono::DateTime<chrono::Utc>) -> LedgerEntry {
    let mut entry = with_intent(
        subscription(id, 49900, at),
        PaymentStatus::Failed,
        Some("order_old"),
        Some("pay_old"),
        at,
    );
    entry.retry_count = retries;
    if let Some(payment) = entry.payment.as_mut() {
        payment.failure_reason = Some("card declined".to_string());
    }
    entry
}

#[tokio::test]
async fn subscription_retry_creates_new_gateway_order() {
    let h = Harness::new();
    let now = ts(NOW);
    h.seed(failed_subscription("S1", 0, now - Duration::hours(5))).await;

    let report = subscription_retry(&h).run_at(now).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.succeeded, 1);

    let orders = h.gateway.orders_created.lock().unwrap().clone();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].receipt, "SUB-S1-retry-1");
    assert_eq!(orders[0].amount_minor, 49900);

    let entry = h.entry(&EntityRef::subscription("S1")).await;
    let payment = entry.payment.clone().expect("intent exists");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.gateway_order_id.as_deref(), Some("order_retry_1"));
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_old"));
    assert_eq!(payment.failure_reason, None);
    assert_eq!(entry.retry_count, 1);
    assert_eq!(entry.last_retry_at, Some(now));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::PaymentRetry);
    assert_eq!(sent[0].recipient, "member@example.com");
}

#[tokio::test]
async fn subscription_retry_ignores_failures_outside_window() {
    let h = Harness::new();
    let now = ts(NOW);
    h.seed(failed_subscription("S1", 0, now - Duration::hours(80))).await;

    let report = subscription_retry(&h).run_at(now).await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(h.gateway.created_orders(), 0);
}

#[tokio::test]
async fn exhausted_subscription_is_marked_payment_failed() {
    let h = Harness::new();
    let now = ts(NOW);
    // exhausted subscriptions are closed out even when the failure is old
    h.seed(failed_subscription("S1", 3, now - Duration::days(10))).await;

    let report = subscription_retry(&h).run_at(now).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.gateway.created_orders(), 0);

    let entry = h.entry(&EntityRef::subscription("S1")).await;
    assert_eq!(entry.subscription_status, Some(SubscriptionStatus::PaymentFailed));
    assert_eq!(entry.payment_status(), Some(PaymentStatus::Failed));
    assert_eq!(
        entry.payment_history.last().map(|h| h.event.as_str()),
        Some("subscription.payment_failed")
    );
    assert_eq!(h.notifier.sent()[0].kind, NotificationType::FinalPaymentFailure);

    // terminal subscriptions are not picked up again
    let again = subscription_retry(&h).run_at(now).await.unwrap();
    assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn exhausted_subscription_is_found_past_a_full_batch() {
    let h = Harness::new();
    let now = ts(NOW);
    // older failures with retries left fill the first batch
    h.seed(failed_subscription("S1", 0, now - Duration::days(10))).await;
    h.seed(failed_subscription("S2", 0, now - Duration::days(9))).await;
    h.seed(failed_subscription("S3", 3, now - Duration::hours(2))).await;

    let mut config = h.jobs_config.clone();
    config.batch_size = 2;
    let job = SubscriptionPaymentRetryJob::new(ledger(&h), gateway(&h), notifier(&h), config);
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.succeeded, 1);

    assert_eq!(
        h.entry(&EntityRef::subscription("S3")).await.subscription_status,
        Some(SubscriptionStatus::PaymentFailed)
    );
    for id in ["S1", "S2"] {
        let entry = h.entry(&EntityRef::subscription(id)).await;
        assert_ne!(entry.subscription_status, Some(SubscriptionStatus::PaymentFailed));
        assert_eq!(entry.retry_count, 0);
    }
}

#[tokio::test]
async fn gateway_failure_leaves_subscription_untouched() {
    let h = Harness::new();
    let now = ts(NOW);
    h.seed(failed_subscription("S1", 1, now - Duration::hours(5))).await;
    h.gateway.fail_orders.store(true, Ordering::SeqCst);

    let report = subscription_retry(&h).run_at(now).await.unwrap();
    assert_eq!(report.failed, 1);

    let entry = h.entry(&EntityRef::subscription("S1")).await;
    assert_eq!(entry.payment_status(), Some(PaymentStatus::Failed));
    assert_eq!(entry.retry_count, 1);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn order_retry_sends_notice_and_counts_attempt() {
    let h = Harness::new();
    let now = ts(NOW);
    h.seed(with_intent(
        order("O1", 2500, now),
        PaymentStatus::Failed,
        Some("order_G1"),
        Some("P1"),
        now - Duration::hours(2),
    ))
    .await;
    // outside the 24h window
    h.seed(with_intent(
        order("O2", 2500, now),
        PaymentStatus::Failed,
        Some("order_G2"),
        Some("P2"),
        now - Duration::hours(30),
    ))
    .await;

    let job = OrderPaymentRetryJob::new(ledger(&h), notifier(&h), h.jobs_config.clone());
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.succeeded, 1);

    let entry = h.entry(&EntityRef::order("O1")).await;
    assert_eq!(entry.retry_count, 1);
    assert_eq!(entry.payment_status(), Some(PaymentStatus::Failed));
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::OrderPaymentRetry);
}

#[tokio::test]
async fn order_retry_counts_attempt_even_when_notice_fails() {
    let h = Harness::with_notifier(RecordingNotifier::failing());
    let now = ts(NOW);
    h.seed(with_intent(
        order("O1", 2500, now),
        PaymentStatus::Failed,
        None,
        None,
        now - Duration::hours(1),
    ))
    .await;

    let job = OrderPaymentRetryJob::new(ledger(&h), notifier(&h), h.jobs_config.clone());
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.entry(&EntityRef::order("O1")).await.retry_count, 1);
}

#[tokio::test]
async fn reminder_is_sent_once_inside_window() {
    let h = Harness::new();
    let now = ts(NOW);
    let pending = |id: &str, age: Duration| {
        with_intent(
            order(id, 1000, now - age),
            PaymentStatus::Pending,
            Some("order_G"),
            None,
            now - age,
        )
    };
    h.seed(pending("O1", Duration::hours(2))).await;
    // too fresh
    h.seed(pending("O2", Duration::minutes(20))).await;
    // too old
    h.seed(pending("O3", Duration::hours(30))).await;

    let job = PaymentReminderJob::new(ledger(&h), notifier(&h), h.jobs_config.clone());
    assert_eq!(job.name(), PAYMENT_REMINDER);
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.succeeded, 1);

    let entry = h.entry(&EntityRef::order("O1")).await;
    assert_eq!(entry.reminder_sent_at, Some(now));
    assert_eq!(h.notifier.sent()[0].kind, NotificationType::PaymentReminder);

    let again = job.run_at(now + Duration::minutes(10)).await.unwrap();
    assert_eq!(again.examined, 0);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn undelivered_reminder_is_retried_next_run() {
    let h = Harness::with_notifier(RecordingNotifier::failing());
    let now = ts(NOW);
    let at = now - Duration::hours(2);
    h.seed(with_intent(order("O1", 1000, at), PaymentStatus::Pending, Some("order_G"), None, at))
        .await;

    let job = PaymentReminderJob::new(ledger(&h), notifier(&h), h.jobs_config.clone());
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.entry(&EntityRef::order("O1")).await.reminder_sent_at, None);

    h.notifier.set_failing(false);
    let later = now + Duration::minutes(30);
    let report = job.run_at(later).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.entry(&EntityRef::order("O1")).await.reminder_sent_at, Some(later));
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn stale_pending_payments_expire() {
    let h = Harness::new();
    let now = ts(NOW);
    let old = now - Duration::days(8);
    h.seed(with_intent(subscription("S1", 49900, old), PaymentStatus::Pending, Some("order_S1"), None, old))
        .await;
    h.seed(with_intent(order("O1", 1000, old), PaymentStatus::Authorized, Some("order_O1"), Some("P1"), old))
        .await;
    h.seed(with_intent(order("O2", 1000, old), PaymentStatus::Paid, Some("order_O2"), Some("P2"), old))
        .await;
    let fresh = now - Duration::days(2);
    h.seed(with_intent(order("O3", 1000, fresh), PaymentStatus::Pending, None, None, fresh))
        .await;

    let job = StalePaymentExpiryJob::new(ledger(&h), h.jobs_config.clone());
    assert_eq!(job.name(), STALE_PAYMENT_EXPIRY);
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.succeeded, 2);

    let sub = h.entry(&EntityRef::subscription("S1")).await;
    assert_eq!(sub.payment_status(), Some(PaymentStatus::Failed));
    assert_eq!(sub.subscription_status, Some(SubscriptionStatus::Expired));
    assert_eq!(
        sub.payment.and_then(|p| p.failure_reason).as_deref(),
        Some(EXPIRED_REASON)
    );

    let authorized = h.entry(&EntityRef::order("O1")).await;
    assert_eq!(authorized.payment_status(), Some(PaymentStatus::Failed));
    assert_eq!(authorized.subscription_status, None);

    assert_eq!(
        h.entry(&EntityRef::order("O2")).await.payment_status(),
        Some(PaymentStatus::Paid)
    );
    assert_eq!(
        h.entry(&EntityRef::order("O3")).await.payment_status(),
        Some(PaymentStatus::Pending)
    );
}

#[tokio::test]
async fn daily_reconciliation_covers_previous_day() {
    let h = Harness::new();
    let now = ts(NOW);
    let at = now - Duration::hours(6);
    h.seed(with_intent(order("O1", 1000, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.seed(with_intent(order("O2", 1000, at), PaymentStatus::Authorized, Some("G2"), Some("P2"), at))
        .await;
    h.gateway.add_payment("P1", Some("G1"), "captured", 1000);
    h.gateway.add_payment("P2", Some("G2"), "refunded", 1000);

    let job = DailyReconciliationJob::new(
        h.reconciliation.clone(),
        &h.jobs_config,
        &ReconciliationConfig::default(),
    );
    let report = job.run_at(now).await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    // scheduled runs report only unless auto-fix is configured
    assert_eq!(
        h.entry(&EntityRef::order("O2")).await.payment_status(),
        Some(PaymentStatus::Authorized)
    );
}

#[tokio::test]
async fn scheduler_runs_registered_jobs_by_name() {
    let h = Harness::new();
    let now = ts(NOW);
    let old = now - Duration::days(8);
    h.seed(with_intent(order("O1", 1000, old), PaymentStatus::Pending, None, None, old))
        .await;

    let mut scheduler = JobScheduler::new().await.unwrap();
    scheduler.register(Arc::new(StalePaymentExpiryJob::new(
        ledger(&h),
        h.jobs_config.clone(),
    )));
    scheduler.register(Arc::new(DailyReconciliationJob::new(
        h.reconciliation.clone(),
        &h.jobs_config,
        &ReconciliationConfig::default(),
    )));

    let names: Vec<String> = scheduler.list().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec![DAILY_RECONCILIATION, STALE_PAYMENT_EXPIRY]);

    let report = scheduler.run_now(STALE_PAYMENT_EXPIRY, now).await.unwrap();
    assert_eq!(report.succeeded, 1);
    let status = scheduler.status(STALE_PAYMENT_EXPIRY).await.unwrap();
    assert_eq!(status.last_run_at, Some(now));
    assert_eq!(status.last_report, Some(report));
    assert!(!status.running);

    assert!(scheduler.run_now("no-such-job", now).await.is_err());
}
