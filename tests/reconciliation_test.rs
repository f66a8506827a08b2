mod common;

use chrono::Duration;
use common::*;
use orderpay_backend::config::ReconciliationConfig;
use orderpay_backend::payments::types::{EntityRef, EntityType, PaymentStatus};
use orderpay_backend::services::reconciliation::{
    to_csv, DiscrepancyIssue, ReconciliationDiscrepancy, ReconciliationError, ReconciliationReport,
    ReconciliationRequest, ReconciliationScope, CSV_HEADER,
};

const NOW: &str = "2024-03-02T00:00:00Z";

fn window(auto_fix: bool) -> ReconciliationRequest {
    ReconciliationRequest {
        start_date: ts(NOW) - Duration::days(1),
        end_date: ts(NOW),
        scope: ReconciliationScope::All,
        auto_fix,
    }
}

fn record<'a>(report: &'a ReconciliationReport, id: &str) -> &'a ReconciliationDiscrepancy {
    report
        .discrepancies
        .iter()
        .find(|d| d.id == id)
        .unwrap_or_else(|| panic!("no record for {}", id))
}

#[tokio::test]
async fn matching_records_produce_full_match_rate() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(3);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    // authorized at the gateway still counts as paid internally
    h.seed(with_intent(order("O2", 5000, at), PaymentStatus::Paid, Some("G2"), Some("P2"), at))
        .await;
    h.gateway.add_payment("P1", Some("G1"), "captured", 10500);
    h.gateway.add_payment("P2", Some("G2"), "authorized", 5000);

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    assert_eq!(report.total_records, 2);
    assert_eq!(report.matched, 2);
    assert_eq!(report.unmatched, 0);
    assert_eq!(report.match_rate, 100.0);
    assert!(report.discrepancies.iter().all(|d| d.matched && d.issues.is_empty()));
}

#[tokio::test]
async fn empty_window_reports_hundred_percent() {
    let h = Harness::new();
    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    assert_eq!(report.total_records, 0);
    assert_eq!(report.match_rate, 100.0);
}

#[tokio::test]
async fn status_mismatch_is_corrected_with_auto_fix() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Authorized, Some("G1"), Some("P1"), at))
        .await;
    h.gateway.add_payment("P1", Some("G1"), "captured", 10500);

    let dry = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    let dry_record = record(&dry, "O1");
    assert_eq!(dry_record.issues, vec![DiscrepancyIssue::StatusMismatch]);
    assert_eq!(dry_record.fixed_to, None);
    assert_eq!(
        h.entry(&EntityRef::order("O1")).await.payment_status(),
        Some(PaymentStatus::Authorized)
    );

    let fixed = h.reconciliation.reconcile_at(&window(true), ts(NOW)).await.unwrap();
    assert_eq!(record(&fixed, "O1").fixed_to, Some(PaymentStatus::Paid));
    assert_eq!(fixed.fixed, 1);

    let entry = h.entry(&EntityRef::order("O1")).await;
    assert_eq!(entry.payment_status(), Some(PaymentStatus::Paid));
    let last = entry.payment_history.last().expect("fix is recorded");
    assert_eq!(last.event, "reconciliation.auto_fix");
    // auto-fix has no customer-facing side effects
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn amount_within_tolerance_matches() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.seed(with_intent(order("O2", 10500, at), PaymentStatus::Paid, Some("G2"), Some("P2"), at))
        .await;
    h.gateway.add_payment("P1", Some("G1"), "captured", 10550);
    h.gateway.add_payment("P2", Some("G2"), "captured", 10700);

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    assert!(record(&report, "O1").matched);
    assert_eq!(
        record(&report, "O2").issues,
        vec![DiscrepancyIssue::AmountMismatch]
    );
}

#[tokio::test]
async fn tolerance_boundary_is_inclusive() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.seed(with_intent(order("O2", 10500, at), PaymentStatus::Paid, Some("G2"), Some("P2"), at))
        .await;
    // exactly 1.00 apart
    h.gateway.add_payment("P1", Some("G1"), "captured", 10600);
    // 1.01 apart
    h.gateway.add_payment("P2", Some("G2"), "captured", 10601);

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    assert!(record(&report, "O1").matched);
    assert!(record(&report, "O1").issues.is_empty());
    assert!(!record(&report, "O2").matched);
    assert_eq!(
        record(&report, "O2").issues,
        vec![DiscrepancyIssue::AmountMismatch]
    );
}

#[tokio::test]
async fn order_id_linkage_is_checked() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.gateway.add_payment("P1", Some("G_other"), "captured", 10500);

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    assert_eq!(
        record(&report, "O1").issues,
        vec![DiscrepancyIssue::OrderIdMismatch]
    );
}

#[tokio::test]
async fn paid_without_payment_id_is_flagged_and_never_fixed() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), None, at))
        .await;

    let report = h.reconciliation.reconcile_at(&window(true), ts(NOW)).await.unwrap();
    let r = record(&report, "O1");
    assert_eq!(
        r.issues,
        vec![
            DiscrepancyIssue::MissingPaymentId,
            DiscrepancyIssue::PaidWithoutPaymentId
        ]
    );
    assert_eq!(r.fixed_to, None);
    assert!(!r.matched);
}

#[tokio::test]
async fn gateway_errors_are_reported_per_record() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.seed(with_intent(order("O2", 10500, at), PaymentStatus::Paid, Some("G2"), Some("P2"), at))
        .await;
    h.seed(with_intent(order("O3", 10500, at), PaymentStatus::Paid, Some("G3"), Some("P3"), at))
        .await;
    h.gateway.break_payment("P1");
    // P2 is unknown to the gateway
    h.gateway.add_payment("P3", Some("G3"), "captured", 10500);

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    assert_eq!(report.total_records, 3);
    assert_eq!(
        record(&report, "O1").issues,
        vec![DiscrepancyIssue::GatewayApiError]
    );
    assert!(record(&report, "O1").error.is_some());
    assert_eq!(
        record(&report, "O2").issues,
        vec![DiscrepancyIssue::PaymentNotFoundInGateway]
    );
    assert!(record(&report, "O3").matched);
    assert_eq!(report.match_rate, 33.33);
}

#[tokio::test]
async fn slow_lookup_times_out_without_blocking_others() {
    let h = Harness::build(
        RecordingNotifier::new(),
        ReconciliationConfig {
            lookup_timeout: std::time::Duration::from_millis(50),
            ..Default::default()
        },
        false,
    );
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.seed(with_intent(order("O2", 10500, at), PaymentStatus::Paid, Some("G2"), Some("P2"), at))
        .await;
    h.gateway.add_payment("P1", Some("G1"), "captured", 10500);
    h.gateway.add_payment("P2", Some("G2"), "captured", 10500);
    h.gateway.slow_payment("P1");

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    let slow = record(&report, "O1");
    assert_eq!(slow.issues, vec![DiscrepancyIssue::GatewayApiError]);
    assert!(slow.error.as_deref().unwrap_or_default().contains("timed out"));
    assert!(record(&report, "O2").matched);
}

#[tokio::test]
async fn selection_respects_window_scope_and_status() {
    let h = Harness::new();
    let inside = ts(NOW) - Duration::hours(2);
    let outside = ts(NOW) - Duration::days(3);
    h.seed(with_intent(order("O1", 100, inside), PaymentStatus::Paid, None, Some("P1"), inside))
        .await;
    h.seed(with_intent(order("O2", 100, outside), PaymentStatus::Paid, None, Some("P2"), outside))
        .await;
    h.seed(with_intent(order("O3", 100, inside), PaymentStatus::Pending, None, None, inside))
        .await;
    // failed without a payment id never reached the gateway
    h.seed(with_intent(order("O4", 100, inside), PaymentStatus::Failed, None, None, inside))
        .await;
    h.seed(with_intent(order("O5", 100, inside), PaymentStatus::Failed, None, Some("P5"), inside))
        .await;
    h.seed(with_intent(subscription("S1", 100, inside), PaymentStatus::Paid, None, Some("P6"), inside))
        .await;
    h.gateway.add_payment("P1", None, "captured", 100);
    h.gateway.add_payment("P5", None, "failed", 100);
    h.gateway.add_payment("P6", None, "captured", 100);

    let all = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    let mut ids: Vec<&str> = all.discrepancies.iter().map(|d| d.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["O1", "O5", "S1"]);

    let mut orders_only = window(false);
    orders_only.scope = ReconciliationScope::Order;
    let orders = h.reconciliation.reconcile_at(&orders_only, ts(NOW)).await.unwrap();
    assert!(orders
        .discrepancies
        .iter()
        .all(|d| d.entity_type == EntityType::Order));
    assert_eq!(orders.total_records, 2);
}

#[tokio::test]
async fn inverted_window_is_rejected() {
    let h = Harness::new();
    let mut request = window(false);
    std::mem::swap(&mut request.start_date, &mut request.end_date);

    let err = h
        .reconciliation
        .reconcile_at(&request, ts(NOW))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::InvalidRange { .. }));
}

#[tokio::test]
async fn csv_export_lists_every_record() {
    let h = Harness::new();
    let at = ts(NOW) - Duration::hours(2);
    h.seed(with_intent(order("O1", 10500, at), PaymentStatus::Paid, Some("G1"), Some("P1"), at))
        .await;
    h.seed(with_intent(order("O2", 10500, at), PaymentStatus::Paid, Some("G2"), None, at))
        .await;
    h.gateway.add_payment("P1", Some("G1"), "captured", 10500);

    let report = h.reconciliation.reconcile_at(&window(false), ts(NOW)).await.unwrap();
    let csv = to_csv(&report.discrepancies);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines[1], "order,O1,P1,paid,captured,105.00,105.00,Yes,");
    assert_eq!(
        lines[2],
        "order,O2,,paid,,105.00,,No,missing_payment_id; paid_without_payment_id"
    );
}
