//! Ledger vs gateway reconciliation
//!
//! Each selected ledger entry is checked independently against a fresh
//! gateway lookup. Lookups run with bounded concurrency and an individual
//! timeout, so one slow payment cannot stall the pass. With `auto_fix` the
//! internal status is overwritten to the gateway's equivalent, conditional on
//! the status that was read.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ReconciliationConfig;
use crate::database::error::DatabaseError;
use crate::database::repository::{GuardedUpdate, LedgerFilter, LedgerPatch, LedgerStore, StatusGuard};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    minor_to_major, EntityType, LedgerEntry, PaymentHistoryEntry, PaymentStatus,
};

// ---------------------------------------------------------------------------
// Status equivalence
// ---------------------------------------------------------------------------

/// Whether an internal status agrees with the gateway's payment status.
pub fn statuses_match(internal: PaymentStatus, external: &str) -> bool {
    let external = external.trim().to_ascii_lowercase();
    match internal {
        PaymentStatus::Pending => matches!(external.as_str(), "created" | "pending"),
        PaymentStatus::Authorized => external == "authorized",
        PaymentStatus::Paid => matches!(external.as_str(), "captured" | "authorized"),
        PaymentStatus::Failed => external == "failed",
        PaymentStatus::Refunded => external == "refunded",
    }
}

/// Internal status a gateway status maps to when correcting drift.
pub fn map_external_status(external: &str) -> Option<PaymentStatus> {
    match external.trim().to_ascii_lowercase().as_str() {
        "captured" => Some(PaymentStatus::Paid),
        "authorized" => Some(PaymentStatus::Authorized),
        "created" | "pending" => Some(PaymentStatus::Pending),
        "failed" => Some(PaymentStatus::Failed),
        "refunded" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Request / report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationScope {
    Order,
    Subscription,
    #[default]
    All,
}

impl ReconciliationScope {
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            ReconciliationScope::Order => Some(EntityType::Order),
            ReconciliationScope::Subscription => Some(EntityType::Subscription),
            ReconciliationScope::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRequest {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub scope: ReconciliationScope,
    #[serde(default)]
    pub auto_fix: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyIssue {
    MissingPaymentId,
    PaidWithoutPaymentId,
    PaymentNotFoundInGateway,
    GatewayApiError,
    StatusMismatch,
    AmountMismatch,
    OrderIdMismatch,
}

impl DiscrepancyIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyIssue::MissingPaymentId => "missing_payment_id",
            DiscrepancyIssue::PaidWithoutPaymentId => "paid_without_payment_id",
            DiscrepancyIssue::PaymentNotFoundInGateway => "payment_not_found_in_gateway",
            DiscrepancyIssue::GatewayApiError => "gateway_api_error",
            DiscrepancyIssue::StatusMismatch => "status_mismatch",
            DiscrepancyIssue::AmountMismatch => "amount_mismatch",
            DiscrepancyIssue::OrderIdMismatch => "order_id_mismatch",
        }
    }
}

/// Per-record reconciliation result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationDiscrepancy {
    pub entity_type: EntityType,
    pub id: String,
    pub transaction_id: Option<String>,
    pub db_status: PaymentStatus,
    pub external_status: Option<String>,
    pub db_amount: Decimal,
    pub external_amount: Option<Decimal>,
    pub issues: Vec<DiscrepancyIssue>,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Status written by auto-fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_to: Option<PaymentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_records: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub fixed: usize,
    /// Every reviewed record; unmatched ones carry their issues
    pub discrepancies: Vec<ReconciliationDiscrepancy>,
    /// Percentage of matched records, two decimals
    pub match_rate: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("start_date {start} is after end_date {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        match err {
            ReconciliationError::InvalidRange { start, end } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidDateRange {
                    from: start.to_rfc3339(),
                    to: end.to_rfc3339(),
                }))
            }
            ReconciliationError::Database(e) => e.into(),
        }
    }
}

pub fn match_rate(matched: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((matched as f64 / total as f64) * 10_000.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ReconciliationService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    amount_tolerance: Decimal,
    lookup_timeout: Duration,
    concurrency: usize,
}

impl ReconciliationService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            amount_tolerance: config.amount_tolerance,
            lookup_timeout: config.lookup_timeout,
            concurrency: config.concurrency.max(1),
        }
    }

    pub async fn reconcile(
        &self,
        request: &ReconciliationRequest,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        self.reconcile_at(request, Utc::now()).await
    }

    pub async fn reconcile_at(
        &self,
        request: &ReconciliationRequest,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        if request.start_date > request.end_date {
            return Err(ReconciliationError::InvalidRange {
                start: request.start_date,
                end: request.end_date,
            });
        }

        let filter = LedgerFilter {
            entity_type: request.scope.entity_type(),
            statuses: vec![
                PaymentStatus::Authorized,
                PaymentStatus::Paid,
                PaymentStatus::Refunded,
                PaymentStatus::Failed,
            ],
            payment_updated_after: Some(request.start_date),
            payment_updated_before: Some(request.end_date),
            ..Default::default()
        };
        let entries: Vec<LedgerEntry> = self
            .ledger
            .find(&filter)
            .await?
            .into_iter()
            .filter(|e| {
                e.payment_status() != Some(PaymentStatus::Failed) || e.gateway_payment_id().is_some()
            })
            .collect();

        info!(
            records = entries.len(),
            start = %request.start_date,
            end = %request.end_date,
            scope = ?request.scope,
            auto_fix = request.auto_fix,
            "reconciliation started"
        );

        let mut records: Vec<ReconciliationDiscrepancy> = stream::iter(entries)
            .map(|entry| self.check_entry(entry, request.auto_fix, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        records.sort_by(|a, b| (a.entity_type.as_str(), &a.id).cmp(&(b.entity_type.as_str(), &b.id)));

        let total = records.len();
        let matched = records.iter().filter(|r| r.matched).count();
        let fixed = records.iter().filter(|r| r.fixed_to.is_some()).count();
        let report = ReconciliationReport {
            start_date: request.start_date,
            end_date: request.end_date,
            total_records: total,
            matched,
            unmatched: total - matched,
            fixed,
            discrepancies: records,
            match_rate: match_rate(matched, total),
            generated_at: now,
        };

        info!(
            total = report.total_records,
            matched = report.matched,
            unmatched = report.unmatched,
            fixed = report.fixed,
            match_rate = report.match_rate,
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn check_entry(
        &self,
        entry: LedgerEntry,
        auto_fix: bool,
        now: DateTime<Utc>,
    ) -> ReconciliationDiscrepancy {
        let (db_status, db_amount, db_order_id) = match &entry.payment {
            Some(p) => (p.status, p.amount_major(), p.gateway_order_id.clone()),
            None => (PaymentStatus::Pending, minor_to_major(entry.amount_minor), None),
        };
        let mut record = ReconciliationDiscrepancy {
            entity_type: entry.entity_type,
            id: entry.entity_id.clone(),
            transaction_id: entry.gateway_payment_id().map(str::to_string),
            db_status,
            external_status: None,
            db_amount,
            external_amount: None,
            issues: Vec::new(),
            matched: false,
            error: None,
            fixed_to: None,
        };

        let Some(payment_id) = record.transaction_id.clone() else {
            record.issues.push(DiscrepancyIssue::MissingPaymentId);
            if db_status == PaymentStatus::Paid {
                record.issues.push(DiscrepancyIssue::PaidWithoutPaymentId);
                warn!(
                    entity = %entry.entity(),
                    severity = "high",
                    "paid record has no gateway payment id"
                );
            }
            return record;
        };

        let lookup = tokio::time::timeout(self.lookup_timeout, self.gateway.fetch_payment(&payment_id)).await;
        let external = match lookup {
            Ok(Ok(payment)) => payment,
            Ok(Err(e)) if e.is_not_found() => {
                record.issues.push(DiscrepancyIssue::PaymentNotFoundInGateway);
                return record;
            }
            Ok(Err(e)) => {
                warn!(payment_id = %payment_id, error = %e, "gateway lookup failed");
                record.issues.push(DiscrepancyIssue::GatewayApiError);
                record.error = Some(e.to_string());
                return record;
            }
            Err(_) => {
                warn!(payment_id = %payment_id, timeout_ms = self.lookup_timeout.as_millis() as u64, "gateway lookup timed out");
                record.issues.push(DiscrepancyIssue::GatewayApiError);
                record.error = Some(format!(
                    "lookup timed out after {}ms",
                    self.lookup_timeout.as_millis()
                ));
                return record;
            }
        };

        record.external_status = Some(external.status.clone());
        record.external_amount = Some(external.amount_major());

        let status_mismatch = !statuses_match(db_status, &external.status);
        if status_mismatch {
            record.issues.push(DiscrepancyIssue::StatusMismatch);
        }
        if (db_amount - external.amount_major()).abs() > self.amount_tolerance {
            record.issues.push(DiscrepancyIssue::AmountMismatch);
        }
        if let (Some(ours), Some(theirs)) = (db_order_id.as_deref(), external.order_id.as_deref()) {
            if ours != theirs {
                record.issues.push(DiscrepancyIssue::OrderIdMismatch);
            }
        }
        record.matched = record.issues.is_empty();

        if status_mismatch && auto_fix {
            if let Some(target) = map_external_status(&external.status) {
                record.fixed_to = self.apply_fix(&entry, db_status, target, now).await;
            }
        }

        record
    }

    async fn apply_fix(
        &self,
        entry: &LedgerEntry,
        from: PaymentStatus,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Option<PaymentStatus> {
        let note = format!("Status corrected from {} to {} by reconciliation", from, to);
        let mut patch = LedgerPatch::status(to).with_history(
            PaymentHistoryEntry::new("reconciliation.auto_fix", Some(to), now)
                .with_payment_id(entry.gateway_payment_id().map(str::to_string))
                .with_note(note),
        );
        if to == PaymentStatus::Paid && entry.payment.as_ref().and_then(|p| p.paid_at).is_none() {
            patch.paid_at = Some(now);
        }

        match self
            .ledger
            .update(&entry.entity(), &StatusGuard::exactly(from), patch, now)
            .await
        {
            Ok(GuardedUpdate::Applied(_)) => {
                info!(entity = %entry.entity(), from = %from, to = %to, "reconciliation corrected status");
                Some(to)
            }
            Ok(GuardedUpdate::Rejected { current }) => {
                info!(entity = %entry.entity(), current = ?current, "status changed during reconciliation, fix skipped");
                None
            }
            Err(e) => {
                warn!(entity = %entry.entity(), error = %e, "failed to apply reconciliation fix");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

pub const CSV_HEADER: &str =
    "Type,ID,Transaction ID,DB Status,Gateway Status,DB Amount,Gateway Amount,Matched,Issues";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(records: &[ReconciliationDiscrepancy]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + records.len() * 96);
    out.push_str(CSV_HEADER);
    out.push('\n');

    for record in records {
        let issues = record
            .issues
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let fields = [
            record.entity_type.as_str().to_string(),
            record.id.clone(),
            record.transaction_id.clone().unwrap_or_default(),
            record.db_status.as_str().to_string(),
            record.external_status.clone().unwrap_or_default(),
            record.db_amount.to_string(),
            record
                .external_amount
                .map(|a| a.to_string())
                .unwrap_or_default(),
            if record.matched { "Yes" } else { "No" }.to_string(),
            issues,
        ];
        let line = fields
            .iter()
            .map(|f| csv_field(f))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalence_table_round_trips() {
        for external in ["captured", "authorized", "created", "pending", "failed", "refunded"] {
            let internal = map_external_status(external).unwrap();
            assert!(
                statuses_match(internal, external),
                "{} maps to {} but does not match it",
                external,
                internal
            );
        }
        assert!(statuses_match(PaymentStatus::Paid, "authorized"));
        assert!(!statuses_match(PaymentStatus::Paid, "refunded"));
        assert_eq!(map_external_status("disputed"), None);
    }

    #[test]
    fn match_rate_is_percentage_with_two_decimals() {
        assert_eq!(match_rate(0, 0), 100.0);
        assert_eq!(match_rate(2, 3), 66.67);
        assert_eq!(match_rate(3, 3), 100.0);
    }

    #[test]
    fn csv_quotes_fields_with_separators() {
        let record = ReconciliationDiscrepancy {
            entity_type: EntityType::Order,
            id: "O,1".to_string(),
            transaction_id: Some("P1".to_string()),
            db_status: PaymentStatus::Paid,
            external_status: Some("failed".to_string()),
            db_amount: Decimal::new(10500, 2),
            external_amount: Some(Decimal::new(10500, 2)),
            issues: vec![DiscrepancyIssue::StatusMismatch, DiscrepancyIssue::OrderIdMismatch],
            matched: false,
            error: None,
            fixed_to: None,
        };
        let csv = to_csv(&[record]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some("order,\"O,1\",P1,paid,failed,105.00,105.00,No,status_mismatch; order_id_mismatch")
        );
    }

    #[test]
    fn request_defaults_to_all_without_auto_fix() {
        let request: ReconciliationRequest = serde_json::from_value(serde_json::json!({
            "start_date": "2024-01-01T00:00:00Z",
            "end_date": "2024-01-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(request.scope, ReconciliationScope::All);
        assert!(!request.auto_fix);
    }
}
