//! Store contracts for the ledger and the durable retry queue.
//!
//! The ledger store is a keyed document store of orders and subscriptions
//! with their embedded payment intents. Every status change goes through
//! [`LedgerStore::update`], which applies a [`LedgerPatch`] only when the
//! persisted payment status passes a [`StatusGuard`]. Implementations must
//! evaluate the guard and write the patch atomically.

use crate::database::error::DatabaseError;
use crate::payments::types::{
    EntityRef, EntityType, LedgerEntry, NewRetryTask, PaymentHistoryEntry, PaymentIntent,
    PaymentStatus, RetryQueueStats, RetryTask, SubscriptionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Which persisted payment statuses an update may proceed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusGuard {
    pub allowed: Vec<PaymentStatus>,
    /// Whether an entry without any payment intent yet passes the guard
    pub allow_missing: bool,
}

impl StatusGuard {
    pub fn any() -> Self {
        Self {
            allowed: PaymentStatus::ALL.to_vec(),
            allow_missing: true,
        }
    }

    pub fn from_statuses(allowed: &[PaymentStatus], allow_missing: bool) -> Self {
        Self {
            allowed: allowed.to_vec(),
            allow_missing,
        }
    }

    pub fn exactly(status: PaymentStatus) -> Self {
        Self::from_statuses(&[status], false)
    }

    pub fn admits(&self, current: Option<PaymentStatus>) -> bool {
        match current {
            Some(status) => self.allowed.contains(&status),
            None => self.allow_missing,
        }
    }
}

/// Field changes applied to a ledger entry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct LedgerPatch {
    pub status: Option<PaymentStatus>,
    pub provider: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub clear_failure_reason: bool,
    pub refund_id: Option<String>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub retry_count: Option<u32>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub clear_reminder: bool,
    pub history: Option<PaymentHistoryEntry>,
}

impl LedgerPatch {
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn history_only(entry: PaymentHistoryEntry) -> Self {
        Self {
            history: Some(entry),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, entry: PaymentHistoryEntry) -> Self {
        self.history = Some(entry);
        self
    }

    fn touches_payment(&self) -> bool {
        self.status.is_some()
            || self.provider.is_some()
            || self.gateway_order_id.is_some()
            || self.gateway_payment_id.is_some()
            || self.amount_minor.is_some()
            || self.currency.is_some()
            || self.paid_at.is_some()
            || self.failure_reason.is_some()
            || self.clear_failure_reason
            || self.refund_id.is_some()
    }

    /// Applies the patch in place. A payment intent is created on demand when
    /// the patch touches payment fields of an entry that has none yet.
    pub fn apply_to(&self, entry: &mut LedgerEntry, now: DateTime<Utc>) {
        if self.touches_payment() {
            let entity = entry.entity();
            let amount = entry.amount_minor;
            let currency = entry.currency.clone();
            let payment = entry.payment.get_or_insert_with(|| {
                PaymentIntent::new(
                    &entity,
                    self.provider.clone().unwrap_or_default(),
                    amount,
                    currency,
                    now,
                )
            });

            if let Some(status) = self.status {
                payment.status = status;
            }
            if let Some(provider) = &self.provider {
                payment.provider = provider.clone();
            }
            if let Some(order_id) = &self.gateway_order_id {
                payment.gateway_order_id = Some(order_id.clone());
            }
            if let Some(payment_id) = &self.gateway_payment_id {
                payment.gateway_payment_id = Some(payment_id.clone());
            }
            if let Some(amount) = self.amount_minor {
                payment.amount_minor = amount;
            }
            if let Some(currency) = &self.currency {
                payment.currency = currency.clone();
            }
            if let Some(paid_at) = self.paid_at {
                payment.paid_at = Some(paid_at);
            }
            if self.clear_failure_reason {
                payment.failure_reason = None;
            }
            if let Some(reason) = &self.failure_reason {
                payment.failure_reason = Some(reason.clone());
            }
            if let Some(refund_id) = &self.refund_id {
                payment.refund_id = Some(refund_id.clone());
            }
            payment.updated_at = now;
        }

        if let Some(status) = self.subscription_status {
            if entry.entity_type == EntityType::Subscription {
                entry.subscription_status = Some(status);
            }
        }
        if let Some(count) = self.retry_count {
            entry.retry_count = count;
        }
        if let Some(at) = self.last_retry_at {
            entry.last_retry_at = Some(at);
        }
        if self.clear_reminder {
            entry.reminder_sent_at = None;
        }
        if let Some(at) = self.reminder_sent_at {
            entry.reminder_sent_at = Some(at);
        }
        if let Some(history) = &self.history {
            entry.payment_history.push(history.clone());
        }
        entry.updated_at = now;
    }
}

/// Result of a guarded update.
#[derive(Debug, Clone)]
pub enum GuardedUpdate {
    Applied(LedgerEntry),
    /// The persisted status did not pass the guard; nothing was written
    Rejected { current: Option<PaymentStatus> },
}

impl GuardedUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, GuardedUpdate::Applied(_))
    }
}

/// "Find with filter" over ledger entries. Empty/`None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub entity_type: Option<EntityType>,
    pub statuses: Vec<PaymentStatus>,
    pub payment_created_before: Option<DateTime<Utc>>,
    pub payment_created_after: Option<DateTime<Utc>>,
    pub payment_updated_after: Option<DateTime<Utc>>,
    pub payment_updated_before: Option<DateTime<Utc>>,
    /// Only entries whose `retry_count` is strictly below this value
    pub retry_count_below: Option<u32>,
    pub retry_count_at_least: Option<u32>,
    pub exclude_terminal_subscriptions: bool,
    pub reminder_not_sent: bool,
    pub limit: Option<i64>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(entity_type) = self.entity_type {
            if entry.entity_type != entity_type {
                return false;
            }
        }

        let payment = match &entry.payment {
            Some(payment) => payment,
            None => return false,
        };

        if !self.statuses.is_empty() && !self.statuses.contains(&payment.status) {
            return false;
        }
        if let Some(before) = self.payment_created_before {
            if payment.created_at >= before {
                return false;
            }
        }
        if let Some(after) = self.payment_created_after {
            if payment.created_at < after {
                return false;
            }
        }
        if let Some(after) = self.payment_updated_after {
            if payment.updated_at < after {
                return false;
            }
        }
        if let Some(before) = self.payment_updated_before {
            if payment.updated_at > before {
                return false;
            }
        }
        if let Some(limit) = self.retry_count_below {
            if entry.retry_count >= limit {
                return false;
            }
        }
        if let Some(floor) = self.retry_count_at_least {
            if entry.retry_count < floor {
                return false;
            }
        }
        if self.exclude_terminal_subscriptions
            && entry
                .subscription_status
                .map(|s| s.is_terminal())
                .unwrap_or(false)
        {
            return false;
        }
        if self.reminder_not_sent && entry.reminder_sent_at.is_some() {
            return false;
        }

        true
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, entity: &EntityRef) -> Result<Option<LedgerEntry>, DatabaseError>;

    /// Registers an order or subscription with the ledger.
    async fn insert(&self, entry: LedgerEntry) -> Result<LedgerEntry, DatabaseError>;

    /// Accepts either the entity id or its human-readable reference code.
    async fn resolve_entity_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<String>, DatabaseError>;

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError>;

    async fn find_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError>;

    /// Atomically applies `patch` if the persisted status passes `guard`.
    async fn update(
        &self,
        entity: &EntityRef,
        guard: &StatusGuard,
        patch: LedgerPatch,
        now: DateTime<Utc>,
    ) -> Result<GuardedUpdate, DatabaseError>;

    async fn find(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, DatabaseError>;

    async fn ping(&self) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait RetryTaskStore: Send + Sync {
    async fn enqueue(
        &self,
        task: NewRetryTask,
        now: DateTime<Utc>,
    ) -> Result<RetryTask, DatabaseError>;

    /// Moves up to `limit` due pending tasks to `processing` and returns them.
    /// Tasks left `processing` since before `stale_before` are claimed again.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryTask>, DatabaseError>;

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, DatabaseError>;

    /// Stores a failed attempt. `retry_at = None` makes the task terminally `failed`.
    async fn record_failure(
        &self,
        id: Uuid,
        attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RetryTask, DatabaseError>;

    /// Puts a task back to `pending`, due immediately.
    async fn force_retry(&self, id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<RetryTask>, DatabaseError>;

    async fn stats(&self) -> Result<RetryQueueStats, DatabaseError>;
}
