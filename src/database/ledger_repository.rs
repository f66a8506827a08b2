use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    GuardedUpdate, LedgerFilter, LedgerPatch, LedgerStore, StatusGuard,
};
use crate::payments::types::{
    EntityRef, EntityType, LedgerEntry, PaymentHistoryEntry, PaymentIntent, SubscriptionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

const LEDGER_COLUMNS: &str = "entity_type, entity_id, reference_code, customer_email, amount_minor, \
     currency, subscription_status, payment, payment_history, retry_count, last_retry_at, \
     reminder_sent_at, created_at, updated_at";

#[derive(Debug, FromRow)]
struct LedgerRow {
    entity_type: String,
    entity_id: String,
    reference_code: String,
    customer_email: Option<String>,
    amount_minor: i64,
    currency: String,
    subscription_status: Option<String>,
    payment: Option<Json<PaymentIntent>>,
    payment_history: Json<Vec<PaymentHistoryEntry>>,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    reminder_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let entity_type = row
            .entity_type
            .parse::<EntityType>()
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;
        let subscription_status = match row.subscription_status.as_deref() {
            Some(raw) => Some(SubscriptionStatus::from_db_status(raw).ok_or_else(|| {
                DatabaseError::serialization(format!("unknown subscription status: {}", raw))
            })?),
            None => None,
        };

        Ok(LedgerEntry {
            entity_type,
            entity_id: row.entity_id,
            reference_code: row.reference_code,
            customer_email: row.customer_email,
            amount_minor: row.amount_minor,
            currency: row.currency,
            subscription_status,
            payment: row.payment.map(|p| p.0),
            payment_history: row.payment_history.0,
            retry_count: row.retry_count.max(0) as u32,
            last_retry_at: row.last_retry_at,
            reminder_sent_at: row.reminder_sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed ledger store
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE {} = $1 LIMIT 1",
            LEDGER_COLUMNS, column
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn write_entry<'e, E>(executor: E, entry: &LedgerEntry) -> Result<(), DatabaseError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let payment = entry.payment.as_ref();
        sqlx::query(
            "UPDATE ledger_entries
             SET customer_email = $3, amount_minor = $4, currency = $5, subscription_status = $6,
                 payment = $7, payment_status = $8, gateway_order_id = $9, gateway_payment_id = $10,
                 payment_created_at = $11, payment_updated_at = $12, payment_history = $13,
                 retry_count = $14, last_retry_at = $15, reminder_sent_at = $16, updated_at = $17
             WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(entry.entity_type.as_str())
        .bind(&entry.entity_id)
        .bind(&entry.customer_email)
        .bind(entry.amount_minor)
        .bind(&entry.currency)
        .bind(entry.subscription_status.map(|s| s.as_str()))
        .bind(payment.map(Json))
        .bind(payment.map(|p| p.status.as_str()))
        .bind(payment.and_then(|p| p.gateway_order_id.as_deref()))
        .bind(payment.and_then(|p| p.gateway_payment_id.as_deref()))
        .bind(payment.map(|p| p.created_at))
        .bind(payment.map(|p| p.updated_at))
        .bind(Json(&entry.payment_history))
        .bind(entry.retry_count as i32)
        .bind(entry.last_retry_at)
        .bind(entry.reminder_sent_at)
        .bind(entry.updated_at)
        .execute(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerRepository {
    async fn get(&self, entity: &EntityRef) -> Result<Option<LedgerEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE entity_type = $1 AND entity_id = $2",
            LEDGER_COLUMNS
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(entity.entity_type.as_str())
            .bind(&entity.entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn insert(&self, entry: LedgerEntry) -> Result<LedgerEntry, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        sqlx::query(
            "INSERT INTO ledger_entries (entity_type, entity_id, reference_code, amount_minor, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (entity_type, entity_id) DO UPDATE SET reference_code = EXCLUDED.reference_code",
        )
        .bind(entry.entity_type.as_str())
        .bind(&entry.entity_id)
        .bind(&entry.reference_code)
        .bind(entry.amount_minor)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Self::write_entry(&mut *tx, &entry).await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(entry)
    }

    async fn resolve_entity_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar::<_, String>(
            "SELECT entity_id FROM ledger_entries
             WHERE entity_type = $1 AND (entity_id = $2 OR reference_code = $2)
             ORDER BY (entity_id = $2) DESC
             LIMIT 1",
        )
        .bind(entity_type.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        self.find_one_where("gateway_order_id", gateway_order_id).await
    }

    async fn find_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        self.find_one_where("gateway_payment_id", gateway_payment_id)
            .await
    }

    async fn update(
        &self,
        entity: &EntityRef,
        guard: &StatusGuard,
        patch: LedgerPatch,
        now: DateTime<Utc>,
    ) -> Result<GuardedUpdate, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Row lock makes the guard check and the write a single step.
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE entity_type = $1 AND entity_id = $2 FOR UPDATE",
            LEDGER_COLUMNS
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(entity.entity_type.as_str())
            .bind(&entity.entity_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| {
                DatabaseError::not_found(entity.entity_type.as_str(), &entity.entity_id)
            })?;
        let mut entry = LedgerEntry::try_from(row)?;

        let current = entry.payment_status();
        if !guard.admits(current) {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(GuardedUpdate::Rejected { current });
        }

        patch.apply_to(&mut entry, now);
        Self::write_entry(&mut *tx, &entry).await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(GuardedUpdate::Applied(entry))
    }

    async fn find(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM ledger_entries WHERE payment IS NOT NULL",
            LEDGER_COLUMNS
        ));

        if let Some(entity_type) = filter.entity_type {
            qb.push(" AND entity_type = ").push_bind(entity_type.as_str());
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter
                .statuses
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();
            qb.push(" AND payment_status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(before) = filter.payment_created_before {
            qb.push(" AND payment_created_at < ").push_bind(before);
        }
        if let Some(after) = filter.payment_created_after {
            qb.push(" AND payment_created_at >= ").push_bind(after);
        }
        if let Some(after) = filter.payment_updated_after {
            qb.push(" AND payment_updated_at >= ").push_bind(after);
        }
        if let Some(before) = filter.payment_updated_before {
            qb.push(" AND payment_updated_at <= ").push_bind(before);
        }
        if let Some(limit) = filter.retry_count_below {
            qb.push(" AND retry_count < ").push_bind(limit as i32);
        }
        if let Some(floor) = filter.retry_count_at_least {
            qb.push(" AND retry_count >= ").push_bind(floor as i32);
        }
        if filter.exclude_terminal_subscriptions {
            qb.push(
                " AND (subscription_status IS NULL OR subscription_status NOT IN ('payment_failed', 'expired'))",
            );
        }
        if filter.reminder_not_sent {
            qb.push(" AND reminder_sent_at IS NULL");
        }
        qb.push(" ORDER BY payment_updated_at ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb
            .build_query_as::<LedgerRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::new(DatabaseErrorKind::Connection {
                    message: e.to_string(),
                })
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentStatus;

    async fn setup_repo() -> Option<PgLedgerRepository> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = crate::database::init_pool(&url, None).await.ok()?;
        sqlx::migrate!("./migrations").run(&pool).await.ok()?;
        Some(PgLedgerRepository::new(pool))
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn guarded_update_is_conditional() {
        let Some(repo) = setup_repo().await else {
            return;
        };
        let now = Utc::now();
        let id = format!("pg-{}", uuid::Uuid::new_v4());
        repo.insert(LedgerEntry::new(EntityRef::order(&id), "ORD-PG", 1000, now))
            .await
            .unwrap();

        let guard = StatusGuard::from_statuses(&[PaymentStatus::Pending], true);
        let first = repo
            .update(
                &EntityRef::order(&id),
                &guard,
                LedgerPatch::status(PaymentStatus::Paid),
                now,
            )
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = repo
            .update(
                &EntityRef::order(&id),
                &guard,
                LedgerPatch::status(PaymentStatus::Paid),
                now,
            )
            .await
            .unwrap();
        assert!(!second.is_applied());
    }
}
