use crate::database::error::DatabaseError;
use crate::database::repository::RetryTaskStore;
use crate::payments::types::{
    EntityType, NewRetryTask, RetryQueueStats, RetryTask, RetryTaskStatus, RetryTaskType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, task_type, target_type, target_id, recipient_email, status, \
     attempts, max_attempts, last_error, scheduled_for, created_at, updated_at";

#[derive(Debug, FromRow)]
struct RetryTaskRow {
    id: Uuid,
    task_type: String,
    target_type: String,
    target_id: String,
    recipient_email: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    scheduled_for: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RetryTaskRow> for RetryTask {
    type Error = DatabaseError;

    fn try_from(row: RetryTaskRow) -> Result<Self, Self::Error> {
        Ok(RetryTask {
            id: row.id,
            task_type: RetryTaskType::from_db_status(&row.task_type).ok_or_else(|| {
                DatabaseError::serialization(format!("unknown task type: {}", row.task_type))
            })?,
            target_type: row
                .target_type
                .parse::<EntityType>()
                .map_err(|e| DatabaseError::serialization(e.to_string()))?,
            target_id: row.target_id,
            recipient_email: row.recipient_email,
            status: RetryTaskStatus::from_db_status(&row.status).ok_or_else(|| {
                DatabaseError::serialization(format!("unknown task status: {}", row.status))
            })?,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            last_error: row.last_error,
            scheduled_for: row.scheduled_for,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed retry queue
pub struct PgRetryTaskRepository {
    pool: PgPool,
}

impl PgRetryTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_updated(
        &self,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, RetryTaskRow, sqlx::postgres::PgArguments>,
        id: Uuid,
    ) -> Result<RetryTask, DatabaseError> {
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("retry_task", id.to_string()))?;
        RetryTask::try_from(row)
    }
}

#[async_trait]
impl RetryTaskStore for PgRetryTaskRepository {
    async fn enqueue(
        &self,
        task: NewRetryTask,
        now: DateTime<Utc>,
    ) -> Result<RetryTask, DatabaseError> {
        let sql = format!(
            "INSERT INTO retry_tasks (id, task_type, target_type, target_id, recipient_email, status,
                                      attempts, max_attempts, last_error, scheduled_for, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $8, $9, $9)
             RETURNING {}",
            TASK_COLUMNS
        );
        let row = sqlx::query_as::<_, RetryTaskRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(task.task_type.as_str())
            .bind(task.target.entity_type.as_str())
            .bind(&task.target.entity_id)
            .bind(&task.recipient_email)
            .bind(task.max_attempts as i32)
            .bind(&task.last_error)
            .bind(task.scheduled_for)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        RetryTask::try_from(row)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryTask>, DatabaseError> {
        let sql = format!(
            "UPDATE retry_tasks SET status = 'processing', updated_at = $1
             WHERE id IN (
                 SELECT id FROM retry_tasks
                 WHERE (status = 'pending' AND scheduled_for <= $1)
                    OR (status = 'processing' AND updated_at < $3)
                 ORDER BY scheduled_for ASC
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, RetryTaskRow>(&sql)
            .bind(now)
            .bind(limit as i64)
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(RetryTask::try_from).collect()
    }

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, DatabaseError> {
        let sql = format!(
            "UPDATE retry_tasks SET status = 'sent', updated_at = $2 WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        );
        self.fetch_updated(sqlx::query_as(&sql).bind(id).bind(now), id)
            .await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RetryTask, DatabaseError> {
        let sql = format!(
            "UPDATE retry_tasks
             SET attempts = $2, last_error = $3,
                 status = CASE WHEN $4::timestamptz IS NULL THEN 'failed' ELSE 'pending' END,
                 scheduled_for = COALESCE($4, scheduled_for),
                 updated_at = $5
             WHERE id = $1
             RETURNING {}",
            TASK_COLUMNS
        );
        self.fetch_updated(
            sqlx::query_as(&sql)
                .bind(id)
                .bind(attempts as i32)
                .bind(error)
                .bind(retry_at)
                .bind(now),
            id,
        )
        .await
    }

    async fn force_retry(&self, id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, DatabaseError> {
        let sql = format!(
            "UPDATE retry_tasks SET status = 'pending', scheduled_for = $2, updated_at = $2
             WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        );
        self.fetch_updated(sqlx::query_as(&sql).bind(id).bind(now), id)
            .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryTask>, DatabaseError> {
        let sql = format!("SELECT {} FROM retry_tasks WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query_as::<_, RetryTaskRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(RetryTask::try_from).transpose()
    }

    async fn stats(&self) -> Result<RetryQueueStats, DatabaseError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM retry_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        let mut stats = RetryQueueStats::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match RetryTaskStatus::from_db_status(&status) {
                Some(RetryTaskStatus::Pending) => stats.pending = count,
                Some(RetryTaskStatus::Processing) => stats.processing = count,
                Some(RetryTaskStatus::Sent) => stats.sent = count,
                Some(RetryTaskStatus::Failed) => stats.failed = count,
                None => {}
            }
            stats.total += count;
        }
        Ok(stats)
    }
}
