//! In-process store implementations.
//!
//! Used when the service runs with `SKIP_EXTERNALS=true` and by the test
//! suites. Each store serialises writers behind a single `RwLock`, so a guarded
//! update is evaluated and applied without interleaving.

use crate::database::error::DatabaseError;
use crate::database::repository::{
    GuardedUpdate, LedgerFilter, LedgerPatch, LedgerStore, RetryTaskStore, StatusGuard,
};
use crate::payments::types::{
    EntityRef, EntityType, LedgerEntry, NewRetryTask, RetryQueueStats, RetryTask,
    RetryTaskStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryLedgerStore {
    entries: RwLock<HashMap<EntityRef, LedgerEntry>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, entity: &EntityRef) -> Result<Option<LedgerEntry>, DatabaseError> {
        Ok(self.entries.read().await.get(entity).cloned())
    }

    async fn insert(&self, entry: LedgerEntry) -> Result<LedgerEntry, DatabaseError> {
        self.entries
            .write()
            .await
            .insert(entry.entity(), entry.clone());
        Ok(entry)
    }

    async fn resolve_entity_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let entries = self.entries.read().await;
        if entries.contains_key(&EntityRef::new(entity_type, identifier)) {
            return Ok(Some(identifier.to_string()));
        }
        Ok(entries
            .values()
            .find(|e| e.entity_type == entity_type && e.reference_code == identifier)
            .map(|e| e.entity_id.clone()))
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .find(|e| {
                e.payment
                    .as_ref()
                    .and_then(|p| p.gateway_order_id.as_deref())
                    == Some(gateway_order_id)
            })
            .cloned())
    }

    async fn find_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .find(|e| e.gateway_payment_id() == Some(gateway_payment_id))
            .cloned())
    }

    async fn update(
        &self,
        entity: &EntityRef,
        guard: &StatusGuard,
        patch: LedgerPatch,
        now: DateTime<Utc>,
    ) -> Result<GuardedUpdate, DatabaseError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(entity)
            .ok_or_else(|| DatabaseError::not_found(entity.entity_type.as_str(), &entity.entity_id))?;

        let current = entry.payment_status();
        if !guard.admits(current) {
            return Ok(GuardedUpdate::Rejected { current });
        }

        patch.apply_to(entry, now);
        Ok(GuardedUpdate::Applied(entry.clone()))
    }

    async fn find(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let entries = self.entries.read().await;
        let mut matched: Vec<LedgerEntry> = entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.payment.as_ref().map(|p| p.updated_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRetryTaskStore {
    tasks: RwLock<HashMap<Uuid, RetryTask>>,
}

impl InMemoryRetryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<RetryTask> {
        let mut tasks: Vec<RetryTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

fn missing_task(id: Uuid) -> DatabaseError {
    DatabaseError::not_found("retry_task", id.to_string())
}

#[async_trait]
impl RetryTaskStore for InMemoryRetryTaskStore {
    async fn enqueue(
        &self,
        task: NewRetryTask,
        now: DateTime<Utc>,
    ) -> Result<RetryTask, DatabaseError> {
        let task = RetryTask {
            id: Uuid::new_v4(),
            task_type: task.task_type,
            target_type: task.target.entity_type,
            target_id: task.target.entity_id,
            recipient_email: task.recipient_email,
            status: RetryTaskStatus::Pending,
            attempts: 0,
            max_attempts: task.max_attempts,
            last_error: task.last_error,
            scheduled_for: task.scheduled_for,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryTask>, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let mut due: Vec<&mut RetryTask> = tasks
            .values_mut()
            .filter(|t| match t.status {
                RetryTaskStatus::Pending => t.scheduled_for <= now,
                RetryTaskStatus::Processing => t.updated_at < stale_before,
                _ => false,
            })
            .collect();
        due.sort_by_key(|t| t.scheduled_for);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|task| {
                task.status = RetryTaskStatus::Processing;
                task.updated_at = now;
                task.clone()
            })
            .collect())
    }

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or_else(|| missing_task(id))?;
        task.status = RetryTaskStatus::Sent;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RetryTask, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or_else(|| missing_task(id))?;
        task.attempts = attempts;
        task.last_error = Some(error.to_string());
        match retry_at {
            Some(at) => {
                task.status = RetryTaskStatus::Pending;
                task.scheduled_for = at;
            }
            None => task.status = RetryTaskStatus::Failed,
        }
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn force_retry(&self, id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or_else(|| missing_task(id))?;
        task.status = RetryTaskStatus::Pending;
        task.scheduled_for = now;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RetryTask>, DatabaseError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn stats(&self) -> Result<RetryQueueStats, DatabaseError> {
        let tasks = self.tasks.read().await;
        let mut stats = RetryQueueStats::default();
        for task in tasks.values() {
            match task.status {
                RetryTaskStatus::Pending => stats.pending += 1,
                RetryTaskStatus::Processing => stats.processing += 1,
                RetryTaskStatus::Sent => stats.sent += 1,
                RetryTaskStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }
}
