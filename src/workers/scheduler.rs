//! Named cron jobs on top of `tokio-cron-scheduler`.
//!
//! Every job is registered once and can then be scheduled, unscheduled, or
//! triggered on demand by name. A job never overlaps with itself: a tick or
//! trigger that arrives while the previous run is still going is skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler as CronScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use crate::payments::error::PaymentError;
use crate::services::reconciliation::ReconciliationError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] PaymentError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for JobError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        JobError::Scheduler(err.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(name) => AppError::new(AppErrorKind::Domain(DomainError::JobNotFound { name })),
            JobError::Scheduler(message) => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Scheduler { message }))
            }
            JobError::Database(e) => e.into(),
            JobError::Gateway(e) => e.into(),
            JobError::Reconciliation(e) => e.into(),
        }
    }
}

/// Counters reported by one job run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Six-field cron expression (seconds first)
    fn schedule(&self) -> &str;

    async fn run_at(&self, now: DateTime<Utc>) -> Result<JobReport, JobError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub scheduled: bool,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<JobReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobTrigger {
    pub job_name: String,
    pub triggered_at: DateTime<Utc>,
    pub status: &'static str,
}

#[derive(Default)]
struct SlotState {
    cron_id: Option<Uuid>,
    last_run_at: Option<DateTime<Utc>>,
    last_report: Option<JobReport>,
    last_error: Option<String>,
}

/// Clears a slot's running flag when the run ends, including by panic.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct JobSlot {
    job: Arc<dyn ScheduledJob>,
    running: AtomicBool,
    state: Mutex<SlotState>,
}

impl JobSlot {
    /// Runs the job unless it is already running. Returns `None` when skipped.
    async fn execute(&self, now: DateTime<Utc>) -> Option<Result<JobReport, String>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job = self.job.name(), "job still running, skipping this run");
            return None;
        }

        let guard = RunGuard(&self.running);
        info!(job = self.job.name(), "job started");
        let result = self.job.run_at(now).await.map_err(|e| e.to_string());
        drop(guard);

        let mut state = self.state.lock().await;
        state.last_run_at = Some(now);
        match &result {
            Ok(report) => {
                info!(
                    job = self.job.name(),
                    examined = report.examined,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    skipped = report.skipped,
                    "job finished"
                );
                state.last_report = Some(report.clone());
                state.last_error = None;
            }
            Err(e) => {
                error!(job = self.job.name(), error = %e, "job failed");
                state.last_error = Some(e.clone());
            }
        }
        Some(result)
    }

    async fn status(&self) -> JobStatus {
        let state = self.state.lock().await;
        JobStatus {
            name: self.job.name().to_string(),
            schedule: self.job.schedule().to_string(),
            scheduled: state.cron_id.is_some(),
            running: self.running.load(Ordering::Acquire),
            last_run_at: state.last_run_at,
            last_report: state.last_report.clone(),
            last_error: state.last_error.clone(),
        }
    }
}

pub struct JobScheduler {
    cron: CronScheduler,
    slots: BTreeMap<&'static str, Arc<JobSlot>>,
}

impl JobScheduler {
    pub async fn new() -> Result<Self, JobError> {
        Ok(Self {
            cron: CronScheduler::new().await?,
            slots: BTreeMap::new(),
        })
    }

    /// Registers a job without scheduling it.
    pub fn register(&mut self, job: Arc<dyn ScheduledJob>) {
        let name = job.name();
        self.slots.insert(
            name,
            Arc::new(JobSlot {
                job,
                running: AtomicBool::new(false),
                state: Mutex::new(SlotState::default()),
            }),
        );
    }

    fn slot(&self, name: &str) -> Result<&Arc<JobSlot>, JobError> {
        self.slots
            .get(name)
            .ok_or_else(|| JobError::NotFound(name.to_string()))
    }

    /// Schedules every registered job and starts the cron loop.
    pub async fn start(&self) -> Result<(), JobError> {
        for name in self.slots.keys() {
            self.start_job(name).await?;
        }
        self.cron.start().await?;
        info!(jobs = self.slots.len(), "job scheduler started");
        Ok(())
    }

    pub async fn start_job(&self, name: &str) -> Result<(), JobError> {
        let slot = self.slot(name)?.clone();
        let mut state = slot.state.lock().await;
        if state.cron_id.is_some() {
            return Ok(());
        }

        let tick_slot = slot.clone();
        let job = CronJob::new_async(slot.job.schedule(), move |_id, _scheduler| {
            let slot = tick_slot.clone();
            Box::pin(async move {
                slot.execute(Utc::now()).await;
            })
        })?;
        let id = self.cron.add(job).await?;
        state.cron_id = Some(id);
        info!(job = name, schedule = slot.job.schedule(), "job scheduled");
        Ok(())
    }

    pub async fn stop_job(&self, name: &str) -> Result<(), JobError> {
        let slot = self.slot(name)?;
        let mut state = slot.state.lock().await;
        if let Some(id) = state.cron_id.take() {
            self.cron.remove(&id).await?;
            info!(job = name, "job unscheduled");
        }
        Ok(())
    }

    /// Runs the job in the background and returns immediately.
    pub fn trigger(&self, name: &str) -> Result<JobTrigger, JobError> {
        let slot = self.slot(name)?.clone();
        let triggered_at = Utc::now();
        tokio::spawn(async move {
            slot.execute(triggered_at).await;
        });
        info!(job = name, "job triggered manually");
        Ok(JobTrigger {
            job_name: name.to_string(),
            triggered_at,
            status: "triggered",
        })
    }

    /// Runs the job to completion on the caller's task.
    pub async fn run_now(&self, name: &str, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let slot = self.slot(name)?;
        match slot.execute(now).await {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(JobError::Scheduler(message)),
            None => Ok(JobReport {
                skipped: 1,
                ..Default::default()
            }),
        }
    }

    pub async fn status(&self, name: &str) -> Result<JobStatus, JobError> {
        Ok(self.slot(name)?.status().await)
    }

    pub async fn list(&self) -> Vec<JobStatus> {
        let mut statuses = Vec::with_capacity(self.slots.len());
        for slot in self.slots.values() {
            statuses.push(slot.status().await);
        }
        statuses
    }

    /// Stops the cron loop. In-flight runs finish on their own tasks.
    pub async fn shutdown(&self) -> Result<(), JobError> {
        let mut cron = self.cron.clone();
        cron.shutdown().await?;
        info!("job scheduler stopped");
        Ok(())
    }
}
