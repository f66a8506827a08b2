//! Background workers: the retry queue poller and the cron job scheduler.

pub mod payment_jobs;
pub mod retry_queue;
pub mod scheduler;

pub use retry_queue::RetryQueueWorker;
pub use scheduler::{JobError, JobReport, JobScheduler, JobStatus, JobTrigger, ScheduledJob};
