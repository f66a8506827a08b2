use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::services::retry_queue::RetryQueueProcessor;

/// Polls the retry queue until shutdown is signalled.
pub struct RetryQueueWorker {
    processor: Arc<RetryQueueProcessor>,
    poll_interval: Duration,
}

impl RetryQueueWorker {
    pub fn new(processor: Arc<RetryQueueProcessor>, poll_interval: Duration) -> Self {
        Self {
            processor,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Retry queue worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.processor.process_due().await {
                        error!(error = %e, "Retry queue pass failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Retry queue worker stopping");
                        break;
                    }
                }
            }
        }
    }
}
