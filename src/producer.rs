//! Producer facade: the enqueue/inspect/delete surface.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::{QueueError, Result};
use crate::job::{EnqueueRequest, Job};
use crate::storage::{
    DeleteOutcome, InvokeOutcome, ScanPage, ScheduleCommand, StoreAdapter,
};

pub struct Producer {
    store: Arc<dyn StoreAdapter>,
}

impl Producer {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }

    /// Schedule a job. Validates the request, then hands it to the store's
    /// atomic Schedule transition; no state is touched on validation
    /// failure.
    ///
    /// Enqueueing an identity that already exists is a no-op unless
    /// `override_existing` is set, in which case the stored job is replaced
    /// wholesale (a currently-running execution is not interrupted, and its
    /// eventual acknowledgement is discarded in favor of the override).
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        if request.schedule.is_some() && !request.retry.is_empty() {
            return Err(QueueError::Validation(
                "retry and schedule are mutually exclusive".to_string(),
            ));
        }
        if request.retry.iter().any(|interval| *interval < 0) {
            return Err(QueueError::Validation(
                "retry intervals must be non-negative".to_string(),
            ));
        }

        let run_at = request.run_at.unwrap_or_else(Utc::now);
        debug!(
            tenant = %request.tenant,
            queue = %request.queue,
            id = %request.id,
            run_at = %run_at,
            "enqueueing job"
        );

        let outcome = self
            .store
            .schedule(ScheduleCommand {
                tenant: request.tenant,
                queue: request.queue,
                id: request.id,
                payload: request.payload,
                run_at_ms: run_at.timestamp_millis(),
                exclusive: request.exclusive,
                retry: request.retry,
                schedule: request.schedule,
                override_existing: request.override_existing,
            })
            .await?;

        Ok(outcome.into_job())
    }

    /// Remove an idle job. In-flight jobs are reported as
    /// [`DeleteOutcome::InExecution`] and left untouched.
    pub async fn delete(&self, tenant: &str, queue: &str, id: &str) -> Result<DeleteOutcome> {
        Ok(self.store.delete(tenant, queue, id).await?)
    }

    /// Pull an idle job forward so the next Request picks it up
    /// immediately.
    pub async fn invoke(&self, tenant: &str, queue: &str, id: &str) -> Result<InvokeOutcome> {
        Ok(self
            .store
            .invoke(tenant, queue, id, Utc::now().timestamp_millis())
            .await?)
    }

    pub async fn find_by_id(&self, tenant: &str, queue: &str, id: &str) -> Result<Option<Job>> {
        Ok(self.store.find_job(tenant, queue, id).await?)
    }

    /// Page through one queue's jobs. A returned cursor of 0 means the scan
    /// is complete.
    pub async fn scan_queue(
        &self,
        tenant: &str,
        queue: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage> {
        Ok(self.store.scan_queue(tenant, queue, cursor, count).await?)
    }

    /// Page through all jobs whose queue matches a `*`-wildcard pattern.
    pub async fn scan_queue_pattern(
        &self,
        tenant: &str,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage> {
        Ok(self
            .store
            .scan_queue_pattern(tenant, pattern, cursor, count)
            .await?)
    }
}
