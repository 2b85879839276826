//! Outcome handling for finished executions.
//!
//! Success computes the next recurrence (if any) and acknowledges; failure
//! computes the next retry, publishes a `retry`/`fail` notification, and on
//! terminal failure invokes the caller's error callback. Both paths funnel
//! into the store's single Acknowledge transition.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::JobEvent;
use crate::job::JobSchedule;
use crate::retry::{next_retry_at, ScheduleMap};
use crate::storage::{Acknowledgement, PickedJob, StoreAdapter};

/// Everything needed to conclude one picked-up execution.
#[derive(Debug, Clone)]
pub struct AcknowledgementDescriptor {
    pub tenant: String,
    pub queue: String,
    pub id: String,
    /// Generation observed at pickup; a mismatch at acknowledge time means
    /// an override won and this execution's decision is discarded.
    pub generation: u64,
    pub exclusive: bool,
    pub run_at_ms: i64,
    /// Attempt number of this execution (1 for the first).
    pub count: u32,
    pub retry: Vec<i64>,
    pub schedule: Option<JobSchedule>,
}

impl AcknowledgementDescriptor {
    pub fn from_picked(picked: &PickedJob) -> Self {
        Self {
            tenant: picked.job.tenant.clone(),
            queue: picked.job.queue.clone(),
            id: picked.job.id.clone(),
            generation: picked.generation,
            exclusive: picked.job.exclusive,
            run_at_ms: picked.job.run_at_ms(),
            count: picked.job.count,
            retry: picked.job.retry.clone(),
            schedule: picked.job.schedule.clone(),
        }
    }
}

/// Options for an explicit acknowledgement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckOptions {
    /// Acknowledge without applying a computed recurrence.
    pub dont_reschedule: bool,
}

/// Callback invoked once a job has exhausted its retries.
pub type OnTerminalError =
    Arc<dyn Fn(&AcknowledgementDescriptor, &anyhow::Error) + Send + Sync>;

pub struct Acknowledger {
    store: Arc<dyn StoreAdapter>,
    schedules: ScheduleMap,
    on_error: Option<OnTerminalError>,
}

impl Acknowledger {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        schedules: ScheduleMap,
        on_error: Option<OnTerminalError>,
    ) -> Self {
        Self {
            store,
            schedules,
            on_error,
        }
    }

    /// Conclude a successful execution.
    pub async fn acknowledge(
        &self,
        descriptor: &AcknowledgementDescriptor,
        options: AckOptions,
    ) -> Result<()> {
        let next_execution_at = if options.dont_reschedule {
            None
        } else {
            match self.next_recurrence(descriptor) {
                Ok(next) => next,
                Err(err) => {
                    // A recurring job whose schedule kind has no registered
                    // function cannot compute its next occurrence; treat it
                    // as a failed execution instead of wedging the job.
                    warn!(
                        queue = %descriptor.queue,
                        id = %descriptor.id,
                        %err,
                        "recurrence computation failed, routing through failure path"
                    );
                    return self.report_failure(descriptor, &anyhow::anyhow!(err)).await;
                }
            }
        };

        self.store
            .acknowledge(&self.transition(descriptor, next_execution_at))
            .await?;

        match next_execution_at {
            Some(at) => debug!(
                queue = %descriptor.queue,
                id = %descriptor.id,
                next_execution_at = at,
                "job acknowledged, recurrence scheduled"
            ),
            None => debug!(queue = %descriptor.queue, id = %descriptor.id, "job acknowledged"),
        }
        Ok(())
    }

    /// Conclude a failed execution: reschedule per the retry budget, or
    /// fail terminally.
    pub async fn report_failure(
        &self,
        descriptor: &AcknowledgementDescriptor,
        error: &anyhow::Error,
    ) -> Result<()> {
        let next_retry = next_retry_at(descriptor.run_at_ms, &descriptor.retry, descriptor.count);
        let event = if next_retry.is_some() {
            JobEvent::Retry {
                queue: descriptor.queue.clone(),
                id: descriptor.id.clone(),
                error: error.to_string(),
            }
        } else {
            JobEvent::Fail {
                queue: descriptor.queue.clone(),
                id: descriptor.id.clone(),
                error: error.to_string(),
            }
        };
        self.store
            .publish(&descriptor.tenant, &event.encode())
            .await?;

        self.store
            .acknowledge(&self.transition(descriptor, next_retry))
            .await?;

        match next_retry {
            Some(at) => debug!(
                queue = %descriptor.queue,
                id = %descriptor.id,
                attempt = descriptor.count,
                next_retry_at = at,
                "job failed, retry scheduled"
            ),
            None => {
                debug!(
                    queue = %descriptor.queue,
                    id = %descriptor.id,
                    attempt = descriptor.count,
                    "job failed terminally"
                );
                if let Some(on_error) = &self.on_error {
                    on_error.as_ref()(descriptor, error);
                }
            }
        }
        Ok(())
    }

    fn transition(
        &self,
        descriptor: &AcknowledgementDescriptor,
        next_execution_at: Option<i64>,
    ) -> Acknowledgement {
        Acknowledgement {
            tenant: descriptor.tenant.clone(),
            queue: descriptor.queue.clone(),
            id: descriptor.id.clone(),
            generation: descriptor.generation,
            exclusive: descriptor.exclusive,
            next_execution_at,
        }
    }

    fn next_recurrence(&self, descriptor: &AcknowledgementDescriptor) -> Result<Option<i64>> {
        let Some(schedule) = &descriptor.schedule else {
            return Ok(None);
        };
        if schedule.times.is_some_and(|cap| descriptor.count >= cap) {
            return Ok(None);
        }
        self.schedules
            .next_occurrence(&schedule.kind, &schedule.meta, Utc::now())
    }
}
