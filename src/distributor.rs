//! Per-tenant pull loop.
//!
//! Fans out Request results into concurrently running executions, bounded
//! by `max_concurrency`. Wakes on store notifications, on a one-shot timer
//! armed from `WakeAt` results (capped so it can never overflow), and on a
//! coarse fallback interval covering missed notifications. Execution
//! outcomes (including panics) are routed through the Acknowledger and
//! never crash the loop; store failures during Request are fatal for the
//! tenant and propagate to the owner.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::acknowledger::{AckOptions, Acknowledger, AcknowledgementDescriptor};
use crate::config::{DistributorConfig, MAX_TIMER_MS};
use crate::error::{QueueError, Result};
use crate::job::Job;
use crate::storage::{PickedJob, RequestOutcome, StoreAdapter};

/// User job handler.
///
/// Completion acknowledges the job (applying any computed recurrence);
/// returning an error (or panicking) routes the execution through the
/// failure path. The handle allows acknowledging explicitly, e.g. to opt
/// out of rescheduling.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: Job, ack: AckHandle) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobProcessor for F
where
    F: Fn(Job, AckHandle) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, job: Job, ack: AckHandle) -> anyhow::Result<()> {
        (self)(job, ack).await
    }
}

/// Handle for acknowledging a job from inside its processor.
#[derive(Clone)]
pub struct AckHandle {
    descriptor: Arc<AcknowledgementDescriptor>,
    acknowledger: Arc<Acknowledger>,
    acked: Arc<AtomicBool>,
}

impl AckHandle {
    fn new(descriptor: Arc<AcknowledgementDescriptor>, acknowledger: Arc<Acknowledger>) -> Self {
        Self {
            descriptor,
            acknowledger,
            acked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acknowledge now. Later acknowledgements of the same execution
    /// (including the implicit one on processor return) become no-ops.
    pub async fn acknowledge(&self, options: AckOptions) -> Result<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.acknowledger.acknowledge(&self.descriptor, options).await
    }

    fn was_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }
}

/// One tenant's distributor, running as a spawned task.
pub struct JobDistributor {
    tenant: String,
    instance: Uuid,
    store: Arc<dyn StoreAdapter>,
    acknowledger: Arc<Acknowledger>,
    processor: Arc<dyn JobProcessor>,
    config: DistributorConfig,
}

/// Owner handle: closing stops new polls, then waits for every in-flight
/// execution before the task reports closed.
pub struct DistributorHandle {
    closing: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl DistributorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn close(self) -> Result<()> {
        let _ = self.closing.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(QueueError::Internal(format!(
                "distributor task failed: {join_err}"
            ))),
        }
    }
}

impl JobDistributor {
    pub fn new(
        tenant: impl Into<String>,
        store: Arc<dyn StoreAdapter>,
        acknowledger: Arc<Acknowledger>,
        processor: Arc<dyn JobProcessor>,
        config: DistributorConfig,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            instance: Uuid::new_v4(),
            store,
            acknowledger,
            processor,
            config,
        }
    }

    pub fn spawn(self) -> DistributorHandle {
        let (closing, closing_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(closing_rx));
        DistributorHandle { closing, task }
    }

    async fn run(self, mut closing: watch::Receiver<bool>) -> Result<()> {
        let mut notifications = self.store.subscribe(&self.tenant);
        let mut notifications_open = true;
        let mut fallback = interval(self.config.check_interval);
        fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut executions: JoinSet<()> = JoinSet::new();
        let mut wake_at: Option<Instant> = None;
        let mut closing_state = *closing.borrow();

        info!(
            tenant = %self.tenant,
            instance = %self.instance,
            max_concurrency = self.config.max_concurrency,
            "distributor started"
        );

        loop {
            if !closing_state {
                if let Err(err) = self.poll(&mut executions, &mut wake_at).await {
                    error!(
                        tenant = %self.tenant,
                        instance = %self.instance,
                        %err,
                        "request failed, shutting distributor down"
                    );
                    while executions.join_next().await.is_some() {}
                    return Err(err);
                }
            }

            if closing_state && executions.is_empty() {
                break;
            }

            let deadline = wake_at.unwrap_or_else(Instant::now);
            tokio::select! {
                changed = closing.changed() => {
                    closing_state = changed.is_err() || *closing.borrow();
                }
                received = notifications.recv(), if notifications_open => {
                    match received {
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                tenant = %self.tenant,
                                skipped,
                                "notification stream lagged"
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            notifications_open = false;
                        }
                    }
                }
                _ = fallback.tick() => {}
                _ = sleep_until(deadline), if wake_at.is_some() => {
                    wake_at = None;
                }
                Some(finished) = executions.join_next(), if !executions.is_empty() => {
                    if let Err(join_err) = finished {
                        // Execution tasks route their own failures; only a
                        // panic inside the routing itself lands here.
                        error!(tenant = %self.tenant, %join_err, "execution task aborted");
                    }
                }
            }
        }

        info!(tenant = %self.tenant, instance = %self.instance, "distributor closed");
        Ok(())
    }

    /// Fetch ready work until the queue has nothing for us or capacity is
    /// reached.
    async fn poll(
        &self,
        executions: &mut JoinSet<()>,
        wake_at: &mut Option<Instant>,
    ) -> Result<()> {
        let mut consecutive_blocked = 0usize;
        while executions.len() < self.config.max_concurrency {
            let now_ms = Utc::now().timestamp_millis();
            let outcome = self
                .store
                .request(&self.tenant, now_ms, self.config.soft_block_limit)
                .await?;
            match outcome {
                RequestOutcome::Picked(picked) => {
                    consecutive_blocked = 0;
                    self.start_execution(picked, executions);
                }
                RequestOutcome::Blocked => {
                    consecutive_blocked += 1;
                    if consecutive_blocked >= self.config.max_concurrency.max(1) {
                        debug!(
                            tenant = %self.tenant,
                            "all ready work is behind queue blocks, waiting for a wake"
                        );
                        break;
                    }
                }
                RequestOutcome::WakeAt(due_ms) => {
                    let delay_ms = (due_ms - now_ms).clamp(0, MAX_TIMER_MS);
                    *wake_at = Some(Instant::now() + Duration::from_millis(delay_ms as u64));
                    break;
                }
                RequestOutcome::Empty => {
                    *wake_at = None;
                    break;
                }
            }
        }
        Ok(())
    }

    fn start_execution(&self, picked: PickedJob, executions: &mut JoinSet<()>) {
        let descriptor = Arc::new(AcknowledgementDescriptor::from_picked(&picked));
        let handle = AckHandle::new(descriptor.clone(), self.acknowledger.clone());
        let processor = self.processor.clone();
        let acknowledger = self.acknowledger.clone();
        let tenant = self.tenant.clone();
        let job = picked.job;

        executions.spawn(async move {
            let queue = descriptor.queue.clone();
            let id = descriptor.id.clone();
            let outcome =
                AssertUnwindSafe(processor.process(job, handle.clone())).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {
                    if !handle.was_acked() {
                        if let Err(err) =
                            acknowledger.acknowledge(&descriptor, AckOptions::default()).await
                        {
                            error!(tenant = %tenant, queue = %queue, id = %id, %err, "acknowledge failed");
                        }
                    }
                }
                Ok(Err(job_error)) => {
                    if handle.was_acked() {
                        warn!(
                            tenant = %tenant,
                            queue = %queue,
                            id = %id,
                            error = %job_error,
                            "processor failed after acknowledging explicitly"
                        );
                    } else if let Err(err) =
                        acknowledger.report_failure(&descriptor, &job_error).await
                    {
                        error!(tenant = %tenant, queue = %queue, id = %id, %err, "failure report did not reach the store");
                    }
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "processor panicked".to_string());
                    warn!(tenant = %tenant, queue = %queue, id = %id, %message, "processor panicked");
                    if !handle.was_acked() {
                        let job_error = anyhow::anyhow!(message);
                        if let Err(err) =
                            acknowledger.report_failure(&descriptor, &job_error).await
                        {
                            error!(tenant = %tenant, queue = %queue, id = %id, %err, "failure report did not reach the store");
                        }
                    }
                }
            }
        });
    }
}
