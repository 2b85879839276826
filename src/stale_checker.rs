//! Expired-lease recovery.
//!
//! The Processing Index score is a lease: a worker that picked a job up and
//! died never acknowledges, so a periodic sweep drains entries older than
//! `stale_after` and pushes each through the same failure path a live crash
//! would have taken. The system never assumes Acknowledge will be called.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::acknowledger::{Acknowledger, AcknowledgementDescriptor};
use crate::config::StaleCheckerConfig;
use crate::error::Result;
use crate::storage::{StaleEntry, StoreAdapter};

const TIMEOUT_ERROR: &str = "Job Timed Out";

pub struct StaleChecker {
    store: Arc<dyn StoreAdapter>,
    acknowledger: Arc<Acknowledger>,
    config: StaleCheckerConfig,
}

/// Handle for the periodic sweep task.
pub struct StaleCheckerHandle {
    closing: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StaleCheckerHandle {
    pub async fn close(self) {
        let _ = self.closing.send(true);
        let _ = self.task.await;
    }
}

impl StaleChecker {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        acknowledger: Arc<Acknowledger>,
        config: StaleCheckerConfig,
    ) -> Self {
        Self {
            store,
            acknowledger,
            config,
        }
    }

    /// Start the periodic sweep. `None` interval means manual triggering
    /// only, via [`StaleChecker::check`].
    pub fn spawn(self: Arc<Self>) -> Option<StaleCheckerHandle> {
        let period = self.config.interval?;
        let checker = self;
        let (closing, mut closing_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period = ?period, "stale checker started");
            loop {
                tokio::select! {
                    _ = closing_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = checker.check().await {
                            error!(%err, "stale sweep failed");
                        }
                    }
                }
            }
            info!("stale checker stopped");
        });
        Some(StaleCheckerHandle { closing, task })
    }

    /// Run one sweep across every tenant.
    pub async fn check(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.config.stale_after.as_millis() as i64;
        for tenant in self.store.scan_tenants().await? {
            if let Err(err) = self.check_tenant(&tenant, cutoff).await {
                error!(tenant = %tenant, %err, "stale sweep failed for tenant");
            }
        }
        Ok(())
    }

    async fn check_tenant(&self, tenant: &str, cutoff_ms: i64) -> Result<()> {
        let entries = self.store.drain_stale(tenant, cutoff_ms).await?;
        if entries.is_empty() {
            return Ok(());
        }
        debug!(tenant, stale = entries.len(), "reclaiming stale jobs");
        for entry in entries {
            // One bad entry must not abort the rest of the batch.
            if let Err(err) = self.recover(tenant, &entry).await {
                error!(
                    tenant,
                    queue = %entry.queue,
                    id = %entry.id,
                    %err,
                    "failed to recover stale job"
                );
            }
        }
        Ok(())
    }

    async fn recover(&self, tenant: &str, entry: &StaleEntry) -> Result<()> {
        let Some(job) = &entry.job else {
            // The record can be gone when the job completed right around
            // the lease expiry; nothing left to recover.
            warn!(
                tenant,
                queue = %entry.queue,
                id = %entry.id,
                "stale processing entry without a job record, skipping"
            );
            return Ok(());
        };

        let descriptor = AcknowledgementDescriptor {
            tenant: tenant.to_string(),
            queue: entry.queue.clone(),
            id: entry.id.clone(),
            generation: entry.generation,
            exclusive: job.exclusive,
            run_at_ms: job.run_at_ms(),
            count: job.count,
            retry: job.retry.clone(),
            schedule: job.schedule.clone(),
        };
        self.acknowledger
            .report_failure(&descriptor, &anyhow::anyhow!(TIMEOUT_ERROR))
            .await
    }
}
