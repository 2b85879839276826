//! Worker facade: one distributor per discovered tenant, plus the stale
//! checker, behind a single start/close surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::acknowledger::{Acknowledger, OnTerminalError};
use crate::config::WorkerConfig;
use crate::distributor::{DistributorHandle, JobDistributor, JobProcessor};
use crate::error::{QueueError, Result};
use crate::retry::ScheduleMap;
use crate::stale_checker::{StaleChecker, StaleCheckerHandle};
use crate::storage::StoreAdapter;

/// Tenant namespace every deployment has.
const DEFAULT_TENANT: &str = "";

pub struct Worker {
    closing: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
    stale_task: Option<StaleCheckerHandle>,
    stale_checker: Arc<StaleChecker>,
    fatal: Arc<Mutex<Option<QueueError>>>,
}

impl Worker {
    /// Start distributing jobs to `processor`.
    ///
    /// A supervisor task keeps one distributor per tenant namespace found
    /// in the store (the default tenant is always covered), retiring loops
    /// that die of store failures. The stale checker starts alongside when
    /// its interval is configured.
    pub fn start(
        store: Arc<dyn StoreAdapter>,
        schedules: ScheduleMap,
        processor: Arc<dyn JobProcessor>,
        on_error: Option<OnTerminalError>,
        config: WorkerConfig,
    ) -> Self {
        let acknowledger = Arc::new(Acknowledger::new(store.clone(), schedules, on_error));
        let stale_checker = Arc::new(StaleChecker::new(
            store.clone(),
            acknowledger.clone(),
            config.stale_checker.clone(),
        ));
        let stale_task = stale_checker.clone().spawn();

        let fatal = Arc::new(Mutex::new(None));
        let (closing, closing_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            store,
            acknowledger,
            processor,
            config,
            closing_rx,
            fatal.clone(),
        ));

        Self {
            closing,
            supervisor,
            stale_task,
            stale_checker,
            fatal,
        }
    }

    /// Manual trigger surface for the stale sweep.
    pub fn stale_checker(&self) -> Arc<StaleChecker> {
        self.stale_checker.clone()
    }

    /// Stop polling, wait for all in-flight executions across all tenants,
    /// and stop the stale checker. Returns the first fatal distributor
    /// error observed during the worker's lifetime, if any.
    pub async fn close(self) -> Result<()> {
        let _ = self.closing.send(true);
        if let Err(join_err) = self.supervisor.await {
            error!(%join_err, "supervisor task failed");
        }
        if let Some(stale) = self.stale_task {
            stale.close().await;
        }
        match self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn supervise(
    store: Arc<dyn StoreAdapter>,
    acknowledger: Arc<Acknowledger>,
    processor: Arc<dyn JobProcessor>,
    config: WorkerConfig,
    mut closing: watch::Receiver<bool>,
    fatal: Arc<Mutex<Option<QueueError>>>,
) {
    let mut distributors: HashMap<String, DistributorHandle> = HashMap::new();
    let mut retired: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut scan = interval(config.tenant_scan_interval);
    scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let spawn_distributor = |tenant: &str| {
        info!(tenant, "starting distributor for tenant");
        JobDistributor::new(
            tenant,
            store.clone(),
            acknowledger.clone(),
            processor.clone(),
            config.distributor.clone(),
        )
        .spawn()
    };

    distributors.insert(
        DEFAULT_TENANT.to_string(),
        spawn_distributor(DEFAULT_TENANT),
    );

    loop {
        tokio::select! {
            _ = closing.changed() => break,
            _ = scan.tick() => {
                // Retire loops that died of store failures; keep the first
                // error for close() to report.
                let dead: Vec<String> = distributors
                    .iter()
                    .filter(|(_, handle)| handle.is_finished())
                    .map(|(tenant, _)| tenant.clone())
                    .collect();
                for tenant in dead {
                    if let Some(handle) = distributors.remove(&tenant) {
                        if let Err(err) = handle.close().await {
                            error!(tenant = %tenant, %err, "distributor died, retiring tenant");
                            retired.insert(tenant);
                            fatal
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .get_or_insert(err);
                        }
                    }
                }

                match store.scan_tenants().await {
                    Ok(tenants) => {
                        for tenant in tenants {
                            if !distributors.contains_key(&tenant) && !retired.contains(&tenant) {
                                let handle = spawn_distributor(&tenant);
                                distributors.insert(tenant, handle);
                            }
                        }
                    }
                    Err(err) => warn!(%err, "tenant scan failed"),
                }
            }
        }
    }

    for (tenant, handle) in distributors {
        if let Err(err) = handle.close().await {
            error!(tenant = %tenant, %err, "distributor closed with error");
            fatal
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_or_insert(err);
        }
    }
}
