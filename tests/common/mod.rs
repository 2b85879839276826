//! Shared harness for the integration tests: an in-memory store, a
//! producer, and a background collector recording every lifecycle event in
//! arrival order.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use roost::activity::{Activity, ActivityFilter};
use roost::config::{DistributorConfig, StaleCheckerConfig, WorkerConfig};
use roost::distributor::{AckHandle, JobProcessor};
use roost::events::JobEvent;
use roost::job::Job;
use roost::producer::Producer;
use roost::storage::{MemoryStoreAdapter, StoreAdapter};
use tokio::task::JoinHandle;

/// Honor RUST_LOG in test runs; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn memory_store() -> Arc<dyn StoreAdapter> {
    init_tracing();
    Arc::new(MemoryStoreAdapter::new())
}

/// Wrap a closure as a processor, pinning the future's output type so
/// inference never has to guess.
pub fn processor<F, Fut>(f: F) -> Arc<dyn JobProcessor>
where
    F: Fn(Job, AckHandle) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(f)
}

/// Worker config tuned for fast tests.
pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        distributor: DistributorConfig {
            max_concurrency: 10,
            check_interval: Duration::from_millis(50),
            soft_block_limit: 0,
        },
        stale_checker: StaleCheckerConfig {
            interval: None,
            stale_after: Duration::from_secs(60 * 60),
        },
        tenant_scan_interval: Duration::from_millis(50),
    }
}

pub struct TestEnv {
    pub store: Arc<dyn StoreAdapter>,
    pub producer: Producer,
    pub events: Arc<Mutex<Vec<JobEvent>>>,
    collector: JoinHandle<()>,
}

impl TestEnv {
    /// Store + producer + event collector for `tenant`. The subscription is
    /// created before any job exists, so no event is missed.
    pub fn new(tenant: &str) -> Self {
        let store = memory_store();
        let producer = Producer::new(store.clone());
        let events: Arc<Mutex<Vec<JobEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let mut activity = Activity::subscribe(&store, tenant, ActivityFilter::default());
        let sink = events.clone();
        let collector = tokio::spawn(async move {
            while let Some(event) = activity.next_event().await {
                sink.lock().unwrap().push(event);
            }
        });
        Self {
            store,
            producer,
            events,
            collector,
        }
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Position of the first event matching `pred`, if it arrived yet.
    pub fn event_index(&self, pred: impl Fn(&JobEvent) -> bool) -> Option<usize> {
        self.events.lock().unwrap().iter().position(pred)
    }

    pub fn requested_index(&self, id: &str) -> Option<usize> {
        self.event_index(|e| matches!(e, JobEvent::Requested { id: i, .. } if i == id))
    }

    pub fn acknowledged_index(&self, id: &str) -> Option<usize> {
        self.event_index(|e| matches!(e, JobEvent::Acknowledged { id: i, .. } if i == id))
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.collector.abort();
    }
}

/// Poll until `pred` holds or the timeout elapses; returns the final
/// verdict.
pub async fn wait_for(pred: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pred()
}
