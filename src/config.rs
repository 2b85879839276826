//! Configuration for the worker-side components.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest delay a single wake timer may represent. Next-due times further
/// out than this re-arm at the cap and re-evaluate, so a process is never
/// parked on an overflowing timer.
pub const MAX_TIMER_MS: i64 = 2_147_483_647;

/// Per-tenant distributor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Maximum in-flight executions per tenant.
    pub max_concurrency: usize,
    /// Coarse fallback poll interval covering missed notifications.
    pub check_interval: Duration,
    /// How many non-exclusive jobs may overtake a ready exclusive job on
    /// the same queue before the queue is held back entirely.
    pub soft_block_limit: u32,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
            check_interval: Duration::from_secs(1),
            soft_block_limit: 0,
        }
    }
}

/// Stale-job sweep tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleCheckerConfig {
    /// Sweep interval; `None` means manual triggering only.
    pub interval: Option<Duration>,
    /// Age at which a Processing entry counts as an expired lease.
    pub stale_after: Duration,
}

impl Default for StaleCheckerConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(60)),
            stale_after: Duration::from_secs(60 * 60),
        }
    }
}

/// Worker facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub distributor: DistributorConfig,
    pub stale_checker: StaleCheckerConfig,
    /// How often the supervisor rescans the store for tenant namespaces.
    pub tenant_scan_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            distributor: DistributorConfig::default(),
            stale_checker: StaleCheckerConfig::default(),
            tenant_scan_interval: Duration::from_secs(1),
        }
    }
}
