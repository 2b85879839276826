//! The store adapter seam.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::job::Job;
use crate::storage::error::StoreResult;
use crate::storage::types::{
    Acknowledgement, DeleteOutcome, InvokeOutcome, RequestOutcome, ScanPage, ScheduleCommand,
    ScheduleOutcome, StaleEntry,
};

/// Raw notification payload as published on a tenant's stream.
pub type Notification = String;

/// A shared, atomically-scriptable ordered key-value store, seen through
/// the five lifecycle transitions plus the read/notify surface around them.
///
/// Every method that mutates state MUST execute as one indivisible
/// server-side transaction, never a client-side read-modify-write. The
/// in-memory adapter realizes this with one critical section per call; a
/// scripting store (Redis Lua, or a CAS-transaction wrapper) implements the
/// identical read-decide-write logic server-side.
///
/// All keys of one tenant are colocated so a single transaction can touch
/// the job table, both indices, and the blocking markers together.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Insert a job, or overwrite an existing one when the command says so.
    /// Overwriting bumps the record's generation stamp; an override of an
    /// in-flight job replaces the record without interrupting the running
    /// execution.
    async fn schedule(&self, cmd: ScheduleCommand) -> StoreResult<ScheduleOutcome>;

    /// Atomically pop at most one ready job (run_at ≤ `now_ms`) into the
    /// Processing Index, honoring exclusive-queue blocking with the given
    /// soft-block bound.
    async fn request(
        &self,
        tenant: &str,
        now_ms: i64,
        soft_block_limit: u32,
    ) -> StoreResult<RequestOutcome>;

    /// Conclude an execution: drop the Processing entry, release the queue
    /// block, then apply the reschedule-or-remove decision unless the
    /// record changed generation underneath the execution.
    async fn acknowledge(&self, ack: &Acknowledgement) -> StoreResult<()>;

    /// Remove an idle job. In-flight jobs are reported, not touched.
    async fn delete(&self, tenant: &str, queue: &str, id: &str) -> StoreResult<DeleteOutcome>;

    /// Pull an idle job's run time forward to `now_ms`.
    async fn invoke(
        &self,
        tenant: &str,
        queue: &str,
        id: &str,
        now_ms: i64,
    ) -> StoreResult<InvokeOutcome>;

    /// Snapshot of a job by identity.
    async fn find_job(&self, tenant: &str, queue: &str, id: &str) -> StoreResult<Option<Job>>;

    /// Cursor-paginated scan over one queue's jobs.
    async fn scan_queue(
        &self,
        tenant: &str,
        queue: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<ScanPage>;

    /// Cursor-paginated scan over all jobs whose queue matches a
    /// `*`-wildcard pattern.
    async fn scan_queue_pattern(
        &self,
        tenant: &str,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<ScanPage>;

    /// Atomically read-and-remove every Processing entry picked up at or
    /// before `older_than_ms`, returning each with its current record.
    async fn drain_stale(&self, tenant: &str, older_than_ms: i64)
        -> StoreResult<Vec<StaleEntry>>;

    /// Tenants that currently have any scheduled or in-flight state.
    async fn scan_tenants(&self) -> StoreResult<Vec<String>>;

    /// Publish a raw payload on a tenant's notification stream.
    async fn publish(&self, tenant: &str, payload: &str) -> StoreResult<()>;

    /// Subscribe to a tenant's notification stream.
    fn subscribe(&self, tenant: &str) -> broadcast::Receiver<Notification>;
}
