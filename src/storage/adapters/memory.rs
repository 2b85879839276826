//! In-memory store adapter.
//!
//! Single-process stand-in for a scripting store: all tenant shards live
//! behind one mutex, so every trait call is one critical section, the
//! same indivisibility a server-side script gives a remote deployment.
//! Notifications are per-tenant broadcast channels.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::JobEvent;
use crate::job::{ms_to_datetime, Job, JobSchedule};
use crate::keys::{job_member, parse_member, queue_matches};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::traits::{Notification, StoreAdapter};
use crate::storage::types::{
    Acknowledgement, DeleteOutcome, InvokeOutcome, PickedJob, RequestOutcome, ScanPage,
    ScheduleCommand, ScheduleOutcome, StaleEntry,
};

const NOTIFY_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct JobRecord {
    payload: String,
    run_at_ms: i64,
    count: u32,
    exclusive: bool,
    retry: Vec<i64>,
    schedule: Option<JobSchedule>,
    generation: u64,
}

/// All keys of one tenant. Kept together so every transition can touch the
/// job table, both indices, and the blocking markers in one critical
/// section.
struct TenantShard {
    /// Job records by `queue:id` member.
    jobs: HashMap<String, JobRecord>,
    /// Scheduled Index: (run_at ms, member).
    scheduled: BTreeSet<(i64, String)>,
    /// Processing Index: (pickup ms, member).
    processing: BTreeSet<(i64, String)>,
    /// Pickup time by member, mirroring `processing`.
    processing_at: HashMap<String, i64>,
    /// In-flight executions per queue, mirroring `processing`.
    processing_by_queue: HashMap<String, u32>,
    /// Job ids per queue, backing queue scans.
    queue_index: BTreeMap<String, BTreeSet<String>>,
    /// Queues whose exclusive job is in-flight.
    blocked_queues: HashSet<String>,
    /// Non-exclusive admissions per queue since its exclusive job became
    /// ready.
    soft_block: HashMap<String, u32>,
    notify: broadcast::Sender<Notification>,
}

impl TenantShard {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            jobs: HashMap::new(),
            scheduled: BTreeSet::new(),
            processing: BTreeSet::new(),
            processing_at: HashMap::new(),
            processing_by_queue: HashMap::new(),
            queue_index: BTreeMap::new(),
            blocked_queues: HashSet::new(),
            soft_block: HashMap::new(),
            notify,
        }
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.processing.is_empty()
    }

    fn snapshot(&self, tenant: &str, queue: &str, id: &str, record: &JobRecord) -> Job {
        Job {
            tenant: tenant.to_string(),
            queue: queue.to_string(),
            id: id.to_string(),
            payload: record.payload.clone(),
            run_at: ms_to_datetime(record.run_at_ms),
            count: record.count,
            exclusive: record.exclusive,
            retry: record.retry.clone(),
            schedule: record.schedule.clone(),
        }
    }

    fn publish(&self, event: &JobEvent) {
        // Send only fails when nobody is subscribed.
        let _ = self.notify.send(event.encode());
    }

    fn publish_raw(&self, payload: &str) {
        let _ = self.notify.send(payload.to_string());
    }

    fn remove_processing(&mut self, member: &str) -> Option<i64> {
        let picked_up = self.processing_at.remove(member)?;
        self.processing.remove(&(picked_up, member.to_string()));
        if let Some((queue, _)) = parse_member(member) {
            if let Some(n) = self.processing_by_queue.get_mut(&queue) {
                *n -= 1;
                if *n == 0 {
                    self.processing_by_queue.remove(&queue);
                }
            }
        }
        Some(picked_up)
    }

    fn drop_record(&mut self, member: &str, queue: &str, id: &str) {
        self.jobs.remove(member);
        if let Some(ids) = self.queue_index.get_mut(queue) {
            ids.remove(id);
            if ids.is_empty() {
                self.queue_index.remove(queue);
            }
        }
    }
}

/// In-memory [`StoreAdapter`].
pub struct MemoryStoreAdapter {
    shards: Mutex<HashMap<String, TenantShard>>,
}

impl MemoryStoreAdapter {
    pub fn new() -> Self {
        Self {
            shards: Mutex::new(HashMap::new()),
        }
    }

    fn with_shard<T>(&self, tenant: &str, f: impl FnOnce(&mut TenantShard) -> T) -> T {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        let shard = shards
            .entry(tenant.to_string())
            .or_insert_with(TenantShard::new);
        f(shard)
    }
}

impl Default for MemoryStoreAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreAdapter for MemoryStoreAdapter {
    async fn schedule(&self, cmd: ScheduleCommand) -> StoreResult<ScheduleOutcome> {
        let member = job_member(&cmd.queue, &cmd.id);
        self.with_shard(&cmd.tenant, |shard| {
            if let Some(existing) = shard.jobs.get(&member) {
                if !cmd.override_existing {
                    let job = shard.snapshot(&cmd.tenant, &cmd.queue, &cmd.id, existing);
                    return Ok(ScheduleOutcome::Unchanged(job));
                }
                let generation = existing.generation + 1;
                let old_run_at = existing.run_at_ms;
                // Idle jobs move their Scheduled entry; an in-flight job has
                // none, and its replacement gets a fresh one while the old
                // execution drains through Acknowledge.
                shard.scheduled.remove(&(old_run_at, member.clone()));
                let record = JobRecord {
                    payload: cmd.payload.clone(),
                    run_at_ms: cmd.run_at_ms,
                    count: 0,
                    exclusive: cmd.exclusive,
                    retry: cmd.retry.clone(),
                    schedule: cmd.schedule.clone(),
                    generation,
                };
                let job = shard.snapshot(&cmd.tenant, &cmd.queue, &cmd.id, &record);
                shard.jobs.insert(member.clone(), record);
                shard.scheduled.insert((cmd.run_at_ms, member.clone()));
                shard.publish(&JobEvent::Scheduled { job: job.clone() });
                debug!(tenant = %cmd.tenant, queue = %cmd.queue, id = %cmd.id, generation, "job overridden");
                return Ok(ScheduleOutcome::Scheduled(job));
            }

            let record = JobRecord {
                payload: cmd.payload.clone(),
                run_at_ms: cmd.run_at_ms,
                count: 0,
                exclusive: cmd.exclusive,
                retry: cmd.retry.clone(),
                schedule: cmd.schedule.clone(),
                generation: 1,
            };
            let job = shard.snapshot(&cmd.tenant, &cmd.queue, &cmd.id, &record);
            shard.jobs.insert(member.clone(), record);
            shard.scheduled.insert((cmd.run_at_ms, member.clone()));
            shard
                .queue_index
                .entry(cmd.queue.clone())
                .or_default()
                .insert(cmd.id.clone());
            shard.publish(&JobEvent::Scheduled { job: job.clone() });
            Ok(ScheduleOutcome::Scheduled(job))
        })
    }

    async fn request(
        &self,
        tenant: &str,
        now_ms: i64,
        soft_block_limit: u32,
    ) -> StoreResult<RequestOutcome> {
        self.with_shard(tenant, |shard| {
            let mut saw_blocked = false;
            let mut exclusive_pending: HashSet<String> = HashSet::new();
            let mut selected: Option<String> = None;
            let mut soft_admission: Option<String> = None;

            for (score, member) in shard.scheduled.iter() {
                if *score > now_ms {
                    break;
                }
                let (queue, _) = parse_member(member).ok_or_else(|| {
                    StoreError::Consistency(format!("malformed index member: {member}"))
                })?;
                let record = shard.jobs.get(member).ok_or_else(|| {
                    StoreError::Consistency(format!("scheduled entry without record: {member}"))
                })?;
                if shard.blocked_queues.contains(&queue) {
                    saw_blocked = true;
                    continue;
                }
                if record.exclusive {
                    if shard.processing_by_queue.contains_key(&queue) {
                        // Ready but the queue still has in-flight work; it
                        // now gates later candidates on the same queue.
                        saw_blocked = true;
                        exclusive_pending.insert(queue);
                        continue;
                    }
                    selected = Some(member.clone());
                    break;
                }
                if exclusive_pending.contains(&queue) {
                    let admitted = shard.soft_block.get(&queue).copied().unwrap_or(0);
                    if admitted >= soft_block_limit {
                        saw_blocked = true;
                        continue;
                    }
                    soft_admission = Some(queue);
                }
                selected = Some(member.clone());
                break;
            }

            let Some(member) = selected else {
                if saw_blocked {
                    return Ok(RequestOutcome::Blocked);
                }
                return Ok(match shard.scheduled.first() {
                    Some((next_due, _)) => RequestOutcome::WakeAt(*next_due),
                    None => RequestOutcome::Empty,
                });
            };

            let (queue, id) = parse_member(&member).ok_or_else(|| {
                StoreError::Consistency(format!("malformed index member: {member}"))
            })?;
            let record = shard.jobs.get_mut(&member).ok_or_else(|| {
                StoreError::Consistency(format!("scheduled entry without record: {member}"))
            })?;
            record.count += 1;
            let generation = record.generation;
            let run_at_ms = record.run_at_ms;
            let exclusive = record.exclusive;
            let picked = record.clone();
            let job = shard.snapshot(tenant, &queue, &id, &picked);

            shard.scheduled.remove(&(run_at_ms, member.clone()));
            // The Processing Index is keyed by member: a re-pickup of an
            // overridden job updates the score instead of duplicating.
            if let Some(previous) = shard.processing_at.insert(member.clone(), now_ms) {
                shard.processing.remove(&(previous, member.clone()));
            } else {
                *shard.processing_by_queue.entry(queue.clone()).or_insert(0) += 1;
            }
            shard.processing.insert((now_ms, member.clone()));

            if exclusive {
                shard.blocked_queues.insert(queue.clone());
                shard.soft_block.remove(&queue);
            } else if let Some(soft_queue) = soft_admission {
                *shard.soft_block.entry(soft_queue).or_insert(0) += 1;
            }

            shard.publish(&JobEvent::Requested {
                queue: queue.clone(),
                id: id.clone(),
            });
            debug!(tenant, queue = %queue, id = %id, count = job.count, "job picked up");
            Ok(RequestOutcome::Picked(PickedJob { job, generation }))
        })
    }

    async fn acknowledge(&self, ack: &Acknowledgement) -> StoreResult<()> {
        let member = job_member(&ack.queue, &ack.id);
        self.with_shard(&ack.tenant, |shard| {
            shard.remove_processing(&member);

            if ack.exclusive && shard.blocked_queues.remove(&ack.queue) {
                shard.soft_block.remove(&ack.queue);
                shard.publish(&JobEvent::Unblocked {
                    queue: ack.queue.clone(),
                });
            }

            let decision = match shard.jobs.get(&member) {
                None => None,
                Some(record) => {
                    let overridden = record.generation != ack.generation
                        || shard
                            .scheduled
                            .contains(&(record.run_at_ms, member.clone()));
                    if overridden {
                        debug!(
                            tenant = %ack.tenant,
                            queue = %ack.queue,
                            id = %ack.id,
                            "acknowledge superseded by override, decision discarded"
                        );
                        None
                    } else {
                        Some(ack.next_execution_at)
                    }
                }
            };

            match decision {
                Some(Some(next_ms)) => {
                    if let Some(record) = shard.jobs.get_mut(&member) {
                        record.run_at_ms = next_ms;
                    }
                    shard.scheduled.insert((next_ms, member.clone()));
                    shard.publish(&JobEvent::Rescheduled {
                        queue: ack.queue.clone(),
                        id: ack.id.clone(),
                        run_at_ms: next_ms,
                    });
                }
                Some(None) => {
                    shard.drop_record(&member, &ack.queue, &ack.id);
                    shard.publish(&JobEvent::Acknowledged {
                        queue: ack.queue.clone(),
                        id: ack.id.clone(),
                    });
                }
                None => {
                    shard.publish(&JobEvent::Acknowledged {
                        queue: ack.queue.clone(),
                        id: ack.id.clone(),
                    });
                }
            }
            Ok(())
        })
    }

    async fn delete(&self, tenant: &str, queue: &str, id: &str) -> StoreResult<DeleteOutcome> {
        let member = job_member(queue, id);
        self.with_shard(tenant, |shard| {
            if shard.processing_at.contains_key(&member) {
                return Ok(DeleteOutcome::InExecution);
            }
            let Some(record) = shard.jobs.get(&member) else {
                return Ok(DeleteOutcome::NotFound);
            };
            let run_at_ms = record.run_at_ms;
            shard.scheduled.remove(&(run_at_ms, member.clone()));
            shard.drop_record(&member, queue, id);
            shard.publish(&JobEvent::Deleted {
                queue: queue.to_string(),
                id: id.to_string(),
            });
            Ok(DeleteOutcome::Deleted)
        })
    }

    async fn invoke(
        &self,
        tenant: &str,
        queue: &str,
        id: &str,
        now_ms: i64,
    ) -> StoreResult<InvokeOutcome> {
        let member = job_member(queue, id);
        self.with_shard(tenant, |shard| {
            let Some(record) = shard.jobs.get_mut(&member) else {
                return Ok(InvokeOutcome::NotFound);
            };
            if !shard.scheduled.remove(&(record.run_at_ms, member.clone())) {
                return Ok(InvokeOutcome::NotFound);
            }
            record.run_at_ms = now_ms;
            shard.scheduled.insert((now_ms, member.clone()));
            shard.publish(&JobEvent::Invoked {
                queue: queue.to_string(),
                id: id.to_string(),
            });
            Ok(InvokeOutcome::Invoked)
        })
    }

    async fn find_job(&self, tenant: &str, queue: &str, id: &str) -> StoreResult<Option<Job>> {
        let member = job_member(queue, id);
        self.with_shard(tenant, |shard| {
            Ok(shard
                .jobs
                .get(&member)
                .map(|record| shard.snapshot(tenant, queue, id, record)))
        })
    }

    async fn scan_queue(
        &self,
        tenant: &str,
        queue: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<ScanPage> {
        self.with_shard(tenant, |shard| {
            let Some(ids) = shard.queue_index.get(queue) else {
                return Ok(ScanPage::default());
            };
            let mut jobs = Vec::new();
            for id in ids.iter().skip(cursor as usize).take(count) {
                let member = job_member(queue, id);
                if let Some(record) = shard.jobs.get(&member) {
                    jobs.push(shard.snapshot(tenant, queue, id, record));
                }
            }
            let consumed = cursor as usize + jobs.len();
            let next = if consumed < ids.len() { consumed as u64 } else { 0 };
            Ok(ScanPage { cursor: next, jobs })
        })
    }

    async fn scan_queue_pattern(
        &self,
        tenant: &str,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<ScanPage> {
        self.with_shard(tenant, |shard| {
            let mut jobs = Vec::new();
            let mut seen = 0u64;
            let mut remaining_beyond_page = false;
            for (queue, ids) in shard.queue_index.iter() {
                if !queue_matches(pattern, queue) {
                    continue;
                }
                for id in ids.iter() {
                    if seen < cursor {
                        seen += 1;
                        continue;
                    }
                    if jobs.len() >= count {
                        remaining_beyond_page = true;
                        break;
                    }
                    let member = job_member(queue, id);
                    if let Some(record) = shard.jobs.get(&member) {
                        jobs.push(shard.snapshot(tenant, queue, id, record));
                    }
                    seen += 1;
                }
                if remaining_beyond_page {
                    break;
                }
            }
            let next = if remaining_beyond_page { seen } else { 0 };
            Ok(ScanPage { cursor: next, jobs })
        })
    }

    async fn drain_stale(
        &self,
        tenant: &str,
        older_than_ms: i64,
    ) -> StoreResult<Vec<StaleEntry>> {
        self.with_shard(tenant, |shard| {
            let expired: Vec<(i64, String)> = shard
                .processing
                .iter()
                .take_while(|(picked_up, _)| *picked_up <= older_than_ms)
                .cloned()
                .collect();

            let mut entries = Vec::with_capacity(expired.len());
            for (picked_up, member) in expired {
                shard.remove_processing(&member);
                let Some((queue, id)) = parse_member(&member) else {
                    continue;
                };
                let (job, generation) = match shard.jobs.get(&member) {
                    Some(record) => (
                        Some(shard.snapshot(tenant, &queue, &id, record)),
                        record.generation,
                    ),
                    None => (None, 0),
                };
                entries.push(StaleEntry {
                    queue,
                    id,
                    picked_up_at_ms: picked_up,
                    job,
                    generation,
                });
            }
            Ok(entries)
        })
    }

    async fn scan_tenants(&self) -> StoreResult<Vec<String>> {
        let shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        Ok(shards
            .iter()
            .filter(|(_, shard)| !shard.is_empty())
            .map(|(tenant, _)| tenant.clone())
            .collect())
    }

    async fn publish(&self, tenant: &str, payload: &str) -> StoreResult<()> {
        self.with_shard(tenant, |shard| {
            shard.publish_raw(payload);
            Ok(())
        })
    }

    fn subscribe(&self, tenant: &str) -> broadcast::Receiver<Notification> {
        self.with_shard(tenant, |shard| shard.notify.subscribe())
    }
}
