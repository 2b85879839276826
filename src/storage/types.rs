//! Value types crossing the store adapter boundary.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobSchedule};

/// Everything Schedule needs to create or replace a job, in one atomic call.
#[derive(Debug, Clone)]
pub struct ScheduleCommand {
    pub tenant: String,
    pub queue: String,
    pub id: String,
    pub payload: String,
    pub run_at_ms: i64,
    pub exclusive: bool,
    pub retry: Vec<i64>,
    pub schedule: Option<JobSchedule>,
    pub override_existing: bool,
}

/// Result of a Schedule call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// The job was inserted or overwritten; snapshot of the stored record.
    Scheduled(Job),
    /// A job with this identity already existed and `override` was off.
    Unchanged(Job),
}

impl ScheduleOutcome {
    pub fn into_job(self) -> Job {
        match self {
            ScheduleOutcome::Scheduled(job) | ScheduleOutcome::Unchanged(job) => job,
        }
    }
}

/// A job handed to a worker by Request, plus the generation stamp its
/// eventual Acknowledge must present.
#[derive(Debug, Clone, PartialEq)]
pub struct PickedJob {
    pub job: Job,
    pub generation: u64,
}

/// Result of a Request call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// A ready job was moved to the Processing Index.
    Picked(PickedJob),
    /// A ready candidate existed but was held back by queue blocking;
    /// polling again immediately may surface other work.
    Blocked,
    /// Nothing ready; the next due job's timestamp in ms.
    WakeAt(i64),
    /// Nothing scheduled at all.
    Empty,
}

/// The state transition an execution's completion requests.
#[derive(Debug, Clone)]
pub struct Acknowledgement {
    pub tenant: String,
    pub queue: String,
    pub id: String,
    /// Generation observed at pickup (or at drain, for stale recovery).
    pub generation: u64,
    /// Whether the pickup asserted the Blocked-Queue Marker.
    pub exclusive: bool,
    /// Reschedule time in ms; `None` removes the job record.
    pub next_execution_at: Option<i64>,
}

/// Result of a Delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// The job is in-flight; it cannot be deleted out from under its
    /// executor.
    InExecution,
}

/// Result of an Invoke call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeOutcome {
    Invoked,
    NotFound,
}

/// One expired Processing entry drained by the stale sweep.
///
/// The record can be legitimately missing when the job completed between
/// the entry growing stale and the sweep running.
#[derive(Debug, Clone)]
pub struct StaleEntry {
    pub queue: String,
    pub id: String,
    pub picked_up_at_ms: i64,
    pub job: Option<Job>,
    pub generation: u64,
}

/// One page of a cursor scan. A `cursor` of 0 means the scan is complete.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub cursor: u64,
    pub jobs: Vec<Job>,
}
