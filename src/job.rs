//! Job model: the record producers create and workers execute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recurrence description attached to a job.
///
/// The `kind` selects a caller-registered schedule function; `meta` is
/// passed to it verbatim. `times` caps the total number of executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub kind: String,
    pub meta: String,
    pub times: Option<u32>,
}

/// A job as stored in (and returned from) the shared store.
///
/// Identity is `(tenant, queue, id)`. `count` is the number of started
/// executions: 0 until the first pickup, incremented by every Request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub tenant: String,
    pub queue: String,
    pub id: String,
    pub payload: String,
    pub run_at: DateTime<Utc>,
    pub count: u32,
    pub exclusive: bool,
    /// Cumulative retry offsets in milliseconds, anchored to `run_at`.
    pub retry: Vec<i64>,
    pub schedule: Option<JobSchedule>,
}

impl Job {
    pub fn run_at_ms(&self) -> i64 {
        self.run_at.timestamp_millis()
    }
}

/// Producer-facing enqueue request.
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub tenant: String,
    pub queue: String,
    pub id: String,
    pub payload: String,
    /// Defaults to "now" when absent.
    pub run_at: Option<DateTime<Utc>>,
    pub exclusive: bool,
    pub retry: Vec<i64>,
    pub schedule: Option<JobSchedule>,
    /// Replace an existing job with the same identity instead of no-opping.
    pub override_existing: bool,
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}
