//! Retry and recurrence arithmetic.
//!
//! Retry timestamps are anchored to the job's original `run_at` through
//! cumulative offsets: with `retry = [10, 100, 200]` and first execution at
//! `T`, the retries land at `T+10`, `T+100`, `T+200` no matter how long each
//! attempt actually took. Recurrence delegates to caller-registered schedule
//! functions keyed by kind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{QueueError, Result};

/// Timestamp for the next retry after a failed attempt, or `None` when the
/// retry budget is exhausted.
///
/// `run_at_ms` is the *current* `run_at` (which itself moved on each prior
/// retry); subtracting the previous cumulative offset re-anchors the result
/// to the original schedule. `attempt` is the number of started executions,
/// 1 for the first.
pub fn next_retry_at(run_at_ms: i64, intervals: &[i64], attempt: u32) -> Option<i64> {
    let attempt = attempt as usize;
    if attempt == 0 || attempt > intervals.len() {
        return None;
    }
    let previous = if attempt >= 2 { intervals[attempt - 2] } else { 0 };
    Some(run_at_ms + intervals[attempt - 1] - previous)
}

/// A pure function computing the next occurrence of a recurring schedule.
///
/// Receives the time of the just-finished execution and the job's schedule
/// meta; `None` terminates the recurrence.
pub type ScheduleFn =
    Arc<dyn Fn(DateTime<Utc>, &str) -> Option<DateTime<Utc>> + Send + Sync>;

/// Registry of schedule functions keyed by schedule kind.
#[derive(Clone, Default)]
pub struct ScheduleMap {
    entries: HashMap<String, ScheduleFn>,
}

impl ScheduleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(DateTime<Utc>, &str) -> Option<DateTime<Utc>> + Send + Sync + 'static,
    {
        self.entries.insert(kind.into(), Arc::new(f));
        self
    }

    /// Next execution time in ms, or `None` when the recurrence ends.
    pub fn next_occurrence(
        &self,
        kind: &str,
        meta: &str,
        last_execution: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let f = self
            .entries
            .get(kind)
            .ok_or_else(|| QueueError::UnknownScheduleKind(kind.to_string()))?;
        Ok(f.as_ref()(last_execution, meta).map(|d| d.timestamp_millis()))
    }
}

impl std::fmt::Debug for ScheduleMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleMap")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An "every N milliseconds" schedule, handy as a default registration.
pub fn every_schedule(
) -> impl Fn(DateTime<Utc>, &str) -> Option<DateTime<Utc>> + Send + Sync + Clone + 'static {
    |last, meta| {
        let interval: i64 = meta.parse().ok()?;
        if interval <= 0 {
            return None;
        }
        Some(last + chrono::Duration::milliseconds(interval))
    }
}
