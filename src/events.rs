//! Notification payload grammar.
//!
//! Lifecycle notifications travel over the store's per-tenant pub/sub
//! stream as colon-delimited tuples `event:queue:id[:extra...]`. Queue and
//! id are key-encoded; trailing fields that may contain arbitrary text
//! (error messages, payloads) always come last and are protected by a
//! bounded split.

use crate::job::{ms_to_datetime, Job, JobSchedule};
use crate::keys::{decode_key, encode_key};

/// A parsed lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Scheduled { job: Job },
    Requested { queue: String, id: String },
    Acknowledged { queue: String, id: String },
    Rescheduled { queue: String, id: String, run_at_ms: i64 },
    Deleted { queue: String, id: String },
    Invoked { queue: String, id: String },
    Retry { queue: String, id: String, error: String },
    Fail { queue: String, id: String, error: String },
    Unblocked { queue: String },
}

/// Like `str::split`, but stops after `max_parts` fields: the final field
/// swallows the rest of the message, delimiters included.
pub fn split_bounded(message: &str, max_parts: usize, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = message;
    while parts.len() + 1 < max_parts {
        match rest.split_once(delimiter) {
            Some((head, tail)) => {
                parts.push(head);
                rest = tail;
            }
            None => break,
        }
    }
    parts.push(rest);
    parts
}

// Field counts for the bounded split. The scheduled payload ends with the
// raw job payload, retry/fail end with the encoded error.
const SCHEDULED_PARTS: usize = 11;
const ERROR_PARTS: usize = 4;
const RESCHEDULED_PARTS: usize = 4;

impl JobEvent {
    /// Serialize into the wire payload.
    pub fn encode(&self) -> String {
        match self {
            JobEvent::Scheduled { job } => {
                let (kind, meta, times) = match &job.schedule {
                    Some(s) => (
                        encode_key(&s.kind),
                        encode_key(&s.meta),
                        s.times.map(|t| t.to_string()).unwrap_or_default(),
                    ),
                    None => (String::new(), String::new(), String::new()),
                };
                let retry = serde_json::to_string(&job.retry).unwrap_or_else(|_| "[]".into());
                format!(
                    "scheduled:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
                    encode_key(&job.queue),
                    encode_key(&job.id),
                    job.run_at_ms(),
                    job.count,
                    job.exclusive,
                    retry,
                    kind,
                    meta,
                    times,
                    job.payload,
                )
            }
            JobEvent::Requested { queue, id } => {
                format!("requested:{}:{}", encode_key(queue), encode_key(id))
            }
            JobEvent::Acknowledged { queue, id } => {
                format!("acknowledged:{}:{}", encode_key(queue), encode_key(id))
            }
            JobEvent::Rescheduled { queue, id, run_at_ms } => {
                format!(
                    "rescheduled:{}:{}:{}",
                    encode_key(queue),
                    encode_key(id),
                    run_at_ms
                )
            }
            JobEvent::Deleted { queue, id } => {
                format!("deleted:{}:{}", encode_key(queue), encode_key(id))
            }
            JobEvent::Invoked { queue, id } => {
                format!("invoked:{}:{}", encode_key(queue), encode_key(id))
            }
            JobEvent::Retry { queue, id, error } => format!(
                "retry:{}:{}:{}",
                encode_key(queue),
                encode_key(id),
                urlencoding::encode(error)
            ),
            JobEvent::Fail { queue, id, error } => format!(
                "fail:{}:{}:{}",
                encode_key(queue),
                encode_key(id),
                urlencoding::encode(error)
            ),
            JobEvent::Unblocked { queue } => format!("unblocked:{}", encode_key(queue)),
        }
    }

    /// Parse a wire payload. `None` for payloads this version does not know.
    pub fn parse(tenant: &str, message: &str) -> Option<JobEvent> {
        let head: Vec<&str> = split_bounded(message, 2, ':');
        let event = *head.first()?;
        match event {
            "scheduled" => {
                let parts = split_bounded(message, SCHEDULED_PARTS, ':');
                if parts.len() < SCHEDULED_PARTS {
                    return None;
                }
                let queue = decode_key(parts[1]);
                let id = decode_key(parts[2]);
                let run_at_ms: i64 = parts[3].parse().ok()?;
                let count: u32 = parts[4].parse().ok()?;
                let exclusive = parts[5] == "true";
                let retry: Vec<i64> = serde_json::from_str(parts[6]).ok()?;
                let schedule = if parts[7].is_empty() {
                    None
                } else {
                    Some(JobSchedule {
                        kind: decode_key(parts[7]),
                        meta: decode_key(parts[8]),
                        times: if parts[9].is_empty() {
                            None
                        } else {
                            Some(parts[9].parse().ok()?)
                        },
                    })
                };
                Some(JobEvent::Scheduled {
                    job: Job {
                        tenant: tenant.to_string(),
                        queue,
                        id,
                        payload: parts[10].to_string(),
                        run_at: ms_to_datetime(run_at_ms),
                        count,
                        exclusive,
                        retry,
                        schedule,
                    },
                })
            }
            "requested" | "acknowledged" | "deleted" | "invoked" => {
                let parts = split_bounded(message, 3, ':');
                if parts.len() < 3 {
                    return None;
                }
                let queue = decode_key(parts[1]);
                let id = decode_key(parts[2]);
                Some(match event {
                    "requested" => JobEvent::Requested { queue, id },
                    "acknowledged" => JobEvent::Acknowledged { queue, id },
                    "deleted" => JobEvent::Deleted { queue, id },
                    _ => JobEvent::Invoked { queue, id },
                })
            }
            "rescheduled" => {
                let parts = split_bounded(message, RESCHEDULED_PARTS, ':');
                if parts.len() < RESCHEDULED_PARTS {
                    return None;
                }
                Some(JobEvent::Rescheduled {
                    queue: decode_key(parts[1]),
                    id: decode_key(parts[2]),
                    run_at_ms: parts[3].parse().ok()?,
                })
            }
            "retry" | "fail" => {
                let parts = split_bounded(message, ERROR_PARTS, ':');
                if parts.len() < ERROR_PARTS {
                    return None;
                }
                let queue = decode_key(parts[1]);
                let id = decode_key(parts[2]);
                let error = urlencoding::decode(parts[3])
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| parts[3].to_string());
                Some(if event == "retry" {
                    JobEvent::Retry { queue, id, error }
                } else {
                    JobEvent::Fail { queue, id, error }
                })
            }
            "unblocked" => {
                let parts = split_bounded(message, 2, ':');
                Some(JobEvent::Unblocked {
                    queue: decode_key(parts.get(1).copied()?),
                })
            }
            _ => None,
        }
    }

    /// Queue the event concerns, if any.
    pub fn queue(&self) -> Option<&str> {
        match self {
            JobEvent::Scheduled { job } => Some(&job.queue),
            JobEvent::Requested { queue, .. }
            | JobEvent::Acknowledged { queue, .. }
            | JobEvent::Rescheduled { queue, .. }
            | JobEvent::Deleted { queue, .. }
            | JobEvent::Invoked { queue, .. }
            | JobEvent::Retry { queue, .. }
            | JobEvent::Fail { queue, .. }
            | JobEvent::Unblocked { queue } => Some(queue),
        }
    }

    /// Job id the event concerns, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            JobEvent::Scheduled { job } => Some(&job.id),
            JobEvent::Requested { id, .. }
            | JobEvent::Acknowledged { id, .. }
            | JobEvent::Rescheduled { id, .. }
            | JobEvent::Deleted { id, .. }
            | JobEvent::Invoked { id, .. }
            | JobEvent::Retry { id, .. }
            | JobEvent::Fail { id, .. } => Some(id),
            JobEvent::Unblocked { .. } => None,
        }
    }
}
