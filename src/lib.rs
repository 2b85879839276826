//! roost - a distributed, at-least-once job queue.
//!
//! Producers enqueue immediate, delayed, recurring, or retry-governed jobs;
//! worker processes pull and execute them, coordinating purely through a
//! shared, atomically-scriptable store - no central broker, no client-side
//! locks. The store is abstracted behind [`storage::StoreAdapter`]; the
//! crate ships an in-memory adapter whose critical sections stand in for
//! server-side scripts.

pub mod acknowledger;
pub mod activity;
pub mod config;
pub mod distributor;
pub mod error;
pub mod events;
pub mod job;
pub mod keys;
pub mod producer;
pub mod retry;
pub mod stale_checker;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use acknowledger::{AckOptions, Acknowledger, AcknowledgementDescriptor, OnTerminalError};
pub use activity::{Activity, ActivityFilter};
pub use config::{DistributorConfig, StaleCheckerConfig, WorkerConfig, MAX_TIMER_MS};
pub use distributor::{AckHandle, DistributorHandle, JobDistributor, JobProcessor};
pub use error::{QueueError, Result};
pub use events::JobEvent;
pub use job::{EnqueueRequest, Job, JobSchedule};
pub use producer::Producer;
pub use retry::{next_retry_at, ScheduleMap};
pub use stale_checker::StaleChecker;
pub use storage::{
    DeleteOutcome, InvokeOutcome, MemoryStoreAdapter, RequestOutcome, StoreAdapter,
};
pub use worker::Worker;
