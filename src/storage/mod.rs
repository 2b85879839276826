//! Store adapter subsystem: the atomic transition protocol and its
//! in-memory implementation.

pub mod adapters;
pub mod error;
pub mod traits;
pub mod types;

pub use adapters::MemoryStoreAdapter;
pub use error::{StoreError, StoreResult};
pub use traits::{Notification, StoreAdapter};
pub use types::{
    Acknowledgement, DeleteOutcome, InvokeOutcome, PickedJob, RequestOutcome, ScanPage,
    ScheduleCommand, ScheduleOutcome, StaleEntry,
};
