//! Orchestration on top of the cache, the local store and the remote.
//!
//! - [`SyncService`]: the facade applications hold, one per "tab"
//! - [`SyncScheduler`]: periodic flush of the pending queue

mod scheduler;
mod service;

pub use scheduler::{FlushOutcome, SchedulerHandle, SyncScheduler, DEFAULT_SYNC_INTERVAL};
pub use service::{
  LoadReport, SyncOptions, SyncParts, SyncService, WriteOutcome, DEFAULT_CHANNEL, DEFAULT_NAMESPACE,
};
