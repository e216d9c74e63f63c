//! In-memory state of the sync core.
//!
//! This module provides:
//! - [`RecordCache`]: current value of every record, served without suspending
//! - [`PendingQueue`]: records whose last write the remote hasn't confirmed,
//!   deduplicated per key and optionally journaled to local storage

mod memory;
mod pending;
mod traits;

pub use memory::RecordCache;
pub use pending::{PendingChange, PendingOp, PendingQueue};
pub use traits::{CachedRecord, Fetched, ReadSource, Stamp};
