//! Remote backing store.
//!
//! [`RemoteStore`] is the port; [`RestRemote`], [`SupabaseRemote`] and
//! [`MemoryRemote`] implement it. [`SyncClient`] sits in front of whichever
//! one is configured and owns failure handling and pending-queue upkeep.

mod client;
mod memory;
mod rest;
mod supabase;
mod traits;
mod types;

pub(crate) use client::validate_key;
pub use client::{Availability, BatchFailure, BatchReport, HealthStatus, SyncClient};
pub use memory::{MemoryRemote, StoredRecord};
pub use rest::RestRemote;
pub use supabase::SupabaseRemote;
pub use traits::RemoteStore;
pub use types::{HealthReport, ItemFailure, RecordWrite, RemoteRecord, SyncAction, SyncLogEntry};
