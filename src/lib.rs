//! Offline-tolerant key/value sync.
//!
//! Records live in three places: an in-memory cache that every read is
//! served from, a durable local store that survives restarts, and a remote
//! store that other devices share. [`sync::SyncService`] keeps them in step
//! and tells other instances on the same [`broadcast::ChannelHub`] about
//! each change.

pub mod broadcast;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{RemoteError, Result, StoreError, SyncError, ValidationError};
pub use sync::{SyncOptions, SyncParts, SyncService, WriteOutcome};
