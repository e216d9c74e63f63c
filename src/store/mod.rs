//! Local durable storage.
//!
//! This module provides:
//! - The [`KeyValueStore`] capability with explicit variants: SQLite-backed
//!   [`DurableLocalStore`], in-process [`MemoryStore`] and [`NullStore`]
//! - The [`LocalStore`] adapter that namespaces keys, encodes values as JSON
//!   and never propagates write failures

mod local;
mod memory;
mod sqlite;
mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use sqlite::{DurableLocalStore, DEFAULT_CAPACITY};
pub use traits::{KeyValueStore, NullStore};
