//! Core types for cached records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::DeviceId;

/// Who wrote a record and when.
///
/// Ordered by time first, then by device id so two writes stamped in the
/// same instant still have a single winner on every tab.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
  pub updated_at: DateTime<Utc>,
  pub updated_by: DeviceId,
}

impl Stamp {
  pub fn new(updated_at: DateTime<Utc>, updated_by: DeviceId) -> Self {
    Self {
      updated_at,
      updated_by,
    }
  }
}

/// A record as held by the in-memory cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
  pub value: Value,
  /// None for records seeded from a snapshot that carried no stamps
  pub stamp: Option<Stamp>,
}

/// Result of a read, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: ReadSource,
}

impl<T> Fetched<T> {
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: ReadSource::Cache,
    }
  }

  pub fn from_remote(data: T) -> Self {
    Self {
      data,
      source: ReadSource::Remote,
    }
  }

  /// Remote unreachable, served from the local durable store.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: ReadSource::Offline,
    }
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
  /// In-memory cache hit
  Cache,
  /// Fresh data from the remote store
  Remote,
  /// Offline mode - remote unavailable, serving the local durable copy
  Offline,
}
