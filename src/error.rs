//! Error taxonomy for the sync core.
//!
//! None of these are fatal. Remote and store failures are caught where they
//! happen and turned into values; only validation errors reach the caller
//! as a hard rejection.

use thiserror::Error;

/// A write request that was rejected before touching any store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("record key must not be empty")]
  EmptyKey,
  #[error("batch must contain at least one item")]
  EmptyBatch,
}

/// How a remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
  /// Connection refused, DNS failure, timeout
  Network,
  /// Non-2xx response other than a semantic not-found
  Status(u16),
  /// Response body did not match the expected shape
  Decode,
  /// The backing store reported a failure for this record
  Store,
  /// The remote was deliberately taken offline (in-process remote only)
  Offline,
}

/// A transport-level failure talking to the remote store.
///
/// Always recoverable: the affected keys stay in the pending queue and are
/// retried on the next scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
  pub kind: RemoteErrorKind,
  pub message: String,
}

impl RemoteError {
  pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(RemoteErrorKind::Network, message)
  }

  pub fn status(code: u16, message: impl Into<String>) -> Self {
    Self::new(RemoteErrorKind::Status(code), message)
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::new(RemoteErrorKind::Decode, message)
  }

  pub fn store(message: impl Into<String>) -> Self {
    Self::new(RemoteErrorKind::Store, message)
  }

  pub fn offline() -> Self {
    Self::new(RemoteErrorKind::Offline, "remote store is offline")
  }
}

impl From<reqwest::Error> for RemoteError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::decode(e.to_string())
    } else if let Some(status) = e.status() {
      Self::status(status.as_u16(), e.to_string())
    } else {
      Self::network(e.to_string())
    }
  }
}

/// Failure of the local key/value substrate.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("local store capacity exceeded: {needed} bytes needed, {capacity} available")]
  CapacityExceeded { needed: usize, capacity: usize },
  #[error("local store backend error: {0}")]
  Backend(String),
  #[error("failed to serialize value for key {key}: {source}")]
  Serialize {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Backend(e.to_string())
  }
}

/// Umbrella error for the service facade.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("remote sync failed: {0}")]
  Remote(#[from] RemoteError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
