//! The remote store port.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use super::types::{HealthReport, ItemFailure, RecordWrite, RemoteRecord, SyncLogEntry};
use crate::error::RemoteError;
use crate::identity::DeviceId;

/// Asynchronous key/value service holding the cross-device copy of every
/// record.
///
/// Writes are upserts keyed by record key; the write with the latest
/// `updated_at` wins. Every write and delete is appended to the store's
/// sync log.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  async fn save(&self, write: &RecordWrite) -> Result<(), RemoteError>;

  /// Upsert many records independently.
  ///
  /// `Err` means the batch as a whole didn't go through; `Ok` lists the
  /// items that were rejected while the others were committed.
  async fn save_batch(
    &self,
    writes: &[RecordWrite],
    device_id: &DeviceId,
  ) -> Result<Vec<ItemFailure>, RemoteError>;

  /// `Ok(None)` when the key doesn't exist.
  async fn load(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteError>;

  async fn load_all(&self) -> Result<BTreeMap<String, Value>, RemoteError>;

  /// Deleting a missing key succeeds.
  async fn delete(&self, key: &str, device_id: &DeviceId) -> Result<(), RemoteError>;

  async fn health(&self) -> Result<HealthReport, RemoteError>;

  /// Most recent sync log entries, newest first.
  async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, RemoteError>;
}
