//! Remote sync client: the boundary between the core and a [`RemoteStore`].
//!
//! Every failure is caught here, logged and handed back as a value. A key
//! whose write didn't go through stays in the pending queue, so callers
//! only ever need to read a failure as "retry later".

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::RemoteStore;
use super::types::{RecordWrite, SyncLogEntry};
use crate::cache::{PendingChange, PendingOp, PendingQueue};
use crate::clock::Clock;
use crate::error::{RemoteError, SyncError, ValidationError};
use crate::identity::DeviceId;

/// Per-item outcome of a batch push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
  /// Keys the remote confirmed
  pub confirmed: Vec<String>,
  /// Keys that stay queued, with the reason
  pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
  pub key: String,
  pub error: String,
}

impl BatchReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn len(&self) -> usize {
    self.confirmed.len() + self.failed.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn fail_all<'a>(&mut self, keys: impl Iterator<Item = &'a str>, error: &RemoteError) {
    self.failed.extend(keys.map(|key| BatchFailure {
      key: key.to_string(),
      error: error.message.clone(),
    }));
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
  Unknown,
  Online,
  Offline,
}

/// Last known liveness of the remote, for display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
  pub availability: Availability,
  pub checked_at: Option<DateTime<Utc>>,
  pub detail: Option<String>,
}

impl Default for HealthStatus {
  fn default() -> Self {
    Self {
      availability: Availability::Unknown,
      checked_at: None,
      detail: None,
    }
  }
}

pub struct SyncClient {
  remote: Arc<dyn RemoteStore>,
  pending: Arc<PendingQueue>,
  device_id: DeviceId,
  clock: Arc<dyn Clock>,
  health: Mutex<HealthStatus>,
  /// Remote writes leave in the order they were issued
  write_lane: tokio::sync::Mutex<()>,
}

impl SyncClient {
  pub fn new(
    remote: Arc<dyn RemoteStore>,
    pending: Arc<PendingQueue>,
    device_id: DeviceId,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      remote,
      pending,
      device_id,
      clock,
      health: Mutex::new(HealthStatus::default()),
      write_lane: tokio::sync::Mutex::new(()),
    }
  }

  pub fn device_id(&self) -> &DeviceId {
    &self.device_id
  }

  pub fn pending(&self) -> &PendingQueue {
    &self.pending
  }

  /// Upsert one record, stamped now.
  pub async fn save(&self, key: &str, value: Value) -> Result<(), SyncError> {
    validate_key(key)?;
    let change = self
      .pending
      .enqueue(key, PendingOp::Save(value), self.clock.now());
    Ok(self.push(&change).await?)
  }

  /// Upsert several records; each succeeds or fails on its own.
  pub async fn save_batch(
    &self,
    items: Vec<(String, Value)>,
  ) -> Result<BatchReport, ValidationError> {
    if items.is_empty() {
      return Err(ValidationError::EmptyBatch);
    }
    for (key, _) in &items {
      validate_key(key)?;
    }

    let now = self.clock.now();
    let changes: Vec<PendingChange> = items
      .into_iter()
      .map(|(key, value)| self.pending.enqueue(&key, PendingOp::Save(value), now))
      .collect();
    Ok(self.push_batch(&changes).await)
  }

  /// Delete a record remotely. On failure the delete is queued for retry.
  pub async fn delete_remote(&self, key: &str) -> Result<(), SyncError> {
    validate_key(key)?;
    let change = self.pending.enqueue(key, PendingOp::Delete, self.clock.now());
    Ok(self.push(&change).await?)
  }

  /// Send one change that is already in the queue.
  pub async fn push(&self, change: &PendingChange) -> Result<(), RemoteError> {
    let _lane = self.write_lane.lock().await;

    let result = match &change.op {
      PendingOp::Save(value) => self.remote.save(&self.write_for(change, value)).await,
      PendingOp::Delete => self.remote.delete(&change.key, &self.device_id).await,
    };

    match result {
      Ok(()) => {
        self.pending.confirm(&change.key, change.revision);
        debug!(key = %change.key, "remote write confirmed");
        Ok(())
      }
      Err(e) => {
        warn!(key = %change.key, error = %e, "remote write failed, will retry");
        Err(e)
      }
    }
  }

  /// Send queued changes: saves as one batch, deletes one by one.
  pub async fn push_batch(&self, changes: &[PendingChange]) -> BatchReport {
    let _lane = self.write_lane.lock().await;
    let mut report = BatchReport::default();

    let (saves, deletes): (Vec<&PendingChange>, Vec<&PendingChange>) = changes
      .iter()
      .partition(|c| matches!(c.op, PendingOp::Save(_)));

    if !saves.is_empty() {
      let writes: Vec<RecordWrite> = saves
        .iter()
        .filter_map(|c| match &c.op {
          PendingOp::Save(value) => Some(self.write_for(c, value)),
          PendingOp::Delete => None,
        })
        .collect();

      match self.remote.save_batch(&writes, &self.device_id).await {
        Ok(failures) => {
          for change in &saves {
            match failures.iter().find(|f| f.key == change.key) {
              Some(f) => report.failed.push(BatchFailure {
                key: f.key.clone(),
                error: f.error.clone(),
              }),
              None => {
                self.pending.confirm(&change.key, change.revision);
                report.confirmed.push(change.key.clone());
              }
            }
          }
        }
        Err(e) => {
          warn!(count = saves.len(), error = %e, "batch save failed, will retry");
          report.fail_all(saves.iter().map(|c| c.key.as_str()), &e);
        }
      }
    }

    for change in deletes {
      match self.remote.delete(&change.key, &self.device_id).await {
        Ok(()) => {
          self.pending.confirm(&change.key, change.revision);
          report.confirmed.push(change.key.clone());
        }
        Err(e) => {
          warn!(key = %change.key, error = %e, "remote delete failed, will retry");
          report.fail_all(std::iter::once(change.key.as_str()), &e);
        }
      }
    }

    if report.is_complete() {
      debug!(count = report.confirmed.len(), "batch confirmed");
    }
    report
  }

  /// Current remote value of `key`. A missing key is `Ok(None)`.
  pub async fn load(&self, key: &str) -> Result<Option<Value>, RemoteError> {
    match self.remote.load(key).await {
      Ok(record) => Ok(record.map(|r| r.value)),
      Err(e) => {
        warn!(key, error = %e, "failed to load remote record");
        Err(e)
      }
    }
  }

  /// Full remote snapshot.
  pub async fn load_all(&self) -> Result<BTreeMap<String, Value>, RemoteError> {
    match self.remote.load_all().await {
      Ok(all) => {
        debug!(count = all.len(), "loaded remote snapshot");
        Ok(all)
      }
      Err(e) => {
        warn!(error = %e, "failed to load remote snapshot");
        Err(e)
      }
    }
  }

  /// Probe the remote and record the outcome. Never blocks other calls.
  pub async fn check_health(&self) -> bool {
    let result = self.remote.health().await;
    let ok = result.is_ok();

    let mut health = self.health.lock();
    health.checked_at = Some(self.clock.now());
    match result {
      Ok(_) => {
        health.availability = Availability::Online;
        health.detail = None;
      }
      Err(e) => {
        warn!(error = %e, "remote health check failed");
        health.availability = Availability::Offline;
        health.detail = Some(e.message);
      }
    }
    ok
  }

  pub fn health(&self) -> HealthStatus {
    self.health.lock().clone()
  }

  pub async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, RemoteError> {
    self.remote.sync_log(limit).await
  }

  fn write_for(&self, change: &PendingChange, value: &Value) -> RecordWrite {
    RecordWrite {
      key: change.key.clone(),
      value: value.clone(),
      updated_at: change.updated_at,
      updated_by: self.device_id.clone(),
    }
  }
}

pub(crate) fn validate_key(key: &str) -> Result<(), ValidationError> {
  if key.is_empty() {
    Err(ValidationError::EmptyKey)
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::remote::{MemoryRemote, SyncAction};
  use serde_json::json;

  fn client() -> (Arc<MemoryRemote>, SyncClient) {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new(clock.clone()));
    let client = SyncClient::new(
      remote.clone(),
      Arc::new(PendingQueue::new()),
      DeviceId::from("device_test"),
      clock,
    );
    (remote, client)
  }

  #[tokio::test]
  async fn failed_save_stays_queued_and_success_clears_it() {
    let (remote, client) = client();
    remote.set_offline(true);
    assert!(client.save("theme", json!({"mode": "dark"})).await.is_err());
    assert_eq!(client.pending().count(), 1);

    remote.set_offline(false);
    client.save("theme", json!({"mode": "dark"})).await.unwrap();
    assert_eq!(client.pending().count(), 0);
    assert_eq!(remote.log().last().unwrap().action, SyncAction::Save);
  }

  #[tokio::test]
  async fn empty_key_is_rejected_before_any_remote_call() {
    let (remote, client) = client();
    let err = client.save("", json!(1)).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(ValidationError::EmptyKey)));
    assert_eq!(
      client.save_batch(Vec::new()).await.unwrap_err(),
      ValidationError::EmptyBatch
    );
    assert_eq!(remote.calls(), 0);
    assert_eq!(client.pending().count(), 0);
  }

  #[tokio::test]
  async fn partial_batch_keeps_only_failures() {
    let (remote, client) = client();
    remote.reject_key("item2");
    let report = client
      .save_batch(vec![
        ("item1".to_string(), json!(1)),
        ("item2".to_string(), json!(2)),
        ("item3".to_string(), json!(3)),
      ])
      .await
      .unwrap();

    assert_eq!(report.confirmed, vec!["item1".to_string(), "item3".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "item2");
    assert!(client.pending().contains("item2"));
    assert_eq!(client.pending().count(), 1);
  }

  #[tokio::test]
  async fn whole_batch_failure_keeps_everything() {
    let (remote, client) = client();
    remote.set_offline(true);
    let report = client
      .save_batch(vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))])
      .await
      .unwrap();
    assert!(report.confirmed.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert_eq!(client.pending().count(), 2);
  }

  #[tokio::test]
  async fn missing_key_is_absent_not_an_error() {
    let (remote, client) = client();
    assert_eq!(client.load("nope").await.unwrap(), None);
    remote.set_offline(true);
    assert!(client.load("nope").await.is_err());
  }

  #[tokio::test]
  async fn failed_delete_is_queued_for_retry() {
    let (remote, client) = client();
    remote.set_offline(true);
    assert!(client.delete_remote("gone").await.is_err());
    assert_eq!(client.pending().get("gone").unwrap().op, PendingOp::Delete);

    remote.set_offline(false);
    let report = client.push_batch(&client.pending().drain()).await;
    assert_eq!(report.confirmed, vec!["gone".to_string()]);
    assert!(client.pending().is_empty());
  }

  #[tokio::test]
  async fn health_status_tracks_last_probe() {
    let (remote, client) = client();
    assert_eq!(client.health().availability, Availability::Unknown);
    assert!(client.check_health().await);
    assert_eq!(client.health().availability, Availability::Online);
    remote.set_health_down(true);
    assert!(!client.check_health().await);
    let health = client.health();
    assert_eq!(health.availability, Availability::Offline);
    assert!(health.detail.is_some());
  }
}
