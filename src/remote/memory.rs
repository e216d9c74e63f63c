//! In-process remote store.
//!
//! Behaves like the hosted store (text values, upsert by key where the last
//! write to arrive wins, append-only sync log) and lets callers take it
//! offline, slow it down or reject individual keys.
//! Several service instances sharing one `Arc<MemoryRemote>` model several
//! devices talking to the same backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::traits::RemoteStore;
use super::types::{
  HealthReport, ItemFailure, RecordWrite, RemoteRecord, SyncAction, SyncLogEntry,
};
use crate::clock::{Clock, SystemClock};
use crate::codec::{decode_value, encode_value};
use crate::error::RemoteError;
use crate::identity::DeviceId;

/// A row of the records table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
  /// Value as stored, in text form
  pub text: String,
  pub updated_at: DateTime<Utc>,
  pub updated_by: String,
}

impl StoredRecord {
  pub fn value(&self) -> Value {
    decode_value(&self.text)
  }
}

#[derive(Default)]
struct State {
  records: BTreeMap<String, StoredRecord>,
  log: Vec<SyncLogEntry>,
  offline: bool,
  health_down: bool,
  health_delay: Option<Duration>,
  write_delay: Option<Duration>,
  load_delay: Option<Duration>,
  rejected: HashSet<String>,
  calls: usize,
}

pub struct MemoryRemote {
  state: Mutex<State>,
  clock: Arc<dyn Clock>,
}

impl Default for MemoryRemote {
  fn default() -> Self {
    Self::new(Arc::new(SystemClock))
  }
}

impl MemoryRemote {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      state: Mutex::new(State::default()),
      clock,
    }
  }

  /// Every call fails with a network-style error while offline.
  pub fn set_offline(&self, offline: bool) {
    self.state.lock().offline = offline;
  }

  /// Make the liveness probe fail without affecting data calls.
  pub fn set_health_down(&self, down: bool) {
    self.state.lock().health_down = down;
  }

  /// Make the liveness probe take `delay` before answering.
  pub fn set_health_delay(&self, delay: Option<Duration>) {
    self.state.lock().health_delay = delay;
  }

  /// Make every save and delete take `delay` before it lands.
  pub fn set_write_delay(&self, delay: Option<Duration>) {
    self.state.lock().write_delay = delay;
  }

  /// Make snapshot reads answer `delay` after the snapshot was taken.
  pub fn set_load_delay(&self, delay: Option<Duration>) {
    self.state.lock().load_delay = delay;
  }

  /// Refuse writes to `key` as a store-side error.
  pub fn reject_key(&self, key: &str) {
    self.state.lock().rejected.insert(key.to_string());
  }

  pub fn accept_key(&self, key: &str) {
    self.state.lock().rejected.remove(key);
  }

  pub fn record(&self, key: &str) -> Option<StoredRecord> {
    self.state.lock().records.get(key).cloned()
  }

  pub fn value(&self, key: &str) -> Option<Value> {
    self.record(key).map(|r| r.value())
  }

  /// Whole sync log, oldest first.
  pub fn log(&self) -> Vec<SyncLogEntry> {
    self.state.lock().log.clone()
  }

  /// Number of data calls received, including failed ones.
  pub fn calls(&self) -> usize {
    self.state.lock().calls
  }

  /// Seed a record directly, bypassing the log.
  pub fn insert(&self, key: &str, value: &Value, updated_by: &str) {
    let record = StoredRecord {
      text: encode_value(value),
      updated_at: self.clock.now(),
      updated_by: updated_by.to_string(),
    };
    self.state.lock().records.insert(key.to_string(), record);
  }

  async fn write_latency(&self) {
    let delay = self.state.lock().write_delay;
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
  }

  fn begin(&self) -> Result<parking_lot::MutexGuard<'_, State>, RemoteError> {
    let mut state = self.state.lock();
    state.calls += 1;
    if state.offline {
      return Err(RemoteError::offline());
    }
    Ok(state)
  }

  fn upsert(
    &self,
    state: &mut State,
    write: &RecordWrite,
    action: SyncAction,
  ) -> Result<(), RemoteError> {
    if write.key.is_empty() {
      return Err(RemoteError::status(400, "Missing key or value"));
    }
    if state.rejected.contains(&write.key) {
      return Err(RemoteError::store(format!("write to {} rejected", write.key)));
    }

    state.records.insert(
      write.key.clone(),
      StoredRecord {
        text: encode_value(&write.value),
        updated_at: write.updated_at,
        updated_by: write.updated_by.to_string(),
      },
    );

    let entry = self.log_entry(action, &write.key, write.updated_by.as_str());
    state.log.push(entry);
    Ok(())
  }

  fn log_entry(&self, action: SyncAction, key: &str, device_id: &str) -> SyncLogEntry {
    SyncLogEntry {
      action,
      key: key.to_string(),
      timestamp: self.clock.now(),
      device_id: device_id.to_string(),
    }
  }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
  async fn save(&self, write: &RecordWrite) -> Result<(), RemoteError> {
    self.write_latency().await;
    let mut state = self.begin()?;
    self.upsert(&mut state, write, SyncAction::Save)
  }

  async fn save_batch(
    &self,
    writes: &[RecordWrite],
    _device_id: &DeviceId,
  ) -> Result<Vec<ItemFailure>, RemoteError> {
    self.write_latency().await;
    let mut state = self.begin()?;
    if writes.is_empty() {
      return Err(RemoteError::status(400, "Invalid items array"));
    }

    let failures = writes
      .iter()
      .filter_map(|write| {
        self
          .upsert(&mut state, write, SyncAction::BatchSave)
          .err()
          .map(|e| ItemFailure {
            key: write.key.clone(),
            error: e.message,
          })
      })
      .collect();
    Ok(failures)
  }

  async fn load(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteError> {
    let state = self.begin()?;
    Ok(state.records.get(key).map(|r| RemoteRecord {
      key: key.to_string(),
      value: r.value(),
      updated_at: Some(r.updated_at.to_rfc3339()),
    }))
  }

  async fn load_all(&self) -> Result<BTreeMap<String, Value>, RemoteError> {
    let (snapshot, delay) = {
      let state = self.begin()?;
      let snapshot: BTreeMap<String, Value> = state
        .records
        .iter()
        .map(|(k, r)| (k.clone(), r.value()))
        .collect();
      (snapshot, state.load_delay)
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    Ok(snapshot)
  }

  async fn delete(&self, key: &str, device_id: &DeviceId) -> Result<(), RemoteError> {
    self.write_latency().await;
    let mut state = self.begin()?;
    state.records.remove(key);
    let entry = self.log_entry(SyncAction::Delete, key, device_id.as_str());
    state.log.push(entry);
    Ok(())
  }

  async fn health(&self) -> Result<HealthReport, RemoteError> {
    let (down, delay) = {
      let state = self.state.lock();
      (state.offline || state.health_down, state.health_delay)
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if down {
      return Err(RemoteError::network("health probe failed"));
    }
    Ok(HealthReport {
      status: "ok".to_string(),
      timestamp: Some(self.clock.now().to_rfc3339()),
    })
  }

  async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, RemoteError> {
    let state = self.begin()?;
    Ok(state.log.iter().rev().take(limit).cloned().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use serde_json::json;

  fn write(key: &str, value: Value, at: DateTime<Utc>, by: &str) -> RecordWrite {
    RecordWrite {
      key: key.to_string(),
      value,
      updated_at: at,
      updated_by: DeviceId::from(by),
    }
  }

  #[tokio::test]
  async fn last_write_to_arrive_wins() {
    let clock = Arc::new(ManualClock::default());
    let remote = MemoryRemote::new(clock.clone());
    let early = clock.now();
    let late = early + chrono::Duration::seconds(1);

    remote.save(&write("counter", json!(2), late, "b")).await.unwrap();
    remote.save(&write("counter", json!(1), early, "a")).await.unwrap();

    assert_eq!(remote.value("counter"), Some(json!(1)));
    assert_eq!(remote.record("counter").unwrap().updated_by, "a");
    assert_eq!(remote.log().len(), 2);
  }

  #[tokio::test]
  async fn batch_commits_accepted_items() {
    let remote = MemoryRemote::default();
    remote.reject_key("b");
    let now = Utc::now();
    let failures = remote
      .save_batch(
        &[
          write("a", json!(1), now, "d"),
          write("b", json!(2), now, "d"),
          write("c", json!(3), now, "d"),
        ],
        &DeviceId::from("d"),
      )
      .await
      .unwrap();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "b");
    assert_eq!(remote.value("a"), Some(json!(1)));
    assert_eq!(remote.value("b"), None);
    assert_eq!(remote.value("c"), Some(json!(3)));
    assert!(remote
      .log()
      .iter()
      .all(|e| e.action == SyncAction::BatchSave && e.key != "b"));
  }

  #[tokio::test]
  async fn offline_fails_every_data_call() {
    let remote = MemoryRemote::default();
    remote.set_offline(true);
    let err = remote.load_all().await.unwrap_err();
    assert_eq!(err.kind, crate::error::RemoteErrorKind::Offline);
    assert!(remote.health().await.is_err());
    assert_eq!(remote.calls(), 1);
  }

  #[tokio::test]
  async fn strings_are_stored_as_plain_text() {
    let remote = MemoryRemote::default();
    remote
      .save(&write("note", json!("hello"), Utc::now(), "d"))
      .await
      .unwrap();
    assert_eq!(remote.record("note").unwrap().text, "hello");
    assert_eq!(remote.load("note").await.unwrap().unwrap().value, json!("hello"));
    assert_eq!(remote.load("missing").await.unwrap(), None);
  }
}
