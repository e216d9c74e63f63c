//! Namespaced JSON adapter over a [`KeyValueStore`].
//!
//! Records live under `<namespace>:<key>`, bookkeeping (device id, pending
//! journal) under `<namespace>#<name>`, so neither collides with unrelated
//! data in the same substrate. Failures are logged and swallowed: the cache
//! and the remote store remain the paths of record.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

use super::traits::KeyValueStore;
use crate::error::StoreError;

#[derive(Clone)]
pub struct LocalStore {
  inner: Arc<dyn KeyValueStore>,
  record_prefix: String,
  meta_prefix: String,
}

impl LocalStore {
  pub fn new(inner: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
    Self {
      inner,
      record_prefix: format!("{}:", namespace),
      meta_prefix: format!("{}#", namespace),
    }
  }

  /// Read a record. Values that aren't valid JSON come back as strings.
  pub fn get(&self, key: &str) -> Option<Value> {
    let raw = self.read(&self.record_key(key))?;
    Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
  }

  /// Write a record through. Returns whether the write landed.
  pub fn set(&self, key: &str, value: &Value) -> bool {
    self.write(&self.record_key(key), &value.to_string())
  }

  pub fn remove(&self, key: &str) {
    let full = self.record_key(key);
    if let Err(e) = self.inner.remove(&full) {
      error!(key, error = %e, "failed to remove local record");
    }
  }

  /// Remove every record in this namespace. Bookkeeping entries and
  /// foreign keys are left alone.
  pub fn clear(&self) {
    for key in self.keys() {
      self.remove(&key);
    }
  }

  /// Record keys in this namespace, without the prefix.
  pub fn keys(&self) -> Vec<String> {
    match self.inner.keys() {
      Ok(keys) => keys
        .into_iter()
        .filter_map(|k| k.strip_prefix(&self.record_prefix).map(String::from))
        .collect(),
      Err(e) => {
        error!(error = %e, "failed to list local keys");
        Vec::new()
      }
    }
  }

  /// All records in this namespace.
  pub fn snapshot(&self) -> BTreeMap<String, Value> {
    self
      .keys()
      .into_iter()
      .filter_map(|k| self.get(&k).map(|v| (k, v)))
      .collect()
  }

  /// Read a bookkeeping entry.
  pub fn get_meta<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
    let raw = self.read(&self.meta_key(name))?;
    match serde_json::from_str(&raw) {
      Ok(v) => Some(v),
      Err(e) => {
        warn!(name, error = %e, "discarding unreadable local metadata");
        None
      }
    }
  }

  /// Write a bookkeeping entry. Returns whether the write landed.
  pub fn set_meta<T: Serialize>(&self, name: &str, value: &T) -> bool {
    let key = self.meta_key(name);
    match serde_json::to_string(value) {
      Ok(raw) => self.write(&key, &raw),
      Err(source) => {
        let e = StoreError::Serialize { key, source };
        error!(error = %e, "failed to encode local metadata");
        false
      }
    }
  }

  fn record_key(&self, key: &str) -> String {
    format!("{}{}", self.record_prefix, key)
  }

  fn meta_key(&self, name: &str) -> String {
    format!("{}{}", self.meta_prefix, name)
  }

  fn read(&self, full_key: &str) -> Option<String> {
    match self.inner.get(full_key) {
      Ok(v) => v,
      Err(e) => {
        error!(key = full_key, error = %e, "failed to read local store");
        None
      }
    }
  }

  fn write(&self, full_key: &str, raw: &str) -> bool {
    match self.inner.set(full_key, raw) {
      Ok(()) => true,
      Err(e @ StoreError::CapacityExceeded { .. }) => {
        warn!(key = full_key, error = %e, "local store full, keeping value in memory only");
        false
      }
      Err(e) => {
        error!(key = full_key, error = %e, "failed to write local store");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryStore, NullStore};
  use serde_json::json;

  fn local(capacity: usize) -> (Arc<MemoryStore>, LocalStore) {
    let inner = Arc::new(MemoryStore::new(capacity));
    let store = LocalStore::new(inner.clone(), "dashsync");
    (inner, store)
  }

  #[test]
  fn namespaces_records_and_metadata() {
    let (inner, store) = local(usize::MAX);
    inner.set("unrelated", "x").unwrap();
    store.set("theme", &json!({"mode": "dark"}));
    store.set_meta("device_id", &"device_1_abc");

    assert_eq!(store.keys(), vec!["theme".to_string()]);
    assert_eq!(
      inner.get("dashsync:theme").unwrap().as_deref(),
      Some("{\"mode\":\"dark\"}")
    );
    assert_eq!(
      store.get_meta::<String>("device_id").as_deref(),
      Some("device_1_abc")
    );

    store.clear();
    assert!(store.keys().is_empty());
    assert_eq!(inner.get("unrelated").unwrap().as_deref(), Some("x"));
    assert!(store.get_meta::<String>("device_id").is_some());
  }

  #[test]
  fn capacity_failures_are_swallowed() {
    let (_inner, store) = local(24);
    assert!(store.set("a", &json!("short")));
    assert!(!store.set("b", &json!("this value is far too long to fit")));
    assert_eq!(store.get("b"), None);
    assert_eq!(store.get("a"), Some(json!("short")));
  }

  #[test]
  fn raw_text_reads_back_as_string() {
    let (inner, store) = local(usize::MAX);
    inner.set("dashsync:legacy", "not json").unwrap();
    assert_eq!(store.get("legacy"), Some(json!("not json")));
  }

  #[test]
  fn null_store_never_holds_anything() {
    let store = LocalStore::new(Arc::new(NullStore), "dashsync");
    assert!(store.set("a", &json!(1)));
    assert_eq!(store.get("a"), None);
    assert!(store.snapshot().is_empty());
  }
}
