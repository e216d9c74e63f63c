//! In-process key/value store with the same capacity behaviour as the
//! durable one. Useful for tests and for ephemeral CLI runs.

use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::traits::{entry_size, KeyValueStore};
use crate::error::StoreError;

pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
  capacity: usize,
}

impl MemoryStore {
  pub fn new(capacity: usize) -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      capacity,
    }
  }

  pub fn unbounded() -> Self {
    Self::new(usize::MAX)
  }

  /// Bytes currently used.
  pub fn used(&self) -> usize {
    self
      .entries
      .lock()
      .iter()
      .map(|(k, v)| entry_size(k, v))
      .sum()
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.entries.lock().get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let mut entries = self.entries.lock();
    let used: usize = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
    let existing = entries.get(key).map(|v| entry_size(key, v)).unwrap_or(0);
    let needed = used - existing + entry_size(key, value);
    if needed > self.capacity {
      return Err(StoreError::CapacityExceeded {
        needed,
        capacity: self.capacity,
      });
    }
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.entries.lock().remove(key);
    Ok(())
  }

  fn clear(&self) -> Result<(), StoreError> {
    self.entries.lock().clear();
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    Ok(self.entries.lock().keys().cloned().collect())
  }
}
