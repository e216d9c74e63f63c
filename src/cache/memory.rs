//! In-memory record cache, the fast path for every read.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::traits::{CachedRecord, Stamp};

#[derive(Default)]
struct Inner {
  records: BTreeMap<String, CachedRecord>,
  /// Stamps of local deletes, so an older broadcast can't resurrect a key
  tombstones: HashMap<String, Stamp>,
  /// Bumped on every change to a key
  generation: u64,
  /// Generation at which each key last changed
  touched: HashMap<String, u64>,
}

impl Inner {
  fn touch(&mut self, key: &str) {
    self.generation += 1;
    let generation = self.generation;
    self.touched.insert(key.to_string(), generation);
  }
}

/// Mapping from record key to its current value.
///
/// Only the sync service mutates it. Nothing here suspends.
#[derive(Default)]
pub struct RecordCache {
  inner: RwLock<Inner>,
}

impl RecordCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.inner.read().records.get(key).map(|r| r.value.clone())
  }

  pub fn entry(&self, key: &str) -> Option<CachedRecord> {
    self.inner.read().records.get(key).cloned()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.inner.read().records.contains_key(key)
  }

  /// Store a local write. Returns the previous value, if any.
  pub fn set(&self, key: &str, value: Value, stamp: Stamp) -> Option<Value> {
    let mut inner = self.inner.write();
    inner.touch(key);
    inner.tombstones.remove(key);
    inner
      .records
      .insert(
        key.to_string(),
        CachedRecord {
          value,
          stamp: Some(stamp),
        },
      )
      .map(|r| r.value)
  }

  /// Drop a key after a local delete. Returns the removed value, if any.
  pub fn remove(&self, key: &str, stamp: Stamp) -> Option<Value> {
    let mut inner = self.inner.write();
    inner.touch(key);
    inner.tombstones.insert(key.to_string(), stamp);
    inner.records.remove(key).map(|r| r.value)
  }

  /// Fold in a change made elsewhere, last write wins.
  ///
  /// `value` of None is a delete. Returns whether the cache changed.
  pub fn apply_if_newer(&self, key: &str, value: Option<Value>, stamp: Stamp) -> bool {
    let mut inner = self.inner.write();

    let current = inner
      .records
      .get(key)
      .and_then(|r| r.stamp.as_ref())
      .or_else(|| inner.tombstones.get(key));
    if current.is_some_and(|current| *current >= stamp) {
      return false;
    }

    inner.touch(key);
    match value {
      Some(value) => {
        inner.tombstones.remove(key);
        inner.records.insert(
          key.to_string(),
          CachedRecord {
            value,
            stamp: Some(stamp),
          },
        );
        true
      }
      None => {
        let existed = inner.records.remove(key).is_some();
        inner.tombstones.insert(key.to_string(), stamp);
        existed
      }
    }
  }

  /// Change counter to pass to [`RecordCache::replace_since`].
  pub fn generation(&self) -> u64 {
    self.inner.read().generation
  }

  /// Replace the whole content with an unstamped snapshot.
  pub fn replace_all(&self, snapshot: BTreeMap<String, Value>) {
    self.replace_since(snapshot, u64::MAX);
  }

  /// Replace the content with a snapshot taken at generation `since`.
  ///
  /// Keys changed after `since` keep their current record or tombstone.
  /// Returns those keys.
  pub fn replace_since(
    &self,
    snapshot: BTreeMap<String, Value>,
    since: u64,
  ) -> BTreeSet<String> {
    let mut inner = self.inner.write();
    let kept: BTreeSet<String> = inner
      .touched
      .iter()
      .filter(|(_, generation)| **generation > since)
      .map(|(key, _)| key.clone())
      .collect();

    let mut records: BTreeMap<String, CachedRecord> = snapshot
      .into_iter()
      .filter(|(key, _)| !kept.contains(key))
      .map(|(key, value)| (key, CachedRecord { value, stamp: None }))
      .collect();
    for key in &kept {
      if let Some(record) = inner.records.remove(key) {
        records.insert(key.clone(), record);
      }
    }
    inner.records = records;
    inner.tombstones.retain(|key, _| kept.contains(key));
    kept
  }

  /// Fill a gap with a value read from elsewhere. Never overrides a known
  /// record or a local delete.
  pub fn seed(&self, key: &str, value: Value) -> bool {
    let mut inner = self.inner.write();
    if inner.records.contains_key(key) || inner.tombstones.contains_key(key) {
      return false;
    }
    inner
      .records
      .insert(key.to_string(), CachedRecord { value, stamp: None });
    true
  }

  pub fn snapshot(&self) -> BTreeMap<String, Value> {
    self
      .inner
      .read()
      .records
      .iter()
      .map(|(k, r)| (k.clone(), r.value.clone()))
      .collect()
  }

  pub fn keys(&self) -> Vec<String> {
    self.inner.read().records.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.inner.read().records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.read().records.is_empty()
  }

  pub fn clear(&self) {
    let mut inner = self.inner.write();
    inner.records.clear();
    inner.tombstones.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identity::DeviceId;
  use chrono::{DateTime, Duration, Utc};
  use serde_json::json;

  fn stamp(secs: i64, device: &str) -> Stamp {
    let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    Stamp::new(base + Duration::seconds(secs), DeviceId::from(device))
  }

  #[test]
  fn set_is_visible_immediately() {
    let cache = RecordCache::new();
    assert_eq!(cache.set("theme", json!({"mode": "dark"}), stamp(0, "a")), None);
    assert_eq!(cache.get("theme"), Some(json!({"mode": "dark"})));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.keys(), vec!["theme".to_string()]);
  }

  #[test]
  fn older_changes_do_not_overwrite_newer_ones() {
    let cache = RecordCache::new();
    cache.set("counter", json!(2), stamp(10, "a"));
    assert!(!cache.apply_if_newer("counter", Some(json!(1)), stamp(5, "b")));
    assert_eq!(cache.get("counter"), Some(json!(2)));
    assert!(cache.apply_if_newer("counter", Some(json!(3)), stamp(11, "b")));
    assert_eq!(cache.get("counter"), Some(json!(3)));
  }

  #[test]
  fn equal_timestamps_break_ties_on_device() {
    let cache = RecordCache::new();
    cache.set("k", json!("a"), stamp(1, "device_a"));
    assert!(cache.apply_if_newer("k", Some(json!("b")), stamp(1, "device_b")));
    assert!(!cache.apply_if_newer("k", Some(json!("a2")), stamp(1, "device_a")));
    assert_eq!(cache.get("k"), Some(json!("b")));
  }

  #[test]
  fn tombstones_block_stale_resurrection() {
    let cache = RecordCache::new();
    cache.set("k", json!(1), stamp(1, "a"));
    cache.remove("k", stamp(5, "a"));
    assert!(!cache.apply_if_newer("k", Some(json!(1)), stamp(2, "b")));
    assert_eq!(cache.get("k"), None);
    assert!(cache.apply_if_newer("k", Some(json!(9)), stamp(6, "b")));
    assert_eq!(cache.get("k"), Some(json!(9)));
  }

  #[test]
  fn unstamped_snapshot_entries_accept_any_change() {
    let cache = RecordCache::new();
    cache.replace_all(BTreeMap::from([("k".to_string(), json!(1))]));
    assert_eq!(cache.entry("k").unwrap().stamp, None);
    assert!(cache.apply_if_newer("k", None, stamp(0, "b")));
    assert!(cache.is_empty());
  }

  #[test]
  fn snapshot_keeps_keys_changed_after_it_was_taken() {
    let cache = RecordCache::new();
    cache.set("theme", json!("light"), stamp(0, "a"));
    cache.set("stale", json!(1), stamp(0, "a"));
    let since = cache.generation();

    cache.set("theme", json!("dark"), stamp(1, "a"));
    cache.remove("gone", stamp(1, "a"));
    let kept = cache.replace_since(
      BTreeMap::from([
        ("theme".to_string(), json!("light")),
        ("gone".to_string(), json!("back")),
        ("other".to_string(), json!(2)),
      ]),
      since,
    );

    assert_eq!(kept, BTreeSet::from(["gone".to_string(), "theme".to_string()]));
    assert_eq!(cache.get("theme"), Some(json!("dark")));
    assert_eq!(cache.get("gone"), None);
    assert_eq!(cache.get("stale"), None);
    assert_eq!(cache.get("other"), Some(json!(2)));
    assert!(!cache.apply_if_newer("gone", Some(json!("old")), stamp(0, "b")));
  }

  #[test]
  fn seed_only_fills_gaps() {
    let cache = RecordCache::new();
    assert!(cache.seed("a", json!(1)));
    assert!(!cache.seed("a", json!(2)));
    cache.remove("b", stamp(1, "a"));
    assert!(!cache.seed("b", json!(3)));
    assert_eq!(cache.get("a"), Some(json!(1)));
    assert_eq!(cache.get("b"), None);
  }
}
