//! Device and tab identity.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::clock::Clock;
use crate::store::LocalStore;

const DEVICE_ID_META: &str = "device_id";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Stable identifier of one installation, used to attribute writes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
  /// Return the persisted id, generating and persisting one on first use.
  ///
  /// If the local store can't hold it the id still works for this process,
  /// it just won't survive a restart.
  pub fn load_or_create(store: &LocalStore, clock: &dyn Clock) -> Self {
    if let Some(id) = store.get_meta::<DeviceId>(DEVICE_ID_META) {
      return id;
    }

    let id = Self::generate(clock);
    store.set_meta(DEVICE_ID_META, &id);
    info!(device_id = %id, "generated new device id");
    id
  }

  /// `device_<unix millis>_<9 base36 chars>`
  pub fn generate(clock: &dyn Clock) -> Self {
    Self(format!(
      "device_{}_{}",
      clock.now().timestamp_millis(),
      random_base36(9)
    ))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for DeviceId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl fmt::Display for DeviceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Identifier of one running service instance (one "tab").
///
/// Not persisted; used to drop our own broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
  pub fn generate() -> Self {
    Self(format!("tab_{}", random_base36(12)))
  }
}

impl fmt::Display for TabId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

fn random_base36(len: usize) -> String {
  let mut rng = rand::thread_rng();
  (0..len)
    .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{MemoryStore, NullStore};
  use std::sync::Arc;

  #[test]
  fn generated_id_has_expected_shape() {
    let clock = ManualClock::default();
    let id = DeviceId::generate(&clock);
    let parts: Vec<&str> = id.as_str().split('_').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "device");
    assert_eq!(parts[1], clock.now().timestamp_millis().to_string());
    assert_eq!(parts[2].len(), 9);
    assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
  }

  #[test]
  fn id_is_stable_once_persisted() {
    let clock = ManualClock::default();
    let store = LocalStore::new(Arc::new(MemoryStore::unbounded()), "dashsync");
    let first = DeviceId::load_or_create(&store, &clock);
    clock.advance(chrono::Duration::seconds(10));
    let second = DeviceId::load_or_create(&store, &clock);
    assert_eq!(first, second);
  }

  #[test]
  fn without_persistence_a_fresh_id_is_generated() {
    let clock = ManualClock::default();
    let store = LocalStore::new(Arc::new(NullStore), "dashsync");
    let a = DeviceId::load_or_create(&store, &clock);
    let b = DeviceId::load_or_create(&store, &clock);
    assert_ne!(a, b);
  }
}
