//! The key/value capability the sync core writes through to.

use crate::error::StoreError;

/// A synchronous, possibly capacity-bounded string key/value substrate.
///
/// Which variant backs a service is chosen once at construction; nothing
/// probes for a store at call time.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

  fn remove(&self, key: &str) -> Result<(), StoreError>;

  /// Remove every key in the substrate, including ones this crate did not write.
  fn clear(&self) -> Result<(), StoreError>;

  fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Store that doesn't keep anything.
/// Used when local persistence is disabled - all operations are no-ops.
pub struct NullStore;

impl KeyValueStore for NullStore {
  fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<(), StoreError> {
    Ok(())
  }

  fn clear(&self) -> Result<(), StoreError> {
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    Ok(Vec::new())
  }
}

/// Bytes an entry occupies against a store's capacity.
pub(crate) fn entry_size(key: &str, value: &str) -> usize {
  key.len() + value.len()
}
