//! SQLite-backed durable local store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{entry_size, KeyValueStore};
use crate::error::StoreError;

/// Default capacity, in line with what browsers give an origin.
pub const DEFAULT_CAPACITY: usize = 5 * 1024 * 1024;

/// Durable, capacity-bounded key/value store on a single SQLite table.
pub struct DurableLocalStore {
  conn: Mutex<Connection>,
  capacity: usize,
}

impl DurableLocalStore {
  /// Open or create the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>, capacity: usize) -> Result<Self, StoreError> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Backend(format!("Failed to create local store directory: {}", e))
      })?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      StoreError::Backend(format!(
        "Failed to open local store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn, capacity)
  }

  /// Store that lives only as long as this value.
  pub fn open_in_memory(capacity: usize) -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?, capacity)
  }

  fn with_connection(conn: Connection, capacity: usize) -> Result<Self, StoreError> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| StoreError::Backend(format!("Failed to run local store migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
      capacity,
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Backend("Could not determine data directory".into()))?;

    Ok(data_dir.join("dashsync").join("local.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Backend(format!("Lock poisoned: {}", e)))
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl KeyValueStore for DurableLocalStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;

    let used: i64 = conn.query_row(
      "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0)
       FROM local_storage WHERE key != ?",
      params![key],
      |row| row.get(0),
    )?;
    let needed = used as usize + entry_size(key, value);
    if needed > self.capacity {
      return Err(StoreError::CapacityExceeded {
        needed,
        capacity: self.capacity,
      });
    }

    conn.execute(
      "INSERT OR REPLACE INTO local_storage (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM local_storage WHERE key = ?", params![key])?;
    Ok(())
  }

  fn clear(&self) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM local_storage", [])?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key FROM local_storage ORDER BY key")?;
    let keys = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("local.db");
    {
      let store = DurableLocalStore::open(Some(&path), DEFAULT_CAPACITY).unwrap();
      store.set("dashsync:theme", "{\"mode\":\"dark\"}").unwrap();
    }
    let store = DurableLocalStore::open(Some(&path), DEFAULT_CAPACITY).unwrap();
    assert_eq!(
      store.get("dashsync:theme").unwrap().as_deref(),
      Some("{\"mode\":\"dark\"}")
    );
    assert_eq!(store.keys().unwrap(), vec!["dashsync:theme".to_string()]);
  }

  #[test]
  fn capacity_is_enforced_and_replacement_is_not_double_counted() {
    let store = DurableLocalStore::open_in_memory(16).unwrap();
    store.set("k", "0123456789").unwrap();
    store.set("k", "9876543210").unwrap();
    let err = store.set("other", "0123456789").unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded { .. }));
    assert_eq!(store.get("other").unwrap(), None);
  }

  #[test]
  fn remove_and_clear() {
    let store = DurableLocalStore::open_in_memory(DEFAULT_CAPACITY).unwrap();
    store.set("a", "1").unwrap();
    store.set("b", "2").unwrap();
    store.remove("a").unwrap();
    assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
    store.clear().unwrap();
    assert!(store.keys().unwrap().is_empty());
  }
}
