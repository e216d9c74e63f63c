//! Pending-change queue: local writes the remote store hasn't confirmed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::traits::Stamp;
use crate::identity::DeviceId;
use crate::store::LocalStore;

const JOURNAL_META: &str = "pending_changes";

/// What still has to reach the remote store for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum PendingOp {
  Save(Value),
  Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
  pub key: String,
  pub op: PendingOp,
  /// When the local write happened
  pub updated_at: DateTime<Utc>,
  /// Identifies this exact write; confirmations for older revisions of the
  /// same key are ignored
  pub revision: u64,
}

#[derive(Default)]
struct Inner {
  entries: Vec<PendingChange>,
  next_revision: u64,
}

/// At most one entry per key, in first-enqueued order.
///
/// A key present here means local state for it may be ahead of the remote.
/// When a journal is attached every mutation is mirrored into the local
/// store so pending writes survive a restart.
#[derive(Default)]
pub struct PendingQueue {
  inner: Mutex<Inner>,
  journal: Option<LocalStore>,
}

impl PendingQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue journaled in `store`, restoring whatever a previous run left.
  pub fn with_journal(store: LocalStore) -> Self {
    let entries: Vec<PendingChange> = store.get_meta(JOURNAL_META).unwrap_or_default();
    let next_revision = entries.iter().map(|c| c.revision + 1).max().unwrap_or(0);
    if !entries.is_empty() {
      debug!(count = entries.len(), "restored pending changes");
    }

    Self {
      inner: Mutex::new(Inner {
        entries,
        next_revision,
      }),
      journal: Some(store),
    }
  }

  /// Queue `op` for `key`, replacing any older entry for the same key.
  /// The replaced entry keeps its place in the queue.
  pub fn enqueue(&self, key: &str, op: PendingOp, updated_at: DateTime<Utc>) -> PendingChange {
    let mut inner = self.inner.lock();
    let change = PendingChange {
      key: key.to_string(),
      op,
      updated_at,
      revision: inner.bump(),
    };

    let existing = inner.entries.iter().position(|c| c.key == key);
    match existing {
      Some(pos) => inner.entries[pos] = change.clone(),
      None => inner.entries.push(change.clone()),
    }
    self.persist(&inner);
    change
  }

  /// Stable snapshot of everything pending. Nothing is removed.
  pub fn drain(&self) -> Vec<PendingChange> {
    self.inner.lock().entries.clone()
  }

  /// Remove `key` if its entry is still at `revision`.
  pub fn confirm(&self, key: &str, revision: u64) -> bool {
    let mut inner = self.inner.lock();
    let before = inner.entries.len();
    inner
      .entries
      .retain(|c| !(c.key == key && c.revision == revision));
    let removed = inner.entries.len() != before;
    if removed {
      self.persist(&inner);
    }
    removed
  }

  /// Drop our queued write for `key` when `newer`, a change made elsewhere,
  /// supersedes it. Sending it afterwards would overwrite the newer value.
  pub fn discard_if_older(
    &self,
    key: &str,
    newer: &Stamp,
    own: &DeviceId,
  ) -> Option<PendingChange> {
    let mut inner = self.inner.lock();
    let pos = inner
      .entries
      .iter()
      .position(|c| c.key == key && Stamp::new(c.updated_at, own.clone()) < *newer)?;
    let dropped = inner.entries.remove(pos);
    self.persist(&inner);
    Some(dropped)
  }

  pub fn get(&self, key: &str) -> Option<PendingChange> {
    self
      .inner
      .lock()
      .entries
      .iter()
      .find(|c| c.key == key)
      .cloned()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.inner.lock().entries.iter().any(|c| c.key == key)
  }

  pub fn clear_all(&self) {
    let mut inner = self.inner.lock();
    inner.entries.clear();
    self.persist(&inner);
  }

  pub fn count(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.count() == 0
  }

  fn persist(&self, inner: &Inner) {
    if let Some(journal) = &self.journal {
      journal.set_meta(JOURNAL_META, &inner.entries);
    }
  }
}

impl Inner {
  fn bump(&mut self) -> u64 {
    let revision = self.next_revision;
    self.next_revision += 1;
    revision
  }
}
