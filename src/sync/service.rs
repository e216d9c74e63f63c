//! The sync service: the one object callers talk to.
//!
//! Reads are served from the [`RecordCache`]. Writes hit the cache first,
//! then the local store, then the other tabs, and finally the remote. A
//! remote failure never undoes the local write; the key just stays pending
//! until a later push or scheduler tick gets it through.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scheduler::{FlushOutcome, SchedulerHandle, SyncScheduler, DEFAULT_SYNC_INTERVAL};
use crate::broadcast::{Broadcaster, ChangeFeed, ChangeKind, ChangeMessage, ChannelHub};
use crate::cache::{Fetched, PendingChange, PendingOp, PendingQueue, ReadSource, RecordCache, Stamp};
use crate::clock::{Clock, SystemClock};
use crate::error::{RemoteError, ValidationError};
use crate::identity::{DeviceId, TabId};
use crate::remote::{validate_key, BatchFailure, BatchReport, HealthStatus, RemoteStore, SyncClient, SyncLogEntry};
use crate::store::{KeyValueStore, LocalStore, NullStore};

pub const DEFAULT_CHANNEL: &str = "dashboard-sync";
pub const DEFAULT_NAMESPACE: &str = "dashsync";

/// Collaborators a service is built from.
pub struct SyncParts {
  pub remote: Arc<dyn RemoteStore>,
  pub local: Arc<dyn KeyValueStore>,
  pub hub: ChannelHub,
  pub clock: Arc<dyn Clock>,
}

impl SyncParts {
  /// Remote only: no local persistence, a private hub, the system clock.
  pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
    Self {
      remote,
      local: Arc::new(NullStore),
      hub: ChannelHub::new(),
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_local(mut self, local: Arc<dyn KeyValueStore>) -> Self {
    self.local = local;
    self
  }

  pub fn with_hub(mut self, hub: ChannelHub) -> Self {
    self.hub = hub;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub sync_interval: Duration,
  pub channel: String,
  pub namespace: String,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      sync_interval: DEFAULT_SYNC_INTERVAL,
      channel: DEFAULT_CHANNEL.to_string(),
      namespace: DEFAULT_NAMESPACE.to_string(),
    }
  }
}

/// How a local write fared on its way to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// The remote confirmed it
  Synced,
  /// The remote didn't take it; the write is queued for retry
  Queued(RemoteError),
}

impl WriteOutcome {
  pub fn is_synced(&self) -> bool {
    matches!(self, WriteOutcome::Synced)
  }
}

/// Result of loading state at startup or on [`SyncService::resync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
  /// `Remote` when the remote snapshot was used, `Offline` for the local one
  pub source: ReadSource,
  pub records: usize,
  /// Journaled local changes re-applied on top of the snapshot
  pub pending: usize,
}

pub struct SyncService {
  cache: RecordCache,
  local: LocalStore,
  client: Arc<SyncClient>,
  scheduler: Arc<SyncScheduler>,
  broadcaster: Broadcaster,
  hub: ChannelHub,
  channel: String,
  clock: Arc<dyn Clock>,
}

impl SyncService {
  pub fn new(parts: SyncParts, options: SyncOptions) -> Self {
    let local = LocalStore::new(parts.local, &options.namespace);
    let device_id = DeviceId::load_or_create(&local, parts.clock.as_ref());
    let pending = Arc::new(PendingQueue::with_journal(local.clone()));
    let client = Arc::new(SyncClient::new(
      parts.remote,
      pending,
      device_id,
      Arc::clone(&parts.clock),
    ));
    let scheduler = Arc::new(SyncScheduler::new(Arc::clone(&client), options.sync_interval));
    let broadcaster = Broadcaster::new(parts.hub.clone(), options.channel.clone(), TabId::generate());

    debug!(
      device_id = %client.device_id(),
      tab = %broadcaster.origin(),
      namespace = %options.namespace,
      "sync service created"
    );

    Self {
      cache: RecordCache::new(),
      local,
      client,
      scheduler,
      broadcaster,
      hub: parts.hub,
      channel: options.channel,
      clock: parts.clock,
    }
  }

  /// Load the starting state. The remote snapshot wins when it can be
  /// fetched; otherwise the local copy is used. Changes still pending from
  /// a previous run are laid on top either way.
  pub async fn initialize(&self) -> LoadReport {
    let since = self.cache.generation();
    let remote = self.client.load_all().await;

    let pending = self.client.pending().drain();
    let (mut snapshot, source) = match remote {
      Ok(snapshot) => (snapshot, ReadSource::Remote),
      Err(_) => (self.local.snapshot(), ReadSource::Offline),
    };
    for change in &pending {
      match &change.op {
        PendingOp::Save(value) => {
          snapshot.insert(change.key.clone(), value.clone());
        }
        PendingOp::Delete => {
          snapshot.remove(&change.key);
        }
      }
    }

    // Keys written while the snapshot was loading keep what was written
    let records = snapshot.len();
    let kept = self.cache.replace_since(snapshot.clone(), since);
    if !kept.is_empty() {
      debug!(kept = kept.len(), "kept writes made during load");
    }

    if source == ReadSource::Remote {
      for stale in self.local.keys() {
        if !snapshot.contains_key(&stale) && !kept.contains(&stale) {
          self.local.remove(&stale);
        }
      }
      for (key, value) in snapshot.iter().filter(|(key, _)| !kept.contains(*key)) {
        self.local.set(key, value);
      }
    }

    for change in pending.iter().filter(|c| !kept.contains(&c.key)) {
      let stamp = self.stamp_for(change);
      match &change.op {
        PendingOp::Save(value) => {
          self.cache.set(&change.key, value.clone(), stamp);
        }
        PendingOp::Delete => {
          self.cache.remove(&change.key, stamp);
        }
      }
    }

    info!(?source, records, pending = pending.len(), "sync state loaded");
    LoadReport {
      source,
      records,
      pending: pending.len(),
    }
  }

  /// Reload the remote snapshot on demand.
  pub async fn resync(&self) -> LoadReport {
    self.initialize().await
  }

  /// Current value of `key`. Never suspends.
  pub fn get(&self, key: &str) -> Option<Value> {
    self.cache.get(key)
  }

  /// Read through to the remote on a cache miss, falling back to the local
  /// copy when the remote can't be reached.
  pub async fn fetch(&self, key: &str) -> Fetched<Option<Value>> {
    if let Some(value) = self.cache.get(key) {
      return Fetched::from_cache(Some(value));
    }
    if self.client.pending().contains(key) {
      // A local delete the remote hasn't seen yet
      return Fetched::from_cache(None);
    }

    match self.client.load(key).await {
      Ok(Some(value)) => {
        if self.cache.seed(key, value.clone()) {
          self.local.set(key, &value);
        }
        Fetched::from_remote(Some(value))
      }
      Ok(None) => Fetched::from_remote(None),
      Err(_) => Fetched::offline(self.local.get(key)),
    }
  }

  /// Store `value` under `key`. The new value is readable before the remote
  /// is contacted; the returned outcome only says whether the remote has it.
  pub async fn set(&self, key: &str, value: Value) -> Result<WriteOutcome, ValidationError> {
    validate_key(key)?;
    let stamp = self.stamp();

    let previous = self.cache.set(key, value.clone(), stamp.clone());
    self.local.set(key, &value);
    let kind = if previous.is_some() {
      ChangeKind::Updated
    } else {
      ChangeKind::Created
    };
    self.broadcaster.publish(kind, key, Some(value.clone()), &stamp);

    let change = self
      .client
      .pending()
      .enqueue(key, PendingOp::Save(value), stamp.updated_at);
    Ok(self.push(&change).await)
  }

  /// Remove `key`. Deleting a key that doesn't exist is not an error.
  pub async fn delete(&self, key: &str) -> Result<WriteOutcome, ValidationError> {
    validate_key(key)?;
    Ok(self.remove_key(key, false).await)
  }

  /// Delete every known record, locally and remotely.
  pub async fn clear(&self) -> BatchReport {
    let mut keys: BTreeSet<String> = self.cache.keys().into_iter().collect();
    keys.extend(self.local.keys());
    if let Ok(remote) = self.client.load_all().await {
      keys.extend(remote.into_keys());
    }

    let mut report = BatchReport::default();
    for key in keys {
      if let Err(e) = validate_key(&key) {
        report.failed.push(BatchFailure {
          key,
          error: e.to_string(),
        });
        continue;
      }
      match self.remove_key(&key, true).await {
        WriteOutcome::Synced => report.confirmed.push(key),
        WriteOutcome::Queued(e) => report.failed.push(BatchFailure {
          key,
          error: e.message,
        }),
      }
    }

    self.local.clear();
    info!(
      cleared = report.confirmed.len(),
      queued = report.failed.len(),
      "cleared all records"
    );
    report
  }

  pub fn keys(&self) -> Vec<String> {
    self.cache.keys()
  }

  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  /// Number of keys whose latest write the remote hasn't confirmed.
  pub fn pending_count(&self) -> usize {
    self.client.pending().count()
  }

  /// Flush the pending queue now.
  pub async fn sync_now(&self) -> FlushOutcome {
    self.scheduler.flush().await
  }

  /// Retry pending writes every sync interval until the handle goes away.
  pub fn start_auto_sync(&self) -> SchedulerHandle {
    self.scheduler.start()
  }

  pub async fn check_health(&self) -> bool {
    self.client.check_health().await
  }

  pub fn health(&self) -> HealthStatus {
    self.client.health()
  }

  pub async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, RemoteError> {
    self.client.sync_log(limit).await
  }

  pub fn device_id(&self) -> &DeviceId {
    self.client.device_id()
  }

  pub fn tab_id(&self) -> &TabId {
    self.broadcaster.origin()
  }

  /// Listen to changes published by every tab on this channel, this one
  /// included.
  pub fn subscribe(&self) -> ChangeFeed {
    self.hub.subscribe(&self.channel)
  }

  /// Fold in a change another tab made. Our own messages and anything
  /// older than what we hold are ignored. Returns whether state changed.
  pub fn apply_change(&self, message: &ChangeMessage) -> bool {
    if message.origin == *self.tab_id() {
      return false;
    }

    let applied = self
      .cache
      .apply_if_newer(&message.key, message.data.clone(), message.stamp());
    if !applied {
      debug!(key = %message.key, from = %message.origin, "ignored stale change");
      return false;
    }

    match &message.data {
      Some(value) => {
        self.local.set(&message.key, value);
      }
      None => self.local.remove(&message.key),
    }
    let superseded = self.client.pending().discard_if_older(
      &message.key,
      &message.stamp(),
      self.device_id(),
    );
    if let Some(change) = superseded {
      debug!(
        key = %change.key,
        revision = change.revision,
        "dropped queued write superseded by another tab"
      );
    }
    debug!(key = %message.key, kind = ?message.kind, from = %message.origin, "applied change from another tab");
    true
  }

  /// Apply other tabs' changes as they arrive, until the task is aborted.
  pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
    let mut feed = self.subscribe();
    let service = Arc::clone(self);
    tokio::spawn(async move {
      while let Some(message) = feed.next().await {
        service.apply_change(&message);
      }
    })
  }

  /// Delete `key` everywhere. Other tabs hear about it when we held the key,
  /// or always when `announce` is set.
  async fn remove_key(&self, key: &str, announce: bool) -> WriteOutcome {
    let stamp = self.stamp();

    let removed = self.cache.remove(key, stamp.clone());
    self.local.remove(key);
    if removed.is_some() || announce {
      self.broadcaster.publish(ChangeKind::Deleted, key, None, &stamp);
    }

    let change = self
      .client
      .pending()
      .enqueue(key, PendingOp::Delete, stamp.updated_at);
    self.push(&change).await
  }

  async fn push(&self, change: &PendingChange) -> WriteOutcome {
    match self.client.push(change).await {
      Ok(()) => WriteOutcome::Synced,
      Err(e) => {
        warn!(key = %change.key, "kept locally, remote sync pending");
        WriteOutcome::Queued(e)
      }
    }
  }

  fn stamp(&self) -> Stamp {
    Stamp::new(self.clock.now(), self.device_id().clone())
  }

  fn stamp_for(&self, change: &PendingChange) -> Stamp {
    Stamp::new(change.updated_at, self.device_id().clone())
  }
}
