#![allow(dead_code)]

use chrono::Duration;
use std::sync::Arc;

use dashsync::broadcast::ChannelHub;
use dashsync::clock::ManualClock;
use dashsync::remote::MemoryRemote;
use dashsync::store::{KeyValueStore, MemoryStore};
use dashsync::sync::{SyncOptions, SyncParts, SyncService};

/// A remote and a clock shared by every tab built from it.
pub struct World {
  pub clock: Arc<ManualClock>,
  pub remote: Arc<MemoryRemote>,
  pub hub: ChannelHub,
}

impl World {
  pub fn new() -> Self {
    let clock = Arc::new(ManualClock::default());
    let remote = Arc::new(MemoryRemote::new(clock.clone()));
    Self {
      clock,
      remote,
      hub: ChannelHub::new(),
    }
  }

  /// A fresh tab with its own local store.
  pub fn tab(&self) -> SyncService {
    self.tab_with_store(Arc::new(MemoryStore::unbounded()))
  }

  pub fn tab_with_store(&self, local: Arc<dyn KeyValueStore>) -> SyncService {
    self.tab_with(local, SyncOptions::default())
  }

  pub fn tab_with(&self, local: Arc<dyn KeyValueStore>, options: SyncOptions) -> SyncService {
    let parts = SyncParts::new(self.remote.clone())
      .with_local(local)
      .with_hub(self.hub.clone())
      .with_clock(self.clock.clone());
    SyncService::new(parts, options)
  }

  pub fn tick(&self, millis: i64) {
    self.clock.advance(Duration::milliseconds(millis));
  }
}
