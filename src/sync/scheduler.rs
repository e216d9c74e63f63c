//! Auto-sync scheduler: periodic retry of the pending queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::remote::{BatchReport, SyncClient};

/// Default time between automatic flushes.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// What a flush did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
  /// Another flush was already in flight
  Busy,
  /// Nothing was pending
  Idle,
  /// The queue was sent; see the report for per-item results
  Flushed(BatchReport),
}

impl FlushOutcome {
  /// True when nothing is left pending because of this flush.
  pub fn is_clean(&self) -> bool {
    match self {
      FlushOutcome::Busy => false,
      FlushOutcome::Idle => true,
      FlushOutcome::Flushed(report) => report.is_complete(),
    }
  }
}

pub struct SyncScheduler {
  client: Arc<SyncClient>,
  period: Duration,
  busy: AtomicBool,
}

impl SyncScheduler {
  pub fn new(client: Arc<SyncClient>, period: Duration) -> Self {
    Self {
      client,
      period,
      busy: AtomicBool::new(false),
    }
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::SeqCst)
  }

  /// Send everything pending, unless a flush is already running.
  pub async fn flush(&self) -> FlushOutcome {
    if self.client.pending().is_empty() {
      return FlushOutcome::Idle;
    }

    let Some(_guard) = BusyGuard::acquire(&self.busy) else {
      debug!("flush already in flight, skipping");
      return FlushOutcome::Busy;
    };

    let changes = self.client.pending().drain();
    if changes.is_empty() {
      return FlushOutcome::Idle;
    }

    let report = self.client.push_batch(&changes).await;
    if report.is_complete() {
      info!(count = report.confirmed.len(), "pending changes synced");
    } else {
      warn!(
        confirmed = report.confirmed.len(),
        failed = report.failed.len(),
        "some pending changes failed to sync, retrying next interval"
      );
    }
    FlushOutcome::Flushed(report)
  }

  /// Start flushing every period until the handle is stopped or dropped.
  ///
  /// Flushes run inside the loop task, so stopping also cancels one that is
  /// still waiting on the remote. Unconfirmed changes stay queued.
  pub fn start(self: &Arc<Self>) -> SchedulerHandle {
    let scheduler = Arc::clone(self);
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(scheduler.period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
        ticker.tick().await;
        scheduler.flush().await;
      }
    });

    debug!(period = ?self.period, "auto-sync started");
    SchedulerHandle { task: Some(task) }
  }
}

/// Running auto-sync loop. Stops on [`SchedulerHandle::stop`] or drop.
pub struct SchedulerHandle {
  task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
  pub fn stop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
      debug!("auto-sync stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self.task.as_ref().is_some_and(|t| !t.is_finished())
  }
}

impl Drop for SchedulerHandle {
  fn drop(&mut self) {
    self.stop();
  }
}

/// Holds the busy flag for the duration of one flush.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for BusyGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}
