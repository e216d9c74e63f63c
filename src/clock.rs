//! Wall-clock port.
//!
//! Record stamps and device ids read time through [`Clock`] so tests can
//! pin it. Timers use tokio's clock, which tests pause separately.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    *self.now.lock() += by;
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock() = to;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_advances() {
    let clock = ManualClock::default();
    let start = clock.now();
    clock.advance(Duration::seconds(5));
    assert_eq!(clock.now() - start, Duration::seconds(5));
  }
}
