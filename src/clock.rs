//! Wall-clock abstraction so expiry can be driven by a simulated clock.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of "now" for expiry calculations.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Milliseconds since the Unix epoch.
  fn now_millis(&self) -> i64 {
    self.now().timestamp_millis()
  }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can hand one clone to a cache and
/// advance the other.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  /// Move the clock forward.
  pub fn advance(&self, by: Duration) {
    let delta = chrono::Duration::milliseconds(millis(by));
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += delta;
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Convert a duration to whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn millis(d: Duration) -> i64 {
  i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Compute an expiry timestamp (ms) `ttl` after `now_ms`.
pub(crate) fn expiry_after(now_ms: i64, ttl: Duration) -> i64 {
  now_ms.saturating_add(millis(ttl))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances_shared_instant() {
    let clock = ManualClock::default();
    let other = clock.clone();
    let start = clock.now_millis();

    other.advance(Duration::from_millis(1500));

    assert_eq!(clock.now_millis() - start, 1500);
  }

  #[test]
  fn test_expiry_saturates() {
    assert_eq!(expiry_after(i64::MAX - 1, Duration::from_secs(10)), i64::MAX);
    assert_eq!(expiry_after(1000, Duration::from_millis(250)), 1250);
  }
}
