//! Periodic expiry sweep across caches.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::task::RepeatingTask;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A cache that can drop its expired entries in bulk.
pub trait Sweep: Send + Sync {
  fn label(&self) -> &'static str;

  /// Returns the number of entries removed.
  fn clear_expired(&self) -> usize;
}

/// Background task calling `clear_expired` on every target each interval.
pub struct Sweeper {
  task: RepeatingTask,
}

impl Sweeper {
  pub fn start(targets: Vec<Arc<dyn Sweep>>, interval: Duration) -> Self {
    let targets: Arc<[Arc<dyn Sweep>]> = targets.into();
    let task = RepeatingTask::spawn("cache-sweep", interval, move || {
      let targets = Arc::clone(&targets);
      async move {
        sweep_all(&targets);
      }
    });

    Self { task }
  }

  /// Stop sweeping. Safe to call more than once.
  pub fn stop(&self) {
    self.task.cancel();
  }
}

/// Run one sweep pass immediately; returns total entries removed.
pub fn sweep_all(targets: &[Arc<dyn Sweep>]) -> usize {
  targets
    .iter()
    .map(|target| {
      let removed = target.clear_expired();
      debug!(cache = target.label(), removed, "swept");
      removed
    })
    .sum()
}
