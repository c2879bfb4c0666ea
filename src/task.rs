//! Cancellable periodic background work.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// A task that runs `tick` every `period`, starting one period from now.
///
/// Cancelling is idempotent and also happens on drop. Must be created inside a
/// Tokio runtime.
pub struct RepeatingTask {
  name: &'static str,
  handle: Mutex<Option<JoinHandle<()>>>,
}

impl RepeatingTask {
  pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(async move {
      let mut interval = time::interval_at(Instant::now() + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        debug!(task = name, "tick");
        tick().await;
      }
    });

    Self {
      name,
      handle: Mutex::new(Some(handle)),
    }
  }

  /// Stop the task. Any tick in flight is aborted at its next suspension point.
  pub fn cancel(&self) {
    let handle = self
      .handle
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();
    if let Some(handle) = handle {
      handle.abort();
      debug!(task = self.name, "cancelled");
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .handle
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .as_ref()
      .is_some_and(|h| !h.is_finished())
  }
}

impl Drop for RepeatingTask {
  fn drop(&mut self) {
    self.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn counting_task(period: Duration) -> (RepeatingTask, Arc<AtomicUsize>) {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let task = RepeatingTask::spawn("test", period, move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
      }
    });
    (task, ticks)
  }

  #[tokio::test(start_paused = true)]
  async fn test_first_tick_waits_one_period() {
    let (_task, ticks) = counting_task(Duration::from_secs(10));

    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 0);

    time::sleep(Duration::from_secs(21)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_is_idempotent_and_stops_ticks() {
    let (task, ticks) = counting_task(Duration::from_secs(1));

    time::sleep(Duration::from_millis(1500)).await;
    task.cancel();
    task.cancel();
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert!(!task.is_running());
  }
}
