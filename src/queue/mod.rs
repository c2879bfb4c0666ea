//! Offline mutation queue.
//!
//! Writes that fail while offline are persisted as records and replayed in
//! insertion order once connectivity returns. A record is deleted only when
//! its replay gets a 2xx; anything else leaves it for the next drain.

mod headers;

use reqwest::Method;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::network::{Connectivity, ConnectivityMonitor, Request, Subscription, Transport};
use crate::store::{NewQueuedRequest, QueuedRequest, RequestStore};

pub use headers::Headers;

pub const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(10);

/// How replay responses are judged.
#[derive(Debug, Clone)]
pub struct ReplayPolicy {
  pub timeout: Duration,
  /// Drop records answered with a 4xx (except 408 and 429) instead of
  /// retrying them forever.
  pub drop_client_errors: bool,
}

impl Default for ReplayPolicy {
  fn default() -> Self {
    Self {
      timeout: DEFAULT_REPLAY_TIMEOUT,
      drop_client_errors: false,
    }
  }
}

impl ReplayPolicy {
  fn is_permanent_failure(&self, status: u16) -> bool {
    self.drop_client_errors && (400..500).contains(&status) && status != 408 && status != 429
  }
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub replayed: usize,
  pub failed: usize,
  pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  /// Another drain holds the queue; nothing was sent
  AlreadyDraining,
  /// Connectivity reports offline; nothing was sent
  Offline,
  Completed(DrainReport),
}

/// Resets the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

enum Replay {
  Delivered,
  Rejected(u16),
  Failed(String),
}

pub struct OfflineQueue {
  store: Arc<dyn RequestStore>,
  transport: Arc<dyn Transport>,
  connectivity: Arc<dyn Connectivity>,
  clock: Arc<dyn Clock>,
  policy: ReplayPolicy,
  draining: AtomicBool,
}

impl OfflineQueue {
  pub fn new(
    store: Arc<dyn RequestStore>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      clock: Arc::new(SystemClock),
      policy: ReplayPolicy::default(),
      draining: AtomicBool::new(false),
    }
  }

  pub fn with_policy(mut self, policy: ReplayPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Persist a request for later replay. Storage failures are returned: a
  /// write must never be lost silently.
  pub fn enqueue(
    &self,
    url: &str,
    method: Method,
    headers: impl Into<Headers>,
    body: Option<Vec<u8>>,
  ) -> Result<i64> {
    let request = NewQueuedRequest {
      url: url.to_string(),
      method: method.as_str().to_string(),
      headers: headers.into().into_inner(),
      body,
      enqueued_at: self.clock.now(),
    };

    let id = self.store.add(&request)?;
    info!(id, url, method = %method, "offline request saved");
    Ok(id)
  }

  /// `enqueue` with a JSON-encoded body.
  pub fn enqueue_json<B: Serialize + ?Sized>(
    &self,
    url: &str,
    method: Method,
    headers: impl Into<Headers>,
    body: &B,
  ) -> Result<i64> {
    let body = serde_json::to_vec(body)?;
    let mut headers = headers.into();
    headers.insert_if_absent("content-type", "application/json");
    self.enqueue(url, method, headers, Some(body))
  }

  pub fn pending(&self) -> Result<Vec<QueuedRequest>> {
    self.store.all()
  }

  pub fn len(&self) -> Result<usize> {
    self.store.count()
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::SeqCst)
  }

  /// Replay every queued request once, oldest first.
  ///
  /// Records added while a drain runs wait for the next one. Only failing to
  /// load the snapshot is an error; replay failures just leave records queued.
  pub async fn drain(&self) -> Result<DrainOutcome> {
    if !self.connectivity.is_online() {
      debug!("drain skipped: offline");
      return Ok(DrainOutcome::Offline);
    }
    if self
      .draining
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("drain skipped: already draining");
      return Ok(DrainOutcome::AlreadyDraining);
    }
    let _guard = DrainGuard(&self.draining);

    let records = self.store.all()?;
    let mut report = DrainReport::default();

    for record in records {
      match self.replay(&record).await {
        Replay::Delivered => {
          self.forget(&record, "offline request synced");
          report.replayed += 1;
        }
        Replay::Rejected(status) if self.policy.is_permanent_failure(status) => {
          warn!(id = record.id, url = %record.url, status, "offline request rejected, dropping");
          self.forget(&record, "offline request dropped");
          report.dropped += 1;
        }
        Replay::Rejected(status) => {
          warn!(id = record.id, url = %record.url, status, "offline request sync failed");
          report.failed += 1;
        }
        Replay::Failed(reason) => {
          error!(id = record.id, url = %record.url, error = %reason, "offline request sync failed");
          report.failed += 1;
        }
      }
    }

    info!(
      replayed = report.replayed,
      failed = report.failed,
      dropped = report.dropped,
      "offline queue drained"
    );
    Ok(DrainOutcome::Completed(report))
  }

  async fn replay(&self, record: &QueuedRequest) -> Replay {
    let method = match Method::from_bytes(record.method.as_bytes()) {
      Ok(method) => method,
      Err(e) => return Replay::Failed(format!("invalid method {}: {}", record.method, e)),
    };

    let request = Request {
      url: record.url.clone(),
      method,
      headers: record.headers.clone(),
      body: record.body.clone(),
      timeout: Some(self.policy.timeout),
    };

    match tokio::time::timeout(self.policy.timeout, self.transport.send(&request)).await {
      Ok(Ok(response)) if response.ok() => Replay::Delivered,
      Ok(Ok(response)) => Replay::Rejected(response.status),
      Ok(Err(e)) => Replay::Failed(e.to_string()),
      Err(_) => Replay::Failed(format!("timed out after {:?}", self.policy.timeout)),
    }
  }

  fn forget(&self, record: &QueuedRequest, message: &'static str) {
    match self.store.delete(record.id) {
      Ok(()) => info!(id = record.id, url = %record.url, "{}", message),
      // Still queued, so it will be sent again next drain
      Err(e) => error!(id = record.id, error = %e, "failed to delete replayed request"),
    }
  }

  /// Drain automatically each time `monitor` reports a return to online.
  pub fn drain_on_reconnect(self: &Arc<Self>, monitor: &ConnectivityMonitor) -> Subscription {
    let queue: Weak<Self> = Arc::downgrade(self);
    monitor.subscribe(move |online| {
      if !online {
        return Ok(());
      }
      let Some(queue) = queue.upgrade() else {
        return Ok(());
      };
      let runtime = tokio::runtime::Handle::try_current()?;
      runtime.spawn(async move {
        if let Err(e) = queue.drain().await {
          error!(error = %e, "offline queue drain failed");
        }
      });
      Ok(())
    })
  }
}
