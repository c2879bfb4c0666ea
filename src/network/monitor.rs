//! Process-wide online/offline state with edge-triggered fan-out.
//!
//! State comes from two sources: platform edge events, and a periodic HEAD
//! probe that catches links the platform misreports (Wi-Fi without internet).
//! Subscribers only hear about actual changes.

use reqwest::Method;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::platform::{ConnectionInfo, Platform, PlatformEvent};
use super::transport::{Request, Transport};
use crate::error::Error;
use crate::task::RepeatingTask;

pub const DEFAULT_PROBE_URL: &str = "/favicon.ico";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

type Callback = Arc<dyn Fn(bool) -> color_eyre::Result<()> + Send + Sync>;

/// Read-only view of connectivity, for components that only need to ask.
pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
  /// Same-origin resource used for reachability probes
  pub probe_url: String,
  pub probe_interval: Duration,
  pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      probe_url: DEFAULT_PROBE_URL.to_string(),
      probe_interval: DEFAULT_PROBE_INTERVAL,
      probe_timeout: DEFAULT_PROBE_TIMEOUT,
    }
  }
}

/// Snapshot published on the watch channel after each transition.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStatus {
  pub online: bool,
  pub connection: Option<ConnectionInfo>,
}

/// Everything a transition touches, behind one lock so the held state, the
/// watch value and the delivery order always agree.
#[derive(Default)]
struct MonitorState {
  online: bool,
  destroyed: bool,
  /// Committed transitions not yet delivered, oldest first
  pending: VecDeque<bool>,
  /// A caller is currently running subscribers
  delivering: bool,
}

struct MonitorInner {
  state: Mutex<MonitorState>,
  subscribers: Mutex<BTreeMap<u64, Callback>>,
  next_id: AtomicU64,
  platform: Arc<dyn Platform>,
  transport: Arc<dyn Transport>,
  config: MonitorConfig,
  status: watch::Sender<NetworkStatus>,
}

impl MonitorInner {
  fn state(&self) -> MutexGuard<'_, MonitorState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn subscribers(&self) -> MutexGuard<'_, BTreeMap<u64, Callback>> {
    self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn is_destroyed(&self) -> bool {
    self.state().destroyed
  }

  /// Apply a reading. Returns true if the state changed.
  ///
  /// The transition is committed and published under the state lock. If no
  /// other caller is delivering, this one runs subscribers for every queued
  /// transition in commit order; otherwise the running delivery picks it up.
  fn apply(&self, online: bool, source: &'static str) -> bool {
    {
      let mut state = self.state();
      if state.destroyed {
        return false;
      }
      if state.online == online {
        debug!(online, source, "redundant connectivity signal");
        return false;
      }
      state.online = online;

      if online {
        info!(source, "network connected");
      } else {
        info!(source, "network disconnected");
      }

      self.status.send_replace(NetworkStatus {
        online,
        connection: self.platform.connection_info(),
      });
      state.pending.push_back(online);
      if state.delivering {
        return true;
      }
      state.delivering = true;
    }

    self.deliver();
    true
  }

  fn deliver(&self) {
    loop {
      let online = {
        let mut state = self.state();
        let next = if state.destroyed {
          None
        } else {
          state.pending.pop_front()
        };
        match next {
          Some(online) => online,
          None => {
            state.pending.clear();
            state.delivering = false;
            return;
          }
        }
      };
      self.notify(online);
    }
  }

  fn notify(&self, online: bool) {
    // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
    let callbacks: Vec<(u64, Callback)> = self
      .subscribers()
      .iter()
      .map(|(id, cb)| (*id, Arc::clone(cb)))
      .collect();

    for (id, callback) in callbacks {
      if self.is_destroyed() {
        return;
      }
      let err = match catch_unwind(AssertUnwindSafe(|| callback(online))) {
        Ok(Ok(())) => continue,
        Ok(Err(e)) => Error::Subscriber(format!("{:#}", e)),
        Err(panic) => Error::Subscriber(panic_message(panic.as_ref())),
      };
      error!(subscriber = id, error = %err, "network listener error");
    }
  }

  async fn check_connection(&self) -> bool {
    let request = Request::new(Method::HEAD, self.config.probe_url.clone())
      .header("cache-control", "no-cache")
      .timeout(self.config.probe_timeout);

    match tokio::time::timeout(self.config.probe_timeout, self.transport.send(&request)).await {
      Ok(Ok(response)) => {
        debug!(status = response.status, "connectivity probe answered");
        response.ok()
      }
      Ok(Err(e)) => {
        debug!(error = %e, "connectivity probe failed");
        false
      }
      Err(_) => {
        let e = Error::Timeout(self.config.probe_timeout);
        debug!(error = %e, "connectivity probe failed");
        false
      }
    }
  }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "subscriber panicked".to_string()
  }
}

/// Handle returned by `subscribe`. Dropping it does NOT unsubscribe.
pub struct Subscription {
  id: u64,
  monitor: Weak<MonitorInner>,
}

impl Subscription {
  /// Remove the callback. Calling again is a no-op.
  pub fn unsubscribe(&self) {
    if let Some(inner) = self.monitor.upgrade() {
      inner.subscribers().remove(&self.id);
    }
  }
}

/// Tracks whether the storefront can reach its server.
///
/// Must be started inside a Tokio runtime: it spawns a platform listener and
/// the periodic probe. Both stop on `destroy` or drop.
pub struct ConnectivityMonitor {
  inner: Arc<MonitorInner>,
  listener: Mutex<Option<JoinHandle<()>>>,
  probe: RepeatingTask,
}

impl ConnectivityMonitor {
  pub fn start(
    platform: Arc<dyn Platform>,
    transport: Arc<dyn Transport>,
    config: MonitorConfig,
  ) -> Self {
    // Subscribe before reading so an edge between the two is not lost
    let events = platform.events();
    let online = platform.reports_online();
    let (status, _) = watch::channel(NetworkStatus {
      online,
      connection: platform.connection_info(),
    });
    let probe_interval = config.probe_interval;

    let inner = Arc::new(MonitorInner {
      state: Mutex::new(MonitorState {
        online,
        ..MonitorState::default()
      }),
      subscribers: Mutex::new(BTreeMap::new()),
      next_id: AtomicU64::new(1),
      platform,
      transport,
      config,
      status,
    });

    let listener = tokio::spawn(listen(Arc::downgrade(&inner), events));

    let weak = Arc::downgrade(&inner);
    let probe = RepeatingTask::spawn("connectivity-probe", probe_interval, move || {
      let weak = weak.clone();
      async move {
        if let Some(inner) = weak.upgrade() {
          let online = inner.check_connection().await;
          inner.apply(online, "probe");
        }
      }
    });

    info!(online, "connectivity monitor started");

    Self {
      inner,
      listener: Mutex::new(Some(listener)),
      probe,
    }
  }

  pub fn is_online(&self) -> bool {
    self.inner.state().online
  }

  /// Register `callback` for state changes. It receives the new state.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(bool) -> color_eyre::Result<()> + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
    self.inner.subscribers().insert(id, Arc::new(callback));
    Subscription {
      id,
      monitor: Arc::downgrade(&self.inner),
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.inner.subscribers().len()
  }

  /// Receiver that always holds the latest `NetworkStatus`.
  pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
    self.inner.status.subscribe()
  }

  /// Feed a platform event directly. Returns true if the state changed.
  pub fn handle_platform_event(&self, event: PlatformEvent) -> bool {
    self.inner.apply(event.is_online(), "platform")
  }

  /// Probe reachability once, without touching state.
  pub async fn check_connection(&self) -> bool {
    self.inner.check_connection().await
  }

  /// Probe now and reconcile state with the result. Returns the probed state.
  pub async fn probe_now(&self) -> bool {
    let online = self.inner.check_connection().await;
    self.inner.apply(online, "probe");
    online
  }

  pub fn connection_info(&self) -> Option<ConnectionInfo> {
    self.inner.platform.connection_info()
  }

  /// 2G-class link or data saver on. False when there is no telemetry.
  pub fn is_slow_connection(&self) -> bool {
    self
      .connection_info()
      .is_some_and(|info| info.is_slow())
  }

  /// Stop listening and probing and drop every subscriber. Idempotent.
  pub fn destroy(&self) {
    {
      let mut state = self.inner.state();
      if state.destroyed {
        return;
      }
      state.destroyed = true;
      state.pending.clear();
    }

    let listener = self
      .listener
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();
    if let Some(listener) = listener {
      listener.abort();
    }
    self.probe.cancel();
    self.inner.subscribers().clear();
    info!("connectivity monitor stopped");
  }
}

impl Connectivity for ConnectivityMonitor {
  fn is_online(&self) -> bool {
    ConnectivityMonitor::is_online(self)
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.destroy();
  }
}

async fn listen(inner: Weak<MonitorInner>, mut events: broadcast::Receiver<PlatformEvent>) {
  loop {
    match events.recv().await {
      Ok(event) => match inner.upgrade() {
        Some(inner) => {
          inner.apply(event.is_online(), "platform");
        }
        None => break,
      },
      Err(broadcast::error::RecvError::Lagged(skipped)) => {
        warn!(skipped, "missed platform connectivity events");
      }
      Err(broadcast::error::RecvError::Closed) => break,
    }
  }
}
