//! Process-lifetime wiring: one of each component, built once at startup and
//! handed to whoever needs it.

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::cache::{DurableCache, MemoryCache, RecordCache, Sweep, Sweeper};
use crate::config::Config;
use crate::network::{ConnectivityMonitor, HttpTransport, MonitorConfig, SignalPlatform, Transport};
use crate::queue::{OfflineQueue, ReplayPolicy};
use crate::store::SqliteStorage;

/// Storage-only components, usable without a runtime.
pub struct Stores {
  pub storage: Arc<SqliteStorage>,
  pub durable: Arc<DurableCache>,
  pub memory: Arc<MemoryCache>,
  pub records: Arc<RecordCache>,
}

impl Stores {
  pub fn open(config: &Config) -> Result<Self> {
    let storage = Arc::new(match &config.database_path {
      Some(path) => SqliteStorage::open(path)?,
      None => SqliteStorage::open_default()?,
    });

    let durable = Arc::new(
      DurableCache::new(storage.clone())
        .with_prefix(config.cache.prefix.clone())
        .with_default_ttl(config.cache.default_ttl()),
    );
    let memory = Arc::new(MemoryCache::new().with_default_ttl(config.cache.memory_ttl()));
    let records = Arc::new(RecordCache::new(storage.clone()));

    Ok(Self {
      storage,
      durable,
      memory,
      records,
    })
  }

  pub fn sweep_targets(&self) -> Vec<Arc<dyn Sweep>> {
    vec![
      self.durable.clone() as Arc<dyn Sweep>,
      self.memory.clone() as Arc<dyn Sweep>,
      self.records.clone() as Arc<dyn Sweep>,
    ]
  }
}

/// Every runtime component. `start` adds the background work (cache sweep
/// and drain on reconnect); `open` leaves it out for one-shot commands that
/// drive the queue themselves. Must be built inside a Tokio runtime.
pub struct App {
  pub stores: Stores,
  pub platform: Arc<SignalPlatform>,
  pub transport: Arc<HttpTransport>,
  pub monitor: Arc<ConnectivityMonitor>,
  pub queue: Arc<OfflineQueue>,
  sweeper: Option<Sweeper>,
}

impl App {
  pub fn open(config: &Config) -> Result<Self> {
    let stores = Stores::open(config)?;
    let transport = Arc::new(HttpTransport::new(Some(&config.api_base_url))?);
    let platform = Arc::new(SignalPlatform::new(config.network.assume_online));

    let monitor = Arc::new(ConnectivityMonitor::start(
      platform.clone(),
      transport.clone() as Arc<dyn Transport>,
      MonitorConfig::from(&config.network),
    ));

    let queue = Arc::new(
      OfflineQueue::new(stores.storage.clone(), transport.clone(), monitor.clone())
        .with_policy(ReplayPolicy::from(&config.queue)),
    );

    Ok(Self {
      stores,
      platform,
      transport,
      monitor,
      queue,
      sweeper: None,
    })
  }

  pub fn start(config: &Config) -> Result<Self> {
    let mut app = Self::open(config)?;

    // Held by the monitor until it is destroyed
    let _ = app.queue.drain_on_reconnect(&app.monitor);
    app.sweeper = Some(Sweeper::start(
      app.stores.sweep_targets(),
      config.cache.sweep_interval(),
    ));

    info!(base_url = %config.api_base_url, "storefront offline layer started");
    Ok(app)
  }

  fn stop(&self) {
    if let Some(sweeper) = &self.sweeper {
      sweeper.stop();
    }
    self.monitor.destroy();
  }

  /// Stop background work. Safe to call more than once.
  pub fn shutdown(&self) {
    self.stop();
    info!("storefront offline layer stopped");
  }
}

impl Drop for App {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  fn config(name: &str) -> (Config, PathBuf) {
    let path = std::env::temp_dir().join(format!(
      "storefront-offline-{}-{}.db",
      name,
      std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    let config = Config {
      database_path: Some(path.clone()),
      ..Config::default()
    };
    (config, path)
  }

  #[tokio::test]
  async fn test_open_runs_no_background_work() {
    let (config, path) = config("open");

    let app = App::open(&config).unwrap();
    assert_eq!(app.monitor.subscriber_count(), 0);
    assert!(app.sweeper.is_none());

    drop(app);
    let _ = std::fs::remove_file(path);
  }

  #[tokio::test]
  async fn test_start_drains_on_reconnect_and_sweeps() {
    let (config, path) = config("start");

    let app = App::start(&config).unwrap();
    assert_eq!(app.monitor.subscriber_count(), 1);
    assert!(app.sweeper.is_some());

    app.shutdown();
    assert_eq!(app.monitor.subscriber_count(), 0);

    drop(app);
    let _ = std::fs::remove_file(path);
  }
}
