//! In-process TTL cache for short-lived derived data.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::sweeper::Sweep;
use crate::clock::{expiry_after, Clock, SystemClock};

pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(5 * 60);

struct MemoryEntry {
  value: Arc<dyn Any + Send + Sync>,
  expires_at: i64,
}

/// Map-backed cache. Values are stored as-is (no serialization) and handed
/// back as clones; everything is lost when the process exits.
pub struct MemoryCache {
  entries: Mutex<HashMap<String, MemoryEntry>>,
  clock: Arc<dyn Clock>,
  default_ttl: Duration,
}

impl Default for MemoryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryCache {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      clock: Arc::new(SystemClock),
      default_ttl: DEFAULT_MEMORY_TTL,
    }
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  // A poisoned map only means a panic mid-insert; the map itself is still valid.
  fn entries(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
    self.set_with_ttl(key, value, self.default_ttl);
  }

  pub fn set_with_ttl<T: Send + Sync + 'static>(
    &self,
    key: impl Into<String>,
    value: T,
    ttl: Duration,
  ) {
    let entry = MemoryEntry {
      value: Arc::new(value),
      expires_at: expiry_after(self.clock.now_millis(), ttl),
    };
    self.entries().insert(key.into(), entry);
  }

  /// Fetch a live value of type `T`. A value stored under a different type is
  /// a miss.
  pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
    let now = self.clock.now_millis();
    let mut entries = self.entries();

    let expired = entries.get(key)?.expires_at <= now;
    if expired {
      entries.remove(key);
      return None;
    }

    entries
      .get(key)
      .and_then(|entry| entry.value.downcast_ref::<T>())
      .cloned()
  }

  /// True if a live entry exists, whatever its type.
  pub fn has(&self, key: &str) -> bool {
    let now = self.clock.now_millis();
    let mut entries = self.entries();

    match entries.get(key) {
      Some(entry) if entry.expires_at <= now => {
        entries.remove(key);
        false
      }
      Some(_) => true,
      None => false,
    }
  }

  pub fn remove(&self, key: &str) {
    self.entries().remove(key);
  }

  pub fn clear(&self) {
    self.entries().clear();
  }

  /// Number of stored entries, expired or not.
  pub fn size(&self) -> usize {
    self.entries().len()
  }

  pub fn clear_expired(&self) -> usize {
    let now = self.clock.now_millis();
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let removed = before - entries.len();
    debug!(removed, "memory cache sweep");
    removed
  }
}

impl Sweep for MemoryCache {
  fn label(&self) -> &'static str {
    "memory"
  }

  fn clear_expired(&self) -> usize {
    MemoryCache::clear_expired(self)
  }
}
