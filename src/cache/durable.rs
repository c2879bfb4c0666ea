//! Durable key-value cache with per-entry expiry.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::sweeper::Sweep;
use crate::clock::{expiry_after, Clock, SystemClock};
use crate::error::Result;
use crate::store::KvStore;

pub const DEFAULT_PREFIX: &str = "storefront_";
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// On-disk shape of an entry: `{"value": ..., "expiresAt": <ms>}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry<'a, T: ?Sized> {
  value: &'a T,
  expires_at: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadedEntry {
  value: serde_json::Value,
  expires_at: i64,
}

/// Cache of JSON values in a durable store, namespaced by a key prefix.
///
/// Every failure degrades: a failed `set` is a logged no-op and a failed or
/// undecodable `get` is a miss. Keys outside the prefix are never touched.
pub struct DurableCache {
  store: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  prefix: String,
  default_ttl: Duration,
}

impl DurableCache {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      prefix: DEFAULT_PREFIX.to_string(),
      default_ttl: DEFAULT_TTL,
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  fn namespaced(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }

  /// Store `value` for the default TTL.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
    self.set_with_ttl(key, value, self.default_ttl);
  }

  /// Store `value`, expiring `ttl` from now.
  pub fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
    if let Err(e) = self.try_set(key, value, ttl) {
      warn!(key, error = %e, "cache set failed");
    }
  }

  fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
    let entry = StoredEntry {
      value,
      expires_at: expiry_after(self.clock.now_millis(), ttl),
    };
    let encoded = serde_json::to_string(&entry)?;
    self.store.put(&self.namespaced(key), &encoded)
  }

  /// Fetch a live value. Expired entries are deleted on the way out.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let namespaced = self.namespaced(key);
    let raw = match self.store.get(&namespaced) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "cache get failed");
        return None;
      }
    };

    let entry: LoadedEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "cache entry is corrupt");
        return None;
      }
    };

    if entry.expires_at <= self.clock.now_millis() {
      self.delete_logged(&namespaced);
      return None;
    }

    match serde_json::from_value(entry.value) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, error = %e, "cache entry has unexpected shape");
        None
      }
    }
  }

  pub fn has(&self, key: &str) -> bool {
    self.get::<serde_json::Value>(key).is_some()
  }

  pub fn remove(&self, key: &str) {
    self.delete_logged(&self.namespaced(key));
  }

  /// Delete every entry in this cache's namespace.
  pub fn clear(&self) {
    for key in self.namespaced_keys() {
      self.delete_logged(&key);
    }
  }

  /// Approximate footprint: total serialized length of namespaced entries.
  pub fn size_bytes(&self) -> usize {
    self
      .namespaced_keys()
      .iter()
      .filter_map(|key| self.store.get(key).ok().flatten())
      .map(|raw| raw.len())
      .sum()
  }

  /// Delete expired and unparseable entries. Returns how many were removed.
  pub fn clear_expired(&self) -> usize {
    let now = self.clock.now_millis();
    let mut removed = 0;

    for key in self.namespaced_keys() {
      let raw = match self.store.get(&key) {
        Ok(Some(raw)) => raw,
        Ok(None) => continue,
        Err(e) => {
          warn!(key = %key, error = %e, "cache sweep read failed");
          continue;
        }
      };

      let expired = match serde_json::from_str::<LoadedEntry>(&raw) {
        Ok(entry) => entry.expires_at <= now,
        Err(_) => true,
      };

      if expired && self.delete_logged(&key) {
        removed += 1;
      }
    }

    debug!(removed, prefix = %self.prefix, "durable cache sweep");
    removed
  }

  fn namespaced_keys(&self) -> Vec<String> {
    match self.store.keys() {
      Ok(keys) => keys
        .into_iter()
        .filter(|k| k.starts_with(&self.prefix))
        .collect(),
      Err(e) => {
        warn!(error = %e, "cache key listing failed");
        Vec::new()
      }
    }
  }

  fn delete_logged(&self, key: &str) -> bool {
    match self.store.delete(key) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, error = %e, "cache delete failed");
        false
      }
    }
  }
}

impl Sweep for DurableCache {
  fn label(&self) -> &'static str {
    "durable"
  }

  fn clear_expired(&self) -> usize {
    DurableCache::clear_expired(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::SqliteStorage;
  use crate::testing::FailingStore;
  use serde::Deserialize;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct User {
    id: u32,
  }

  fn cache_with_clock() -> (DurableCache, Arc<SqliteStorage>, ManualClock) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let clock = ManualClock::default();
    let cache = DurableCache::new(storage.clone()).with_clock(Arc::new(clock.clone()));
    (cache, storage, clock)
  }

  #[test]
  fn test_value_expires_after_ttl() {
    let (cache, _, clock) = cache_with_clock();

    cache.set_with_ttl("user", &User { id: 1 }, Duration::from_millis(1000));

    clock.advance(Duration::from_millis(500));
    assert_eq!(cache.get::<User>("user"), Some(User { id: 1 }));

    clock.advance(Duration::from_millis(600));
    assert_eq!(cache.get::<User>("user"), None);
    assert!(!cache.has("user"));
  }

  #[test]
  fn test_expiry_boundary_is_a_miss() {
    let (cache, _, clock) = cache_with_clock();

    cache.set_with_ttl("k", &"v", Duration::from_millis(100));
    clock.advance(Duration::from_millis(100));

    assert_eq!(cache.get::<String>("k"), None);
  }

  #[test]
  fn test_expired_read_deletes_entry() {
    let (cache, storage, clock) = cache_with_clock();

    cache.set_with_ttl("k", &1, Duration::from_secs(1));
    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.get::<i32>("k"), None);

    assert_eq!(storage.get("storefront_k").unwrap(), None);
  }

  #[test]
  fn test_entries_are_namespaced_and_stored_as_json() {
    let (cache, storage, _) = cache_with_clock();

    cache.set("cart", &vec![1, 2, 3]);

    let raw = storage.get("storefront_cart").unwrap().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["value"], serde_json::json!([1, 2, 3]));
    assert!(parsed["expiresAt"].is_i64());
  }

  #[test]
  fn test_default_ttl_applies() {
    let (cache, _, clock) = cache_with_clock();
    let cache = cache.with_default_ttl(Duration::from_secs(60));

    cache.set("k", &true);
    clock.advance(Duration::from_secs(59));
    assert!(cache.has("k"));
    clock.advance(Duration::from_secs(1));
    assert!(!cache.has("k"));
  }

  #[test]
  fn test_clear_leaves_foreign_keys() {
    let (cache, storage, _) = cache_with_clock();

    storage.put("token", "secret").unwrap();
    cache.set("a", &1);
    cache.set("b", &2);

    cache.clear();

    assert!(!cache.has("a"));
    assert!(!cache.has("b"));
    assert_eq!(storage.get("token").unwrap().as_deref(), Some("secret"));
  }

  #[test]
  fn test_clear_expired_removes_stale_and_corrupt() {
    let (cache, storage, clock) = cache_with_clock();

    cache.set_with_ttl("short", &1, Duration::from_secs(1));
    cache.set_with_ttl("long", &2, Duration::from_secs(100));
    storage.put("storefront_broken", "{not json").unwrap();
    storage.put("other_app_key", "{not json").unwrap();

    clock.advance(Duration::from_secs(5));

    assert_eq!(cache.clear_expired(), 2);
    assert_eq!(cache.get::<i32>("long"), Some(2));
    assert_eq!(storage.get("storefront_short").unwrap(), None);
    assert_eq!(storage.get("storefront_broken").unwrap(), None);
    assert!(storage.get("other_app_key").unwrap().is_some());
  }

  #[test]
  fn test_size_counts_namespaced_bytes() {
    let (cache, storage, _) = cache_with_clock();

    assert_eq!(cache.size_bytes(), 0);
    storage.put("unrelated", "xxxxxxxxxx").unwrap();
    cache.set("k", &"v");

    let raw = storage.get("storefront_k").unwrap().unwrap();
    assert_eq!(cache.size_bytes(), raw.len());
  }

  #[test]
  fn test_wrong_type_is_a_miss() {
    let (cache, _, _) = cache_with_clock();

    cache.set("k", &"not a number");

    assert_eq!(cache.get::<u64>("k"), None);
    assert!(cache.has("k"));
  }

  #[test]
  fn test_store_failures_degrade_silently() {
    let cache = DurableCache::new(Arc::new(FailingStore));

    cache.set("k", &1);
    assert_eq!(cache.get::<i32>("k"), None);
    assert!(!cache.has("k"));
    cache.remove("k");
    cache.clear();
    assert_eq!(cache.size_bytes(), 0);
    assert_eq!(cache.clear_expired(), 0);
  }
}
