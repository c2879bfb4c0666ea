//! Record-shaped cache whose sweep deletes through the expiry index.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::sweeper::Sweep;
use crate::clock::{expiry_after, Clock, SystemClock};
use crate::error::Result;
use crate::store::CacheRecordStore;

/// Unlike `DurableCache`, storage failures here are returned to the caller.
pub struct RecordCache {
  store: Arc<dyn CacheRecordStore>,
  clock: Arc<dyn Clock>,
}

impl RecordCache {
  pub fn new(store: Arc<dyn CacheRecordStore>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
    let data = serde_json::to_string(value)?;
    let expires_at = expiry_after(self.clock.now_millis(), ttl);
    self.store.put_record(key, &data, expires_at)
  }

  /// Fetch a live record. An expired record is deleted and reported as absent;
  /// a record that no longer decodes as `T` is also absent.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let Some((data, expires_at)) = self.store.get_record(key)? else {
      return Ok(None);
    };

    if expires_at <= self.clock.now_millis() {
      self.store.delete_record(key)?;
      return Ok(None);
    }

    match serde_json::from_str(&data) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        warn!(key, error = %e, "cache record has unexpected shape");
        Ok(None)
      }
    }
  }

  pub fn remove(&self, key: &str) -> Result<()> {
    self.store.delete_record(key)
  }

  pub fn clear_expired(&self) -> Result<usize> {
    let removed = self.store.delete_expired_records(self.clock.now_millis())?;
    debug!(removed, "record cache sweep");
    Ok(removed)
  }
}

impl Sweep for RecordCache {
  fn label(&self) -> &'static str {
    "record"
  }

  fn clear_expired(&self) -> usize {
    RecordCache::clear_expired(self).unwrap_or_else(|e| {
      warn!(error = %e, "record cache sweep failed");
      0
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::error::Error;
  use crate::store::SqliteStorage;
  use crate::testing::FailingStore;

  fn cache() -> (RecordCache, ManualClock) {
    let clock = ManualClock::default();
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    (
      RecordCache::new(storage).with_clock(Arc::new(clock.clone())),
      clock,
    )
  }

  #[test]
  fn test_get_deletes_expired_record() {
    let (cache, clock) = cache();

    cache
      .set("shops:nearby", &vec!["a", "b"], Duration::from_secs(10))
      .unwrap();
    assert_eq!(
      cache.get::<Vec<String>>("shops:nearby").unwrap(),
      Some(vec!["a".to_string(), "b".to_string()])
    );

    clock.advance(Duration::from_secs(10));
    assert_eq!(cache.get::<Vec<String>>("shops:nearby").unwrap(), None);
  }

  #[test]
  fn test_clear_expired_uses_expiry_range() {
    let (cache, clock) = cache();

    cache.set("a", &1, Duration::from_secs(1)).unwrap();
    cache.set("b", &2, Duration::from_secs(2)).unwrap();
    cache.set("c", &3, Duration::from_secs(30)).unwrap();
    clock.advance(Duration::from_secs(2));

    assert_eq!(cache.clear_expired().unwrap(), 2);
    assert_eq!(cache.get::<i32>("c").unwrap(), Some(3));
  }

  #[test]
  fn test_storage_errors_propagate() {
    let cache = RecordCache::new(Arc::new(FailingStore));

    assert!(matches!(
      cache.set("k", &1, Duration::from_secs(1)),
      Err(Error::Storage(_))
    ));
    assert!(cache.get::<i32>("k").is_err());
    assert_eq!(Sweep::clear_expired(&cache), 0);
  }
}
