//! Persistence contracts shared by the caches and the offline queue.
//!
//! The caches only need a flat key-value shape; the queue needs a record store
//! with auto-incrementing ids. `SqliteStorage` provides all of them from one
//! database, each in its own table so they never collide on keys.

mod sqlite;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::Result;

pub use sqlite::SqliteStorage;

/// Flat string key-value store (the shape of browser local storage).
pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  fn put(&self, key: &str, value: &str) -> Result<()>;

  fn delete(&self, key: &str) -> Result<()>;

  /// Every key currently stored, in no particular order.
  fn keys(&self) -> Result<Vec<String>>;
}

/// A request captured while offline, waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
  /// Auto-incremented; replay order is ascending id
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

/// A request about to be stored. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewQueuedRequest {
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

/// Transactional record store for queued requests.
pub trait RequestStore: Send + Sync {
  /// Append a record and return its id.
  fn add(&self, request: &NewQueuedRequest) -> Result<i64>;

  /// All records, oldest (lowest id) first.
  fn all(&self) -> Result<Vec<QueuedRequest>>;

  fn delete(&self, id: i64) -> Result<()>;

  fn count(&self) -> Result<usize>;
}

/// Record-shaped cache storage with an index on expiry.
pub trait CacheRecordStore: Send + Sync {
  fn put_record(&self, key: &str, data: &str, expires_at: i64) -> Result<()>;

  /// Returns `(data, expires_at)`.
  fn get_record(&self, key: &str) -> Result<Option<(String, i64)>>;

  fn delete_record(&self, key: &str) -> Result<()>;

  /// Delete every record with `expires_at <= now`, returning how many went.
  fn delete_expired_records(&self, now: i64) -> Result<usize>;
}
