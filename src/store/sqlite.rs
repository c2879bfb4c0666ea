//! SQLite implementation of every store contract.

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::{CacheRecordStore, KvStore, NewQueuedRequest, QueuedRequest, RequestStore};
use crate::error::{Error, Result};

/// SQLite-backed durable storage, shared process-wide.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::storage("Failed to create storage directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::storage(
        &format!("Failed to open database at {}", path.display()),
        e,
      )
    })?;

    Self::with_connection(conn)
  }

  /// A private in-memory database; contents vanish with the value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::storage("Failed to open in-memory database", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("storefront-offline").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(SCHEMA)
      .map_err(|e| Error::storage("Failed to run storage migrations", e))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::storage("Lock poisoned", e))
  }
}

const SCHEMA: &str = r#"
-- Flat key-value entries (durable cache)
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Requests captured while offline
CREATE TABLE IF NOT EXISTS offline_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_requests_url ON offline_requests(url);
CREATE INDEX IF NOT EXISTS idx_offline_requests_enqueued ON offline_requests(enqueued_at);

-- Record cache with expiry index
CREATE TABLE IF NOT EXISTS record_cache (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_record_cache_expiry ON record_cache(expires_at);
"#;

impl KvStore for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    self
      .conn()?
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| Error::storage("Failed to read entry", e))
  }

  fn put(&self, key: &str, value: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| Error::storage("Failed to write entry", e))?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| Error::storage("Failed to delete entry", e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store")
      .map_err(|e| Error::storage("Failed to prepare key listing", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| Error::storage("Failed to list keys", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| Error::storage("Failed to read key", e))?;

    Ok(keys)
  }
}

impl RequestStore for SqliteStorage {
  fn add(&self, request: &NewQueuedRequest) -> Result<i64> {
    let headers = serde_json::to_string(&request.headers)?;
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT INTO offline_requests (url, method, headers, body, enqueued_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          request.url,
          request.method,
          headers,
          request.body,
          request.enqueued_at.timestamp_millis()
        ],
      )
      .map_err(|e| Error::storage("Failed to store offline request", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn all(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at FROM offline_requests
         ORDER BY id",
      )
      .map_err(|e| Error::storage("Failed to prepare request query", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<Vec<u8>>>(4)?,
          row.get::<_, i64>(5)?,
        ))
      })
      .map_err(|e| Error::storage("Failed to query offline requests", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| Error::storage("Failed to read offline request", e))?;

    // A row that no longer decodes is skipped so the rest of the queue drains
    Ok(
      rows
        .into_iter()
        .filter_map(|(id, url, method, headers, body, enqueued_at)| {
          let headers: BTreeMap<String, String> = match serde_json::from_str(&headers) {
            Ok(headers) => headers,
            Err(e) => {
              warn!(id, url = %url, error = %e, "skipping offline request with unreadable headers");
              return None;
            }
          };
          let Some(enqueued_at) = Utc.timestamp_millis_opt(enqueued_at).single() else {
            warn!(id, url = %url, enqueued_at, "skipping offline request with invalid enqueue time");
            return None;
          };
          Some(QueuedRequest {
            id,
            url,
            method,
            headers,
            body,
            enqueued_at,
          })
        })
        .collect(),
    )
  }

  fn delete(&self, id: i64) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM offline_requests WHERE id = ?", params![id])
      .map_err(|e| Error::storage("Failed to delete offline request", e))?;
    Ok(())
  }

  fn count(&self) -> Result<usize> {
    self
      .conn()?
      .query_row("SELECT COUNT(*) FROM offline_requests", [], |row| {
        row.get::<_, i64>(0)
      })
      .map(|n| n as usize)
      .map_err(|e| Error::storage("Failed to count offline requests", e))
  }
}

impl CacheRecordStore for SqliteStorage {
  fn put_record(&self, key: &str, data: &str, expires_at: i64) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO record_cache (key, data, expires_at) VALUES (?, ?, ?)",
        params![key, data, expires_at],
      )
      .map_err(|e| Error::storage("Failed to store cache record", e))?;
    Ok(())
  }

  fn get_record(&self, key: &str) -> Result<Option<(String, i64)>> {
    self
      .conn()?
      .query_row(
        "SELECT data, expires_at FROM record_cache WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| Error::storage("Failed to read cache record", e))
  }

  fn delete_record(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM record_cache WHERE key = ?", params![key])
      .map_err(|e| Error::storage("Failed to delete cache record", e))?;
    Ok(())
  }

  fn delete_expired_records(&self, now: i64) -> Result<usize> {
    self
      .conn()?
      .execute(
        "DELETE FROM record_cache WHERE expires_at <= ?",
        params![now],
      )
      .map_err(|e| Error::storage("Failed to clear expired cache records", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(url: &str) -> NewQueuedRequest {
    NewQueuedRequest {
      url: url.to_string(),
      method: "POST".to_string(),
      headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
      body: Some(b"{\"qty\":2}".to_vec()),
      enqueued_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    }
  }

  #[test]
  fn test_kv_put_get_delete() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.put("a", "1").unwrap();
    storage.put("a", "2").unwrap();
    assert_eq!(storage.get("a").unwrap().as_deref(), Some("2"));
    assert_eq!(storage.keys().unwrap(), vec!["a".to_string()]);

    KvStore::delete(&storage, "a").unwrap();
    assert_eq!(storage.get("a").unwrap(), None);
  }

  #[test]
  fn test_requests_come_back_in_insertion_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let first = storage.add(&request("/api/cart")).unwrap();
    let second = storage.add(&request("/api/order")).unwrap();
    assert!(second > first);

    let all = storage.all().unwrap();
    let urls: Vec<_> = all.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["/api/cart", "/api/order"]);
    assert_eq!(all[0].headers["content-type"], "application/json");
    assert_eq!(all[0].body.as_deref(), Some(&b"{\"qty\":2}"[..]));
    assert_eq!(all[0].enqueued_at.timestamp_millis(), 1_700_000_000_000);
  }

  #[test]
  fn test_undecodable_requests_are_skipped() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.add(&request("/api/cart")).unwrap();
    {
      let conn = storage.conn().unwrap();
      conn
        .execute(
          "INSERT INTO offline_requests (url, method, headers, body, enqueued_at)
           VALUES ('/api/broken', 'POST', 'not json', NULL, 0)",
          [],
        )
        .unwrap();
      conn
        .execute(
          "INSERT INTO offline_requests (url, method, headers, body, enqueued_at)
           VALUES ('/api/far-future', 'POST', '{}', NULL, ?)",
          params![i64::MAX],
        )
        .unwrap();
    }
    storage.add(&request("/api/order")).unwrap();

    let urls: Vec<_> = storage.all().unwrap().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["/api/cart", "/api/order"]);
  }

  #[test]
  fn test_deleted_ids_are_not_reused() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let first = storage.add(&request("/a")).unwrap();
    RequestStore::delete(&storage, first).unwrap();
    let second = storage.add(&request("/b")).unwrap();

    assert!(second > first);
    assert_eq!(storage.count().unwrap(), 1);
  }

  #[test]
  fn test_expired_records_deleted_by_range() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.put_record("old", "1", 100).unwrap();
    storage.put_record("edge", "2", 200).unwrap();
    storage.put_record("new", "3", 300).unwrap();

    assert_eq!(storage.delete_expired_records(200).unwrap(), 2);
    assert_eq!(storage.get_record("old").unwrap(), None);
    assert_eq!(
      storage.get_record("new").unwrap(),
      Some(("3".to_string(), 300))
    );
  }
}
