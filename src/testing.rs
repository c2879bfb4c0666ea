//! Test doubles shared by the unit tests.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::network::{Request, Response, Transport};
use crate::store::{CacheRecordStore, KvStore, NewQueuedRequest, QueuedRequest, RequestStore};

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
  Status(u16),
  NetworkError,
  /// Never completes
  Hang,
}

/// Transport that records every request and answers from a script.
pub struct MockTransport {
  calls: Mutex<Vec<Request>>,
  routes: Mutex<HashMap<String, Behavior>>,
  fallback: Mutex<Behavior>,
  gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockTransport {
  pub fn new(fallback: Behavior) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      routes: Mutex::new(HashMap::new()),
      fallback: Mutex::new(fallback),
      gate: Mutex::new(None),
    }
  }

  pub fn route(&self, url: &str, behavior: Behavior) {
    self.routes.lock().unwrap().insert(url.to_string(), behavior);
  }

  pub fn set_fallback(&self, behavior: Behavior) {
    *self.fallback.lock().unwrap() = behavior;
  }

  /// Hold every request until a permit is added to the returned semaphore.
  pub fn gate(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn urls(&self) -> Vec<String> {
    self.calls().into_iter().map(|r| r.url).collect()
  }
}

impl Transport for MockTransport {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    self.calls.lock().unwrap().push(request.clone());
    let behavior = self
      .routes
      .lock()
      .unwrap()
      .get(&request.url)
      .copied()
      .unwrap_or(*self.fallback.lock().unwrap());
    let gate = self.gate.lock().unwrap().clone();

    Box::pin(async move {
      if let Some(gate) = gate {
        gate.acquire().await.expect("gate closed").forget();
      }
      match behavior {
        Behavior::Status(status) => Ok(Response {
          status,
          body: Vec::new(),
        }),
        Behavior::NetworkError => Err(Error::network("connection refused")),
        Behavior::Hang => futures::future::pending().await,
      }
    })
  }
}

/// A store whose every operation fails, as if the disk were full.
pub struct FailingStore;

fn quota() -> Error {
  Error::storage("Failed to write entry", "quota exceeded")
}

impl KvStore for FailingStore {
  fn get(&self, _key: &str) -> Result<Option<String>> {
    Err(quota())
  }

  fn put(&self, _key: &str, _value: &str) -> Result<()> {
    Err(quota())
  }

  fn delete(&self, _key: &str) -> Result<()> {
    Err(quota())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Err(quota())
  }
}

impl RequestStore for FailingStore {
  fn add(&self, _request: &NewQueuedRequest) -> Result<i64> {
    Err(quota())
  }

  fn all(&self) -> Result<Vec<QueuedRequest>> {
    Err(quota())
  }

  fn delete(&self, _id: i64) -> Result<()> {
    Err(quota())
  }

  fn count(&self) -> Result<usize> {
    Err(quota())
  }
}

impl CacheRecordStore for FailingStore {
  fn put_record(&self, _key: &str, _data: &str, _expires_at: i64) -> Result<()> {
    Err(quota())
  }

  fn get_record(&self, _key: &str) -> Result<Option<(String, i64)>> {
    Err(quota())
  }

  fn delete_record(&self, _key: &str) -> Result<()> {
    Err(quota())
  }

  fn delete_expired_records(&self, _now: i64) -> Result<usize> {
    Err(quota())
  }
}
