//! Explicit memoization of async functions through a `MemoryCache`.

use futures::future::BoxFuture;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::memory::MemoryCache;

/// Stable, fixed-length key for a memoized call.
///
/// Hashes `"{scope}_{operation}_{json(args)}"` with SHA-256. Arguments that
/// fail to serialize hash as `null`.
pub fn memo_key<A: Serialize + ?Sized>(scope: &str, operation: &str, args: &A) -> String {
  let args = serde_json::to_string(args).unwrap_or_else(|_| "null".to_string());
  let input = format!("{}_{}_{}", scope, operation, args);

  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Wrap `f` so successful results are cached under `key_fn(&args)` for `ttl`
/// (or the cache's default TTL). Errors are never cached.
///
/// ```ignore
/// let shop_detail = memoize(cache, None, |id: &u64| memo_key("shop", "detail", id), fetch_shop);
/// let shop = shop_detail(42).await?;
/// ```
pub fn memoize<A, T, E, K, F, Fut>(
  cache: Arc<MemoryCache>,
  ttl: Option<Duration>,
  key_fn: K,
  f: F,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync
where
  A: Send + 'static,
  T: Clone + Send + Sync + 'static,
  E: Send + 'static,
  K: Fn(&A) -> String + Send + Sync + 'static,
  F: Fn(A) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  let f = Arc::new(f);
  let ttl = ttl.unwrap_or_else(|| cache.default_ttl());

  move |args: A| -> BoxFuture<'static, Result<T, E>> {
    let key = key_fn(&args);
    let cache = Arc::clone(&cache);
    let f = Arc::clone(&f);

    Box::pin(async move {
      if let Some(hit) = cache.get::<T>(&key) {
        return Ok(hit);
      }

      let value = f(args).await?;
      cache.set_with_ttl(key, value.clone(), ttl);
      Ok(value)
    })
  }
}
