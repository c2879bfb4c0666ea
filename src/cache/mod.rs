//! TTL caches for the storefront client.
//!
//! - `DurableCache`: JSON entries in a persistent key-value store, survives restarts
//! - `MemoryCache`: in-process values for short-lived memoization
//! - `RecordCache`: record-shaped entries swept through an expiry index
//!
//! Expiry is lazy (checked on read) and complemented by a periodic `Sweeper`.

mod durable;
mod memoize;
mod memory;
mod record;
mod sweeper;

pub use durable::{DurableCache, DEFAULT_PREFIX, DEFAULT_TTL};
pub use memoize::{memo_key, memoize};
pub use memory::{MemoryCache, DEFAULT_MEMORY_TTL};
pub use record::RecordCache;
pub use sweeper::{sweep_all, Sweep, Sweeper, DEFAULT_SWEEP_INTERVAL};
