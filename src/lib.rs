//! Client-side resilience layer for the storefront.
//!
//! - `cache`: durable, in-memory and record caches with TTL expiry
//! - `network`: connectivity monitor with active probing
//! - `queue`: offline mutation queue replayed on reconnect

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod queue;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
