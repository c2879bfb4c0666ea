//! Error taxonomy for the offline layer.

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
  /// A value could not be encoded to or decoded from JSON
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The underlying store failed a read, write or delete
  #[error("storage error: {0}")]
  Storage(String),

  /// The transport could not complete the exchange
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// A connectivity subscriber returned an error or panicked
  #[error("subscriber error: {0}")]
  Subscriber(String),

  #[error("invalid url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },
}

impl Error {
  /// Build a storage error with context, e.g. `Error::storage("Failed to delete entry", e)`.
  pub fn storage(context: &str, err: impl Display) -> Self {
    Error::Storage(format!("{}: {}", context, err))
  }

  pub fn network(err: impl Display) -> Self {
    Error::Network(err.to_string())
  }

  /// True for failures that mean "the server was not reached".
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Error::Network(_) | Error::Timeout(_))
  }
}
