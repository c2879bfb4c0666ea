//! Header normalisation for stored requests.

use reqwest::header::HeaderMap;
use std::collections::{BTreeMap, HashMap};

/// Headers flattened to a plain name → value mapping.
///
/// Built from a `HeaderMap` (names lowercased, non-UTF-8 values skipped),
/// a list of pairs, or a map. Later duplicates win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.insert(name.into(), value.into());
  }

  /// Case-insensitive presence check before inserting.
  pub fn insert_if_absent(&mut self, name: &str, value: &str) {
    if !self.0.keys().any(|k| k.eq_ignore_ascii_case(name)) {
      self.insert(name, value);
    }
  }

  pub fn into_inner(self) -> BTreeMap<String, String> {
    self.0
  }
}

impl From<&HeaderMap> for Headers {
  fn from(map: &HeaderMap) -> Self {
    Self(
      map
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect(),
    )
  }
}

impl From<HeaderMap> for Headers {
  fn from(map: HeaderMap) -> Self {
    Self::from(&map)
  }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for Headers {
  fn from(pairs: Vec<(K, V)>) -> Self {
    Self(
      pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

impl From<BTreeMap<String, String>> for Headers {
  fn from(map: BTreeMap<String, String>) -> Self {
    Self(map)
  }
}

impl From<HashMap<String, String>> for Headers {
  fn from(map: HashMap<String, String>) -> Self {
    Self(map.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderName;

  #[test]
  fn test_header_map_names_are_lowercased() {
    let mut map = HeaderMap::new();
    map.insert(
      HeaderName::from_bytes(b"X-Request-Id").unwrap(),
      "42".parse().unwrap(),
    );

    let headers = Headers::from(&map).into_inner();

    assert_eq!(headers.get("x-request-id").map(String::as_str), Some("42"));
  }

  #[test]
  fn test_pairs_keep_last_duplicate() {
    let headers = Headers::from(vec![("accept", "text/html"), ("accept", "application/json")]);

    assert_eq!(
      headers.into_inner(),
      BTreeMap::from([("accept".to_string(), "application/json".to_string())])
    );
  }

  #[test]
  fn test_insert_if_absent_ignores_case() {
    let mut headers = Headers::from(vec![("Content-Type", "text/plain")]);

    headers.insert_if_absent("content-type", "application/json");

    assert_eq!(headers.into_inner().len(), 1);
  }
}
