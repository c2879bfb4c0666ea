//! The request/response seam shared by the probe and queue replay.

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// An outgoing request. `url` may be relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: String,
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub timeout: Option<Duration>,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method,
      headers: BTreeMap::new(),
      body: None,
      timeout: None,
    }
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub body: Vec<u8>,
}

impl Response {
  /// 2xx
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Anything that can carry a `Request` to the server.
///
/// Non-2xx statuses are returned as `Ok(Response)`; only failures to complete
/// the exchange are errors.
pub trait Transport: Send + Sync {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;
}

/// HTTP transport built on reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Option<Url>,
}

impl HttpTransport {
  pub fn new(base_url: Option<&str>) -> Result<Self> {
    let base_url = base_url
      .map(|raw| {
        Url::parse(raw).map_err(|e| Error::InvalidUrl {
          url: raw.to_string(),
          reason: e.to_string(),
        })
      })
      .transpose()?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::network(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  /// Resolve `url` against the base URL; absolute URLs pass through.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    let invalid = |e: url::ParseError| Error::InvalidUrl {
      url: url.to_string(),
      reason: e.to_string(),
    };

    match Url::parse(url) {
      Ok(absolute) => Ok(absolute),
      Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
        Some(base) => base.join(url).map_err(invalid),
        None => Err(invalid(url::ParseError::RelativeUrlWithoutBase)),
      },
      Err(e) => Err(invalid(e)),
    }
  }

  fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::network(format!("Invalid header name {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| Error::network(format!("Invalid header value for {}: {}", name, e)))?;
      map.insert(name, value);
    }
    Ok(map)
  }

  async fn execute(&self, request: &Request) -> Result<Response> {
    let url = self.resolve(&request.url)?;
    let mut builder = self
      .client
      .request(request.method.clone(), url)
      .headers(Self::header_map(&request.headers)?);

    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }
    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        Error::Timeout(request.timeout.unwrap_or_default())
      } else {
        Error::network(e)
      }
    })?;

    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(Error::network)?.to_vec();

    Ok(Response { status, body })
  }
}

impl Transport for HttpTransport {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(self.execute(request))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_relative_urls_resolve_against_base() {
    let transport = HttpTransport::new(Some("https://shop.example.com/app/")).unwrap();

    assert_eq!(
      transport.resolve("/favicon.ico").unwrap().as_str(),
      "https://shop.example.com/favicon.ico"
    );
    assert_eq!(
      transport.resolve("https://cdn.example.com/x").unwrap().as_str(),
      "https://cdn.example.com/x"
    );
  }

  #[test]
  fn test_relative_url_without_base_is_rejected() {
    let transport = HttpTransport::new(None).unwrap();

    assert!(matches!(
      transport.resolve("/api/order"),
      Err(Error::InvalidUrl { .. })
    ));
  }

  #[test]
  fn test_response_ok_is_2xx_only() {
    let ok = |status| Response { status, body: Vec::new() }.ok();
    assert!(ok(200));
    assert!(ok(204));
    assert!(!ok(304));
    assert!(!ok(500));
  }
}
