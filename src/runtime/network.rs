//! Network access used to populate cache stores and to pass requests through.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::asset_paths::is_external_url;
use crate::error::{PrecacheError, PrecacheResult};
use crate::runtime::request::CachedResponse;

/// Performs HTTP GET requests on behalf of the controller.
///
/// Transport failures (including an unreachable network) are [`PrecacheError::Fetch`];
/// any HTTP status is returned as a response.
#[async_trait]
pub trait Network: Send + Sync {
  /// Fetch `url`, which may be root-relative or absolute.
  async fn fetch(&self, url: &str) -> PrecacheResult<CachedResponse>;
}

/// `reqwest`-backed network resolving root-relative URLs against an origin.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: String,
}

impl HttpNetwork {
  /// Network for `origin`, e.g. `https://app.example`.
  pub fn new(origin: impl Into<String>) -> Self {
    Self::with_client(reqwest::Client::new(), origin)
  }

  /// Network using a preconfigured client.
  pub fn with_client(client: reqwest::Client, origin: impl Into<String>) -> Self {
    let origin = origin.into().trim_end_matches('/').to_string();
    Self { client, origin }
  }

  /// Absolute URL for a request target.
  pub fn resolve(&self, url: &str) -> String {
    if url.starts_with("//") {
      format!("https:{url}")
    } else if is_external_url(url) {
      url.to_string()
    } else {
      format!("{}/{}", self.origin, url.trim_start_matches('/'))
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, url: &str) -> PrecacheResult<CachedResponse> {
    let target = self.resolve(url);
    debug!(%target, "fetching");

    let response = self
      .client
      .get(&target)
      .send()
      .await
      .map_err(|err| PrecacheError::fetch(url, err.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .map(str::to_string);
    let body = response
      .bytes()
      .await
      .map_err(|err| PrecacheError::fetch(url, err.to_string()))?;

    Ok(CachedResponse {
      status,
      content_type,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolves_relative_and_external_urls() {
    let network = HttpNetwork::new("https://app.example/");
    assert_eq!(network.resolve("/a.js"), "https://app.example/a.js");
    assert_eq!(network.resolve("a.js"), "https://app.example/a.js");
    assert_eq!(
      network.resolve("https://cdn.example/polyfill.js"),
      "https://cdn.example/polyfill.js"
    );
    assert_eq!(
      network.resolve("//cdn.example/polyfill.js"),
      "https://cdn.example/polyfill.js"
    );
  }

  #[tokio::test]
  async fn unreachable_origin_is_a_fetch_error() {
    let network = HttpNetwork::new("http://127.0.0.1:9");
    let err = network.fetch("/a.js").await.unwrap_err();
    assert!(matches!(err, PrecacheError::Fetch { ref url, .. } if url == "/a.js"));
  }
}
