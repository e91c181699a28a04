use serde::{Deserialize, Serialize};

/// How the page issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level navigation expecting a full document.
  Navigate,
  /// Any sub-resource request.
  Subresource,
}

/// Intercepted GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  /// Requested URL, absolute or root-relative.
  pub url: String,
  /// Request mode.
  pub mode: RequestMode,
}

impl FetchRequest {
  /// Navigation request for `url`.
  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      mode: RequestMode::Navigate,
    }
  }

  /// Sub-resource request for `url`.
  pub fn subresource(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      mode: RequestMode::Subresource,
    }
  }

  /// Whether the request expects a full document.
  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Response as stored in a cache version or returned from the network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CachedResponse {
  /// HTTP status code.
  pub status: u16,
  /// `Content-Type` header, when known.
  pub content_type: Option<String>,
  /// Response body.
  pub body: Vec<u8>,
}

impl CachedResponse {
  /// `200 OK` response with the given body.
  pub fn ok(content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status: 200,
      content_type: content_type.map(str::to_string),
      body: body.into(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
