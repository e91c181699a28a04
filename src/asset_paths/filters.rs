use regex::Regex;

fn external_url_pattern() -> &'static Regex {
  use std::sync::OnceLock;

  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r"(?i)^(https?:)?//").expect("invalid http(s) regex"))
}

/// Determine whether a URL points off-origin and therefore cannot be fingerprinted from disk.
///
/// Protocol-relative URLs (`//cdn.example/x.js`) count as external.
pub fn is_external_url(value: &str) -> bool {
  external_url_pattern().is_match(value.trim())
}

/// Strip the query string and fragment from a URL, leaving the value used for uniqueness checks.
pub fn strip_query(url: &str) -> &str {
  let end = url.find(['?', '#']).unwrap_or(url.len());
  &url[..end]
}
