//! Data structures produced while compiling a precache manifest.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local file resolved from an include pattern together with its root-relative web path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPath {
  /// Location of the file on disk.
  pub source: PathBuf,
  /// Root-relative web path, always starting with `/`.
  pub web_path: String,
}

/// Where a URL in the precache set came from, and therefore how it is fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlSource {
  /// The application root document. Rendered by the server, so only its URL is known.
  RootDocument,
  /// A file from the public asset root.
  PublicAsset(PathBuf),
  /// A file emitted by the bundler.
  BundleAsset(PathBuf),
  /// An explicit off-origin URL.
  External,
  /// A document produced during this build, such as the offline fallback page.
  Generated(Arc<[u8]>),
}

impl UrlSource {
  /// Local file backing this URL, if any.
  pub fn local_path(&self) -> Option<&PathBuf> {
    match self {
      Self::PublicAsset(path) | Self::BundleAsset(path) => Some(path),
      _ => None,
    }
  }
}

/// A single URL retained by the URL set builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
  /// URL exactly as it will be requested, query string included.
  pub url: String,
  /// Origin of the URL.
  pub source: UrlSource,
}

/// One fingerprinted manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheEntry {
  /// URL to precache.
  pub url: String,
  /// SHA-256 of the file bytes for local entries, the URL itself for remote ones.
  pub fingerprint: String,
  /// Byte length for local entries.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
}

/// Versioned list of entries that must be available offline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  /// Deterministic id derived from the entry set.
  pub version: String,
  /// Entries in URL set order.
  pub entries: Vec<CacheEntry>,
  /// Build time.
  pub generated_at: DateTime<Utc>,
  /// Document served to navigation requests when network and cache both miss.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub navigate_fallback_url: Option<String>,
}

/// Rendered offline fallback document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPage {
  /// File name written into the output directory.
  pub file_name: String,
  /// URL the page is served from.
  pub url: String,
  /// Document markup.
  pub html: String,
}
