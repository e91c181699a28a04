//! Loading, writing and querying serialised manifests.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::asset_paths::strip_query;
use crate::error::{PrecacheError, PrecacheResult};
use crate::manifest::fingerprint::derive_version;
use crate::models::{CacheEntry, Manifest};

impl Manifest {
  /// Manifest with no entries, emitted for disabled builds that still want a file on disk.
  pub fn empty(generated_at: DateTime<Utc>) -> Self {
    Self {
      version: derive_version(std::iter::empty()),
      entries: Vec::new(),
      generated_at,
      navigate_fallback_url: None,
    }
  }

  /// Load a manifest from disk.
  pub fn load(path: &Path) -> PrecacheResult<Self> {
    let content =
      fs::read_to_string(path).map_err(|err| PrecacheError::io("read manifest", path, err))?;
    Ok(serde_json::from_str(&content)?)
  }

  /// Serialise as prettified JSON.
  pub fn to_json_pretty(&self) -> PrecacheResult<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Look up the entry for an exact URL.
  pub fn entry(&self, url: &str) -> Option<&CacheEntry> {
    self.entries.iter().find(|entry| entry.url == url)
  }

  /// Look up an entry, ignoring query strings on both sides when no exact match exists.
  pub fn entry_ignoring_query(&self, url: &str) -> Option<&CacheEntry> {
    self.entry(url).or_else(|| {
      let key = strip_query(url);
      self
        .entries
        .iter()
        .find(|entry| strip_query(&entry.url) == key)
    })
  }

  /// Name of the cache store holding this version, e.g. `precache-3f2a...`.
  pub fn cache_name(&self, prefix: &str) -> String {
    format!("{prefix}-{}", self.version)
  }

  /// Total bytes of local entries.
  pub fn total_size(&self) -> u64 {
    self.entries.iter().filter_map(|entry| entry.size).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn manifest() -> Manifest {
    Manifest {
      version: "0123456789abcdef".into(),
      entries: vec![
        CacheEntry {
          url: "/a.js".into(),
          fingerprint: "aa".into(),
          size: Some(10),
        },
        CacheEntry {
          url: "https://cdn.example/polyfill.js?features=Intl".into(),
          fingerprint: "https://cdn.example/polyfill.js?features=Intl".into(),
          size: None,
        },
      ],
      generated_at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
        .unwrap()
        .with_timezone(&Utc),
      navigate_fallback_url: Some("/client/offline.html".into()),
    }
  }

  #[test]
  fn serialises_camel_case_fields() {
    let json = manifest().to_json_pretty().unwrap();
    assert!(json.contains("\"generatedAt\""));
    assert!(json.contains("\"navigateFallbackUrl\": \"/client/offline.html\""));
    assert!(!json.contains("\"size\": null"));
  }

  #[test]
  fn load_reads_written_manifest() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("precache-manifest.json");
    fs::write(&path, manifest().to_json_pretty().unwrap()).unwrap();

    assert_eq!(Manifest::load(&path).unwrap(), manifest());
  }

  #[test]
  fn load_reports_missing_file() {
    let dir = tempdir().unwrap();
    let err = Manifest::load(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, PrecacheError::Io { .. }));
  }

  #[test]
  fn looks_up_entries_with_and_without_query() {
    let manifest = manifest();
    assert!(manifest.entry("/a.js").is_some());
    assert!(manifest.entry("/a.js?v=1").is_none());
    assert!(manifest.entry_ignoring_query("/a.js?v=1").is_some());
    assert!(
      manifest
        .entry_ignoring_query("https://cdn.example/polyfill.js")
        .is_some()
    );
  }

  #[test]
  fn derives_cache_name_and_size() {
    let manifest = manifest();
    assert_eq!(manifest.cache_name("precache"), "precache-0123456789abcdef");
    assert_eq!(manifest.total_size(), 10);
  }

  #[test]
  fn empty_manifest_has_stable_version() {
    let now = Utc::now();
    assert_eq!(Manifest::empty(now).version, Manifest::empty(now).version);
    assert!(Manifest::empty(now).entries.is_empty());
  }
}
