//! Turn a URL set into a fingerprinted, versioned manifest.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::PrecacheResult;
use crate::manifest::fingerprint::{derive_version, fingerprint_bytes, fingerprint_file};
use crate::models::{CacheEntry, Manifest, UrlRecord, UrlSource};
use crate::url_set::UrlSet;

/// Fingerprint every URL in `urls` and derive the manifest version.
///
/// Local files are hashed from their bytes and any unreadable file aborts compilation.
/// Remote URLs and the server-rendered root document use the URL string itself as their
/// fingerprint. Entry order follows the URL set.
pub fn compile_manifest(
  urls: &UrlSet,
  navigate_fallback_url: Option<String>,
  generated_at: DateTime<Utc>,
) -> PrecacheResult<Manifest> {
  let entries = urls
    .records()
    .iter()
    .map(fingerprint_record)
    .collect::<PrecacheResult<Vec<_>>>()?;

  let version = derive_version(
    entries
      .iter()
      .map(|entry| (entry.url.as_str(), entry.fingerprint.as_str())),
  );
  debug!(%version, entries = entries.len(), "compiled precache manifest");

  Ok(Manifest {
    version,
    entries,
    generated_at,
    navigate_fallback_url,
  })
}

fn fingerprint_record(record: &UrlRecord) -> PrecacheResult<CacheEntry> {
  let (fingerprint, size) = match &record.source {
    UrlSource::PublicAsset(path) | UrlSource::BundleAsset(path) => {
      let (fingerprint, size) = fingerprint_file(path)?;
      (fingerprint, Some(size))
    }
    UrlSource::Generated(bytes) => (fingerprint_bytes(bytes), Some(bytes.len() as u64)),
    UrlSource::External | UrlSource::RootDocument => (record.url.clone(), None),
  };

  Ok(CacheEntry {
    url: record.url.clone(),
    fingerprint,
    size,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asset_paths::resolve_assets;
  use crate::error::PrecacheError;
  use crate::selection::ExclusionRules;
  use crate::url_set::UrlSetBuilder;
  use std::fs;
  use std::path::Path;
  use tempfile::tempdir;

  fn compile(root: &Path, patterns: &[&str]) -> PrecacheResult<Manifest> {
    let patterns: Vec<String> = patterns.iter().map(|value| value.to_string()).collect();
    let rules = ExclusionRules::default();
    let assets = resolve_assets(root, &patterns, &rules, false)?;
    let urls = UrlSetBuilder::new()
      .public_assets(assets)
      .externals(["https://cdn.example/polyfill.js"])
      .build(&rules);
    compile_manifest(&urls, None, Utc::now())
  }

  #[test]
  fn local_entries_hash_bytes_and_remote_entries_use_url() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.js"), "a").unwrap();

    let manifest = compile(dir.path(), &["*.js"]).unwrap();
    assert_eq!(manifest.entries[0].url, "/a.js");
    assert_eq!(manifest.entries[0].fingerprint, fingerprint_bytes(b"a"));
    assert_eq!(manifest.entries[0].size, Some(1));
    assert_eq!(manifest.entries[1], CacheEntry {
      url: "https://cdn.example/polyfill.js".into(),
      fingerprint: "https://cdn.example/polyfill.js".into(),
      size: None,
    });
  }

  #[test]
  fn recompiling_unchanged_tree_is_idempotent() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.js"), "a").unwrap();
    fs::write(dir.path().join("b.js"), "b").unwrap();

    let first = compile(dir.path(), &["*.js"]).unwrap();
    let second = compile(dir.path(), &["*.js"]).unwrap();
    assert_eq!(first.version, second.version);
    assert_eq!(
      serde_json::to_string(&first.entries).unwrap(),
      serde_json::to_string(&second.entries).unwrap()
    );
  }

  #[test]
  fn version_changes_when_bytes_change() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.js"), "a").unwrap();
    let before = compile(dir.path(), &["*.js"]).unwrap();

    fs::write(dir.path().join("a.js"), "a2").unwrap();
    let after = compile(dir.path(), &["*.js"]).unwrap();
    assert_ne!(before.version, after.version);
  }

  #[test]
  fn unreadable_bundle_asset_aborts() {
    let dir = tempdir().unwrap();
    let urls = UrlSetBuilder::new()
      .bundle_assets("/client/", dir.path(), ["missing-3f2a.js"])
      .build(&ExclusionRules::default());

    let err = compile_manifest(&urls, None, Utc::now()).unwrap_err();
    assert!(matches!(err, PrecacheError::Io { ref path, .. } if path.ends_with("missing-3f2a.js")));
  }

  #[test]
  fn generated_documents_are_fingerprinted_in_memory() {
    let urls = UrlSetBuilder::new()
      .root_document("/")
      .build(&ExclusionRules::default())
      .with_generated("/offline.html", b"<html></html>".to_vec());

    let manifest =
      compile_manifest(&urls, Some("/offline.html".into()), Utc::now()).unwrap();
    assert_eq!(manifest.entries[0].fingerprint, "/");
    assert_eq!(manifest.entries[1].fingerprint, fingerprint_bytes(b"<html></html>"));
    assert_eq!(manifest.navigate_fallback_url.as_deref(), Some("/offline.html"));
  }
}
