//! Merge every URL source into one ordered, de-duplicated and filtered precache set.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::asset_paths::{join_public_path, strip_query};
use crate::models::{AssetPath, UrlRecord, UrlSource};
use crate::selection::UrlExclusion;

/// Ordered set of URLs ready to be fingerprinted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSet {
  records: Vec<UrlRecord>,
}

impl UrlSet {
  /// Records in first-occurrence order.
  pub fn records(&self) -> &[UrlRecord] {
    &self.records
  }

  /// URLs in first-occurrence order.
  pub fn urls(&self) -> impl Iterator<Item = &str> {
    self.records.iter().map(|record| record.url.as_str())
  }

  /// Number of URLs in the set.
  pub fn len(&self) -> usize {
    self.records.len()
  }

  /// Whether the set holds no URLs.
  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Whether a URL (compared without its query string) is part of the set.
  pub fn contains(&self, url: &str) -> bool {
    let key = strip_query(url);
    self
      .records
      .iter()
      .any(|record| strip_query(&record.url) == key)
  }

  /// Return a new set with a build-generated document.
  ///
  /// When the URL (compared without its query) is already present, the generated bytes take
  /// over that record's slot; otherwise the document is appended.
  pub fn with_generated(&self, url: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> UrlSet {
    let url = url.into();
    let source = UrlSource::Generated(bytes.into());
    let mut records = self.records.clone();
    let key = strip_query(&url);
    match records
      .iter_mut()
      .find(|record| strip_query(&record.url) == key)
    {
      Some(existing) => {
        debug!(url = %existing.url, "generated document replaces listed asset");
        existing.source = source;
      }
      None => records.push(UrlRecord { url, source }),
    }
    UrlSet { records }
  }
}

/// Collects URL sources in precedence order: root document, public assets, bundler output,
/// then explicit externals.
#[derive(Debug, Clone, Default)]
pub struct UrlSetBuilder {
  root_document: Option<String>,
  public_assets: Vec<UrlRecord>,
  bundle_assets: Vec<UrlRecord>,
  externals: Vec<UrlRecord>,
}

impl UrlSetBuilder {
  /// Start an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the application root document URL, usually `/`.
  pub fn root_document(mut self, url: impl Into<String>) -> Self {
    let url = url.into();
    let url = url.trim();
    self.root_document = (!url.is_empty()).then(|| url.to_string());
    self
  }

  /// Add files found by the asset resolver.
  pub fn public_assets(mut self, assets: impl IntoIterator<Item = AssetPath>) -> Self {
    self
      .public_assets
      .extend(assets.into_iter().map(|asset| UrlRecord {
        url: asset.web_path,
        source: UrlSource::PublicAsset(asset.source),
      }));
    self
  }

  /// Add bundler-emitted files, served from `public_path` and stored under `bundle_dir`.
  pub fn bundle_assets<I, P>(
    mut self,
    public_path: &str,
    bundle_dir: &Path,
    relative_paths: I,
  ) -> Self
  where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
  {
    for relative in relative_paths {
      let relative = relative.as_ref().trim();
      if relative.is_empty() {
        continue;
      }
      let file = bundle_dir.join(strip_query(relative).trim_start_matches('/'));
      self.bundle_assets.push(UrlRecord {
        url: join_public_path(public_path, relative),
        source: UrlSource::BundleAsset(file),
      });
    }
    self
  }

  /// Add explicit external URLs. Surrounding whitespace is trimmed.
  pub fn externals<I, U>(mut self, urls: I) -> Self
  where
    I: IntoIterator<Item = U>,
    U: AsRef<str>,
  {
    self.externals.extend(
      urls
        .into_iter()
        .map(|url| url.as_ref().trim().to_string())
        .filter(|url| !url.is_empty())
        .map(|url| UrlRecord {
          url,
          source: UrlSource::External,
        }),
    );
    self
  }

  /// Merge, de-duplicate and filter every source.
  ///
  /// Duplicates are detected with the query string removed; the first occurrence wins and
  /// keeps its query. Exclusions run over the merged list, so a URL dropped here cannot
  /// come back through a lower-precedence source.
  pub fn build<E: UrlExclusion + ?Sized>(self, exclusions: &E) -> UrlSet {
    let root = self.root_document.map(|url| UrlRecord {
      url,
      source: UrlSource::RootDocument,
    });

    let mut seen = BTreeSet::new();
    let merged: Vec<UrlRecord> = root
      .into_iter()
      .chain(self.public_assets)
      .chain(self.bundle_assets)
      .chain(self.externals)
      .filter(|record| seen.insert(strip_query(&record.url).to_string()))
      .collect();

    let total = merged.len();
    let records: Vec<UrlRecord> = merged
      .into_iter()
      .filter(|record| {
        let excluded = exclusions.is_excluded(&record.url);
        if excluded {
          debug!(url = %record.url, "url excluded from precache set");
        }
        !excluded
      })
      .collect();

    debug!(
      kept = records.len(),
      excluded = total - records.len(),
      "built precache url set"
    );
    UrlSet { records }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::selection::{ExcludeFilter, ExclusionRules};
  use pretty_assertions::assert_eq;
  use std::path::PathBuf;

  fn asset(web_path: &str) -> AssetPath {
    AssetPath {
      source: PathBuf::from(format!("/srv/public{web_path}")),
      web_path: web_path.to_string(),
    }
  }

  fn no_rules() -> ExclusionRules {
    ExclusionRules::default()
  }

  #[test]
  fn merges_in_precedence_order() {
    let set = UrlSetBuilder::new()
      .externals(["https://cdn.example/polyfill.js"])
      .bundle_assets("/client/", Path::new("/srv/build"), ["index-3f2a.js"])
      .public_assets(vec![asset("/a.js"), asset("/b.js")])
      .root_document("/")
      .build(&no_rules());

    let urls: Vec<&str> = set.urls().collect();
    assert_eq!(urls, vec![
      "/",
      "/a.js",
      "/b.js",
      "/client/index-3f2a.js",
      "https://cdn.example/polyfill.js",
    ]);
    assert_eq!(
      set.records()[3].source,
      UrlSource::BundleAsset(PathBuf::from("/srv/build/index-3f2a.js"))
    );
  }

  #[test]
  fn first_occurrence_wins_and_keeps_query() {
    let set = UrlSetBuilder::new()
      .public_assets(vec![asset("/manifest.json")])
      .externals([
        "/manifest.json?v=2",
        "https://cdn.example/polyfill.js?features=Intl ",
        "https://cdn.example/polyfill.js?features=fetch",
      ])
      .build(&no_rules());

    let urls: Vec<&str> = set.urls().collect();
    assert_eq!(urls, vec![
      "/manifest.json",
      "https://cdn.example/polyfill.js?features=Intl",
    ]);
    assert_eq!(
      set.records()[0].source,
      UrlSource::PublicAsset(PathBuf::from("/srv/public/manifest.json"))
    );
  }

  #[test]
  fn excluded_urls_never_reappear_from_other_sources() {
    let rules = ExclusionRules::new(vec![ExcludeFilter::Contains("/fonts/ayahs".into())]).unwrap();
    let set = UrlSetBuilder::new()
      .public_assets(vec![asset("/fonts/ayahs/p1.woff"), asset("/fonts/ui.woff")])
      .bundle_assets("/", Path::new("/srv/build"), ["fonts/ayahs/p1.woff"])
      .externals(["https://www.example/public/fonts/ayahs/p1.woff"])
      .build(&rules);

    let urls: Vec<&str> = set.urls().collect();
    assert_eq!(urls, vec!["/fonts/ui.woff"]);
    assert!(!set.contains("/fonts/ayahs/p1.woff"));
  }

  #[test]
  fn blank_inputs_are_ignored() {
    let set = UrlSetBuilder::new()
      .root_document("  ")
      .externals(["", "   "])
      .bundle_assets("/client/", Path::new("/srv/build"), [""])
      .build(&no_rules());
    assert!(set.is_empty());
  }

  #[test]
  fn generated_documents_append_without_mutating_the_original() {
    let set = UrlSetBuilder::new()
      .root_document("/")
      .build(&no_rules());
    let extended = set.with_generated("/client/offline.html", b"<html></html>".to_vec());

    assert_eq!(set.len(), 1);
    assert_eq!(extended.len(), 2);
    assert!(matches!(extended.records()[1].source, UrlSource::Generated(_)));

    let again = extended.with_generated("/client/offline.html", b"other".to_vec());
    assert_eq!(again.len(), 2);
    assert!(matches!(
      &again.records()[1].source,
      UrlSource::Generated(bytes) if bytes.as_ref() == b"other"
    ));
  }

  #[test]
  fn generated_document_takes_the_slot_of_a_listed_bundle_file() {
    let set = UrlSetBuilder::new()
      .root_document("/")
      .bundle_assets("/client/", Path::new("build/client"), ["offline.html", "main.js"])
      .build(&no_rules());
    let extended = set.with_generated("/client/offline.html", b"<html></html>".to_vec());

    assert_eq!(extended.urls().collect::<Vec<_>>(), vec![
      "/",
      "/client/offline.html",
      "/client/main.js"
    ]);
    assert!(matches!(extended.records()[1].source, UrlSource::Generated(_)));
  }
}
