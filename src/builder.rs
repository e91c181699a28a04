//! Build orchestrator running resolver, URL set builder, fallback page and manifest compiler.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::asset_paths::{join_public_path, resolve_assets};
use crate::config::{Deployment, PrecacheConfig, ProjectPaths};
use crate::error::{PrecacheError, PrecacheResult};
use crate::fallback::{FallbackPageOptions, render_fallback_page};
use crate::manifest::compile_manifest;
use crate::models::{FallbackPage, Manifest};
use crate::url_set::UrlSetBuilder;

/// Collection of generated artifacts for one build.
#[derive(Debug, Clone)]
pub struct PrecacheArtifacts {
  /// Compiled manifest.
  pub manifest: Manifest,
  /// Manifest serialised as prettified JSON.
  pub manifest_json: String,
  /// Rendered offline page, absent when the exclusion rules drop its URL.
  pub fallback_page: Option<FallbackPage>,
  /// File system paths that should trigger rerunning the build when changed.
  pub rerun_paths: Vec<PathBuf>,
}

/// What a build invocation produced.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
  /// The subsystem is enabled and a full manifest was compiled.
  Compiled(PrecacheArtifacts),
  /// The subsystem is disabled but an empty manifest was requested.
  EmptyManifest(Manifest),
  /// The subsystem is disabled and nothing is emitted.
  Disabled,
}

impl BuildOutcome {
  /// Manifest produced by the build, if any.
  pub fn manifest(&self) -> Option<&Manifest> {
    match self {
      Self::Compiled(artifacts) => Some(&artifacts.manifest),
      Self::EmptyManifest(manifest) => Some(manifest),
      Self::Disabled => None,
    }
  }
}

/// High-level helper compiling the precache manifest for a project.
pub struct PrecacheBuilder<'a> {
  config: &'a PrecacheConfig,
  paths: ProjectPaths,
  deployment: Deployment,
}

impl<'a> PrecacheBuilder<'a> {
  /// Create a builder for `config`, resolving its paths against `project_dir`.
  pub fn new(config: &'a PrecacheConfig, project_dir: &Path, deployment: Deployment) -> Self {
    Self {
      config,
      paths: ProjectPaths::resolve(config, project_dir),
      deployment,
    }
  }

  /// Resolved project locations.
  pub fn paths(&self) -> &ProjectPaths {
    &self.paths
  }

  /// Run the pipeline without touching the output directory.
  ///
  /// Any pattern or I/O failure aborts the whole build, so a partial manifest is never
  /// produced.
  pub fn build(&self, generated_at: DateTime<Utc>) -> PrecacheResult<BuildOutcome> {
    let config = self.config;
    if !config.enabled {
      if config.emit_manifest_when_disabled {
        info!("offline support disabled, emitting empty manifest");
        return Ok(BuildOutcome::EmptyManifest(Manifest::empty(generated_at)));
      }
      info!("offline support disabled, skipping manifest generation");
      return Ok(BuildOutcome::Disabled);
    }

    let rules = config.exclusion_rules()?;
    let assets = resolve_assets(
      &self.paths.asset_root,
      &config.include_patterns,
      &rules,
      config.strict_patterns,
    )?;

    let url_set = UrlSetBuilder::new()
      .root_document(config.root_document.as_str())
      .public_assets(assets)
      .bundle_assets(
        &config.public_path,
        &self.paths.bundle_output_dir,
        config
          .bundle_emitted_assets
          .iter()
          .chain(config.entry_bundles.iter()),
      )
      .externals(config.externals())
      .build(&rules);

    let entry_bundle_urls: Vec<String> = config
      .entry_bundles
      .iter()
      .map(|bundle| join_public_path(&config.public_path, bundle))
      .collect();
    let options = FallbackPageOptions::from_config(config);
    let page = render_fallback_page(
      &options,
      &config.client_config(self.deployment),
      &entry_bundle_urls,
      &rules,
    )?;

    let (url_set, fallback_page) = if rules.is_excluded(&page.url) {
      warn!(url = %page.url, "offline page is excluded from the precache set, omitting it");
      (url_set, None)
    } else {
      let extended = url_set.with_generated(page.url.clone(), page.html.as_bytes().to_vec());
      (extended, Some(page))
    };

    let manifest = compile_manifest(
      &url_set,
      fallback_page.as_ref().map(|page| page.url.clone()),
      generated_at,
    )?;
    let manifest_json = manifest.to_json_pretty()?;

    let mut rerun_paths = vec![
      self.paths.asset_root.clone(),
      self.paths.bundle_output_dir.clone(),
    ];
    rerun_paths.extend(
      url_set
        .records()
        .iter()
        .filter_map(|record| record.source.local_path().cloned()),
    );

    info!(
      version = %manifest.version,
      entries = manifest.entries.len(),
      bytes = manifest.total_size(),
      deployment = %self.deployment,
      "compiled precache manifest"
    );

    Ok(BuildOutcome::Compiled(PrecacheArtifacts {
      manifest,
      manifest_json,
      fallback_page,
      rerun_paths,
    }))
  }

  /// Write the outcome into the output directory, returning the files written.
  ///
  /// Each file is written to a temporary sibling first and renamed into place so readers
  /// never observe a truncated manifest.
  pub fn write(&self, outcome: &BuildOutcome) -> PrecacheResult<Vec<PathBuf>> {
    let manifest_json = match outcome {
      BuildOutcome::Compiled(artifacts) => artifacts.manifest_json.clone(),
      BuildOutcome::EmptyManifest(manifest) => manifest.to_json_pretty()?,
      BuildOutcome::Disabled => return Ok(Vec::new()),
    };

    let output_dir = &self.paths.output_dir;
    fs::create_dir_all(output_dir)
      .map_err(|err| PrecacheError::io("create output directory", output_dir, err))?;

    let mut written = Vec::new();
    if let BuildOutcome::Compiled(PrecacheArtifacts {
      fallback_page: Some(page),
      ..
    }) = outcome
    {
      let page_path = self.paths.page_path(self.config);
      write_atomically(&page_path, page.html.as_bytes())?;
      written.push(page_path);
    }

    let manifest_path = self.paths.manifest_path(self.config);
    write_atomically(&manifest_path, manifest_json.as_bytes())?;
    written.push(manifest_path);

    debug!(files = written.len(), "wrote precache outputs");
    Ok(written)
  }

  /// Build with the current time and write the outputs.
  pub fn run(&self) -> PrecacheResult<BuildOutcome> {
    let outcome = self.build(Utc::now())?;
    self.write(&outcome)?;
    Ok(outcome)
  }
}

fn write_atomically(path: &Path, contents: &[u8]) -> PrecacheResult<()> {
  let file_name = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
  let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

  fs::write(&temp_path, contents)
    .map_err(|err| PrecacheError::io("write", &temp_path, err))?;
  fs::rename(&temp_path, path).map_err(|err| PrecacheError::io("replace", path, err))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::fingerprint_bytes;
  use crate::selection::ExcludeFilter;
  use tempfile::tempdir;

  fn project(root: &Path) {
    fs::create_dir_all(root.join("public/fonts/ayahs")).unwrap();
    fs::write(root.join("public/manifest.json"), "{}").unwrap();
    fs::write(root.join("public/fonts/ui.woff"), "ui").unwrap();
    fs::write(root.join("public/fonts/ayahs/p1.woff"), "huge").unwrap();
    fs::create_dir_all(root.join("build/client")).unwrap();
    fs::write(root.join("build/client/index-3f2a.js"), "js").unwrap();
    fs::write(root.join("build/client/index-3f2a.css"), "css").unwrap();
  }

  fn config() -> PrecacheConfig {
    PrecacheConfig {
      exclude_filters: vec![ExcludeFilter::Contains("/fonts/ayahs".into())],
      external_urls: vec!["https://cdn.example/polyfill.js".into()],
      entry_bundles: vec!["index-3f2a.js".into(), "index-3f2a.css".into()],
      ..PrecacheConfig::default()
    }
  }

  #[test]
  fn builds_manifest_with_fallback_page_entry() {
    let dir = tempdir().unwrap();
    project(dir.path());
    let config = config();

    let outcome = PrecacheBuilder::new(&config, dir.path(), Deployment::Production)
      .build(Utc::now())
      .unwrap();
    let BuildOutcome::Compiled(artifacts) = outcome else {
      panic!("expected a compiled manifest");
    };

    let urls: Vec<&str> = artifacts
      .manifest
      .entries
      .iter()
      .map(|entry| entry.url.as_str())
      .collect();
    assert_eq!(urls, vec![
      "/",
      "/fonts/ui.woff",
      "/manifest.json",
      "/client/index-3f2a.js",
      "/client/index-3f2a.css",
      "https://cdn.example/polyfill.js",
      "/client/offline.html",
    ]);
    assert_eq!(
      artifacts.manifest.navigate_fallback_url.as_deref(),
      Some("/client/offline.html")
    );
    assert!(artifacts.rerun_paths.contains(&dir.path().join("public/manifest.json")));
  }

  #[test]
  fn write_emits_page_and_manifest() {
    let dir = tempdir().unwrap();
    project(dir.path());
    let config = config();
    let builder = PrecacheBuilder::new(&config, dir.path(), Deployment::Development);

    let outcome = builder.run().unwrap();
    let manifest = Manifest::load(&dir.path().join("build/client/precache-manifest.json")).unwrap();
    assert_eq!(Some(&manifest), outcome.manifest());

    let page = fs::read_to_string(dir.path().join("build/client/offline.html")).unwrap();
    assert!(page.contains("/client/index-3f2a.js"));
    assert!(!dir.path().join("build/client/.precache-manifest.json.tmp").exists());
  }

  #[test]
  fn missing_bundle_aborts_without_writing() {
    let dir = tempdir().unwrap();
    project(dir.path());
    let mut config = config();
    config.bundle_emitted_assets = vec!["vendor-9c1d.js".into()];
    let builder = PrecacheBuilder::new(&config, dir.path(), Deployment::Development);

    let err = builder.run().unwrap_err();
    assert!(matches!(err, PrecacheError::Io { .. }));
    assert!(!dir.path().join("build/client/precache-manifest.json").exists());
  }

  #[test]
  fn offline_page_listed_as_bundle_asset_uses_rendered_bytes() {
    let dir = tempdir().unwrap();
    project(dir.path());
    let mut config = config();
    config.bundle_emitted_assets = vec!["offline.html".into()];
    let builder = PrecacheBuilder::new(&config, dir.path(), Deployment::Production);

    let BuildOutcome::Compiled(clean) = builder.build(Utc::now()).unwrap() else {
      panic!("expected a compiled manifest");
    };
    let page = clean.fallback_page.as_ref().unwrap();
    let entry = clean.manifest.entry("/client/offline.html").unwrap();
    assert_eq!(entry.fingerprint, fingerprint_bytes(page.html.as_bytes()));
    assert_eq!(
      clean
        .manifest
        .entries
        .iter()
        .filter(|entry| entry.url == "/client/offline.html")
        .count(),
      1
    );

    fs::write(dir.path().join("build/client/offline.html"), "<p>stale</p>").unwrap();
    let BuildOutcome::Compiled(rebuilt) = builder.build(Utc::now()).unwrap() else {
      panic!("expected a compiled manifest");
    };
    assert_eq!(rebuilt.manifest.version, clean.manifest.version);
  }

  #[test]
  fn disabled_build_omits_manifest_by_default() {
    let dir = tempdir().unwrap();
    let config = PrecacheConfig {
      enabled: false,
      ..PrecacheConfig::default()
    };
    let builder = PrecacheBuilder::new(&config, dir.path(), Deployment::Development);

    let outcome = builder.run().unwrap();
    assert!(matches!(outcome, BuildOutcome::Disabled));
    assert!(!dir.path().join("build/client").exists());
  }

  #[test]
  fn disabled_build_can_emit_empty_manifest() {
    let dir = tempdir().unwrap();
    let config = PrecacheConfig {
      enabled: false,
      emit_manifest_when_disabled: true,
      ..PrecacheConfig::default()
    };
    let builder = PrecacheBuilder::new(&config, dir.path(), Deployment::Development);

    builder.run().unwrap();
    let manifest = Manifest::load(&builder.paths().manifest_path(&config)).unwrap();
    assert!(manifest.entries.is_empty());
  }
}
