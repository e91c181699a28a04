//! Project configuration loader describing what to precache and where to write outputs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PrecacheError, PrecacheResult};
use crate::selection::{ExcludeFilter, ExclusionRules};

/// Configuration file names searched for by [`PrecacheConfig::discover`], in order.
pub const CONFIG_FILE_NAMES: [&str; 3] =
  ["offline.config.json", "offline.config.yaml", "offline.config.yml"];

/// Build-time configuration for one precache invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrecacheConfig {
  /// Master switch for the offline subsystem.
  pub enabled: bool,
  /// When disabled, still write an empty manifest instead of omitting it.
  pub emit_manifest_when_disabled: bool,
  /// Directory holding public static assets, relative to the project directory.
  pub asset_root: String,
  /// Glob patterns, relative to `asset_root`, selecting public assets to precache.
  pub include_patterns: Vec<String>,
  /// Fail the build when an include pattern matches nothing.
  pub strict_patterns: bool,
  /// URLs matched by any of these filters never enter the manifest.
  pub exclude_filters: Vec<ExcludeFilter>,
  /// Explicit off-origin URLs to precache.
  pub external_urls: Vec<String>,
  /// Directory the bundler wrote its output to, relative to the project directory.
  pub bundle_output_dir: String,
  /// Web path bundler output is served from, e.g. `/client/`.
  pub public_path: String,
  /// Files emitted by the bundler, relative to `bundle_output_dir`.
  pub bundle_emitted_assets: Vec<String>,
  /// Hashed entry bundles the offline page loads, relative to `bundle_output_dir`.
  pub entry_bundles: Vec<String>,
  /// Application root document URL. Empty to leave it out of the manifest.
  pub root_document: String,
  /// Directory receiving the manifest and offline page, relative to the project directory.
  pub output_dir: String,
  /// File name of the offline fallback page.
  pub output_page_name: String,
  /// File name of the serialised manifest.
  pub manifest_file_name: String,
  /// Optional polyfill service script added as the first external URL.
  pub polyfill: PolyfillConfig,
  /// Offline page presentation.
  pub fallback_page: FallbackPageConfig,
  /// Client configuration values per deployment.
  pub deployments: BTreeMap<Deployment, BTreeMap<String, Value>>,
}

impl Default for PrecacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      emit_manifest_when_disabled: false,
      asset_root: "public".into(),
      include_patterns: vec!["**/*".into()],
      strict_patterns: false,
      exclude_filters: Vec::new(),
      external_urls: Vec::new(),
      bundle_output_dir: "build/client".into(),
      public_path: "/client/".into(),
      bundle_emitted_assets: Vec::new(),
      entry_bundles: Vec::new(),
      root_document: "/".into(),
      output_dir: "build/client".into(),
      output_page_name: "offline.html".into(),
      manifest_file_name: "precache-manifest.json".into(),
      polyfill: PolyfillConfig::default(),
      fallback_page: FallbackPageConfig::default(),
      deployments: BTreeMap::new(),
    }
  }
}

/// Polyfill service settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolyfillConfig {
  /// Whether to precache the polyfill script.
  pub enabled: bool,
  /// Base URL of the polyfill service.
  pub url: String,
  /// Features requested from the service.
  pub features: Vec<String>,
}

impl PolyfillConfig {
  /// Full polyfill script URL when enabled.
  pub fn script_url(&self) -> Option<String> {
    let base = self.url.trim();
    if !self.enabled || base.is_empty() {
      return None;
    }
    if self.features.is_empty() {
      Some(base.to_string())
    } else {
      Some(format!("{base}?features={}", self.features.join(",")))
    }
  }
}

/// Presentation options for the offline fallback document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackPageConfig {
  /// Document title.
  pub title: String,
  /// Message shown when scripting is disabled.
  pub noscript_message: String,
  /// Collapse whitespace between tags.
  pub minify: bool,
}

impl Default for FallbackPageConfig {
  fn default() -> Self {
    Self {
      title: "Offline".into(),
      noscript_message: "You are offline and this application requires JavaScript.".into(),
      minify: true,
    }
  }
}

impl PrecacheConfig {
  /// Search `project_dir` for a configuration file.
  ///
  /// When no file exists the defaults are returned; a file that exists but fails to parse is
  /// an error.
  pub fn discover(project_dir: &Path) -> PrecacheResult<Self> {
    for name in CONFIG_FILE_NAMES {
      let candidate = project_dir.join(name);
      if candidate.is_file() {
        debug!(path = %candidate.display(), "loading precache config");
        return Self::load(&candidate);
      }
    }
    debug!(dir = %project_dir.display(), "no precache config found, using defaults");
    Ok(Self::default())
  }

  /// Read configuration from a specific JSON or YAML file, chosen by extension.
  pub fn load(path: &Path) -> PrecacheResult<Self> {
    let content =
      fs::read_to_string(path).map_err(|err| PrecacheError::io("read config", path, err))?;
    let is_yaml = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let config: Self = if is_yaml {
      serde_yaml::from_str(&content)?
    } else {
      serde_json::from_str(&content)?
    };
    config.validate(path)?;
    Ok(config)
  }

  fn validate(&self, path: &Path) -> PrecacheResult<()> {
    let invalid = |reason: &str| PrecacheError::Config {
      path: path.to_path_buf(),
      reason: reason.to_string(),
    };

    if self.output_page_name.trim().is_empty() || self.output_page_name.contains('/') {
      return Err(invalid("outputPageName must be a bare file name"));
    }
    if self.manifest_file_name.trim().is_empty() || self.manifest_file_name.contains('/') {
      return Err(invalid("manifestFileName must be a bare file name"));
    }
    if self.output_page_name == self.manifest_file_name {
      return Err(invalid("outputPageName and manifestFileName must differ"));
    }
    Ok(())
  }

  /// Compile the configured exclusion filters.
  pub fn exclusion_rules(&self) -> PrecacheResult<ExclusionRules> {
    ExclusionRules::new(self.exclude_filters.iter().cloned())
  }

  /// External URLs in precedence order, polyfill first.
  pub fn externals(&self) -> Vec<String> {
    self
      .polyfill
      .script_url()
      .into_iter()
      .chain(self.external_urls.iter().cloned())
      .collect()
  }

  /// Client configuration for a deployment.
  pub fn client_config(&self, deployment: Deployment) -> ClientConfig {
    ClientConfig::new(
      deployment,
      self.deployments.get(&deployment).cloned().unwrap_or_default(),
    )
  }
}

/// Resolved absolute locations for a configuration rooted at a project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
  /// Public asset root.
  pub asset_root: PathBuf,
  /// Bundler output directory.
  pub bundle_output_dir: PathBuf,
  /// Output directory for the manifest and fallback page.
  pub output_dir: PathBuf,
}

impl ProjectPaths {
  /// Resolve configured paths against `project_dir`.
  pub fn resolve(config: &PrecacheConfig, project_dir: &Path) -> Self {
    Self {
      asset_root: project_dir.join(&config.asset_root),
      bundle_output_dir: project_dir.join(&config.bundle_output_dir),
      output_dir: project_dir.join(&config.output_dir),
    }
  }

  /// Path of the serialised manifest.
  pub fn manifest_path(&self, config: &PrecacheConfig) -> PathBuf {
    self.output_dir.join(&config.manifest_file_name)
  }

  /// Path of the offline fallback page.
  pub fn page_path(&self, config: &PrecacheConfig) -> PathBuf {
    self.output_dir.join(&config.output_page_name)
  }
}

/// Deployment environment the client configuration is taken from.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
  /// Local development.
  #[default]
  Development,
  /// Pre-release deployment.
  Staging,
  /// Live deployment.
  Production,
}

impl fmt::Display for Deployment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Development => "development",
      Self::Staging => "staging",
      Self::Production => "production",
    };
    f.write_str(name)
  }
}

impl FromStr for Deployment {
  type Err = String;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value.trim().to_ascii_lowercase().as_str() {
      "development" | "dev" => Ok(Self::Development),
      "staging" => Ok(Self::Staging),
      "production" | "prod" => Ok(Self::Production),
      other => Err(format!("unknown deployment `{other}`")),
    }
  }
}

/// Client configuration values inlined into the offline page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientConfig {
  #[serde(skip)]
  deployment: Deployment,
  #[serde(flatten)]
  values: BTreeMap<String, Value>,
}

impl ClientConfig {
  /// Wrap values selected for `deployment`.
  pub fn new(deployment: Deployment, values: BTreeMap<String, Value>) -> Self {
    Self { deployment, values }
  }

  /// Deployment the values belong to.
  pub fn deployment(&self) -> Deployment {
    self.deployment
  }

  /// Raw values.
  pub fn values(&self) -> &BTreeMap<String, Value> {
    &self.values
  }

  /// String value, or `default` when missing or empty.
  pub fn string(&self, name: &str, default: &str) -> String {
    match self.values.get(name) {
      Some(Value::String(value)) if !value.is_empty() => value.clone(),
      Some(Value::Number(value)) => value.to_string(),
      Some(Value::Bool(value)) => value.to_string(),
      _ => default.to_string(),
    }
  }

  /// Integer value parsed from numbers or numeric strings, or `default`.
  pub fn number(&self, name: &str, default: i64) -> i64 {
    match self.values.get(name) {
      Some(Value::Number(value)) => value.as_i64().unwrap_or(default),
      Some(Value::String(value)) => value.trim().parse().unwrap_or(default),
      _ => default,
    }
  }

  /// Boolean value; strings count as true only when `true` or `1`.
  pub fn bool(&self, name: &str, default: bool) -> bool {
    match self.values.get(name) {
      Some(Value::Bool(value)) => *value,
      Some(Value::String(value)) if !value.is_empty() => value == "true" || value == "1",
      Some(Value::Number(value)) => value.as_i64() == Some(1),
      _ => default,
    }
  }
}
