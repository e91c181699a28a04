//! Error types shared by the build pipeline and the runtime cache controller.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias used across the crate.
pub type PrecacheResult<T> = Result<T, PrecacheError>;

/// All errors raised while compiling a precache manifest or driving cache versions.
#[derive(Error, Debug)]
pub enum PrecacheError {
  /// A required include pattern matched nothing, or the pattern itself is malformed.
  #[error("include pattern `{pattern}` {reason}")]
  Pattern {
    /// Pattern as it was declared in the configuration.
    pattern: String,
    /// Human readable failure reason.
    reason: String,
  },

  /// A local asset could not be read while fingerprinting or writing outputs.
  #[error("failed to {context} {}: {source}", path.display())]
  Io {
    /// Short description of the operation that failed.
    context: &'static str,
    /// Path that caused the error.
    path: PathBuf,
    /// Source I/O error.
    #[source]
    source: std::io::Error,
  },

  /// A request failed while populating a cache store or passing through to the network.
  #[error("fetch of {url} failed: {reason}")]
  Fetch {
    /// Requested URL.
    url: String,
    /// Transport error or unexpected status.
    reason: String,
  },

  /// Activation was attempted on a cache version whose install never completed.
  #[error("cannot activate cache version {version}: install did not complete")]
  ActivationConflict {
    /// Manifest version id of the rejected store.
    version: String,
  },

  /// A newer install request replaced this one before it finished.
  #[error("install of cache version {version} was superseded by {superseded_by}")]
  InstallSuperseded {
    /// Version the abandoned install was populating.
    version: String,
    /// Version whose install replaced it.
    superseded_by: String,
  },

  /// The cache storage backend refused an operation.
  #[error("cache storage error on `{store}`: {reason}")]
  Storage {
    /// Store name the operation targeted.
    store: String,
    /// Failure reason.
    reason: String,
  },

  /// The project configuration is unusable.
  #[error("invalid configuration at {}: {reason}", path.display())]
  Config {
    /// Configuration file path.
    path: PathBuf,
    /// Failure reason.
    reason: String,
  },

  /// JSON serialisation failure.
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  /// YAML parse failure.
  #[error("YAML error: {0}")]
  Yaml(#[from] serde_yaml::Error),
}

impl PrecacheError {
  /// Create an I/O error annotated with the failing operation and path.
  pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      context,
      path: path.into(),
      source,
    }
  }

  /// Create a fetch error for the given URL.
  pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Fetch {
      url: url.into(),
      reason: reason.into(),
    }
  }

  /// Create a storage error for the given store.
  pub fn storage(store: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Storage {
      store: store.into(),
      reason: reason.into(),
    }
  }

  /// Whether the error aborts the build-time pipeline as a whole.
  pub fn aborts_build(&self) -> bool {
    matches!(
      self,
      Self::Pattern { .. } | Self::Io { .. } | Self::Config { .. } | Self::Json(_) | Self::Yaml(_)
    )
  }

  /// Whether retrying the same install later can succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Fetch { .. } | Self::InstallSuperseded { .. })
  }
}
