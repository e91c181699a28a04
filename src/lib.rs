#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod asset_paths;
pub mod builder;
pub mod config;
pub mod error;
pub mod fallback;
pub mod manifest;
pub mod models;
pub mod runtime;
pub mod selection;
pub mod url_set;

pub use builder::{BuildOutcome, PrecacheArtifacts, PrecacheBuilder};
pub use config::{ClientConfig, Deployment, PrecacheConfig, ProjectPaths};
pub use error::{PrecacheError, PrecacheResult};
pub use models::{AssetPath, CacheEntry, FallbackPage, Manifest, UrlRecord, UrlSource};
pub use runtime::{
  CacheStorage, CacheVersionController, ControllerOptions, FetchRequest, InstallOutcome, Network,
};
pub use selection::{ExcludeFilter, ExclusionRules, UrlExclusion};
pub use url_set::{UrlSet, UrlSetBuilder};
