//! Expansion of include patterns into concrete local files.

use std::collections::BTreeMap;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use crate::asset_paths::make_web_path;
use crate::error::{PrecacheError, PrecacheResult};
use crate::models::AssetPath;
use crate::selection::UrlExclusion;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: true,
};

/// Expand `patterns` (relative to `asset_root`) into a sorted, de-duplicated asset list.
///
/// Directories are never returned. Files whose web path is matched by `exclusions` are
/// dropped. In `strict` mode a pattern that matches no files at all is a
/// [`PrecacheError::Pattern`]; otherwise it only logs a warning.
pub fn resolve_assets<E: UrlExclusion + ?Sized>(
  asset_root: &Path,
  patterns: &[String],
  exclusions: &E,
  strict: bool,
) -> PrecacheResult<Vec<AssetPath>> {
  let escaped_root = Pattern::escape(&asset_root.to_string_lossy());
  let mut resolved: BTreeMap<String, AssetPath> = BTreeMap::new();

  for pattern in patterns {
    let trimmed = pattern.trim().trim_start_matches('/');
    if trimmed.is_empty() {
      continue;
    }

    let full_pattern = format!("{}/{}", escaped_root.trim_end_matches('/'), trimmed);
    let paths = glob::glob_with(&full_pattern, MATCH_OPTIONS).map_err(|err| {
      PrecacheError::Pattern {
        pattern: pattern.clone(),
        reason: format!("is not a valid glob: {err}"),
      }
    })?;

    let mut matched = 0usize;
    for entry in paths {
      let path = entry.map_err(|err| {
        let path = err.path().to_path_buf();
        PrecacheError::io("scan", path, err.into())
      })?;

      if !path.is_file() {
        continue;
      }
      matched += 1;

      let Ok(relative) = path.strip_prefix(asset_root) else {
        continue;
      };
      let web_path = make_web_path(&relative.to_string_lossy());
      if exclusions.is_excluded(&web_path) {
        debug!(%web_path, "asset excluded by filter");
        continue;
      }

      resolved.entry(web_path.clone()).or_insert_with(|| AssetPath {
        source: path.clone(),
        web_path,
      });
    }

    if matched == 0 {
      if strict {
        return Err(PrecacheError::Pattern {
          pattern: pattern.clone(),
          reason: "matched no files".into(),
        });
      }
      warn!(%pattern, root = %asset_root.display(), "include pattern matched no files");
    }
  }

  debug!(count = resolved.len(), "resolved local assets");
  Ok(resolved.into_values().collect())
}
