//! Exclusion rules deciding which URLs are kept out of the precache manifest.

use std::fmt;
use std::sync::Arc;

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::asset_paths::strip_query;
use crate::error::{PrecacheError, PrecacheResult};

/// Trait describing exclusion predicates applied to candidate URLs.
pub trait UrlExclusion {
  /// Returns `true` when the URL must never appear in the manifest.
  fn is_excluded(&self, url: &str) -> bool;
}

impl<F> UrlExclusion for F
where
  F: Fn(&str) -> bool,
{
  fn is_excluded(&self, url: &str) -> bool {
    self(url)
  }
}

/// Declarative exclusion filter as written in the project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExcludeFilter {
  /// Exclude URLs containing the fragment, e.g. `/fonts/ayahs`.
  Contains(String),
  /// Exclude URLs matched by a regular expression.
  Pattern(String),
  /// Exclude URLs whose path (query removed) matches a glob, e.g. `/**/*.map`.
  Glob(String),
}

#[derive(Clone)]
enum CompiledRule {
  Contains(String),
  Pattern(Regex),
  Glob(Pattern),
  Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl CompiledRule {
  fn matches(&self, url: &str) -> bool {
    match self {
      Self::Contains(fragment) => url.contains(fragment.as_str()),
      Self::Pattern(regex) => regex.is_match(url),
      Self::Glob(pattern) => pattern.matches(strip_query(url)),
      Self::Predicate(predicate) => predicate(url),
    }
  }
}

impl fmt::Debug for CompiledRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Contains(fragment) => f.debug_tuple("Contains").field(fragment).finish(),
      Self::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
      Self::Glob(pattern) => f.debug_tuple("Glob").field(&pattern.as_str()).finish(),
      Self::Predicate(_) => f.write_str("Predicate(..)"),
    }
  }
}

/// Compiled set of exclusion rules. A URL is excluded when any rule matches it.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
  rules: Vec<CompiledRule>,
}

impl ExclusionRules {
  /// Compile declarative filters, rejecting malformed regular expressions and globs.
  pub fn new(filters: impl IntoIterator<Item = ExcludeFilter>) -> PrecacheResult<Self> {
    let rules = filters
      .into_iter()
      .filter_map(|filter| compile_filter(filter).transpose())
      .collect::<PrecacheResult<Vec<_>>>()?;
    Ok(Self { rules })
  }

  /// Add an arbitrary predicate supplied by an embedding build tool.
  pub fn with_predicate<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&str) -> bool + Send + Sync + 'static,
  {
    self.rules.push(CompiledRule::Predicate(Arc::new(predicate)));
    self
  }

  /// Returns true when no rule is active.
  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Determine whether a URL is dropped by any rule.
  pub fn is_excluded(&self, url: &str) -> bool {
    self.rules.iter().any(|rule| rule.matches(url))
  }
}

impl UrlExclusion for ExclusionRules {
  fn is_excluded(&self, url: &str) -> bool {
    ExclusionRules::is_excluded(self, url)
  }
}

/// Empty fragments and patterns are discarded so a stray `""` never excludes everything.
fn compile_filter(filter: ExcludeFilter) -> PrecacheResult<Option<CompiledRule>> {
  let rule = match filter {
    ExcludeFilter::Contains(fragment) => {
      let fragment = fragment.trim().to_string();
      if fragment.is_empty() {
        return Ok(None);
      }
      CompiledRule::Contains(fragment)
    }
    ExcludeFilter::Pattern(source) => {
      if source.trim().is_empty() {
        return Ok(None);
      }
      let regex = Regex::new(&source).map_err(|err| PrecacheError::Pattern {
        pattern: source.clone(),
        reason: format!("is not a valid exclusion regex: {err}"),
      })?;
      CompiledRule::Pattern(regex)
    }
    ExcludeFilter::Glob(source) => {
      if source.trim().is_empty() {
        return Ok(None);
      }
      let pattern = Pattern::new(source.trim()).map_err(|err| PrecacheError::Pattern {
        pattern: source.clone(),
        reason: format!("is not a valid exclusion glob: {err}"),
      })?;
      CompiledRule::Glob(pattern)
    }
  };
  Ok(Some(rule))
}
