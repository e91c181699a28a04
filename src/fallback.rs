//! Render the static offline document served to navigations when network and cache miss.

use regex::Regex;
use tracing::warn;

use crate::asset_paths::{join_public_path, strip_query};
use crate::config::{ClientConfig, PrecacheConfig};
use crate::error::PrecacheResult;
use crate::models::FallbackPage;
use crate::selection::UrlExclusion;

/// Global the client runtime reads its configuration from on boot.
pub const CLIENT_CONFIG_BINDING: &str = "__CLIENT_CONFIG__";

/// Inputs describing where the page lives and how it looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPageOptions {
  /// File name written into the output directory.
  pub file_name: String,
  /// Web path the page and the bundles are served from.
  pub public_path: String,
  /// Document title.
  pub title: String,
  /// Message shown when scripting is disabled.
  pub noscript_message: String,
  /// Collapse whitespace between tags.
  pub minify: bool,
}

impl FallbackPageOptions {
  /// Take page options from the project configuration.
  pub fn from_config(config: &PrecacheConfig) -> Self {
    Self {
      file_name: config.output_page_name.clone(),
      public_path: config.public_path.clone(),
      title: config.fallback_page.title.clone(),
      noscript_message: config.fallback_page.noscript_message.clone(),
      minify: config.fallback_page.minify,
    }
  }

  /// URL the page is served from.
  pub fn url(&self) -> String {
    join_public_path(&self.public_path, &self.file_name)
  }
}

/// Render the offline page referencing only the entry bundles.
///
/// Stylesheets become `<link>` tags and scripts become deferred `<script>` tags, in the
/// order given. Bundles matched by `exclusions` are dropped so the page never points at a
/// URL missing from the manifest. The client configuration is inlined as JSON.
pub fn render_fallback_page<E: UrlExclusion + ?Sized>(
  options: &FallbackPageOptions,
  client_config: &ClientConfig,
  entry_bundle_urls: &[String],
  exclusions: &E,
) -> PrecacheResult<FallbackPage> {
  let mut styles = Vec::new();
  let mut scripts = Vec::new();

  for url in entry_bundle_urls {
    if exclusions.is_excluded(url) {
      warn!(%url, "entry bundle is excluded, leaving it out of the offline page");
      continue;
    }
    let path = strip_query(url);
    if path.ends_with(".css") {
      styles.push(format!(
        r#"    <link rel="stylesheet" href="{}">"#,
        escape_attribute(url)
      ));
    } else if path.ends_with(".js") || path.ends_with(".mjs") {
      scripts.push(format!(
        r#"    <script defer src="{}"></script>"#,
        escape_attribute(url)
      ));
    } else {
      warn!(%url, "entry bundle is neither a script nor a stylesheet, skipping");
    }
  }

  let config_json = serde_json::to_string(client_config)?
    .replace('<', "\\u003c")
    .replace('\u{2028}', "\\u2028")
    .replace('\u{2029}', "\\u2029");

  let html = format!(
    r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
{styles}
  </head>
  <body>
    <div id="app"></div>
    <noscript>{noscript}</noscript>
    <script>window.{binding}={config};</script>
{scripts}
  </body>
</html>
"#,
    title = escape_text(&options.title),
    styles = styles.join("\n"),
    noscript = escape_text(&options.noscript_message),
    binding = CLIENT_CONFIG_BINDING,
    config = config_json,
    scripts = scripts.join("\n"),
  );

  let html = if options.minify {
    minify_markup(&html)
  } else {
    html
  };

  Ok(FallbackPage {
    file_name: options.file_name.clone(),
    url: options.url(),
    html,
  })
}

fn between_tags() -> &'static Regex {
  use std::sync::OnceLock;

  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r">\s+<").expect("invalid whitespace regex"))
}

fn minify_markup(html: &str) -> String {
  between_tags().replace_all(html.trim(), "><").into_owned()
}

fn escape_text(value: &str) -> String {
  value
    .replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
  escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Deployment;
  use crate::selection::{ExcludeFilter, ExclusionRules};
  use serde_json::json;
  use std::collections::BTreeMap;

  fn options(minify: bool) -> FallbackPageOptions {
    FallbackPageOptions {
      file_name: "offline.html".into(),
      public_path: "/client/".into(),
      title: "Offline".into(),
      noscript_message: "Enable JavaScript".into(),
      minify,
    }
  }

  fn client_config() -> ClientConfig {
    ClientConfig::new(
      Deployment::Production,
      BTreeMap::from([("API_URL".to_string(), json!("https://api.example"))]),
    )
  }

  fn bundles() -> Vec<String> {
    vec![
      "/client/index-3f2a.css".to_string(),
      "/client/index-3f2a.js".to_string(),
    ]
  }

  #[test]
  fn references_entry_bundles_and_inlines_config() {
    let page = render_fallback_page(
      &options(false),
      &client_config(),
      &bundles(),
      &ExclusionRules::default(),
    )
    .unwrap();

    assert_eq!(page.url, "/client/offline.html");
    assert_eq!(page.file_name, "offline.html");
    assert!(page
      .html
      .contains(r#"<link rel="stylesheet" href="/client/index-3f2a.css">"#));
    assert!(page
      .html
      .contains(r#"<script defer src="/client/index-3f2a.js"></script>"#));
    assert!(page
      .html
      .contains(r#"window.__CLIENT_CONFIG__={"API_URL":"https://api.example"};"#));
  }

  #[test]
  fn never_references_excluded_bundles() {
    let rules = ExclusionRules::new(vec![ExcludeFilter::Pattern(r"\.css$".into())]).unwrap();
    let page = render_fallback_page(&options(false), &client_config(), &bundles(), &rules).unwrap();

    assert!(!page.html.contains("index-3f2a.css"));
    assert!(page.html.contains("index-3f2a.js"));
  }

  #[test]
  fn inlined_config_cannot_close_the_script() {
    let config = ClientConfig::new(
      Deployment::Development,
      BTreeMap::from([("NOTE".to_string(), json!("</script><script>alert(1)"))]),
    );
    let page =
      render_fallback_page(&options(false), &config, &[], &ExclusionRules::default()).unwrap();

    assert!(!page.html.contains("</script><script>alert"));
    assert!(page.html.contains("\\u003c/script>"));
  }

  #[test]
  fn minified_output_has_no_whitespace_between_tags() {
    let page = render_fallback_page(
      &options(true),
      &client_config(),
      &bundles(),
      &ExclusionRules::default(),
    )
    .unwrap();

    assert!(page.html.starts_with("<!DOCTYPE html><html><head>"));
    assert!(!page.html.contains(">\n"));
  }

  #[test]
  fn rendering_is_deterministic() {
    let render = || {
      render_fallback_page(
        &options(true),
        &client_config(),
        &bundles(),
        &ExclusionRules::default(),
      )
      .unwrap()
    };
    assert_eq!(render(), render());
  }

  #[test]
  fn escapes_title_markup() {
    let mut options = options(false);
    options.title = "Tarteel <offline>".into();
    let page =
      render_fallback_page(&options, &client_config(), &[], &ExclusionRules::default()).unwrap();
    assert!(page.html.contains("<title>Tarteel &lt;offline&gt;</title>"));
  }
}
