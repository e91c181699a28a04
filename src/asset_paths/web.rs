/// Produce the root-relative web path for a file resolved under an asset root.
///
/// The generated path always starts with `/` and uses forward slashes so that the resulting
/// manifest is identical on every platform, regardless of the native directory separator that
/// was used when the files were discovered on disk.
pub fn make_web_path(relative_path: &str) -> String {
  let normalised = relative_path.replace('\\', "/");
  let trimmed = normalised.trim_start_matches("./").trim_start_matches('/');
  format!("/{trimmed}")
}

/// Join a bundler public path (for example `/client/`) with a bundle-relative asset path.
pub fn join_public_path(public_path: &str, relative_path: &str) -> String {
  let base = public_path.trim_end_matches('/');
  let relative = relative_path.replace('\\', "/");
  let relative = relative.trim_start_matches("./").trim_start_matches('/');
  if base.is_empty() {
    format!("/{relative}")
  } else if base.starts_with('/') || base.contains("://") {
    format!("{base}/{relative}")
  } else {
    format!("/{base}/{relative}")
  }
}

#[cfg(test)]
mod tests {
  use super::{join_public_path, make_web_path};

  #[test]
  fn prefixes_root_slash() {
    assert_eq!(make_web_path("images/logo.png"), "/images/logo.png");
    assert_eq!(make_web_path("./a.js"), "/a.js");
  }

  #[test]
  fn normalises_backslashes_from_windows_inputs() {
    assert_eq!(make_web_path("fonts\\inter.woff2"), "/fonts/inter.woff2");
  }

  #[test]
  fn joins_public_path_variants() {
    assert_eq!(join_public_path("/client/", "index-3f2a.js"), "/client/index-3f2a.js");
    assert_eq!(join_public_path("client", "/index.js"), "/client/index.js");
    assert_eq!(join_public_path("", "index.js"), "/index.js");
    assert_eq!(
      join_public_path("https://static.example/client/", "index.js"),
      "https://static.example/client/index.js"
    );
  }
}
