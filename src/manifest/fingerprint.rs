//! Content fingerprints and manifest version ids.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{PrecacheError, PrecacheResult};

/// Hex characters kept from the digest when deriving a version id.
const VERSION_ID_LEN: usize = 16;

/// SHA-256 of `bytes` as lowercase hex.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// Stream a file through SHA-256, returning its hex digest and byte length.
pub fn fingerprint_file(path: &Path) -> PrecacheResult<(String, u64)> {
  let mut file = File::open(path).map_err(|err| PrecacheError::io("read asset", path, err))?;
  let mut hasher = Sha256::new();
  let size =
    io::copy(&mut file, &mut hasher).map_err(|err| PrecacheError::io("read asset", path, err))?;
  Ok((hex::encode(hasher.finalize()), size))
}

/// Derive a version id from `(url, fingerprint)` pairs.
///
/// Pairs are sorted by URL before hashing so the id depends on the entry set only. Each
/// field is NUL-terminated to keep `("ab", "c")` and `("a", "bc")` apart.
pub fn derive_version<'a, I>(pairs: I) -> String
where
  I: IntoIterator<Item = (&'a str, &'a str)>,
{
  let mut sorted: Vec<(&str, &str)> = pairs.into_iter().collect();
  sorted.sort_unstable();

  let mut hasher = Sha256::new();
  for (url, fingerprint) in sorted {
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(fingerprint.as_bytes());
    hasher.update([0u8]);
  }
  let digest = hex::encode(hasher.finalize());
  digest[..VERSION_ID_LEN].to_string()
}
