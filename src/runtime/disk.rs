//! Directory-backed cache storage: one directory per store, an index mapping URLs to body
//! files, and a marker file once the store is sealed.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{PrecacheError, PrecacheResult};
use crate::manifest::fingerprint_bytes;
use crate::runtime::request::CachedResponse;
use crate::runtime::storage::CacheStorage;

const INDEX_FILE: &str = "index.json";
const SEALED_MARKER: &str = ".sealed";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct StoreIndex {
  entries: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct IndexEntry {
  file: String,
  status: u16,
  content_type: Option<String>,
}

/// Persistent storage rooted at a directory.
#[derive(Debug)]
pub struct DirCacheStorage {
  root: PathBuf,
  index_lock: Mutex<()>,
}

impl DirCacheStorage {
  /// Storage rooted at `root`. The directory is created lazily.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      index_lock: Mutex::new(()),
    }
  }

  /// Root directory.
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn store_dir(&self, store: &str) -> PrecacheResult<PathBuf> {
    let valid = !store.is_empty()
      && !store.starts_with('.')
      && store
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
      return Err(PrecacheError::storage(store, "invalid store name"));
    }
    Ok(self.root.join(store))
  }

  async fn read_index(&self, dir: &Path) -> PrecacheResult<StoreIndex> {
    let path = dir.join(INDEX_FILE);
    match fs::read_to_string(&path).await {
      Ok(content) => Ok(serde_json::from_str(&content)?),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(StoreIndex::default()),
      Err(err) => Err(PrecacheError::io("read cache index", path, err)),
    }
  }

  async fn write_index(&self, dir: &Path, index: &StoreIndex) -> PrecacheResult<()> {
    let path = dir.join(INDEX_FILE);
    let temp = dir.join(format!(".{INDEX_FILE}.tmp"));
    let content = serde_json::to_vec_pretty(index)?;
    fs::write(&temp, content)
      .await
      .map_err(|err| PrecacheError::io("write cache index", &temp, err))?;
    fs::rename(&temp, &path)
      .await
      .map_err(|err| PrecacheError::io("replace cache index", path, err))
  }
}

async fn exists(path: &Path) -> PrecacheResult<bool> {
  fs::try_exists(path)
    .await
    .map_err(|err| PrecacheError::io("inspect", path, err))
}

#[async_trait]
impl CacheStorage for DirCacheStorage {
  async fn open(&self, store: &str) -> PrecacheResult<()> {
    let dir = self.store_dir(store)?;
    fs::create_dir_all(&dir)
      .await
      .map_err(|err| PrecacheError::io("create cache store", dir, err))
  }

  async fn keys(&self) -> PrecacheResult<Vec<String>> {
    let mut entries = match fs::read_dir(&self.root).await {
      Ok(entries) => entries,
      Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(err) => return Err(PrecacheError::io("list cache stores", &self.root, err)),
    };

    let mut keys = Vec::new();
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|err| PrecacheError::io("list cache stores", &self.root, err))?
    {
      let is_dir = entry
        .file_type()
        .await
        .map(|file_type| file_type.is_dir())
        .unwrap_or(false);
      if is_dir {
        keys.push(entry.file_name().to_string_lossy().into_owned());
      }
    }
    keys.sort();
    Ok(keys)
  }

  async fn delete(&self, store: &str) -> PrecacheResult<bool> {
    let dir = self.store_dir(store)?;
    match fs::remove_dir_all(&dir).await {
      Ok(()) => Ok(true),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
      Err(err) => Err(PrecacheError::io("delete cache store", dir, err)),
    }
  }

  async fn has(&self, store: &str, url: &str) -> PrecacheResult<bool> {
    let dir = self.store_dir(store)?;
    Ok(self.read_index(&dir).await?.entries.contains_key(url))
  }

  async fn get(&self, store: &str, url: &str) -> PrecacheResult<Option<CachedResponse>> {
    let dir = self.store_dir(store)?;
    let index = self.read_index(&dir).await?;
    let Some(entry) = index.entries.get(url) else {
      return Ok(None);
    };

    let body_path = dir.join(&entry.file);
    let body = fs::read(&body_path)
      .await
      .map_err(|err| PrecacheError::io("read cached body", body_path, err))?;
    Ok(Some(CachedResponse {
      status: entry.status,
      content_type: entry.content_type.clone(),
      body,
    }))
  }

  async fn put(&self, store: &str, url: &str, response: CachedResponse) -> PrecacheResult<()> {
    let dir = self.store_dir(store)?;
    if !exists(&dir).await? {
      return Err(PrecacheError::storage(store, "store does not exist"));
    }

    let _guard = self.index_lock.lock().await;
    if exists(&dir.join(SEALED_MARKER)).await? {
      return Err(PrecacheError::storage(store, "store is sealed"));
    }

    let file = fingerprint_bytes(url.as_bytes())[..32].to_string();
    let body_path = dir.join(&file);
    fs::write(&body_path, &response.body)
      .await
      .map_err(|err| PrecacheError::io("write cached body", body_path, err))?;

    let mut index = self.read_index(&dir).await?;
    index.entries.insert(url.to_string(), IndexEntry {
      file,
      status: response.status,
      content_type: response.content_type,
    });
    self.write_index(&dir, &index).await
  }

  async fn seal(&self, store: &str) -> PrecacheResult<()> {
    let dir = self.store_dir(store)?;
    if !exists(&dir).await? {
      return Err(PrecacheError::storage(store, "store does not exist"));
    }
    let _guard = self.index_lock.lock().await;
    let marker = dir.join(SEALED_MARKER);
    fs::write(&marker, b"")
      .await
      .map_err(|err| PrecacheError::io("seal cache store", marker, err))
  }

  async fn is_sealed(&self, store: &str) -> PrecacheResult<bool> {
    let dir = self.store_dir(store)?;
    exists(&dir.join(SEALED_MARKER)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[tokio::test]
  async fn persists_responses_across_instances() {
    let dir = tempdir().unwrap();
    let storage = DirCacheStorage::new(dir.path().join("caches"));
    storage.open("precache-1").await.unwrap();
    storage
      .put(
        "precache-1",
        "/a.js",
        CachedResponse::ok(Some("text/javascript"), "a"),
      )
      .await
      .unwrap();
    storage.seal("precache-1").await.unwrap();

    let reopened = DirCacheStorage::new(dir.path().join("caches"));
    assert!(reopened.is_sealed("precache-1").await.unwrap());
    assert!(reopened.has("precache-1", "/a.js").await.unwrap());
    assert_eq!(
      reopened.get("precache-1", "/a.js").await.unwrap(),
      Some(CachedResponse::ok(Some("text/javascript"), "a"))
    );
  }

  #[tokio::test]
  async fn sealed_store_rejects_writes() {
    let dir = tempdir().unwrap();
    let storage = DirCacheStorage::new(dir.path());
    storage.open("precache-1").await.unwrap();
    storage.seal("precache-1").await.unwrap();

    let err = storage
      .put("precache-1", "/a.js", CachedResponse::ok(None, "a"))
      .await
      .unwrap_err();
    assert!(matches!(err, PrecacheError::Storage { .. }));
  }

  #[tokio::test]
  async fn lists_and_deletes_stores() {
    let dir = tempdir().unwrap();
    let storage = DirCacheStorage::new(dir.path().join("caches"));
    assert!(storage.keys().await.unwrap().is_empty());

    storage.open("precache-b").await.unwrap();
    storage.open("precache-a").await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["precache-a", "precache-b"]);

    assert!(storage.delete("precache-a").await.unwrap());
    assert!(!storage.delete("precache-a").await.unwrap());
    assert_eq!(storage.keys().await.unwrap(), vec!["precache-b"]);
  }

  #[tokio::test]
  async fn rejects_path_like_store_names() {
    let dir = tempdir().unwrap();
    let storage = DirCacheStorage::new(dir.path());
    assert!(storage.open("../escape").await.is_err());
    assert!(storage.open("").await.is_err());
  }
}
