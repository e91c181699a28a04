//! Named cache stores holding responses keyed by URL.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PrecacheError, PrecacheResult};
use crate::runtime::request::CachedResponse;

/// Storage backend holding named cache stores.
///
/// A store can be written until it is sealed; sealing marks the install as complete and
/// every later `put` is rejected.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the store if it does not exist yet.
  async fn open(&self, store: &str) -> PrecacheResult<()>;

  /// Names of every existing store, sorted.
  async fn keys(&self) -> PrecacheResult<Vec<String>>;

  /// Delete a store. Returns whether it existed.
  async fn delete(&self, store: &str) -> PrecacheResult<bool>;

  /// Whether the store holds a response for `url`.
  async fn has(&self, store: &str, url: &str) -> PrecacheResult<bool>;

  /// Stored response for `url`.
  async fn get(&self, store: &str, url: &str) -> PrecacheResult<Option<CachedResponse>>;

  /// Store a response. Fails when the store is missing or sealed.
  async fn put(&self, store: &str, url: &str, response: CachedResponse) -> PrecacheResult<()>;

  /// Mark the store as complete and immutable.
  async fn seal(&self, store: &str) -> PrecacheResult<()>;

  /// Whether the store exists and was sealed.
  async fn is_sealed(&self, store: &str) -> PrecacheResult<bool>;
}

#[derive(Debug, Default)]
struct MemoryStore {
  sealed: bool,
  entries: HashMap<String, CachedResponse>,
}

/// In-process storage backend.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
  stores: RwLock<BTreeMap<String, MemoryStore>>,
}

impl MemoryCacheStorage {
  /// Empty storage.
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of responses held by a store, `None` when it does not exist.
  pub async fn len(&self, store: &str) -> Option<usize> {
    self
      .stores
      .read()
      .await
      .get(store)
      .map(|store| store.entries.len())
  }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
  async fn open(&self, store: &str) -> PrecacheResult<()> {
    self
      .stores
      .write()
      .await
      .entry(store.to_string())
      .or_default();
    Ok(())
  }

  async fn keys(&self) -> PrecacheResult<Vec<String>> {
    Ok(self.stores.read().await.keys().cloned().collect())
  }

  async fn delete(&self, store: &str) -> PrecacheResult<bool> {
    Ok(self.stores.write().await.remove(store).is_some())
  }

  async fn has(&self, store: &str, url: &str) -> PrecacheResult<bool> {
    Ok(
      self
        .stores
        .read()
        .await
        .get(store)
        .is_some_and(|store| store.entries.contains_key(url)),
    )
  }

  async fn get(&self, store: &str, url: &str) -> PrecacheResult<Option<CachedResponse>> {
    Ok(
      self
        .stores
        .read()
        .await
        .get(store)
        .and_then(|store| store.entries.get(url).cloned()),
    )
  }

  async fn put(&self, store: &str, url: &str, response: CachedResponse) -> PrecacheResult<()> {
    let mut stores = self.stores.write().await;
    let Some(target) = stores.get_mut(store) else {
      return Err(PrecacheError::storage(store, "store does not exist"));
    };
    if target.sealed {
      return Err(PrecacheError::storage(store, "store is sealed"));
    }
    target.entries.insert(url.to_string(), response);
    Ok(())
  }

  async fn seal(&self, store: &str) -> PrecacheResult<()> {
    let mut stores = self.stores.write().await;
    let Some(target) = stores.get_mut(store) else {
      return Err(PrecacheError::storage(store, "store does not exist"));
    };
    target.sealed = true;
    Ok(())
  }

  async fn is_sealed(&self, store: &str) -> PrecacheResult<bool> {
    Ok(
      self
        .stores
        .read()
        .await
        .get(store)
        .is_some_and(|store| store.sealed),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn put_requires_an_open_store() {
    let storage = MemoryCacheStorage::new();
    let err = storage
      .put("precache-1", "/a.js", CachedResponse::ok(None, "a"))
      .await
      .unwrap_err();
    assert!(matches!(err, PrecacheError::Storage { .. }));
  }

  #[tokio::test]
  async fn sealed_stores_reject_writes() {
    let storage = MemoryCacheStorage::new();
    storage.open("precache-1").await.unwrap();
    storage
      .put("precache-1", "/a.js", CachedResponse::ok(None, "a"))
      .await
      .unwrap();
    storage.seal("precache-1").await.unwrap();

    assert!(storage.is_sealed("precache-1").await.unwrap());
    assert!(
      storage
        .put("precache-1", "/a.js", CachedResponse::ok(None, "b"))
        .await
        .is_err()
    );
    assert_eq!(
      storage.get("precache-1", "/a.js").await.unwrap(),
      Some(CachedResponse::ok(None, "a"))
    );
  }

  #[tokio::test]
  async fn keys_are_sorted_and_delete_reports_existence() {
    let storage = MemoryCacheStorage::new();
    storage.open("precache-b").await.unwrap();
    storage.open("precache-a").await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["precache-a", "precache-b"]);
    assert!(storage.delete("precache-a").await.unwrap());
    assert!(!storage.delete("precache-a").await.unwrap());
    assert_eq!(storage.len("precache-b").await, Some(0));
  }
}
