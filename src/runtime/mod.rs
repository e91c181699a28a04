//! Runtime cache lifecycle: install, activate, serve from and garbage-collect versioned
//! cache stores built from a precache [`Manifest`](crate::models::Manifest).
//!
//! Storage and network access sit behind the [`CacheStorage`] and [`Network`] traits so the
//! controller can run against an in-memory store in tests, a directory tree on disk, or any
//! platform cache an embedder provides.

mod clients;
mod controller;
mod disk;
mod network;
mod request;
mod storage;

pub use clients::{ClientSession, UpdateEvent};
pub use controller::{
  CacheVersionController, ControllerOptions, InstallOutcome, LifecycleState, ResponseSource,
  Served,
};
pub use disk::DirCacheStorage;
pub use network::{HttpNetwork, Network};
pub use request::{CachedResponse, FetchRequest, RequestMode};
pub use storage::{CacheStorage, MemoryCacheStorage};
