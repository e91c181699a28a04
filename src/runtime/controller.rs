//! Cache version state machine: install, activate, intercept fetches, collect garbage.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::try_join_all;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{PrecacheError, PrecacheResult};
use crate::models::Manifest;
use crate::runtime::clients::{ClientSession, UpdateEvent};
use crate::runtime::network::Network;
use crate::runtime::request::{CachedResponse, FetchRequest};
use crate::runtime::storage::CacheStorage;

const UPDATE_CHANNEL_CAPACITY: usize = 16;
const REVALIDATED_SUFFIX: &str = "-revalidated";

/// Lifecycle of one cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Responses are being fetched into the store.
  Installing,
  /// Installed and sealed, waiting for a lifecycle boundary.
  Waiting,
  /// Superseded stores are being deleted.
  Activating,
  /// Serving fetch traffic.
  Active,
  /// Superseded by a newer active version.
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Tunables for a controller instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
  /// Prefix of every store owned by the controller.
  pub cache_prefix: String,
  /// Origin the controller serves, used to map absolute request URLs onto manifest paths.
  pub origin: Option<String>,
  /// Refresh cache hits in the background for the next load.
  pub revalidate: bool,
}

impl Default for ControllerOptions {
  fn default() -> Self {
    Self {
      cache_prefix: "precache".into(),
      origin: None,
      revalidate: false,
    }
  }
}

/// Result of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
  /// No version was active, so the new one was activated right away.
  Activated {
    /// Installed version.
    version: String,
  },
  /// Another version is serving; the new one waits for the next lifecycle boundary.
  Waiting {
    /// Version currently serving.
    previous_version: String,
    /// Installed version.
    version: String,
  },
  /// The manifest version is already active or waiting.
  Unchanged {
    /// Manifest version.
    version: String,
  },
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// The active cache version.
  Cache,
  /// The network, uncached.
  Network,
  /// The offline fallback page.
  Fallback,
}

/// Response returned by [`CacheVersionController::handle_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  /// Response to hand back to the page.
  pub response: CachedResponse,
  /// Origin of the response.
  pub source: ResponseSource,
}

#[derive(Debug, Default)]
struct ControllerState {
  active: Option<Arc<Manifest>>,
  waiting: Option<Arc<Manifest>>,
  installing: Option<(String, u64)>,
  generation: u64,
  lifecycle: BTreeMap<String, LifecycleState>,
  activating: Option<String>,
  revalidations: BTreeMap<String, JoinSet<()>>,
}

/// Runtime controller owning versioned cache stores for one origin.
///
/// At most one version serves traffic. Sealed stores are never written, so fetch handling
/// reads them without coordinating with installs.
pub struct CacheVersionController<S, N> {
  storage: Arc<S>,
  network: Arc<N>,
  options: ControllerOptions,
  state: Mutex<ControllerState>,
  updates: broadcast::Sender<UpdateEvent>,
  open_sessions: Arc<AtomicUsize>,
}

impl<S, N> CacheVersionController<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  /// Controller over `storage`, populating it through `network`.
  pub fn new(storage: Arc<S>, network: Arc<N>, options: ControllerOptions) -> Self {
    let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
    Self {
      storage,
      network,
      options,
      state: Mutex::new(ControllerState::default()),
      updates,
      open_sessions: Arc::new(AtomicUsize::new(0)),
    }
  }

  fn state(&self) -> MutexGuard<'_, ControllerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn cache_name(&self, version: &str) -> String {
    format!("{}-{version}", self.options.cache_prefix)
  }

  fn revalidated_name(&self, version: &str) -> String {
    format!("{}{REVALIDATED_SUFFIX}", self.cache_name(version))
  }

  /// Version currently serving traffic.
  pub fn active_version(&self) -> Option<String> {
    self
      .state()
      .active
      .as_ref()
      .map(|manifest| manifest.version.clone())
  }

  /// Installed version waiting for activation.
  pub fn waiting_version(&self) -> Option<String> {
    self
      .state()
      .waiting
      .as_ref()
      .map(|manifest| manifest.version.clone())
  }

  /// Lifecycle state of a version this controller has seen.
  pub fn state_of(&self, version: &str) -> Option<LifecycleState> {
    self.state().lifecycle.get(version).copied()
  }

  /// Number of connected sessions.
  pub fn open_sessions(&self) -> usize {
    self.open_sessions.load(Ordering::SeqCst)
  }

  /// Connect a page session that receives update notifications.
  pub fn connect(&self) -> ClientSession {
    ClientSession::new(self.updates.subscribe(), Arc::clone(&self.open_sessions))
  }

  /// Install `manifest` into a store named after its version.
  ///
  /// Missing entries are fetched concurrently; the first failure aborts the install and the
  /// store is neither sealed nor promoted. A later install call supersedes this one.
  pub async fn install(&self, manifest: Manifest) -> PrecacheResult<InstallOutcome> {
    let manifest = Arc::new(manifest);
    let version = manifest.version.clone();
    let cache_name = self.cache_name(&version);

    let generation = {
      let mut state = self.state();
      let current = |slot: &Option<Arc<Manifest>>| {
        slot
          .as_ref()
          .is_some_and(|manifest| manifest.version == version)
      };
      if current(&state.active) || current(&state.waiting) {
        debug!(%version, "cache version already installed");
        return Ok(InstallOutcome::Unchanged { version });
      }

      state.generation += 1;
      let generation = state.generation;
      if let Some((previous, _)) = state.installing.replace((version.clone(), generation)) {
        if previous != version {
          info!(%previous, %version, "superseding in-flight install");
          state.lifecycle.remove(&previous);
        }
      }
      state
        .lifecycle
        .insert(version.clone(), LifecycleState::Installing);
      generation
    };

    info!(%version, entries = manifest.entries.len(), "installing cache version");
    if let Err(err) = self.populate(&manifest, &cache_name).await {
      superseded(&self.state(), &version, generation)?;
      warn!(%version, error = %err, "install failed, keeping the current version");
      self.abandon_install(&version, generation);
      return Err(err);
    }

    superseded(&self.state(), &version, generation)?;
    if let Err(err) = self.storage.seal(&cache_name).await {
      self.abandon_install(&version, generation);
      return Err(err);
    }

    let (previous_version, activate_now) = {
      let mut state = self.state();
      superseded(&state, &version, generation)?;

      state.installing = None;
      if let Some(displaced) = state.waiting.replace(Arc::clone(&manifest)) {
        info!(displaced = %displaced.version, %version, "waiting version replaced");
        state
          .lifecycle
          .insert(displaced.version.clone(), LifecycleState::Redundant);
      }
      state.lifecycle.insert(version.clone(), LifecycleState::Waiting);
      let previous = state
        .active
        .as_ref()
        .map(|manifest| manifest.version.clone());
      let activate_now = previous.is_none();
      (previous, activate_now)
    };

    if activate_now {
      self.activate(&version).await?;
      return Ok(InstallOutcome::Activated { version });
    }

    let previous_version = previous_version.unwrap_or_default();
    info!(previous = %previous_version, %version, "cache version installed and waiting");
    let event = UpdateEvent {
      previous_version: previous_version.clone(),
      new_version: version.clone(),
    };
    if self.updates.send(event).is_err() {
      debug!("no connected sessions to notify");
    }
    Ok(InstallOutcome::Waiting {
      previous_version,
      version,
    })
  }

  async fn populate(&self, manifest: &Manifest, cache_name: &str) -> PrecacheResult<()> {
    self.storage.open(cache_name).await?;
    if self.storage.is_sealed(cache_name).await? {
      debug!(store = cache_name, "store already complete, nothing to fetch");
      return Ok(());
    }

    let storage = self.storage.as_ref();
    let network = self.network.as_ref();
    let fetches = manifest.entries.iter().map(|entry| async move {
      if storage.has(cache_name, &entry.url).await? {
        return Ok(());
      }
      let response = network.fetch(&entry.url).await?;
      if !response.is_success() {
        return Err(PrecacheError::fetch(
          &entry.url,
          format!("unexpected status {}", response.status),
        ));
      }
      storage.put(cache_name, &entry.url, response).await
    });
    try_join_all(fetches).await?;
    Ok(())
  }

  fn abandon_install(&self, version: &str, generation: u64) {
    let mut state = self.state();
    if state
      .installing
      .as_ref()
      .is_some_and(|(_, current)| *current == generation)
    {
      state.installing = None;
      state.lifecycle.remove(version);
    }
  }

  /// Promote an installed version and delete every other store owned by the controller.
  ///
  /// Activating a version whose install never completed is an
  /// [`PrecacheError::ActivationConflict`]; the active version keeps serving.
  pub async fn activate(&self, version: &str) -> PrecacheResult<()> {
    let cache_name = self.cache_name(version);

    let manifest = {
      let state = self.state();
      if state
        .active
        .as_ref()
        .is_some_and(|manifest| manifest.version == version)
      {
        return Ok(());
      }
      state
        .waiting
        .as_ref()
        .filter(|manifest| manifest.version == version)
        .cloned()
    };

    let sealed = self.storage.is_sealed(&cache_name).await?;
    let Some(manifest) = manifest.filter(|_| sealed) else {
      let active = self.active_version();
      error!(%version, ?active, "activation attempted on incomplete install");
      return Err(PrecacheError::ActivationConflict {
        version: version.to_string(),
      });
    };

    let (in_flight, retired) = {
      let mut state = self.state();
      state
        .lifecycle
        .insert(version.to_string(), LifecycleState::Activating);
      state.activating = Some(version.to_string());
      let kept = state.revalidations.remove(version);
      let retired = std::mem::take(&mut state.revalidations);
      if let Some(kept) = kept {
        state.revalidations.insert(version.to_string(), kept);
      }
      let in_flight = state
        .installing
        .as_ref()
        .map(|(installing, _)| self.cache_name(installing));
      (in_flight, retired)
    };

    for (retired_version, mut tasks) in retired {
      tasks.abort_all();
      while tasks.join_next().await.is_some() {}
      debug!(version = %retired_version, "stopped revalidations of retired version");
    }

    let collected = self.collect_garbage(&cache_name, version, in_flight).await;
    let mut state = self.state();
    state.activating = None;
    if let Err(err) = collected {
      state
        .lifecycle
        .insert(version.to_string(), LifecycleState::Waiting);
      return Err(err);
    }

    if state
      .waiting
      .as_ref()
      .is_some_and(|waiting| waiting.version == version)
    {
      state.waiting = None;
    }
    if let Some(previous) = state.active.replace(manifest) {
      state
        .lifecycle
        .insert(previous.version.clone(), LifecycleState::Redundant);
    }
    state
      .lifecycle
      .insert(version.to_string(), LifecycleState::Active);
    info!(%version, "cache version active");
    Ok(())
  }

  async fn collect_garbage(
    &self,
    cache_name: &str,
    version: &str,
    in_flight: Option<String>,
  ) -> PrecacheResult<()> {
    let keep = [cache_name.to_string(), self.revalidated_name(version)];
    let owned_prefix = format!("{}-", self.options.cache_prefix);
    for store in self.storage.keys().await? {
      if !store.starts_with(&owned_prefix)
        || keep.contains(&store)
        || in_flight.as_ref() == Some(&store)
      {
        continue;
      }
      if self.storage.delete(&store).await? {
        debug!(%store, "deleted superseded cache store");
      }
    }
    Ok(())
  }

  /// Explicit client-driven handoff: activate the waiting version now.
  ///
  /// Returns whether a version was activated.
  pub async fn skip_waiting(&self) -> PrecacheResult<bool> {
    let Some(version) = self.waiting_version() else {
      return Ok(false);
    };
    self.activate(&version).await?;
    Ok(true)
  }

  /// Serve an intercepted request.
  ///
  /// Manifest URLs are served cache-first from the active version. Navigations that miss
  /// the cache and cannot reach the network get the offline fallback page. Everything else
  /// passes through to the network uncached.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> PrecacheResult<Served> {
    if request.is_navigation() && self.open_sessions() == 0 {
      self.promote_on_new_load().await;
    }

    let active = self.state().active.clone();
    let lookup_url = self.lookup_url(&request.url);

    if let Some(manifest) = active.as_deref() {
      if manifest.entry(&lookup_url).is_some() {
        if let Some(response) = self.cached(manifest, &lookup_url).await? {
          if self.options.revalidate {
            self.spawn_revalidation(&manifest.version, &lookup_url);
          }
          return Ok(Served {
            response,
            source: ResponseSource::Cache,
          });
        }
        warn!(url = %lookup_url, "manifest entry missing from active store");
      }
    }

    match self.network.fetch(&request.url).await {
      Ok(response) => Ok(Served {
        response,
        source: ResponseSource::Network,
      }),
      Err(err) if request.is_navigation() => match self.fallback(active.as_deref()).await? {
        Some(response) => {
          debug!(url = %request.url, "network unavailable, serving offline page");
          Ok(Served {
            response,
            source: ResponseSource::Fallback,
          })
        }
        None => Err(err),
      },
      Err(err) => Err(err),
    }
  }

  async fn promote_on_new_load(&self) {
    let Some(version) = self.waiting_version() else {
      return;
    };
    if let Err(err) = self.activate(&version).await {
      warn!(%version, error = %err, "could not activate waiting version on new load");
    }
  }

  async fn cached(&self, manifest: &Manifest, url: &str) -> PrecacheResult<Option<CachedResponse>> {
    if self.options.revalidate {
      let refreshed = self
        .storage
        .get(&self.revalidated_name(&manifest.version), url)
        .await?;
      if refreshed.is_some() {
        return Ok(refreshed);
      }
    }
    self
      .storage
      .get(&manifest.cache_name(&self.options.cache_prefix), url)
      .await
  }

  async fn fallback(&self, active: Option<&Manifest>) -> PrecacheResult<Option<CachedResponse>> {
    let Some(manifest) = active else {
      return Ok(None);
    };
    let Some(fallback_url) = manifest.navigate_fallback_url.as_deref() else {
      return Ok(None);
    };
    let response = self
      .storage
      .get(&manifest.cache_name(&self.options.cache_prefix), fallback_url)
      .await?;
    Ok(response.map(|mut response| {
      response.status = 200;
      response
    }))
  }

  fn spawn_revalidation(&self, version: &str, url: &str) {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let store = self.revalidated_name(version);
    let url = url.to_string();

    let mut state = self.state();
    let serving = state
      .active
      .as_ref()
      .is_some_and(|active| active.version == version);
    let retiring = state
      .activating
      .as_ref()
      .is_some_and(|activating| activating != version);
    if !serving || retiring {
      debug!(%url, %version, "version is being retired, skipping revalidation");
      return;
    }
    let tasks = state.revalidations.entry(version.to_string()).or_default();
    while tasks.try_join_next().is_some() {}
    tasks.spawn(async move {
      let refreshed = match network.fetch(&url).await {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
          debug!(%url, status = response.status, "revalidation returned an error status");
          return;
        }
        Err(err) => {
          debug!(%url, error = %err, "revalidation failed");
          return;
        }
      };
      let stored = async {
        storage.open(&store).await?;
        storage.put(&store, &url, refreshed).await
      };
      if let Err(err) = stored.await {
        warn!(%url, error = %err, "could not store revalidated response");
      }
    });
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    let pending = std::mem::take(&mut self.state().revalidations);
    for (_, mut tasks) in pending {
      while tasks.join_next().await.is_some() {}
    }
  }

  /// Number of background revalidations not yet joined.
  pub fn pending_revalidations(&self) -> usize {
    self
      .state()
      .revalidations
      .values()
      .map(JoinSet::len)
      .sum()
  }

  fn lookup_url(&self, url: &str) -> String {
    let Some(origin) = self.options.origin.as_deref() else {
      return url.to_string();
    };
    let origin = origin.trim_end_matches('/');
    match url.strip_prefix(origin) {
      Some("") => "/".to_string(),
      Some(rest) if rest.starts_with(['/', '?', '#']) => {
        if rest.starts_with('/') {
          rest.to_string()
        } else {
          format!("/{rest}")
        }
      }
      _ => url.to_string(),
    }
  }
}

fn superseded(state: &ControllerState, version: &str, generation: u64) -> PrecacheResult<()> {
  match &state.installing {
    Some((_, current)) if *current == generation => Ok(()),
    Some((newer, _)) => Err(PrecacheError::InstallSuperseded {
      version: version.to_string(),
      superseded_by: newer.clone(),
    }),
    None => Err(PrecacheError::InstallSuperseded {
      version: version.to_string(),
      superseded_by: state
        .waiting
        .as_ref()
        .or(state.active.as_ref())
        .map_or_else(|| version.to_string(), |manifest| manifest.version.clone()),
    }),
  }
}
