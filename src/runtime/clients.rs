//! Connected page sessions and the update notification delivered to them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Sent to connected sessions when a new version finished installing and waits to activate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
  /// Version currently serving traffic.
  pub previous_version: String,
  /// Installed version waiting for the next lifecycle boundary.
  pub new_version: String,
}

/// A page session connected to the controller.
///
/// The session counts as open until dropped. While any session is open a waiting version is
/// only promoted through an explicit handoff.
#[derive(Debug)]
pub struct ClientSession {
  updates: broadcast::Receiver<UpdateEvent>,
  open_sessions: Arc<AtomicUsize>,
}

impl ClientSession {
  pub(crate) fn new(
    updates: broadcast::Receiver<UpdateEvent>,
    open_sessions: Arc<AtomicUsize>,
  ) -> Self {
    open_sessions.fetch_add(1, Ordering::SeqCst);
    Self {
      updates,
      open_sessions,
    }
  }

  /// Wait for the next update notification. Returns `None` once the controller is gone.
  pub async fn next_update(&mut self) -> Option<UpdateEvent> {
    loop {
      match self.updates.recv().await {
        Ok(event) => return Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "session lagged behind update notifications");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Take an already delivered notification without waiting.
  pub fn try_next_update(&mut self) -> Option<UpdateEvent> {
    loop {
      match self.updates.try_recv() {
        Ok(event) => return Some(event),
        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
        Err(_) => return None,
      }
    }
  }
}

impl Drop for ClientSession {
  fn drop(&mut self) {
    self.open_sessions.fetch_sub(1, Ordering::SeqCst);
  }
}
