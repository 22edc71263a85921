//! Polling trigger for resource file changes.

use super::ResourceReader;
use crate::component::input::sleep_or_shutdown;
use crate::manager::Manager;
use crate::shutdown::ShutdownSignal;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Watches the files tracked by a [`ResourceReader`] and re-applies any
/// whose modification time changes.
#[derive(Debug)]
pub struct ResourceWatcher {
  shutdown: ShutdownSignal,
  handle: JoinHandle<()>,
}

impl ResourceWatcher {
  /// Starts polling every `interval`. Must be called within a tokio runtime.
  pub fn spawn(reader: Arc<ResourceReader>, manager: Manager, interval: Duration) -> Self {
    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(watch(reader, manager, interval, shutdown.clone()));
    Self { shutdown, handle }
  }

  /// Stops polling and waits for an update in progress to finish.
  pub async fn stop(self) {
    self.shutdown.trigger();
    if let Err(e) = self.handle.await {
      error!(error = %e, "Resource watcher task failed");
    }
  }
}

async fn modified(path: &Path) -> Option<SystemTime> {
  tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn watch(
  reader: Arc<ResourceReader>,
  manager: Manager,
  interval: Duration,
  shutdown: ShutdownSignal,
) {
  let mut seen: HashMap<PathBuf, Option<SystemTime>> = HashMap::new();
  for path in reader.tracked_paths() {
    let mtime = modified(&path).await;
    seen.insert(path, mtime);
  }
  info!(files = seen.len(), "Watching resource files for changes");

  while sleep_or_shutdown(interval, &shutdown).await {
    for path in reader.tracked_paths() {
      let mtime = modified(&path).await;
      let previous = seen.insert(path.clone(), mtime);
      if previous == Some(mtime) || mtime.is_none() {
        continue;
      }
      debug!(path = %path.display(), "Resource file modified");
      if !reader.react_resource_update(&manager, &path).await {
        // Forget the mtime so the next poll retries from the kept snapshot.
        seen.insert(path, None);
      }
      if shutdown.is_triggered() {
        break;
      }
    }
  }
  debug!("Resource watcher stopped");
}
