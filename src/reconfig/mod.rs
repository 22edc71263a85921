//! # Reconfiguration
//!
//! Loads resource files into a [`Manager`] and re-applies them when they
//! change.
//!
//! ## Overview
//!
//! [`ResourceReader::load`] expands the configured globs at startup, reads
//! and lints every file, and applies the declared resources. It keeps one
//! [`ResourceSnapshot`] per file.
//!
//! [`ResourceReader::react_resource_update`] handles a change to one of those
//! files:
//!
//! 1. Unknown paths are skipped with a warning.
//! 2. The file is re-read with environment substitution and linted.
//! 3. In strict mode any lint rejects the update and nothing changes.
//! 4. Resources are stored in category order (rate limits, caches,
//!    processors, inputs, outputs) so that referenced resources exist
//!    before the resources referencing them. All stores share one timeout.
//! 5. The first failing store aborts the update. Resources already stored
//!    stay in place and the old snapshot is kept.
//! 6. Otherwise the snapshot is replaced.
//!
//! A resource is skipped when the config last stored for its label from
//! this file equals the new one. That record follows every successful store,
//! including those of an aborted update, so reverting a file after a partial
//! failure stores the reverted resources again.
//!
//! Labels removed from a file are left running under their last applied
//! config.
//!
//! [`ResourceWatcher`] polls modification times and calls
//! `react_resource_update` for files that changed.

mod snapshot;
mod watcher;

pub use snapshot::ResourceSnapshot;
pub use watcher::ResourceWatcher;

use crate::component::ResourceCategory;
use crate::config::reader::{ParsedResources, read_resource_file};
use crate::config::{ConfigError, EngineConfig};
use crate::context::Context;
use crate::lint::{Lint, Linter};
use crate::manager::Manager;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Reads resource files and keeps the registry in line with them.
pub struct ResourceReader {
  config: EngineConfig,
  linter: Arc<dyn Linter>,
  files: RwLock<BTreeMap<PathBuf, Arc<Mutex<FileState>>>>,
}

/// Per-file state, guarded by one lock so updates of a file are serialized.
struct FileState {
  snapshot: ResourceSnapshot,
  /// Configs stored in the registry from this file, by label.
  stored: ResourceSnapshot,
}

impl FileState {
  fn new(snapshot: ResourceSnapshot) -> Self {
    Self {
      stored: snapshot.clone(),
      snapshot,
    }
  }
}

impl std::fmt::Debug for ResourceReader {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceReader")
      .field("strict", &self.config.strict)
      .field("update_timeout", &self.config.update_timeout)
      .field("files", &self.tracked_paths())
      .finish()
  }
}

impl ResourceReader {
  /// Creates a reader. Nothing is read until [`ResourceReader::load`].
  pub fn new(config: EngineConfig, linter: Arc<dyn Linter>) -> Self {
    Self {
      config,
      linter,
      files: RwLock::new(BTreeMap::new()),
    }
  }

  /// Engine settings in use.
  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Files loaded at startup, normalized.
  pub fn tracked_paths(&self) -> Vec<PathBuf> {
    self
      .files
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect()
  }

  /// The last applied snapshot of `path`.
  pub async fn snapshot(&self, path: &Path) -> Option<ResourceSnapshot> {
    let entry = self.entry(&normalize_path(path))?;
    let state = entry.lock().await;
    Some(state.snapshot.clone())
  }

  fn entry(&self, path: &Path) -> Option<Arc<Mutex<FileState>>> {
    self
      .files
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(path)
      .cloned()
  }

  /// Expands the resource path globs into a sorted, deduplicated file list.
  pub fn expand_paths(&self) -> Result<Vec<PathBuf>, ConfigError> {
    let mut paths = Vec::new();
    for pattern in &self.config.resource_paths {
      if !pattern.contains(['*', '?', '[']) {
        paths.push(normalize_path(Path::new(pattern)));
        continue;
      }
      let entries = glob::glob(pattern).map_err(|e| ConfigError::Glob {
        pattern: pattern.clone(),
        message: e.to_string(),
      })?;
      for entry in entries {
        let path = entry.map_err(|e| ConfigError::Read {
          path: e.path().to_path_buf(),
          source: e.into_error(),
        })?;
        if path.is_file() {
          paths.push(normalize_path(&path));
        }
      }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
  }

  /// Reads every resource file and applies it to `manager`.
  ///
  /// # Errors
  ///
  /// Fails on the first unreadable file, on lint findings in strict mode,
  /// when two files declare the same label for a category, or when a
  /// resource cannot be stored.
  pub async fn load(&self, manager: &Manager) -> Result<(), ConfigError> {
    let paths = self.expand_paths()?;
    let mut snapshots = Vec::with_capacity(paths.len());
    let mut owners: HashMap<(ResourceCategory, String), PathBuf> = HashMap::new();

    for path in paths {
      let ParsedResources { config, lints } = read_resource_file(&path, self.linter.as_ref()).await?;
      self.log_lints(&path, &lints);
      if self.config.strict && !lints.is_empty() {
        error!(path = %path.display(), "Rejecting resource config due to linter errors");
        return Err(ConfigError::LintRejected {
          path,
          count: lints.len(),
        });
      }

      let snapshot = ResourceSnapshot::from_config(path.clone(), config)?;
      for (category, label) in snapshot.labels() {
        if let Some(first) = owners.insert((category, label.to_string()), path.clone()) {
          return Err(ConfigError::LabelCollision {
            category,
            label: label.to_string(),
            first,
            second: path,
          });
        }
      }
      snapshots.push(snapshot);
    }

    let ctx = Context::background().with_timeout(self.config.update_timeout);
    for category in ResourceCategory::APPLY_ORDER {
      for snapshot in &snapshots {
        for (label, conf) in snapshot.category(category) {
          manager
            .store(&ctx, category, conf)
            .await
            .map_err(|source| ConfigError::Apply {
              label: label.clone(),
              source,
            })?;
          debug!(category = %category, label = %label, "Loaded resource");
        }
      }
    }

    let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
    for snapshot in snapshots {
      info!(
        path = %snapshot.path().display(),
        resources = snapshot.len(),
        "Loaded resource file"
      );
      files.insert(
        snapshot.path().to_path_buf(),
        Arc::new(Mutex::new(FileState::new(snapshot))),
      );
    }
    Ok(())
  }

  /// Re-reads `path` and applies what changed.
  ///
  /// # Returns
  ///
  /// `false` only when storing a resource failed. Unknown paths, unreadable
  /// files and rejected lints are logged and return `true`, since retrying
  /// the same content cannot succeed.
  pub async fn react_resource_update(&self, manager: &Manager, path: &Path) -> bool {
    let path = normalize_path(path);
    let Some(entry) = self.entry(&path) else {
      warn!(path = %path.display(), "Skipping resource update for unknown path");
      return true;
    };
    let mut state = entry.lock().await;

    info!(path = %path.display(), "Resource config updated, attempting to update resources");

    let parsed = match read_resource_file(&path, self.linter.as_ref()).await {
      Ok(parsed) => parsed,
      Err(e) => {
        error!(path = %path.display(), error = %e, "Failed to read updated resources config");
        return true;
      }
    };
    self.log_lints(&path, &parsed.lints);
    if self.config.strict && !parsed.lints.is_empty() {
      error!(
        path = %path.display(),
        "Rejecting updated resource config due to linter errors, to allow linting errors disable strict mode"
      );
      return true;
    }

    let next = match ResourceSnapshot::from_config(path.clone(), parsed.config) {
      Ok(next) => next,
      Err(e) => {
        error!(path = %path.display(), error = %e, "Failed to read updated resources config");
        return true;
      }
    };

    if !apply_changes(manager, &mut state.stored, &next, &self.config).await {
      return false;
    }

    for (category, label) in state.snapshot.removed_labels(&next) {
      warn!(
        path = %path.display(),
        category = %category,
        label = %label,
        "Resource removed from file but left running"
      );
    }
    state.snapshot = next;
    true
  }

  fn log_lints(&self, path: &Path, lints: &[Lint]) {
    for lint in lints {
      info!(path = %path.display(), line = lint.line, "{}", lint.message);
    }
  }
}

async fn apply_changes(
  manager: &Manager,
  stored: &mut ResourceSnapshot,
  next: &ResourceSnapshot,
  config: &EngineConfig,
) -> bool {
  let ctx = Context::background().with_timeout(config.update_timeout);
  for category in ResourceCategory::APPLY_ORDER {
    for (label, conf) in next.category(category) {
      if stored.is_unchanged(category, conf) && manager.probe(category, label) {
        debug!(category = %category, label = %label, "Resource config unchanged");
        continue;
      }
      if let Err(e) = manager.store(&ctx, category, conf).await {
        error!(
          category = %category,
          label = %label,
          error = %e,
          "Failed to update resource {label}: {e}"
        );
        return false;
      }
      stored.record(category, conf.clone());
      info!(category = %category, label = %label, "Updated resource {label} config from file.");
    }
  }
  true
}

/// Lexically normalizes `path`, dropping `.` and resolving `..` where
/// possible.
pub fn normalize_path(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        let popped = matches!(out.components().next_back(), Some(Component::Normal(_))) && out.pop();
        if !popped && !out.has_root() {
          out.push("..");
        }
      }
      other => out.push(other.as_os_str()),
    }
  }
  if out.as_os_str().is_empty() {
    out.push(".");
  }
  out
}
