//! Label-addressed slots holding live components.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// One label's slot.
///
/// `store_lock` serializes stores to this label only; readers never take it.
pub(crate) struct Slot<T: ?Sized> {
  pub(crate) store_lock: Mutex<()>,
  current: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Slot<T> {
  fn new() -> Self {
    Self {
      store_lock: Mutex::new(()),
      current: RwLock::new(None),
    }
  }

  /// Current occupant.
  pub(crate) fn get(&self) -> Option<Arc<T>> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Installs `next` and returns the previous occupant.
  pub(crate) fn swap(&self, next: Arc<T>) -> Option<Arc<T>> {
    self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(next)
  }

  fn take(&self) -> Option<Arc<T>> {
    self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
  }
}

/// Slots of one category.
pub(crate) struct SlotTable<T: ?Sized> {
  slots: RwLock<HashMap<String, Arc<Slot<T>>>>,
}

impl<T: ?Sized> Default for SlotTable<T> {
  fn default() -> Self {
    Self {
      slots: RwLock::new(HashMap::new()),
    }
  }
}

impl<T: ?Sized> SlotTable<T> {
  /// The slot for `label`, created empty if absent.
  pub(crate) fn slot(&self, label: &str) -> Arc<Slot<T>> {
    if let Some(slot) = self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(label)
    {
      return Arc::clone(slot);
    }
    let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
      slots
        .entry(label.to_string())
        .or_insert_with(|| Arc::new(Slot::new())),
    )
  }

  /// Current occupant of `label`.
  pub(crate) fn get(&self, label: &str) -> Option<Arc<T>> {
    self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(label)
      .and_then(|slot| slot.get())
  }

  pub(crate) fn contains(&self, label: &str) -> bool {
    self.get(label).is_some()
  }

  /// Occupied labels, sorted.
  pub(crate) fn labels(&self) -> Vec<String> {
    let mut labels: Vec<String> = self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|(_, slot)| slot.get().is_some())
      .map(|(label, _)| label.clone())
      .collect();
    labels.sort();
    labels
  }

  /// Empties every slot, returning the occupants.
  pub(crate) fn drain(&self) -> Vec<(String, Arc<T>)> {
    let slots: Vec<(String, Arc<Slot<T>>)> = self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(label, slot)| (label.clone(), Arc::clone(slot)))
      .collect();
    slots
      .into_iter()
      .filter_map(|(label, slot)| slot.take().map(|v| (label, v)))
      .collect()
  }
}
