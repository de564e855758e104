use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ItemError;
use crate::handle::{MultiItem, SimpleItem};
use crate::key::{ItemKey, ItemKind};
use crate::value::ItemValue;

/// Published state of one item at snapshot time.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
  pub kind: ItemKind,
  /// Values in publication order.
  pub values: Vec<ItemValue>,
  /// Producing step of each value, parallel to `values`.
  pub producers: Vec<String>,
}

/// Immutable copy of build context contents, returned to the caller.
#[derive(Debug, Clone, Default)]
pub struct ItemSnapshot {
  entries: HashMap<ItemKey, SnapshotEntry>,
}

impl ItemSnapshot {
  pub(crate) fn insert(&mut self, key: ItemKey, entry: SnapshotEntry) {
    self.entries.insert(key, entry);
  }

  /// Typed value of a simple item. `None` if absent or of another type.
  pub fn get<T: Send + Sync + 'static>(&self, item: &SimpleItem<T>) -> Option<Arc<T>> {
    self.try_get(item).ok().flatten()
  }

  /// Typed value of a simple item, reporting type mismatches.
  pub fn try_get<T: Send + Sync + 'static>(
    &self,
    item: &SimpleItem<T>,
  ) -> Result<Option<Arc<T>>, ItemError> {
    let Some(value) = self.values(item.key()).first() else {
      return Ok(None);
    };
    value
      .downcast::<T>()
      .map(Some)
      .ok_or_else(|| ItemError::TypeMismatch {
        item: item.key().clone(),
        expected: std::any::type_name::<T>(),
        actual: value.type_name(),
      })
  }

  /// Typed values of a multi item. Values of another type are skipped.
  pub fn get_multi<T: Send + Sync + 'static>(&self, item: &MultiItem<T>) -> Vec<Arc<T>> {
    self
      .values(item.key())
      .iter()
      .filter_map(|value| value.downcast::<T>())
      .collect()
  }

  /// Raw values stored for a key, empty if absent.
  pub fn values(&self, key: &ItemKey) -> &[ItemValue] {
    self
      .entries
      .get(key)
      .map(|entry| entry.values.as_slice())
      .unwrap_or(&[])
  }

  /// Producing steps for a key, parallel to [`values`](Self::values).
  pub fn producers(&self, key: &ItemKey) -> &[String] {
    self
      .entries
      .get(key)
      .map(|entry| entry.producers.as_slice())
      .unwrap_or(&[])
  }

  pub fn entry(&self, key: &ItemKey) -> Option<&SnapshotEntry> {
    self.entries.get(key)
  }

  /// Whether the snapshot holds an entry for the key.
  ///
  /// Requested multi items always have an entry, even when no step contributed.
  pub fn contains(&self, key: &ItemKey) -> bool {
    self.entries.contains_key(key)
  }

  /// Keys present in the snapshot, sorted.
  pub fn keys(&self) -> Vec<&ItemKey> {
    let mut keys: Vec<_> = self.entries.keys().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
