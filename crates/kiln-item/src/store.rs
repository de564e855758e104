//! The run-scoped item store.
//!
//! The set of slots is fixed when the context is created, so lookups need no
//! global lock. Each slot carries its own `RwLock`: concurrent appends to the
//! same multi item serialize, everything else proceeds in parallel.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use tracing::debug;

use crate::error::ItemError;
use crate::key::{ItemKey, ItemKind, ItemType};
use crate::snapshot::{ItemSnapshot, SnapshotEntry};
use crate::value::ItemValue;

/// A value together with the step that published it.
#[derive(Debug, Clone)]
struct Published {
  value: ItemValue,
  producer: String,
}

#[derive(Debug)]
enum Slot {
  Simple(RwLock<Option<Published>>),
  Multi(RwLock<Vec<Published>>),
}

impl Slot {
  fn kind(&self) -> ItemKind {
    match self {
      Slot::Simple(_) => ItemKind::Simple,
      Slot::Multi(_) => ItemKind::Multi,
    }
  }
}

enum SlotGuard<'a> {
  Simple(RwLockWriteGuard<'a, Option<Published>>),
  Multi(RwLockWriteGuard<'a, Vec<Published>>),
}

/// Shared store through which steps publish and read items during one run.
#[derive(Debug, Default)]
pub struct BuildContext {
  slots: HashMap<ItemKey, Slot>,
}

impl BuildContext {
  /// Create an empty context with one slot per item type.
  ///
  /// Repeated keys keep the first declared kind.
  pub fn new<'a>(item_types: impl IntoIterator<Item = &'a ItemType>) -> Self {
    let mut slots = HashMap::new();
    for item_type in item_types {
      slots
        .entry(item_type.key().clone())
        .or_insert_with(|| match item_type.kind() {
          ItemKind::Simple => Slot::Simple(RwLock::new(None)),
          ItemKind::Multi => Slot::Multi(RwLock::new(Vec::new())),
        });
    }
    Self { slots }
  }

  /// Publish one producer's values for an item.
  ///
  /// All values land under a single lock acquisition, so readers never see a
  /// partial contribution. A simple item accepts exactly one value, once per run.
  pub fn publish(
    &self,
    key: &ItemKey,
    producer: &str,
    values: Vec<ItemValue>,
  ) -> Result<(), ItemError> {
    self.publish_all(producer, vec![(key.clone(), values)])
  }

  /// Publish one producer's values for several items at once.
  ///
  /// Write locks on every affected slot are taken in key order and held until
  /// all items are written. If any simple item is already filled, or is given
  /// more than one value, nothing is published.
  pub fn publish_all(
    &self,
    producer: &str,
    mut items: Vec<(ItemKey, Vec<ItemValue>)>,
  ) -> Result<(), ItemError> {
    for (key, _) in &items {
      self.slot(key)?;
    }
    items.retain(|(_, values)| !values.is_empty());
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let mut merged: Vec<(ItemKey, Vec<ItemValue>)> = Vec::with_capacity(items.len());
    for (key, values) in items {
      match merged.last_mut() {
        Some((last, acc)) if *last == key => acc.extend(values),
        _ => merged.push((key, values)),
      }
    }

    let mut guards = Vec::with_capacity(merged.len());
    for (key, values) in &merged {
      let guard = self.write_slot(key)?;
      if let SlotGuard::Simple(slot) = &guard {
        if let Some(existing) = slot.as_ref() {
          return Err(ItemError::DuplicateProducer {
            item: key.clone(),
            existing: existing.producer.clone(),
            attempted: producer.to_string(),
          });
        }
        if values.len() > 1 {
          return Err(ItemError::DuplicateProducer {
            item: key.clone(),
            existing: producer.to_string(),
            attempted: producer.to_string(),
          });
        }
      }
      guards.push(guard);
    }

    for (guard, (key, values)) in guards.iter_mut().zip(merged) {
      let mut published = values.into_iter().map(|value| Published {
        value,
        producer: producer.to_string(),
      });
      match guard {
        SlotGuard::Simple(slot) => **slot = published.next(),
        SlotGuard::Multi(slot) => slot.extend(published),
      }
      debug!(item = %key, producer = %producer, "item_published");
    }
    Ok(())
  }

  /// All values currently stored for an item (zero or one for simple items).
  pub fn get(&self, key: &ItemKey) -> Result<Vec<ItemValue>, ItemError> {
    Ok(
      self
        .read_slot(key)?
        .into_iter()
        .map(|published| published.value)
        .collect(),
    )
  }

  /// The value of a simple item, if published.
  pub fn get_simple(&self, key: &ItemKey) -> Result<Option<ItemValue>, ItemError> {
    match self.slot(key)? {
      Slot::Simple(lock) => {
        let guard = lock.read().map_err(|_| ItemError::LockPoisoned {
          item: key.clone(),
        })?;
        Ok(guard.as_ref().map(|published| published.value.clone()))
      }
      Slot::Multi(_) => Err(ItemError::KindMismatch {
        item: key.clone(),
        expected: ItemKind::Simple,
        actual: ItemKind::Multi,
      }),
    }
  }

  /// The accumulated values of a multi item, in publication order.
  pub fn get_multi(&self, key: &ItemKey) -> Result<Vec<ItemValue>, ItemError> {
    match self.slot(key)? {
      Slot::Multi(_) => self.get(key),
      Slot::Simple(_) => Err(ItemError::KindMismatch {
        item: key.clone(),
        expected: ItemKind::Multi,
        actual: ItemKind::Simple,
      }),
    }
  }

  /// Whether at least one value has been published for the item.
  pub fn contains(&self, key: &ItemKey) -> bool {
    self
      .read_slot(key)
      .map(|values| !values.is_empty())
      .unwrap_or(false)
  }

  /// Declared kind of the item, if the context knows it.
  pub fn kind(&self, key: &ItemKey) -> Option<ItemKind> {
    self.slots.get(key).map(Slot::kind)
  }

  /// Keys of every slot in this context.
  pub fn keys(&self) -> impl Iterator<Item = &ItemKey> {
    self.slots.keys()
  }

  /// Copy the published state of every item.
  pub fn snapshot(&self) -> Result<ItemSnapshot, ItemError> {
    self.snapshot_of(self.slots.keys())
  }

  /// Copy the published state of the given items.
  ///
  /// Simple items without a value are left out; multi items are always present,
  /// possibly empty.
  pub fn snapshot_of<'a>(
    &self,
    keys: impl IntoIterator<Item = &'a ItemKey>,
  ) -> Result<ItemSnapshot, ItemError> {
    let mut snapshot = ItemSnapshot::default();
    for key in keys {
      let kind = self.slot(key)?.kind();
      let published = self.read_slot(key)?;
      if kind == ItemKind::Simple && published.is_empty() {
        continue;
      }
      let (values, producers) = published
        .into_iter()
        .map(|p| (p.value, p.producer))
        .unzip();
      snapshot.insert(
        key.clone(),
        SnapshotEntry {
          kind,
          values,
          producers,
        },
      );
    }
    Ok(snapshot)
  }

  fn slot(&self, key: &ItemKey) -> Result<&Slot, ItemError> {
    self
      .slots
      .get(key)
      .ok_or_else(|| ItemError::UnknownItem(key.clone()))
  }

  fn write_slot(&self, key: &ItemKey) -> Result<SlotGuard<'_>, ItemError> {
    let guard = match self.slot(key)? {
      Slot::Simple(lock) => lock.write().map(SlotGuard::Simple).ok(),
      Slot::Multi(lock) => lock.write().map(SlotGuard::Multi).ok(),
    };
    guard.ok_or_else(|| ItemError::LockPoisoned { item: key.clone() })
  }

  fn read_slot(&self, key: &ItemKey) -> Result<Vec<Published>, ItemError> {
    match self.slot(key)? {
      Slot::Simple(lock) => {
        let guard = lock.read().map_err(|_| ItemError::LockPoisoned {
          item: key.clone(),
        })?;
        Ok(guard.iter().cloned().collect())
      }
      Slot::Multi(lock) => {
        let guard = lock.read().map_err(|_| ItemError::LockPoisoned {
          item: key.clone(),
        })?;
        Ok(guard.clone())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::thread;

  use super::*;

  fn context() -> (BuildContext, ItemType, ItemType) {
    let config = ItemType::simple(ItemKey::new("Config"));
    let routes = ItemType::multi(ItemKey::new("Route"));
    let ctx = BuildContext::new([&config, &routes]);
    (ctx, config, routes)
  }

  #[test]
  fn test_simple_item_is_write_once() {
    let (ctx, config, _) = context();

    ctx
      .publish(config.key(), "load-config", vec![ItemValue::new(1u32)])
      .unwrap();
    let err = ctx
      .publish(config.key(), "other", vec![ItemValue::new(2u32)])
      .unwrap_err();

    match err {
      ItemError::DuplicateProducer {
        item,
        existing,
        attempted,
      } => {
        assert_eq!(item, *config.key());
        assert_eq!(existing, "load-config");
        assert_eq!(attempted, "other");
      }
      other => panic!("unexpected error: {other:?}"),
    }

    let value = ctx.get_simple(config.key()).unwrap().unwrap();
    assert_eq!(*value.downcast::<u32>().unwrap(), 1);
  }

  #[test]
  fn test_multi_item_appends_in_publication_order() {
    let (ctx, _, routes) = context();

    ctx
      .publish(
        routes.key(),
        "a",
        vec![ItemValue::new("/a1"), ItemValue::new("/a2")],
      )
      .unwrap();
    ctx
      .publish(routes.key(), "b", vec![ItemValue::new("/b")])
      .unwrap();

    let values: Vec<&str> = ctx
      .get_multi(routes.key())
      .unwrap()
      .iter()
      .map(|v| *v.downcast::<&str>().unwrap())
      .collect();
    assert_eq!(values, vec!["/a1", "/a2", "/b"]);
  }

  #[test]
  fn test_kind_mismatch_and_unknown_item() {
    let (ctx, config, routes) = context();

    assert!(matches!(
      ctx.get_multi(config.key()),
      Err(ItemError::KindMismatch { .. })
    ));
    assert!(matches!(
      ctx.get_simple(routes.key()),
      Err(ItemError::KindMismatch { .. })
    ));
    assert!(matches!(
      ctx.get(&ItemKey::new("Missing")),
      Err(ItemError::UnknownItem(_))
    ));
  }

  #[test]
  fn test_empty_publish_is_noop() {
    let (ctx, config, _) = context();

    ctx.publish(config.key(), "weak-step", Vec::new()).unwrap();
    assert!(!ctx.contains(config.key()));
  }

  #[test]
  fn test_concurrent_multi_contributions_are_not_interleaved() {
    let (ctx, _, routes) = context();
    let ctx = Arc::new(ctx);

    let handles: Vec<_> = (0..8)
      .map(|i| {
        let ctx = ctx.clone();
        let key = routes.key().clone();
        thread::spawn(move || {
          let values = (0..50).map(|j| ItemValue::new((i, j))).collect();
          ctx.publish(&key, &format!("step-{i}"), values).unwrap();
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let values = ctx.get_multi(routes.key()).unwrap();
    assert_eq!(values.len(), 400);
    // Each producer's block is contiguous.
    for chunk in values.chunks(50) {
      let first = chunk[0].downcast::<(i32, i32)>().unwrap().0;
      assert!(
        chunk
          .iter()
          .all(|v| v.downcast::<(i32, i32)>().unwrap().0 == first)
      );
    }
  }

  #[test]
  fn test_publish_all_is_all_or_nothing() {
    let (ctx, config, routes) = context();
    ctx
      .publish(config.key(), "load-config", vec![ItemValue::new(1u32)])
      .unwrap();

    let err = ctx
      .publish_all(
        "render",
        vec![
          (routes.key().clone(), vec![ItemValue::new("/index")]),
          (config.key().clone(), vec![ItemValue::new(2u32)]),
        ],
      )
      .unwrap_err();

    assert!(matches!(err, ItemError::DuplicateProducer { .. }));
    assert!(ctx.get_multi(routes.key()).unwrap().is_empty());
    let value = ctx.get_simple(config.key()).unwrap().unwrap();
    assert_eq!(*value.downcast::<u32>().unwrap(), 1);
  }

  #[test]
  fn test_publish_all_writes_every_item() {
    let (ctx, config, routes) = context();

    ctx
      .publish_all(
        "render",
        vec![
          (routes.key().clone(), vec![ItemValue::new("/a")]),
          (config.key().clone(), vec![ItemValue::new(3u32)]),
          (routes.key().clone(), vec![ItemValue::new("/b")]),
        ],
      )
      .unwrap();

    let routes: Vec<&str> = ctx
      .get_multi(routes.key())
      .unwrap()
      .iter()
      .map(|v| *v.downcast::<&str>().unwrap())
      .collect();
    assert_eq!(routes, ["/a", "/b"]);
    assert!(ctx.contains(config.key()));
  }

  #[test]
  fn test_snapshot_skips_absent_simple_items() {
    let (ctx, config, routes) = context();

    let snapshot = ctx.snapshot().unwrap();
    assert!(!snapshot.contains(config.key()));
    assert!(snapshot.contains(routes.key()));
    assert!(snapshot.values(routes.key()).is_empty());
  }
}
