//! A step body's view of the build context.
//!
//! Reads go straight to the shared [`BuildContext`]; the scheduler only starts a
//! step once every producer it depends on has committed. Writes are buffered
//! here and published by [`StepContext::commit`] after the body succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kiln_item::{
  AsItemType, BuildContext, ItemError, ItemKey, ItemKind, ItemType, ItemValue, MultiItem,
  SimpleItem,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ContextError;
use crate::step::{ConsumeMode, ProduceMode, Step};

/// Execution context handed to a step body.
pub struct StepContext {
  step: Arc<Step>,
  store: Arc<BuildContext>,
  cancel: CancellationToken,
  /// Simple items this step produces but another producer overrides.
  overridden: HashSet<ItemKey>,
  /// Buffered output, in order of first write.
  pending: Vec<(ItemKey, Vec<ItemValue>)>,
  pending_index: HashMap<ItemKey, usize>,
}

impl StepContext {
  pub fn new(step: Arc<Step>, store: Arc<BuildContext>, cancel: CancellationToken) -> Self {
    Self {
      step,
      store,
      cancel,
      overridden: HashSet::new(),
      pending: Vec::new(),
      pending_index: HashMap::new(),
    }
  }

  /// Mark produced items whose output must be discarded because a
  /// non-overridable producer supplies them.
  pub fn with_overridden(mut self, items: impl IntoIterator<Item = ItemKey>) -> Self {
    self.overridden.extend(items);
    self
  }

  pub fn step_id(&self) -> &str {
    self.step.id()
  }

  /// True once the run is cancelled or aborting because another step failed.
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Read a required simple item.
  pub fn consume<T: Send + Sync + 'static>(
    &self,
    item: &SimpleItem<T>,
  ) -> Result<Arc<T>, ContextError> {
    self
      .consume_optional(item)?
      .ok_or_else(|| ContextError::MissingItem {
        step: self.step_id().to_string(),
        item: item.key().clone(),
      })
  }

  /// Read a simple item that may be absent.
  pub fn consume_optional<T: Send + Sync + 'static>(
    &self,
    item: &SimpleItem<T>,
  ) -> Result<Option<Arc<T>>, ContextError> {
    self.check_readable(item.item_type())?;
    match self.store.get_simple(item.key())? {
      Some(value) => downcast(item.key(), &value).map(Some),
      None => Ok(None),
    }
  }

  /// Read every instance of a multi item, in producer completion order.
  pub fn consume_multi<T: Send + Sync + 'static>(
    &self,
    item: &MultiItem<T>,
  ) -> Result<Vec<Arc<T>>, ContextError> {
    self.check_readable(item.item_type())?;
    self
      .store
      .get_multi(item.key())?
      .iter()
      .map(|value| downcast(item.key(), value))
      .collect()
  }

  /// Untyped read of all stored values of a consumed item.
  pub fn consume_values(&self, item: &impl AsItemType) -> Result<Vec<ItemValue>, ContextError> {
    let item_type = item.as_item_type();
    self.check_readable(item_type)?;
    Ok(self.store.get(item_type.key())?)
  }

  /// Emit the value of a simple item.
  pub fn produce<T: Send + Sync + 'static>(
    &mut self,
    item: &SimpleItem<T>,
    value: T,
  ) -> Result<(), ContextError> {
    self.produce_value(item, ItemValue::new(value))
  }

  /// Contribute one instance to a multi item.
  pub fn produce_multi<T: Send + Sync + 'static>(
    &mut self,
    item: &MultiItem<T>,
    value: T,
  ) -> Result<(), ContextError> {
    self.produce_value(item, ItemValue::new(value))
  }

  /// Contribute several instances to a multi item.
  pub fn produce_all<T: Send + Sync + 'static>(
    &mut self,
    item: &MultiItem<T>,
    values: impl IntoIterator<Item = T>,
  ) -> Result<(), ContextError> {
    for value in values {
      self.produce_value(item, ItemValue::new(value))?;
    }
    Ok(())
  }

  /// Untyped write of a produced item.
  pub fn produce_value(
    &mut self,
    item: &impl AsItemType,
    value: ItemValue,
  ) -> Result<(), ContextError> {
    let item_type = item.as_item_type();
    let declared = self.step.produce_of(item_type.key()).ok_or_else(|| {
      ContextError::UndeclaredProduce {
        step: self.step_id().to_string(),
        item: item_type.key().clone(),
      }
    })?;
    check_kind(item_type.key(), declared.item.kind(), item_type.kind())?;

    let key = item_type.key().clone();
    match self.pending_index.get(&key) {
      Some(&index) => {
        if declared.item.kind() == ItemKind::Simple {
          return Err(
            ItemError::DuplicateProducer {
              item: key,
              existing: self.step_id().to_string(),
              attempted: self.step_id().to_string(),
            }
            .into(),
          );
        }
        self.pending[index].1.push(value);
      }
      None => {
        self.pending_index.insert(key.clone(), self.pending.len());
        self.pending.push((key, vec![value]));
      }
    }
    Ok(())
  }

  /// Whether the body has already emitted the item.
  pub fn has_produced(&self, key: &ItemKey) -> bool {
    self.pending_index.contains_key(key)
  }

  /// Publish buffered output to the build context.
  ///
  /// Output is published all at once: if the step did not emit a simple item it
  /// declared as always produced, or the build context rejects any item,
  /// nothing is published. Output for overridden items is dropped.
  /// Returns the keys that were published.
  pub fn commit(self) -> Result<Vec<ItemKey>, ContextError> {
    for produce in self.step.produces() {
      let key = produce.item.key();
      if produce.mode == ProduceMode::Always
        && produce.item.kind() == ItemKind::Simple
        && !self.overridden.contains(key)
        && !self.pending_index.contains_key(key)
      {
        return Err(ContextError::MissingOutput {
          step: self.step_id().to_string(),
          item: key.clone(),
        });
      }
    }

    let mut output = Vec::with_capacity(self.pending.len());
    for (key, values) in self.pending {
      if self.overridden.contains(&key) {
        debug!(step_id = %self.step.id(), item = %key, "discarding overridden output");
        continue;
      }
      output.push((key, values));
    }

    let published = output.iter().map(|(key, _)| key.clone()).collect();
    self.store.publish_all(self.step.id(), output)?;
    Ok(published)
  }

  fn check_readable(&self, item_type: &ItemType) -> Result<(), ContextError> {
    let declared = self.step.consume_of(item_type.key()).ok_or_else(|| {
      ContextError::UndeclaredConsume {
        step: self.step_id().to_string(),
        item: item_type.key().clone(),
      }
    })?;
    if declared.mode == ConsumeMode::OrderingOnly {
      return Err(ContextError::OrderingOnly {
        step: self.step_id().to_string(),
        item: item_type.key().clone(),
      });
    }
    check_kind(item_type.key(), declared.item.kind(), item_type.kind())
  }
}

fn check_kind(key: &ItemKey, declared: ItemKind, requested: ItemKind) -> Result<(), ContextError> {
  if declared != requested {
    return Err(
      ItemError::KindMismatch {
        item: key.clone(),
        expected: declared,
        actual: requested,
      }
      .into(),
    );
  }
  Ok(())
}

fn downcast<T: Send + Sync + 'static>(
  key: &ItemKey,
  value: &ItemValue,
) -> Result<Arc<T>, ContextError> {
  value.downcast::<T>().ok_or_else(|| {
    ItemError::TypeMismatch {
      item: key.clone(),
      expected: std::any::type_name::<T>(),
      actual: value.type_name(),
    }
    .into()
  })
}
