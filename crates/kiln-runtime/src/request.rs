use std::collections::HashMap;

use kiln_item::{AsItemType, ItemKey, ItemValue, MultiItem, SimpleItem};

/// What a run should produce, and the initial items it starts from.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
  requested: Vec<ItemKey>,
  initial: HashMap<ItemKey, Vec<ItemValue>>,
  include_full_context: Option<bool>,
}

impl BuildRequest {
  pub fn new() -> Self {
    Self::default()
  }

  /// Ask for an item. Only producers of requested items (and final steps) and
  /// their inputs are executed.
  pub fn request(self, item: &impl AsItemType) -> Self {
    self.request_key(item.as_item_type().key().clone())
  }

  pub fn request_key(mut self, key: ItemKey) -> Self {
    if !self.requested.contains(&key) {
      self.requested.push(key);
    }
    self
  }

  /// Supply the value of an initial simple item.
  pub fn initial<T: Send + Sync + 'static>(self, item: &SimpleItem<T>, value: T) -> Self {
    self.initial_value(item.key().clone(), ItemValue::new(value))
  }

  /// Supply the instances of an initial multi item.
  pub fn initial_multi<T: Send + Sync + 'static>(
    mut self,
    item: &MultiItem<T>,
    values: impl IntoIterator<Item = T>,
  ) -> Self {
    self
      .initial
      .insert(item.key().clone(), values.into_iter().map(ItemValue::new).collect());
    self
  }

  /// Untyped form of [`BuildRequest::initial`]. Replaces any earlier value.
  pub fn initial_value(mut self, key: ItemKey, value: ItemValue) -> Self {
    self.initial.insert(key, vec![value]);
    self
  }

  /// Untyped form of [`BuildRequest::initial_multi`].
  pub fn initial_instances(
    mut self,
    key: ItemKey,
    values: impl IntoIterator<Item = ItemValue>,
  ) -> Self {
    self.initial.insert(key, values.into_iter().collect());
    self
  }

  /// Override the engine setting for returning the full build context.
  pub fn include_full_context(mut self, include: bool) -> Self {
    self.include_full_context = Some(include);
    self
  }

  pub fn requested(&self) -> &[ItemKey] {
    &self.requested
  }

  pub fn initial_values(&self) -> &HashMap<ItemKey, Vec<ItemValue>> {
    &self.initial
  }

  pub(crate) fn full_context(&self) -> Option<bool> {
    self.include_full_context
  }
}
