//! Typed item handles.
//!
//! A handle carries an [`ItemType`] and, at compile time, the Rust type of the
//! values stored under it. Step authors declare their items once, typically as
//! `LazyLock` statics or fields of a plugin struct, and pass references to the
//! step builder and the step context.

use std::fmt;
use std::marker::PhantomData;

use crate::key::{ItemKey, ItemKind, ItemType};

/// Anything that names an item type.
pub trait AsItemType {
  fn as_item_type(&self) -> &ItemType;
}

impl AsItemType for ItemType {
  fn as_item_type(&self) -> &ItemType {
    self
  }
}

/// Handle for a simple item holding values of type `T`.
pub struct SimpleItem<T> {
  item_type: ItemType,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> SimpleItem<T> {
  /// Item named after the Rust type `T`.
  pub fn new() -> Self {
    Self::named(std::any::type_name::<T>())
  }

  /// Item with an explicit declared name.
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      item_type: ItemType::new(ItemKey::new(name), ItemKind::Simple),
      _marker: PhantomData,
    }
  }

  /// Same declared type, distinguished by a qualifier.
  pub fn qualified(self, qualifier: impl Into<String>) -> Self {
    let name = self.item_type.key().name().to_string();
    Self {
      item_type: ItemType::new(ItemKey::qualified(name, qualifier), ItemKind::Simple),
      _marker: PhantomData,
    }
  }
}

impl<T> SimpleItem<T> {
  pub fn item_type(&self) -> &ItemType {
    &self.item_type
  }

  pub fn key(&self) -> &ItemKey {
    self.item_type.key()
  }
}

impl<T: Send + Sync + 'static> Default for SimpleItem<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle for a multi item collecting values of type `T`.
pub struct MultiItem<T> {
  item_type: ItemType,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> MultiItem<T> {
  /// Item named after the Rust type `T`.
  pub fn new() -> Self {
    Self::named(std::any::type_name::<T>())
  }

  /// Item with an explicit declared name.
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      item_type: ItemType::new(ItemKey::new(name), ItemKind::Multi),
      _marker: PhantomData,
    }
  }

  /// Same declared type, distinguished by a qualifier.
  pub fn qualified(self, qualifier: impl Into<String>) -> Self {
    let name = self.item_type.key().name().to_string();
    Self {
      item_type: ItemType::new(ItemKey::qualified(name, qualifier), ItemKind::Multi),
      _marker: PhantomData,
    }
  }
}

impl<T> MultiItem<T> {
  pub fn item_type(&self) -> &ItemType {
    &self.item_type
  }

  pub fn key(&self) -> &ItemKey {
    self.item_type.key()
  }
}

impl<T: Send + Sync + 'static> Default for MultiItem<T> {
  fn default() -> Self {
    Self::new()
  }
}

// Manual impls: deriving would require `T: Clone` / `T: Debug`.

impl<T> Clone for SimpleItem<T> {
  fn clone(&self) -> Self {
    Self {
      item_type: self.item_type.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T> Clone for MultiItem<T> {
  fn clone(&self) -> Self {
    Self {
      item_type: self.item_type.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T> fmt::Debug for SimpleItem<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("SimpleItem").field(self.key()).finish()
  }
}

impl<T> fmt::Debug for MultiItem<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("MultiItem").field(self.key()).finish()
  }
}

impl<T> AsItemType for SimpleItem<T> {
  fn as_item_type(&self) -> &ItemType {
    &self.item_type
  }
}

impl<T> AsItemType for MultiItem<T> {
  fn as_item_type(&self) -> &ItemType {
    &self.item_type
  }
}
