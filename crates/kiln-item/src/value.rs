use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type-erased item instance.
///
/// Values are shared, never copied: consumers receive `Arc<T>` handles to the
/// instance the producer published.
#[derive(Clone)]
pub struct ItemValue {
  inner: Arc<dyn Any + Send + Sync>,
  type_name: &'static str,
}

impl ItemValue {
  pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
    Self {
      inner: Arc::new(value),
      type_name: std::any::type_name::<T>(),
    }
  }

  /// Recover the typed value, or `None` if it holds a different type.
  pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self.inner.clone().downcast::<T>().ok()
  }

  pub fn is<T: Send + Sync + 'static>(&self) -> bool {
    self.inner.is::<T>()
  }

  /// Rust type name of the stored value.
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }
}

impl fmt::Debug for ItemValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ItemValue<{}>", self.type_name)
  }
}
