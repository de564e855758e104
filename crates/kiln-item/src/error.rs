use thiserror::Error;

use crate::key::{ItemKey, ItemKind};

/// Errors raised by the build context and item snapshots.
#[derive(Debug, Error)]
pub enum ItemError {
  /// A simple item was published a second time in the same run.
  #[error("item '{item}' already produced by step '{existing}', rejected value from '{attempted}'")]
  DuplicateProducer {
    item: ItemKey,
    existing: String,
    attempted: String,
  },

  /// The item has no slot in this context.
  #[error("item '{0}' is not known to this build context")]
  UnknownItem(ItemKey),

  /// Simple access on a multi item, or the other way around.
  #[error("item '{item}' is a {actual} item, expected {expected}")]
  KindMismatch {
    item: ItemKey,
    expected: ItemKind,
    actual: ItemKind,
  },

  /// Stored value does not have the requested Rust type.
  #[error("item '{item}' holds a value of type {actual}, requested {expected}")]
  TypeMismatch {
    item: ItemKey,
    expected: &'static str,
    actual: &'static str,
  },

  #[error("lock for item '{item}' poisoned")]
  LockPoisoned { item: ItemKey },
}
