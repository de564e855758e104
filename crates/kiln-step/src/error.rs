use kiln_item::{ItemError, ItemKey, ItemKind};
use thiserror::Error;

/// Errors raised while registering steps.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// Two producers claim the same simple item.
  #[error("simple item '{item}' is produced by both '{first}' and '{second}'")]
  DuplicateProducer {
    item: ItemKey,
    first: String,
    second: String,
  },

  #[error("step id '{0}' is already registered")]
  DuplicateStepId(String),

  /// The same item key was declared once as simple and once as multi.
  #[error("item '{item}' declared as {declared} by '{declared_by}' but as {conflicting} by '{step}'")]
  ConflictingItemKind {
    item: ItemKey,
    declared: ItemKind,
    declared_by: String,
    conflicting: ItemKind,
    step: String,
  },

  #[error("item '{0}' is already declared as an initial item")]
  DuplicateInitialItem(ItemKey),

  #[error("invalid declaration for step '{step}': {message}")]
  InvalidDeclaration { step: String, message: String },
}

/// Errors raised by a step body's view of the build context.
#[derive(Debug, Error)]
pub enum ContextError {
  #[error("step '{step}' reads item '{item}' without declaring it as consumed")]
  UndeclaredConsume { step: String, item: ItemKey },

  #[error("step '{step}' writes item '{item}' without declaring it as produced")]
  UndeclaredProduce { step: String, item: ItemKey },

  /// Ordering-only consumption grants no access to the value.
  #[error("step '{step}' consumes item '{item}' for ordering only and cannot read it")]
  OrderingOnly { step: String, item: ItemKey },

  /// A required item was not published by any producer.
  #[error("required item '{item}' is not available to step '{step}'")]
  MissingItem { step: String, item: ItemKey },

  /// A step finished without publishing an item it always produces.
  #[error("step '{step}' completed without producing '{item}'")]
  MissingOutput { step: String, item: ItemKey },

  #[error(transparent)]
  Item(#[from] ItemError),
}
