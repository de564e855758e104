//! Kiln Item
//!
//! This crate defines the data that flows between build steps and the
//! run-scoped store that carries it.
//!
//! - [`ItemKey`] / [`ItemType`]: the identity of a category of data. Two item
//!   types are equal iff they share the declared type name and qualifier. Whether
//!   an item is simple or multi is fixed when the type is declared.
//! - [`SimpleItem`] / [`MultiItem`]: typed handles used by step authors. They
//!   pin the Rust value type and keep simple and multi access apart at compile
//!   time.
//! - [`BuildContext`]: the per-run item store. Every item slot has its own lock;
//!   simple slots are write-once, multi slots append-only.
//! - [`ItemSnapshot`]: an immutable copy of (part of) a context, handed back to
//!   callers once a run ends.

mod error;
mod handle;
mod key;
mod snapshot;
mod store;
mod value;

pub use error::ItemError;
pub use handle::{AsItemType, MultiItem, SimpleItem};
pub use key::{ItemKey, ItemKind, ItemType};
pub use snapshot::{ItemSnapshot, SnapshotEntry};
pub use store::BuildContext;
pub use value::ItemValue;
