use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identity of a category of data exchanged between steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
  /// Declared type name, e.g. `my_crate::GeneratedSources`.
  name: String,
  /// Optional qualifier distinguishing several items of the same type.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  qualifier: Option<String>,
}

impl ItemKey {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      qualifier: None,
    }
  }

  pub fn qualified(name: impl Into<String>, qualifier: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      qualifier: Some(qualifier.into()),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn qualifier(&self) -> Option<&str> {
    self.qualifier.as_deref()
  }
}

impl fmt::Display for ItemKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.qualifier {
      Some(q) => write!(f, "{}[{}]", self.name, q),
      None => f.write_str(&self.name),
    }
  }
}

/// Cardinality of an item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
  /// At most one instance per run, exactly one producer.
  Simple,
  /// Any number of instances, contributed by any number of producers.
  Multi,
}

impl fmt::Display for ItemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ItemKind::Simple => f.write_str("simple"),
      ItemKind::Multi => f.write_str("multi"),
    }
  }
}

/// An item key together with its declared kind.
///
/// Equality and hashing only look at the key. Conflicting kinds for the same
/// key are detected by the step registry, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemType {
  key: ItemKey,
  kind: ItemKind,
}

impl ItemType {
  pub fn new(key: ItemKey, kind: ItemKind) -> Self {
    Self { key, kind }
  }

  pub fn simple(key: ItemKey) -> Self {
    Self::new(key, ItemKind::Simple)
  }

  pub fn multi(key: ItemKey) -> Self {
    Self::new(key, ItemKind::Multi)
  }

  pub fn key(&self) -> &ItemKey {
    &self.key
  }

  pub fn kind(&self) -> ItemKind {
    self.kind
  }

  pub fn is_multi(&self) -> bool {
    self.kind == ItemKind::Multi
  }
}

impl PartialEq for ItemType {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key
  }
}

impl Eq for ItemType {}

impl Hash for ItemType {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key.hash(state);
  }
}

impl fmt::Display for ItemType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.key.fmt(f)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  #[test]
  fn test_keys_differ_by_qualifier() {
    let plain = ItemKey::new("Sources");
    let main = ItemKey::qualified("Sources", "main");
    let test = ItemKey::qualified("Sources", "test");

    assert_ne!(plain, main);
    assert_ne!(main, test);
    assert_eq!(main, ItemKey::qualified("Sources", "main"));
  }

  #[test]
  fn test_display() {
    assert_eq!(ItemKey::new("Sources").to_string(), "Sources");
    assert_eq!(
      ItemKey::qualified("Sources", "main").to_string(),
      "Sources[main]"
    );
  }

  #[test]
  fn test_item_type_identity_ignores_kind() {
    let simple = ItemType::simple(ItemKey::new("Routes"));
    let multi = ItemType::multi(ItemKey::new("Routes"));

    assert_eq!(simple, multi);

    let mut set = HashSet::new();
    set.insert(simple);
    assert!(!set.insert(multi));
  }

  #[test]
  fn test_serde_skips_missing_qualifier() {
    let json = serde_json::to_value(ItemKey::new("Sources")).unwrap();
    assert_eq!(json, serde_json::json!({ "name": "Sources" }));

    let parsed: ItemKey =
      serde_json::from_value(serde_json::json!({ "name": "A", "qualifier": "q" })).unwrap();
    assert_eq!(parsed, ItemKey::qualified("A", "q"));
  }
}
