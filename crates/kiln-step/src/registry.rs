//! Step registration.
//!
//! Registration is a distinct phase: the registry accepts steps and initial
//! item declarations, then [`StepRegistry::finalize`] consumes it and returns an
//! immutable [`StepChain`] for graph construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kiln_item::{AsItemType, ItemKey, ItemKind, ItemType};
use tracing::debug;

use crate::error::RegistryError;
use crate::step::Step;

/// Producer name used for items supplied by the caller.
pub const INITIAL_PRODUCER: &str = "<initial>";

/// Claims on one simple item: at most one regular and one overridable producer.
#[derive(Debug, Default, Clone)]
struct SimpleClaims {
  regular: Option<String>,
  overridable: Option<String>,
}

/// Collects steps and validates their produce contracts.
#[derive(Debug, Default)]
pub struct StepRegistry {
  steps: Vec<Arc<Step>>,
  step_ids: HashSet<String>,
  /// First declaration of every item key: kind and declaring step.
  kinds: HashMap<ItemKey, (ItemKind, String)>,
  claims: HashMap<ItemKey, SimpleClaims>,
  initial: Vec<ItemType>,
}

impl StepRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a step.
  ///
  /// Fails with [`RegistryError::DuplicateProducer`] if a simple item it produces
  /// already has a producer. A rejected step leaves the registry unchanged.
  pub fn register(&mut self, step: Step) -> Result<(), RegistryError> {
    if self.step_ids.contains(step.id()) {
      return Err(RegistryError::DuplicateStepId(step.id().to_string()));
    }

    let mut kinds = HashMap::new();
    let declared = step
      .produces()
      .iter()
      .map(|p| &p.item)
      .chain(step.consumes().iter().map(|c| &c.item));
    for item in declared {
      self.check_kind(item, step.id(), &kinds)?;
      kinds.insert(item.key().clone(), item.kind());
    }

    let mut claims = Vec::new();
    for produce in step.produces() {
      if produce.item.kind() == ItemKind::Multi {
        if produce.overridable {
          return Err(RegistryError::InvalidDeclaration {
            step: step.id().to_string(),
            message: format!("multi item '{}' cannot be overridable", produce.item),
          });
        }
        continue;
      }
      let key = produce.item.key();
      let mut claim = self.claims.get(key).cloned().unwrap_or_default();
      let slot = if produce.overridable {
        &mut claim.overridable
      } else {
        &mut claim.regular
      };
      if let Some(first) = slot {
        return Err(RegistryError::DuplicateProducer {
          item: key.clone(),
          first: first.clone(),
          second: step.id().to_string(),
        });
      }
      *slot = Some(step.id().to_string());
      claims.push((key.clone(), claim));
    }

    for (key, kind) in kinds {
      self
        .kinds
        .entry(key)
        .or_insert_with(|| (kind, step.id().to_string()));
    }
    self.claims.extend(claims);
    self.step_ids.insert(step.id().to_string());
    debug!(
      step_id = %step.id(),
      produces = step.produces().len(),
      consumes = step.consumes().len(),
      "step_registered"
    );
    self.steps.push(Arc::new(step));
    Ok(())
  }

  /// Declare an item the caller supplies when invoking a run.
  ///
  /// An initial simple item counts as that item's producer.
  pub fn add_initial(&mut self, item: &impl AsItemType) -> Result<(), RegistryError> {
    let item = item.as_item_type();
    if self.initial.contains(item) {
      return Err(RegistryError::DuplicateInitialItem(item.key().clone()));
    }
    self.check_kind(item, INITIAL_PRODUCER, &HashMap::new())?;

    if item.kind() == ItemKind::Simple {
      let claim = self.claims.entry(item.key().clone()).or_default();
      if let Some(first) = &claim.regular {
        return Err(RegistryError::DuplicateProducer {
          item: item.key().clone(),
          first: first.clone(),
          second: INITIAL_PRODUCER.to_string(),
        });
      }
      claim.regular = Some(INITIAL_PRODUCER.to_string());
    }
    self
      .kinds
      .entry(item.key().clone())
      .or_insert_with(|| (item.kind(), INITIAL_PRODUCER.to_string()));
    self.initial.push(item.clone());
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Close registration and snapshot the registered steps.
  pub fn finalize(self) -> StepChain {
    let mut overridden: HashMap<String, Vec<ItemKey>> = HashMap::new();
    for (key, claim) in &self.claims {
      if let (Some(_), Some(loser)) = (&claim.regular, &claim.overridable) {
        overridden.entry(loser.clone()).or_default().push(key.clone());
      }
    }

    debug!(
      steps = self.steps.len(),
      initial_items = self.initial.len(),
      "registry_finalized"
    );

    StepChain {
      steps: self.steps,
      initial: self.initial,
      overridden,
    }
  }

  fn check_kind(
    &self,
    item: &ItemType,
    step_id: &str,
    local: &HashMap<ItemKey, ItemKind>,
  ) -> Result<(), RegistryError> {
    let known = self
      .kinds
      .get(item.key())
      .map(|(kind, by)| (*kind, by.as_str()))
      .or_else(|| local.get(item.key()).map(|kind| (*kind, step_id)));
    match known {
      Some((kind, by)) if kind != item.kind() => Err(RegistryError::ConflictingItemKind {
        item: item.key().clone(),
        declared: kind,
        declared_by: by.to_string(),
        conflicting: item.kind(),
        step: step_id.to_string(),
      }),
      _ => Ok(()),
    }
  }
}

/// Immutable snapshot of a finalized registry.
#[derive(Debug, Clone)]
pub struct StepChain {
  steps: Vec<Arc<Step>>,
  initial: Vec<ItemType>,
  /// Step id -> simple items whose output it must discard.
  overridden: HashMap<String, Vec<ItemKey>>,
}

impl StepChain {
  /// Steps in registration order.
  pub fn steps(&self) -> &[Arc<Step>] {
    &self.steps
  }

  pub fn step(&self, id: &str) -> Option<&Arc<Step>> {
    self.steps.iter().find(|s| s.id() == id)
  }

  /// Items supplied by the caller at invocation time.
  pub fn initial_items(&self) -> &[ItemType] {
    &self.initial
  }

  pub fn is_initial(&self, key: &ItemKey) -> bool {
    self.initial.iter().any(|item| item.key() == key)
  }

  /// Simple items this step declares but yields to another producer.
  pub fn overridden_items(&self, step_id: &str) -> &[ItemKey] {
    self
      .overridden
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every item type declared by a step or as initial, each once.
  pub fn item_types(&self) -> Vec<ItemType> {
    let mut seen = HashSet::new();
    let declared = self.initial.iter().chain(self.steps.iter().flat_map(|step| {
      step
        .produces()
        .iter()
        .map(|p| &p.item)
        .chain(step.consumes().iter().map(|c| &c.item))
    }));
    declared
      .filter(|item| seen.insert(item.key().clone()))
      .cloned()
      .collect()
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}
