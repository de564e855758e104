use std::fmt;
use std::sync::Arc;

use kiln_item::{AsItemType, ItemKey, ItemType};
use serde::{Deserialize, Serialize};

use crate::context::StepContext;

/// Error type returned by step bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The executable part of a step.
///
/// Bodies are opaque blocking units of work. The engine runs them on a worker
/// thread and never interrupts them; long-running bodies may poll
/// [`StepContext::is_cancelled`] to stop early.
pub trait StepBody: Send + Sync {
  fn execute(&self, ctx: &mut StepContext) -> Result<(), BoxError>;
}

impl<F> StepBody for F
where
  F: Fn(&mut StepContext) -> Result<(), BoxError> + Send + Sync,
{
  fn execute(&self, ctx: &mut StepContext) -> Result<(), BoxError> {
    self(ctx)
  }
}

/// Whether a step must emit a produced item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProduceMode {
  /// The step always emits the item.
  Always,
  /// The step may legitimately emit nothing.
  Weak,
}

/// How a step depends on a consumed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeMode {
  /// Run after the producer(s) but never read the value.
  OrderingOnly,
  /// Read the value if some producer emitted it.
  Optional,
  /// The value must exist.
  Required,
}

/// One produced item of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Produces {
  pub item: ItemType,
  pub mode: ProduceMode,
  /// Yields to a non-overridable producer of the same simple item.
  pub overridable: bool,
}

/// One consumed item of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumes {
  pub item: ItemType,
  pub mode: ConsumeMode,
}

/// A registered unit of work.
pub struct Step {
  id: String,
  produces: Vec<Produces>,
  consumes: Vec<Consumes>,
  is_final: bool,
  body: Arc<dyn StepBody>,
}

impl Step {
  pub fn builder(id: impl Into<String>) -> StepBuilder {
    StepBuilder {
      id: id.into(),
      produces: Vec::new(),
      consumes: Vec::new(),
      is_final: false,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn produces(&self) -> &[Produces] {
    &self.produces
  }

  pub fn consumes(&self) -> &[Consumes] {
    &self.consumes
  }

  /// Whether the step runs even if nothing consumes its output.
  pub fn is_final(&self) -> bool {
    self.is_final
  }

  pub fn body(&self) -> &Arc<dyn StepBody> {
    &self.body
  }

  /// Declaration for a produced item, if any.
  pub fn produce_of(&self, key: &ItemKey) -> Option<&Produces> {
    self.produces.iter().find(|p| p.item.key() == key)
  }

  /// Declaration for a consumed item, if any.
  pub fn consume_of(&self, key: &ItemKey) -> Option<&Consumes> {
    self.consumes.iter().find(|c| c.item.key() == key)
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("id", &self.id)
      .field("produces", &self.produces)
      .field("consumes", &self.consumes)
      .field("is_final", &self.is_final)
      .finish_non_exhaustive()
  }
}

/// Builder for [`Step`].
///
/// Declaring the same item twice keeps the last declaration.
#[derive(Debug, Clone)]
pub struct StepBuilder {
  id: String,
  produces: Vec<Produces>,
  consumes: Vec<Consumes>,
  is_final: bool,
}

impl StepBuilder {
  /// The step always produces this item.
  pub fn produces(self, item: &impl AsItemType) -> Self {
    self.produce(item.as_item_type(), ProduceMode::Always, false)
  }

  /// The step may produce this item, or not.
  pub fn produces_weak(self, item: &impl AsItemType) -> Self {
    self.produce(item.as_item_type(), ProduceMode::Weak, false)
  }

  /// The step produces this simple item unless another step also does.
  pub fn produces_overridable(self, item: &impl AsItemType) -> Self {
    self.produce(item.as_item_type(), ProduceMode::Always, true)
  }

  /// The step needs this item to exist.
  pub fn consumes(self, item: &impl AsItemType) -> Self {
    self.consume(item.as_item_type(), ConsumeMode::Required)
  }

  /// The step reads this item if it was produced.
  pub fn consumes_optional(self, item: &impl AsItemType) -> Self {
    self.consume(item.as_item_type(), ConsumeMode::Optional)
  }

  /// The step runs after every producer of this item, without reading it.
  pub fn after(self, item: &impl AsItemType) -> Self {
    self.consume(item.as_item_type(), ConsumeMode::OrderingOnly)
  }

  /// The step must run even if nothing consumes its output.
  pub fn final_step(mut self) -> Self {
    self.is_final = true;
    self
  }

  pub fn produce(mut self, item: &ItemType, mode: ProduceMode, overridable: bool) -> Self {
    self.produces.retain(|p| p.item != *item);
    self.produces.push(Produces {
      item: item.clone(),
      mode,
      overridable,
    });
    self
  }

  pub fn consume(mut self, item: &ItemType, mode: ConsumeMode) -> Self {
    self.consumes.retain(|c| c.item != *item);
    self.consumes.push(Consumes {
      item: item.clone(),
      mode,
    });
    self
  }

  /// Finish the step with a closure body.
  pub fn build<F>(self, body: F) -> Step
  where
    F: Fn(&mut StepContext) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    self.build_with(Arc::new(body))
  }

  /// Finish the step with a shared body.
  pub fn build_with(self, body: Arc<dyn StepBody>) -> Step {
    Step {
      id: self.id,
      produces: self.produces,
      consumes: self.consumes,
      is_final: self.is_final,
      body,
    }
  }
}

#[cfg(test)]
mod tests {
  use kiln_item::{MultiItem, SimpleItem};

  use super::*;

  #[test]
  fn test_builder_collects_declarations() {
    let config = SimpleItem::<String>::named("Config");
    let routes = MultiItem::<String>::named("Route");
    let marker = SimpleItem::<()>::named("Marker");

    let step = Step::builder("register-routes")
      .consumes(&config)
      .after(&marker)
      .produces(&routes)
      .final_step()
      .build(|_| Ok(()));

    assert_eq!(step.id(), "register-routes");
    assert!(step.is_final());
    assert_eq!(
      step.consume_of(config.key()).map(|c| c.mode),
      Some(ConsumeMode::Required)
    );
    assert_eq!(
      step.consume_of(marker.key()).map(|c| c.mode),
      Some(ConsumeMode::OrderingOnly)
    );
    assert_eq!(
      step.produce_of(routes.key()).map(|p| p.mode),
      Some(ProduceMode::Always)
    );
  }

  #[test]
  fn test_redeclaring_keeps_last() {
    let config = SimpleItem::<String>::named("Config");

    let step = Step::builder("s")
      .consumes(&config)
      .consumes_optional(&config)
      .build(|_| Ok(()));

    assert_eq!(step.consumes().len(), 1);
    assert_eq!(step.consumes()[0].mode, ConsumeMode::Optional);
  }

  #[test]
  fn test_consume_mode_strength_order() {
    assert!(ConsumeMode::Required > ConsumeMode::Optional);
    assert!(ConsumeMode::Optional > ConsumeMode::OrderingOnly);
  }
}
