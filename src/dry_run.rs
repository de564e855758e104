//! Turning step manifests into registered steps with synthetic bodies.
//!
//! A dry-run body reads every item it consumes and publishes one JSON marker
//! per produced item, naming the step and the steps its inputs came from.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use kiln_config::{ConsumeModeDef, ItemKindDef, PlanDef, StepDef};
use kiln_item::{ItemKey, ItemKind, ItemType, ItemValue};
use kiln_step::{
  BoxError, ConsumeMode, ProduceMode, Step, StepBody, StepChain, StepContext, StepRegistry,
};
use serde_json::{Value, json};

/// Register every step and initial item of a manifest.
pub fn register_plan(plan: &PlanDef) -> Result<StepChain> {
  let mut registry = StepRegistry::new();
  for initial in &plan.initial {
    let item = item_type(&initial.item, initial.qualifier.as_deref(), initial.kind);
    registry
      .add_initial(&item)
      .with_context(|| format!("failed to declare initial item '{}'", item.key()))?;
  }
  for def in &plan.steps {
    registry
      .register(dry_run_step(def))
      .with_context(|| format!("failed to register step '{}'", def.id))?;
  }
  Ok(registry.finalize())
}

/// Parse `Name` or `Name[qualifier]`.
pub fn parse_item_key(text: &str) -> Result<ItemKey> {
  let text = text.trim();
  let key = match text.split_once('[') {
    Some((name, rest)) => {
      let Some(qualifier) = rest.strip_suffix(']') else {
        bail!("unterminated qualifier in item '{}'", text);
      };
      if qualifier.is_empty() {
        bail!("empty qualifier in item '{}'", text);
      }
      ItemKey::qualified(name, qualifier)
    }
    None => ItemKey::new(text),
  };
  if key.name().is_empty() {
    bail!("empty item name");
  }
  Ok(key)
}

/// Wrap a JSON value from a manifest as an initial item instance list.
pub fn initial_values(kind: ItemKindDef, value: &Value) -> Vec<ItemValue> {
  match (kind, value) {
    (ItemKindDef::Multi, Value::Array(values)) => {
      values.iter().cloned().map(ItemValue::new).collect()
    }
    _ => vec![ItemValue::new(value.clone())],
  }
}

pub fn item_type(name: &str, qualifier: Option<&str>, kind: ItemKindDef) -> ItemType {
  let key = match qualifier {
    Some(q) => ItemKey::qualified(name, q),
    None => ItemKey::new(name),
  };
  let kind = match kind {
    ItemKindDef::Simple => ItemKind::Simple,
    ItemKindDef::Multi => ItemKind::Multi,
  };
  ItemType::new(key, kind)
}

fn dry_run_step(def: &StepDef) -> Step {
  let mut builder = Step::builder(def.id.clone());
  let mut produces = Vec::with_capacity(def.produces.len());
  let mut reads = Vec::new();

  for produce in &def.produces {
    let item = item_type(&produce.item, produce.qualifier.as_deref(), produce.kind);
    let mode = if produce.weak {
      ProduceMode::Weak
    } else {
      ProduceMode::Always
    };
    builder = builder.produce(&item, mode, produce.overridable);
    produces.push(item);
  }
  for consume in &def.consumes {
    let item = item_type(&consume.item, consume.qualifier.as_deref(), consume.kind);
    let mode = match consume.mode {
      ConsumeModeDef::Required => ConsumeMode::Required,
      ConsumeModeDef::Optional => ConsumeMode::Optional,
      ConsumeModeDef::OrderingOnly => ConsumeMode::OrderingOnly,
    };
    builder = builder.consume(&item, mode);
    if mode != ConsumeMode::OrderingOnly {
      reads.push(item);
    }
  }
  if def.is_final {
    builder = builder.final_step();
  }

  builder.build_with(Arc::new(DryRunBody {
    produces,
    reads,
    sleep: def.sleep_ms.map(Duration::from_millis),
    fail: def.fail.clone(),
  }))
}

struct DryRunBody {
  produces: Vec<ItemType>,
  reads: Vec<ItemType>,
  sleep: Option<Duration>,
  fail: Option<String>,
}

impl StepBody for DryRunBody {
  fn execute(&self, ctx: &mut StepContext) -> Result<(), BoxError> {
    if let Some(sleep) = self.sleep {
      thread::sleep(sleep);
    }
    if let Some(message) = &self.fail {
      return Err(message.clone().into());
    }

    let mut inputs = serde_json::Map::new();
    for item in &self.reads {
      let sources: Vec<Value> = ctx
        .consume_values(item)?
        .iter()
        .filter_map(|value| value.downcast::<Value>())
        .filter_map(|marker| marker.get("step").cloned())
        .collect();
      inputs.insert(item.key().to_string(), Value::Array(sources));
    }

    for item in &self.produces {
      let marker = json!({
        "step": ctx.step_id(),
        "item": item.key().to_string(),
        "inputs": inputs,
      });
      ctx.produce_value(item, ItemValue::new(marker))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_item_key() {
    assert_eq!(parse_item_key("Pages").unwrap(), ItemKey::new("Pages"));
    assert_eq!(
      parse_item_key("Route[blog]").unwrap(),
      ItemKey::qualified("Route", "blog")
    );
    assert!(parse_item_key("Route[blog").is_err());
    assert!(parse_item_key("Route[]").is_err());
    assert!(parse_item_key("").is_err());
  }

  #[test]
  fn test_register_plan_reports_duplicate_producer() {
    let plan: PlanDef = serde_json::from_value(json!({
      "name": "dup",
      "steps": [
        { "id": "A", "produces": [{ "item": "X" }] },
        { "id": "A2", "produces": [{ "item": "X" }] }
      ]
    }))
    .unwrap();

    let err = register_plan(&plan).unwrap_err();
    assert!(err.to_string().contains("A2"));
  }

  #[test]
  fn test_register_plan_maps_declarations() {
    let plan: PlanDef = serde_json::from_value(json!({
      "name": "site",
      "initial": [{ "item": "SourceDir" }],
      "steps": [
        {
          "id": "scan",
          "consumes": [{ "item": "SourceDir" }, { "item": "Setup", "mode": "ordering_only" }],
          "produces": [{ "item": "Route", "kind": "multi" }, { "item": "Cache", "weak": true }],
          "final": true
        }
      ]
    }))
    .unwrap();

    let chain = register_plan(&plan).unwrap();
    let scan = chain.step("scan").unwrap();
    assert!(scan.is_final());
    assert!(chain.is_initial(&ItemKey::new("SourceDir")));
    assert_eq!(
      scan.consume_of(&ItemKey::new("Setup")).unwrap().mode,
      ConsumeMode::OrderingOnly
    );
    assert!(scan.produce_of(&ItemKey::new("Route")).unwrap().item.is_multi());
    assert_eq!(
      scan.produce_of(&ItemKey::new("Cache")).unwrap().mode,
      ProduceMode::Weak
    );
  }

  #[test]
  fn test_initial_values_split_multi_arrays() {
    let value = json!(["a", "b"]);
    assert_eq!(initial_values(ItemKindDef::Multi, &value).len(), 2);
    assert_eq!(initial_values(ItemKindDef::Simple, &value).len(), 1);
  }
}
