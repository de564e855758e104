//! Step manifests.
//!
//! A manifest lists steps by id together with the names of the items they
//! produce and consume:
//!
//! ```json
//! {
//!   "name": "site",
//!   "initial": [{ "item": "SourceDir", "value": "content/" }],
//!   "steps": [
//!     { "id": "scan", "consumes": [{ "item": "SourceDir" }], "produces": [{ "item": "Pages" }] },
//!     { "id": "route", "consumes": [{ "item": "Pages" }], "produces": [{ "item": "Route", "kind": "multi" }] },
//!     { "id": "sitemap", "consumes": [{ "item": "Route", "kind": "multi", "mode": "optional" }], "final": true }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDef {
  pub name: String,
  /// Items supplied by the caller instead of a step.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub initial: Vec<InitialDef>,
  pub steps: Vec<StepDef>,
}

impl PlanDef {
  pub fn step(&self, id: &str) -> Option<&StepDef> {
    self.steps.iter().find(|s| s.id == id)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub id: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub produces: Vec<ProduceDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub consumes: Vec<ConsumeDef>,
  /// Final steps always run, whatever is requested.
  #[serde(default, rename = "final")]
  pub is_final: bool,
  /// Simulated work for dry runs.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sleep_ms: Option<u64>,
  /// Make the dry-run body fail with this message.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fail: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKindDef {
  #[default]
  Simple,
  Multi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceDef {
  pub item: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub qualifier: Option<String>,
  #[serde(default)]
  pub kind: ItemKindDef,
  /// The step may finish without emitting the item.
  #[serde(default)]
  pub weak: bool,
  /// Yields to a non-overridable producer of the same item.
  #[serde(default)]
  pub overridable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeModeDef {
  #[default]
  Required,
  Optional,
  OrderingOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeDef {
  pub item: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub qualifier: Option<String>,
  #[serde(default)]
  pub kind: ItemKindDef,
  #[serde(default)]
  pub mode: ConsumeModeDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialDef {
  pub item: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub qualifier: Option<String>,
  #[serde(default)]
  pub kind: ItemKindDef,
  /// Value supplied at run time. Absent means the run fails if a retained
  /// step requires the item.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<serde_json::Value>,
}
