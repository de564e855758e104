//! Kiln Config
//!
//! Serializable configuration types for kiln:
//!
//! - [`EngineConfig`]: scheduler settings (worker count, run timeout, output
//!   options), loaded from a JSON file.
//! - [`PlanDef`]: a step manifest describing steps by the item names they
//!   produce and consume. The CLI turns manifests into registered steps.
//!
//! Nothing here knows about the runtime types; conversion happens at the edge.

mod engine;
mod error;
mod plan;

pub use engine::EngineConfig;
pub use error::ConfigError;
pub use plan::{ConsumeDef, ConsumeModeDef, InitialDef, ItemKindDef, PlanDef, ProduceDef, StepDef};
