//! Kiln Step
//!
//! Build steps, and the registry that collects them before graph construction.
//!
//! A [`Step`] declares which item types it produces and consumes and carries an
//! opaque [`StepBody`]. Steps are collected in a [`StepRegistry`], which checks
//! producer uniqueness as steps arrive. [`StepRegistry::finalize`] closes the
//! registration phase and yields an immutable [`StepChain`].
//!
//! During a run each body receives a [`StepContext`] scoped to its own
//! declaration: reads are limited to consumed items, writes to produced items,
//! and writes only become visible once the body returns successfully.
//!
//! ```ignore
//! let sources = SimpleItem::<Vec<PathBuf>>::named("Sources");
//! let classes = MultiItem::<String>::named("GeneratedClass");
//!
//! let mut registry = StepRegistry::new();
//! registry.register(
//!   Step::builder("generate")
//!     .consumes(&sources)
//!     .produces(&classes)
//!     .build(move |ctx| {
//!       let sources = ctx.consume(&sources)?;
//!       for path in sources.iter() {
//!         ctx.produce_multi(&classes, path.display().to_string())?;
//!       }
//!       Ok(())
//!     }),
//! )?;
//! let chain = registry.finalize();
//! ```

mod context;
mod error;
mod registry;
mod step;

pub use context::StepContext;
pub use error::{ContextError, RegistryError};
pub use registry::{INITIAL_PRODUCER, StepChain, StepRegistry};
pub use step::{
  BoxError, ConsumeMode, Consumes, ProduceMode, Produces, Step, StepBody, StepBuilder,
};
