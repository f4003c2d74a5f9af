//! Implementation selection: registry, capability filter, layout negotiation and the executors
//! handed back to the graph compiler.
//!
//! The usual flow for one node:
//!
//! ```rust,ignore
//! let mut factory = ExecutorFactory::new(&registry, attrs, context, &descs)?;
//! let proper = factory.proper_memory_descriptors(&descs);
//! // ... allocate operands, ideally in one of `proper` ...
//! let mut executor = factory.make(&memory)?;
//! executor.update(&memory)?;
//! executor.execute(&memory)?;
//! ```

pub mod config;
pub mod constraints;
pub mod context;
pub mod factory;
pub mod fallback;
pub mod implementation;
pub mod registry;
pub mod signature;
pub mod variable;

use crate::error::ExecutorResult;
use crate::memory::MemoryArgs;

pub use config::{ExecutorConfig, FallbackConfig};
pub use constraints::LayoutConstraints;
pub use context::{ExecutorContext, ExecutorContextPtr, ScratchAllocator};
pub use factory::{filter, ExecutorFactory, FactoryOptions};
pub use fallback::{fallback, FallbackExecutor};
pub use implementation::{
    Attributes, ExecutorImplementation, ImplKind, Implementation, IntoImplementation,
};
pub use registry::{ImplementationRegistry, RegistryBuilder};
pub use signature::ShapeSignature;
pub use variable::{DispatchState, VariableExecutor, UNDEFINED_IMPLEMENTATION};

/// Executor handed back by a factory; may borrow the registry it was selected from.
pub type ExecutorPtr<'r> = Box<dyn Executor + 'r>;

/// A runnable node bound to concrete operand memory.
///
/// Instances are invoked sequentially by one execution stream and are never shared between
/// threads while running.
pub trait Executor: Send {
    /// Prepares for the operands in `memory`, typically after a shape change.
    ///
    /// Returns `false` when the executor cannot run these operands.
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool>;

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()>;

    /// Name of the implementation doing the work.
    fn implementation_name(&self) -> &str;
}
