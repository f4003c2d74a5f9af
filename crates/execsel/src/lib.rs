//! Execution-implementation selection and fallback engine.
//!
//! Kernel families describe themselves through [`ExecutorImplementation`] and are collected
//! into an [`ImplementationRegistry`] in priority order. For each node, an [`ExecutorFactory`]
//! filters the registry, tells the graph compiler which operand layouts the surviving
//! candidates prefer, and builds the [`Executor`] that runs the node: directly, behind a
//! layout-converting [`FallbackExecutor`], or as a [`VariableExecutor`] that picks a
//! candidate once concrete shapes are known.

pub mod config;
mod env;
pub mod error;
pub mod executor;
pub mod memory;

pub use config::{ContextConfig, ScratchPolicy, SelectionOverrides, SelectionPolicy};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{
    Attributes, Executor, ExecutorContext, ExecutorContextPtr, ExecutorFactory,
    ExecutorImplementation, ExecutorPtr, FactoryOptions, FallbackExecutor, ImplKind,
    Implementation, ImplementationRegistry, LayoutConstraints, RegistryBuilder, ShapeSignature,
    VariableExecutor,
};
pub use memory::{ArgPort, DType, LayoutTag, Memory, MemoryArgs, MemoryDesc, MemoryDescArgs};
