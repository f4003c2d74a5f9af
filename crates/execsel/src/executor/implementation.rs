//! Implementation descriptors: the capability interface every kernel family exposes.
//!
//! A descriptor answers three questions about a configuration (can you run it, do you need
//! a different layout, do these concrete shapes suit you) and builds executors on demand.
//! Descriptors live in an [`ImplementationRegistry`](super::ImplementationRegistry) for the
//! whole process and are only ever borrowed by factories and dispatchers.

use std::fmt;

use anyhow::Result;

use super::config::{ExecutorConfig, FallbackConfig};
use super::constraints::LayoutConstraints;
use super::context::ExecutorContextPtr;
use super::Executor;
use crate::memory::MemoryArgs;

/// Operation attributes a registry bucket is keyed by.
pub trait Attributes: Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable identifier used in logs and selection overrides.
    const KEY: &'static str;
}

/// Informational tag describing where an implementation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplKind {
    Reference,
    Jit,
    Acl,
    Dnnl,
    Shl,
    Other,
}

impl fmt::Display for ImplKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImplKind::Reference => "ref",
            ImplKind::Jit => "jit",
            ImplKind::Acl => "acl",
            ImplKind::Dnnl => "dnnl",
            ImplKind::Shl => "shl",
            ImplKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Capability interface of one kernel implementation for attributes `A`.
///
/// Predicates must be deterministic and free of side effects. When a configuration carries
/// dynamic dimensions, `supports` must answer optimistically: true if some concrete shape
/// could be supported. Shape-specific rejection belongs in [`accepts_shapes`].
///
/// [`accepts_shapes`]: ExecutorImplementation::accepts_shapes
pub trait ExecutorImplementation<A: Attributes>: Send + Sync {
    /// Name unique within the registry bucket.
    fn name(&self) -> &str;

    fn kind(&self) -> ImplKind {
        ImplKind::Other
    }

    /// True when applicability depends only on dtypes and layouts, never on concrete dims.
    fn shape_agnostic(&self) -> bool;

    fn supports(&self, config: &ExecutorConfig<'_, A>, constraints: &LayoutConstraints) -> bool;

    /// Descriptor set the implementation would rather consume, if it differs from `config`.
    fn requires_fallback(&self, _config: &ExecutorConfig<'_, A>) -> Option<FallbackConfig> {
        None
    }

    /// Whether the concrete shapes bound in `memory` suit this implementation.
    fn accepts_shapes(&self, _memory: &MemoryArgs) -> bool {
        true
    }

    fn create(
        &self,
        attrs: &A,
        memory: &MemoryArgs,
        context: &ExecutorContextPtr,
    ) -> Result<Box<dyn Executor>>;
}

type SupportsFn<A> =
    Box<dyn Fn(&ExecutorConfig<'_, A>, &LayoutConstraints) -> bool + Send + Sync>;
type FallbackFn<A> = Box<dyn Fn(&ExecutorConfig<'_, A>) -> Option<FallbackConfig> + Send + Sync>;
type AcceptsShapesFn = Box<dyn Fn(&MemoryArgs) -> bool + Send + Sync>;
type CreateFn<A> =
    Box<dyn Fn(&A, &MemoryArgs, &ExecutorContextPtr) -> Result<Box<dyn Executor>> + Send + Sync>;

/// Closure-backed descriptor, the usual way kernel modules describe themselves.
///
/// Defaults: supports everything, never needs a fallback, accepts every shape, and is not
/// shape-agnostic.
pub struct Implementation<A: Attributes> {
    name: String,
    kind: ImplKind,
    shape_agnostic: bool,
    supports: SupportsFn<A>,
    requires_fallback: Option<FallbackFn<A>>,
    accepts_shapes: Option<AcceptsShapesFn>,
    create: CreateFn<A>,
}

impl<A: Attributes> Implementation<A> {
    pub fn new<F>(name: impl Into<String>, create: F) -> Self
    where
        F: Fn(&A, &MemoryArgs, &ExecutorContextPtr) -> Result<Box<dyn Executor>>
            + Send
            + Sync
            + 'static,
    {
        Implementation {
            name: name.into(),
            kind: ImplKind::Other,
            shape_agnostic: false,
            supports: Box::new(|_, _| true),
            requires_fallback: None,
            accepts_shapes: None,
            create: Box::new(create),
        }
    }

    pub fn with_kind(mut self, kind: ImplKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_shape_agnostic(mut self, shape_agnostic: bool) -> Self {
        self.shape_agnostic = shape_agnostic;
        self
    }

    pub fn with_supports<F>(mut self, supports: F) -> Self
    where
        F: Fn(&ExecutorConfig<'_, A>, &LayoutConstraints) -> bool + Send + Sync + 'static,
    {
        self.supports = Box::new(supports);
        self
    }

    pub fn with_fallback<F>(mut self, requires_fallback: F) -> Self
    where
        F: Fn(&ExecutorConfig<'_, A>) -> Option<FallbackConfig> + Send + Sync + 'static,
    {
        self.requires_fallback = Some(Box::new(requires_fallback));
        self
    }

    pub fn with_accepts_shapes<F>(mut self, accepts_shapes: F) -> Self
    where
        F: Fn(&MemoryArgs) -> bool + Send + Sync + 'static,
    {
        self.accepts_shapes = Some(Box::new(accepts_shapes));
        self
    }
}

impl<A: Attributes> ExecutorImplementation<A> for Implementation<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ImplKind {
        self.kind
    }

    fn shape_agnostic(&self) -> bool {
        self.shape_agnostic
    }

    fn supports(&self, config: &ExecutorConfig<'_, A>, constraints: &LayoutConstraints) -> bool {
        (self.supports)(config, constraints)
    }

    fn requires_fallback(&self, config: &ExecutorConfig<'_, A>) -> Option<FallbackConfig> {
        self.requires_fallback
            .as_ref()
            .and_then(|requires_fallback| requires_fallback(config))
    }

    fn accepts_shapes(&self, memory: &MemoryArgs) -> bool {
        self.accepts_shapes
            .as_ref()
            .is_none_or(|accepts_shapes| accepts_shapes(memory))
    }

    fn create(
        &self,
        attrs: &A,
        memory: &MemoryArgs,
        context: &ExecutorContextPtr,
    ) -> Result<Box<dyn Executor>> {
        (self.create)(attrs, memory, context)
    }
}

impl<A: Attributes> fmt::Debug for Implementation<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("shape_agnostic", &self.shape_agnostic)
            .finish_non_exhaustive()
    }
}

/// Helper trait for converting descriptor types into registry entries.
pub trait IntoImplementation<A: Attributes> {
    fn into_impl(self) -> Box<dyn ExecutorImplementation<A>>;
}

impl<A, T> IntoImplementation<A> for T
where
    A: Attributes,
    T: ExecutorImplementation<A> + 'static,
{
    fn into_impl(self) -> Box<dyn ExecutorImplementation<A>> {
        Box::new(self)
    }
}
