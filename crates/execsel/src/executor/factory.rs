//! Entry point used by the graph compiler for one node.
//!
//! A factory filters the registry once, at construction, and then answers two questions for
//! the lifetime of the node: which layouts should operands be allocated in
//! ([`ExecutorFactory::proper_memory_descriptors`]) and which executor runs the node
//! ([`ExecutorFactory::make`]).

use std::fmt;

use crate::error::{ExecutorError, ExecutorResult};
use crate::memory::{DescsDisplay, MemoryArgs, MemoryDescArgs};

use super::config::{ExecutorConfig, FallbackConfig};
use super::constraints::LayoutConstraints;
use super::context::ExecutorContextPtr;
use super::fallback::fallback;
use super::implementation::{Attributes, ExecutorImplementation};
use super::registry::ImplementationRegistry;
use super::variable::VariableExecutor;
use super::{Executor, ExecutorPtr};

/// Optional knobs for [`ExecutorFactory::with_options`].
#[derive(Debug, Clone, Default)]
pub struct FactoryOptions {
    pub constraints: LayoutConstraints,
    /// Only the implementation with this name may be selected. Takes precedence over the
    /// context's selection overrides.
    pub priority: Option<String>,
}

impl FactoryOptions {
    pub fn with_constraints(mut self, constraints: LayoutConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }
}

/// Walks the bucket of `A` in priority order and keeps the implementations supporting `descs`.
///
/// With a priority name, every other entry is skipped before any predicate runs. The walk
/// stops at the first supporting shape-agnostic entry.
pub fn filter<'r, A: Attributes>(
    registry: &'r ImplementationRegistry,
    attrs: &A,
    descs: &MemoryDescArgs,
    constraints: &LayoutConstraints,
    priority: Option<&str>,
) -> ExecutorResult<Vec<&'r dyn ExecutorImplementation<A>>> {
    let config = ExecutorConfig::new(descs, attrs);
    let mut candidates: Vec<&'r dyn ExecutorImplementation<A>> = Vec::new();

    for implementation in registry.implementations_for::<A>() {
        let name = implementation.name();
        if priority.is_some_and(|priority| priority != name) {
            continue;
        }
        if !implementation.supports(&config, constraints) {
            tracing::debug!(op = A::KEY, implementation = name, "implementation skipped");
            continue;
        }

        tracing::debug!(op = A::KEY, implementation = name, "implementation accepted");
        candidates.push(implementation.as_ref());

        if implementation.shape_agnostic() {
            break;
        }
    }

    if candidates.is_empty() {
        let reason = match priority {
            Some(priority) => format!(
                "implementation '{priority}' is not registered or does not support {}",
                DescsDisplay(descs)
            ),
            None => format!("nothing registered supports {}", DescsDisplay(descs)),
        };
        return Err(ExecutorError::configuration(A::KEY, reason));
    }
    Ok(candidates)
}

/// Builds an executor for `implementation`, wrapping it in a fallback adapter when
/// `fallback_config` asks for other layouts.
pub(crate) fn instantiate<A: Attributes>(
    implementation: &dyn ExecutorImplementation<A>,
    config: &ExecutorConfig<'_, A>,
    fallback_config: Option<FallbackConfig>,
    memory: &MemoryArgs,
    context: &ExecutorContextPtr,
) -> ExecutorResult<Box<dyn Executor>> {
    match fallback_config {
        Some(fallback_config) => fallback(config, fallback_config, memory, context, implementation),
        None => implementation
            .create(config.attrs, memory, context)
            .map_err(|source| ExecutorError::construction(implementation.name(), source)),
    }
}

/// Per-node factory over a fixed, non-empty candidate list.
pub struct ExecutorFactory<'r, A: Attributes> {
    attrs: A,
    context: ExecutorContextPtr,
    constraints: LayoutConstraints,
    candidates: Vec<&'r dyn ExecutorImplementation<A>>,
}

impl<'r, A: Attributes> ExecutorFactory<'r, A> {
    pub fn new(
        registry: &'r ImplementationRegistry,
        attrs: A,
        context: ExecutorContextPtr,
        descs: &MemoryDescArgs,
    ) -> ExecutorResult<Self> {
        Self::with_options(registry, attrs, context, descs, FactoryOptions::default())
    }

    /// Filters the registry for `descs`.
    ///
    /// Fails with [`ExecutorError::Configuration`] when nothing applies, including when the
    /// priority name (explicit or from the context's overrides) matches nothing.
    pub fn with_options(
        registry: &'r ImplementationRegistry,
        attrs: A,
        context: ExecutorContextPtr,
        descs: &MemoryDescArgs,
        options: FactoryOptions,
    ) -> ExecutorResult<Self> {
        let FactoryOptions {
            constraints,
            priority,
        } = options;
        let priority = priority.or_else(|| {
            context
                .overrides()
                .priority_for(A::KEY)
                .map(str::to_string)
        });

        let candidates = filter(registry, &attrs, descs, &constraints, priority.as_deref())?;
        tracing::debug!(
            op = A::KEY,
            candidates = ?candidates.iter().map(|c| c.name()).collect::<Vec<_>>(),
            descs = %DescsDisplay(descs),
            "executor factory ready"
        );

        Ok(ExecutorFactory {
            attrs,
            context,
            constraints,
            candidates,
        })
    }

    pub fn attrs(&self) -> &A {
        &self.attrs
    }

    pub fn context(&self) -> &ExecutorContextPtr {
        &self.context
    }

    pub fn candidates(&self) -> &[&'r dyn ExecutorImplementation<A>] {
        &self.candidates
    }

    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates
            .iter()
            .map(|candidate| candidate.name())
            .collect()
    }

    /// Descriptor set each candidate would like its operands allocated in, in candidate order.
    pub fn proper_memory_descriptors(&self, descs: &MemoryDescArgs) -> Vec<MemoryDescArgs> {
        let config = ExecutorConfig::new(descs, &self.attrs);
        self.candidates
            .iter()
            .map(|candidate| match candidate.requires_fallback(&config) {
                Some(fallback_config) => {
                    tracing::debug!(
                        op = A::KEY,
                        implementation = candidate.name(),
                        proper = %DescsDisplay(&fallback_config.descs),
                        "candidate asks for other layouts"
                    );
                    fallback_config.descs
                }
                None => descs.clone(),
            })
            .collect()
    }

    /// Builds the executor for concrete operands.
    ///
    /// A single candidate is instantiated directly, through a fallback adapter if it needs
    /// converted operands. Several candidates yield a [`VariableExecutor`] that has not picked
    /// any of them yet.
    pub fn make(&mut self, memory: &MemoryArgs) -> ExecutorResult<ExecutorPtr<'r>> {
        if let [candidate] = self.candidates.as_slice() {
            let candidate = *candidate;
            let descs = memory.descs();
            let config = ExecutorConfig::new(&descs, &self.attrs);
            let fallback_config = candidate.requires_fallback(&config);
            tracing::debug!(
                op = A::KEY,
                implementation = candidate.name(),
                fallback = fallback_config.is_some(),
                "creating executor"
            );
            return instantiate(candidate, &config, fallback_config, memory, &self.context);
        }

        Ok(Box::new(VariableExecutor::new(
            self.candidates.clone(),
            self.attrs.clone(),
            memory,
            self.constraints.clone(),
            self.context.clone(),
        )))
    }
}

impl<A: Attributes> fmt::Debug for ExecutorFactory<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorFactory")
            .field("op", &A::KEY)
            .field("attrs", &self.attrs)
            .field("candidates", &self.candidate_names())
            .finish()
    }
}
