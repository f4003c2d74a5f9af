//! Deferred dispatch over several candidates, resolved per shape signature.
//!
//! A [`VariableExecutor`] is handed the whole candidate list of a factory and picks one of them
//! each time the operands change. The pick is the first candidate, in priority order, whose
//! predicates accept the concrete operands and whose executor accepts them in `update`.
//! Decisions are memoized per [`ShapeSignature`] in a small LRU so that alternating between a
//! few shapes does not re-run the predicates.

use lru::LruCache;

use crate::error::{ExecutorError, ExecutorResult};
use crate::memory::{ArgPort, DType, LayoutTag, MemoryArgs};

use super::config::{ExecutorConfig, FallbackConfig};
use super::constraints::LayoutConstraints;
use super::context::ExecutorContextPtr;
use super::factory::instantiate;
use super::implementation::{Attributes, ExecutorImplementation};
use super::signature::ShapeSignature;
use super::Executor;

/// Name reported while no implementation has been selected.
pub const UNDEFINED_IMPLEMENTATION: &str = "undefined";

/// Dispatch state of a [`VariableExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Unresolved,
    Resolved {
        signature: ShapeSignature,
        index: usize,
    },
}

/// Operand layouts a candidate executor was built for: `None` when it runs on caller memory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route(Option<Vec<(ArgPort, DType, LayoutTag)>>);

impl Route {
    fn of(fallback: Option<&FallbackConfig>) -> Self {
        Route(fallback.map(|fallback| {
            fallback
                .descs
                .iter()
                .map(|(port, desc)| (*port, desc.dtype(), desc.layout()))
                .collect()
        }))
    }
}

struct Slot {
    route: Route,
    executor: Box<dyn Executor>,
}

#[derive(Debug, Clone)]
struct Selection {
    index: usize,
    route: Route,
}

/// Executor that defers the choice of implementation until operands are known.
pub struct VariableExecutor<'r, A: Attributes> {
    candidates: Vec<&'r dyn ExecutorImplementation<A>>,
    attrs: A,
    constraints: LayoutConstraints,
    context: ExecutorContextPtr,
    slots: Vec<Option<Slot>>,
    memo: LruCache<ShapeSignature, Selection>,
    state: DispatchState,
}

impl<'r, A: Attributes> VariableExecutor<'r, A> {
    /// Wraps `candidates` without selecting any of them.
    pub fn new(
        candidates: Vec<&'r dyn ExecutorImplementation<A>>,
        attrs: A,
        memory: &MemoryArgs,
        constraints: LayoutConstraints,
        context: ExecutorContextPtr,
    ) -> Self {
        tracing::debug!(
            op = A::KEY,
            candidates = candidates.len(),
            signature = %ShapeSignature::of(memory),
            "deferring implementation choice"
        );
        let slots = candidates.iter().map(|_| None).collect();
        let memo = LruCache::new(context.dispatch_cache_size());
        VariableExecutor {
            candidates,
            attrs,
            constraints,
            context,
            slots,
            memo,
            state: DispatchState::Unresolved,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state.clone()
    }

    /// Candidate index currently selected, if any.
    pub fn resolved_index(&self) -> Option<usize> {
        match self.state {
            DispatchState::Resolved { index, .. } => Some(index),
            DispatchState::Unresolved => None,
        }
    }

    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates
            .iter()
            .map(|candidate| candidate.name())
            .collect()
    }

    fn selected(&mut self) -> Option<&mut Box<dyn Executor>> {
        let index = self.resolved_index()?;
        self.slots[index].as_mut().map(|slot| &mut slot.executor)
    }

    fn resolve(&mut self, memory: &MemoryArgs, signature: ShapeSignature) -> ExecutorResult<bool> {
        self.state = DispatchState::Unresolved;

        if let Some(selection) = self.memo.get(&signature).cloned() {
            if self.try_select(selection.index, selection.route.clone(), None, memory)? {
                tracing::trace!(
                    op = A::KEY,
                    implementation = self.candidates[selection.index].name(),
                    %signature,
                    "reusing memoized dispatch"
                );
                self.state = DispatchState::Resolved {
                    signature,
                    index: selection.index,
                };
                return Ok(true);
            }
            self.memo.pop(&signature);
        }

        let descs = memory.descs();
        for index in 0..self.candidates.len() {
            let candidate = self.candidates[index];
            let config = ExecutorConfig::new(&descs, &self.attrs);
            if !candidate.supports(&config, &self.constraints) || !candidate.accepts_shapes(memory)
            {
                tracing::trace!(
                    op = A::KEY,
                    implementation = candidate.name(),
                    %signature,
                    "candidate rejects operands"
                );
                continue;
            }

            let fallback_config = candidate.requires_fallback(&config);
            let route = Route::of(fallback_config.as_ref());
            if !self.try_select(index, route.clone(), Some(fallback_config), memory)? {
                continue;
            }

            tracing::debug!(
                op = A::KEY,
                implementation = candidate.name(),
                %signature,
                "resolved deferred dispatch"
            );
            self.memo.put(signature.clone(), Selection { index, route });
            self.state = DispatchState::Resolved { signature, index };
            return Ok(true);
        }

        tracing::debug!(op = A::KEY, %signature, "no candidate accepts operands");
        Ok(false)
    }

    /// Makes sure candidate `index` has an executor built for `route` and updates it.
    ///
    /// `fallback_config` carries an already evaluated `requires_fallback` answer; when absent
    /// and the executor has to be rebuilt, the predicate is asked again.
    fn try_select(
        &mut self,
        index: usize,
        route: Route,
        fallback_config: Option<Option<FallbackConfig>>,
        memory: &MemoryArgs,
    ) -> ExecutorResult<bool> {
        let stale = self.slots[index]
            .as_ref()
            .is_none_or(|slot| slot.route != route);
        if stale {
            let candidate = self.candidates[index];
            let descs = memory.descs();
            let config = ExecutorConfig::new(&descs, &self.attrs);
            let fallback_config =
                fallback_config.unwrap_or_else(|| candidate.requires_fallback(&config));
            let route = Route::of(fallback_config.as_ref());
            let executor = instantiate(candidate, &config, fallback_config, memory, &self.context)?;
            self.slots[index] = Some(Slot { route, executor });
        }

        match self.slots[index].as_mut() {
            Some(slot) => slot.executor.update(memory),
            None => Ok(false),
        }
    }
}

impl<A: Attributes> Executor for VariableExecutor<'_, A> {
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool> {
        let signature = ShapeSignature::of(memory);
        let unchanged = matches!(
            &self.state,
            DispatchState::Resolved { signature: current, .. } if *current == signature
        );
        if unchanged {
            if let Some(executor) = self.selected() {
                return executor.update(memory);
            }
        }
        self.resolve(memory, signature)
    }

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()> {
        if !self.update(memory)? {
            return Err(ExecutorError::NoApplicableImplementation {
                op: A::KEY,
                signature: ShapeSignature::of(memory),
            });
        }
        match self.selected() {
            Some(executor) => executor.execute(memory),
            None => Err(ExecutorError::NoApplicableImplementation {
                op: A::KEY,
                signature: ShapeSignature::of(memory),
            }),
        }
    }

    fn implementation_name(&self) -> &str {
        match self.state {
            DispatchState::Resolved { index, .. } => self.candidates[index].name(),
            DispatchState::Unresolved => UNDEFINED_IMPLEMENTATION,
        }
    }
}
