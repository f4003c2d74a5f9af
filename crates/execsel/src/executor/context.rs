//! Runtime services shared by a factory and every executor it creates.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::{ContextConfig, ScratchPolicy, SelectionOverrides, DEFAULT_DISPATCH_CACHE_SIZE};
use crate::error::{ExecutorError, ExecutorResult};
use crate::memory::{required_bytes, Memory, MemoryDesc, MemoryPtr};

/// Shared pointer to an execution context.
pub type ExecutorContextPtr = Arc<ExecutorContext>;

/// Upper bound on buffers kept for reuse.
const MAX_POOLED_BUFFERS: usize = 32;

/// Thread pool, scratch allocator and selection overrides for one compiled model.
pub struct ExecutorContext {
    thread_pool: ThreadPool,
    scratch: ScratchAllocator,
    overrides: SelectionOverrides,
    dispatch_cache_size: NonZeroUsize,
}

impl ExecutorContext {
    pub fn new(config: ContextConfig) -> ExecutorResult<ExecutorContextPtr> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|index| format!("execsel-worker-{index}"));
        if let Some(threads) = config.num_threads {
            builder = builder.num_threads(threads);
        }
        let thread_pool = builder
            .build()
            .map_err(|err| ExecutorError::config(format!("cannot build thread pool: {err}")))?;

        let dispatch_cache_size = NonZeroUsize::new(config.dispatch_cache_size)
            .or(NonZeroUsize::new(DEFAULT_DISPATCH_CACHE_SIZE))
            .ok_or_else(|| ExecutorError::config("dispatch cache size must be positive"))?;

        tracing::debug!(
            threads = thread_pool.current_num_threads(),
            scratch_policy = ?config.scratch_policy,
            dispatch_cache_size = dispatch_cache_size.get(),
            "created executor context"
        );

        Ok(Arc::new(ExecutorContext {
            thread_pool,
            scratch: ScratchAllocator::new(config.scratch_policy),
            overrides: config.overrides,
            dispatch_cache_size,
        }))
    }

    /// Context configured from `EXECSEL_*` environment variables.
    pub fn from_env() -> ExecutorResult<ExecutorContextPtr> {
        Self::new(ContextConfig::from_env()?)
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    /// Runs `op` inside the context's worker pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.thread_pool.install(op)
    }

    pub fn scratch(&self) -> &ScratchAllocator {
        &self.scratch
    }

    pub fn overrides(&self) -> &SelectionOverrides {
        &self.overrides
    }

    pub fn dispatch_cache_size(&self) -> NonZeroUsize {
        self.dispatch_cache_size
    }
}

/// Hands out conversion buffers and, depending on the policy, takes them back for reuse.
///
/// Safe to share between executors running on different threads.
pub struct ScratchAllocator {
    policy: ScratchPolicy,
    pool: Mutex<Vec<Vec<u8>>>,
    allocations: AtomicUsize,
    reuses: AtomicUsize,
}

impl ScratchAllocator {
    fn new(policy: ScratchPolicy) -> Self {
        ScratchAllocator {
            policy,
            pool: Mutex::new(Vec::new()),
            allocations: AtomicUsize::new(0),
            reuses: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> ScratchPolicy {
        self.policy
    }

    /// Returns zeroed memory for `desc`, reusing a pooled buffer when one is large enough.
    pub fn acquire(&self, desc: &MemoryDesc) -> ExecutorResult<MemoryPtr> {
        let required = required_bytes(desc)?;

        let pooled = {
            let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            let fit = pool
                .iter()
                .position(|buffer| buffer.capacity() >= required);
            fit.map(|index| pool.swap_remove(index))
        };

        let memory = match pooled {
            Some(buffer) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                Memory::from_buffer(desc.clone(), buffer)?
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                Memory::new(desc.clone())?
            }
        };
        Ok(Arc::new(memory))
    }

    /// Gives a scratch memory back. Buffers still referenced elsewhere are simply dropped.
    pub fn release(&self, memory: MemoryPtr) {
        if self.policy == ScratchPolicy::Release {
            return;
        }
        let Ok(memory) = Arc::try_unwrap(memory) else {
            return;
        };
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < MAX_POOLED_BUFFERS {
            pool.push(memory.into_buffer());
        }
    }

    /// Buffers freshly allocated so far.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Requests served from the pool so far.
    pub fn reuses(&self) -> usize {
        self.reuses.load(Ordering::Relaxed)
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Scratch memories checked out for one call; returned to the allocator on drop.
pub(crate) struct ScratchLease<'a> {
    allocator: &'a ScratchAllocator,
    memories: Vec<MemoryPtr>,
}

impl<'a> ScratchLease<'a> {
    pub(crate) fn new(allocator: &'a ScratchAllocator) -> Self {
        ScratchLease {
            allocator,
            memories: Vec::new(),
        }
    }

    pub(crate) fn acquire(&mut self, desc: &MemoryDesc) -> ExecutorResult<MemoryPtr> {
        let memory = self.allocator.acquire(desc)?;
        self.memories.push(Arc::clone(&memory));
        Ok(memory)
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        for memory in self.memories.drain(..) {
            self.allocator.release(memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DType, Dim, LayoutTag, Shape};

    #[test]
    fn recycle_policy_reuses_released_buffers() {
        let allocator = ScratchAllocator::new(ScratchPolicy::Recycle);
        let desc = MemoryDesc::planar(DType::F32, [4, 4]);

        let first = allocator.acquire(&desc).unwrap();
        allocator.release(first);
        assert_eq!(allocator.pooled(), 1);

        let second = allocator.acquire(&desc.with_shape([2, 2])).unwrap();
        assert_eq!(second.byte_len(), 16);
        assert_eq!(allocator.allocations(), 1);
        assert_eq!(allocator.reuses(), 1);
    }

    #[test]
    fn release_policy_drops_buffers() {
        let allocator = ScratchAllocator::new(ScratchPolicy::Release);
        let desc = MemoryDesc::planar(DType::F32, [8]);
        {
            let mut lease = ScratchLease::new(&allocator);
            lease.acquire(&desc).unwrap();
        }
        assert_eq!(allocator.pooled(), 0);
        let _again = allocator.acquire(&desc).unwrap();
        assert_eq!(allocator.allocations(), 2);
    }

    #[test]
    fn scratch_errors_name_the_actual_problem() {
        let allocator = ScratchAllocator::new(ScratchPolicy::Recycle);

        let malformed = MemoryDesc::new(DType::F32, [2, 4], LayoutTag::ChannelsLast);
        let err = allocator.acquire(&malformed).unwrap_err().to_string();
        assert!(err.contains("cannot describe rank-2"), "{err}");

        let dynamic = MemoryDesc::planar(DType::F32, Shape::from_dims([Dim::Dynamic]));
        let err = allocator.acquire(&dynamic).unwrap_err().to_string();
        assert!(err.contains("dynamic"), "{err}");

        let huge = MemoryDesc::planar(DType::F32, [usize::MAX / 2]);
        let err = allocator.acquire(&huge).unwrap_err().to_string();
        assert!(err.contains("does not fit"), "{err}");
        assert_eq!(allocator.allocations(), 0);
    }

    #[test]
    fn zero_dispatch_cache_size_falls_back_to_default() {
        let config = ContextConfig {
            dispatch_cache_size: 0,
            num_threads: Some(1),
            ..ContextConfig::default()
        };
        let context = ExecutorContext::new(config).unwrap();
        assert_eq!(context.dispatch_cache_size().get(), DEFAULT_DISPATCH_CACHE_SIZE);
        assert_eq!(context.thread_pool().current_num_threads(), 1);
    }
}
