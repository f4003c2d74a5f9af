//! Process-wide catalogue of implementations, one priority-ordered bucket per attribute type.
//!
//! Buckets are filled through a [`RegistryBuilder`] and frozen by [`RegistryBuilder::build`];
//! after that the registry is read-only and can be shared freely between threads. Order of
//! registration is priority order: the first entry is the most preferred.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ExecutorError, ExecutorResult};

use super::implementation::{Attributes, ExecutorImplementation, IntoImplementation};

/// Implementations registered for one attribute type.
struct Bucket<A: Attributes> {
    implementations: Vec<Box<dyn ExecutorImplementation<A>>>,
}

impl<A: Attributes> Bucket<A> {
    fn new() -> Self {
        Bucket {
            implementations: Vec::new(),
        }
    }
}

struct BucketEntry {
    key: &'static str,
    bucket: Box<dyn Any + Send + Sync>,
}

/// Collects implementations before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    buckets: HashMap<TypeId, BucketEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `implementation` to the bucket of `A`, after everything registered so far.
    ///
    /// Names must be unique within a bucket.
    pub fn register<A, I>(&mut self, implementation: I) -> ExecutorResult<&mut Self>
    where
        A: Attributes,
        I: IntoImplementation<A>,
    {
        let implementation = implementation.into_impl();
        let bucket = self.ensure_bucket::<A>();
        if bucket
            .implementations
            .iter()
            .any(|candidate| candidate.name() == implementation.name())
        {
            return Err(ExecutorError::DuplicateImplementation {
                op: A::KEY,
                name: implementation.name().to_string(),
            });
        }

        tracing::trace!(
            op = A::KEY,
            implementation = implementation.name(),
            priority = bucket.implementations.len(),
            "registered implementation"
        );
        bucket.implementations.push(implementation);
        Ok(self)
    }

    /// Freezes the collected buckets.
    pub fn build(self) -> ImplementationRegistry {
        ImplementationRegistry {
            buckets: self.buckets,
        }
    }

    fn ensure_bucket<A: Attributes>(&mut self) -> &mut Bucket<A> {
        let entry = self
            .buckets
            .entry(TypeId::of::<A>())
            .or_insert_with(|| BucketEntry {
                key: A::KEY,
                bucket: Box::new(Bucket::<A>::new()),
            });
        match entry.bucket.downcast_mut::<Bucket<A>>() {
            Some(bucket) => bucket,
            None => unreachable!("registry bucket stored with wrong type"),
        }
    }
}

/// Read-only registry shared by every factory of a process.
pub struct ImplementationRegistry {
    buckets: HashMap<TypeId, BucketEntry>,
}

impl ImplementationRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Priority-ordered implementations for `A`; empty when none were registered.
    pub fn implementations_for<A: Attributes>(&self) -> &[Box<dyn ExecutorImplementation<A>>] {
        self.buckets
            .get(&TypeId::of::<A>())
            .and_then(|entry| entry.bucket.downcast_ref::<Bucket<A>>())
            .map(|bucket| bucket.implementations.as_slice())
            .unwrap_or(&[])
    }

    pub fn names_for<A: Attributes>(&self) -> Vec<&str> {
        self.implementations_for::<A>()
            .iter()
            .map(|implementation| implementation.name())
            .collect()
    }

    pub fn len_for<A: Attributes>(&self) -> usize {
        self.implementations_for::<A>().len()
    }

    /// Attribute keys that have at least one implementation, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.buckets.values().map(|entry| entry.key).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for ImplementationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
