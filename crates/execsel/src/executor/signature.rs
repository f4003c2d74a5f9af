//! Shape signatures used to memoize dispatch decisions.
//!
//! A signature records every bound port together with its dtype, concrete dims and layout, so
//! two calls share a signature exactly when their operands are interchangeable for selection.
//! The 64-bit digest only speeds up hashing and display; equality compares the operands.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::memory::{ArgPort, MemoryArgs, MemoryDesc, MemoryDescArgs};

/// One combination of operand shapes and layouts.
#[derive(Clone, Debug)]
pub struct ShapeSignature {
    digest: u64,
    operands: Arc<[(ArgPort, MemoryDesc)]>,
}

impl ShapeSignature {
    /// Signature of the memory bound for a call.
    pub fn of(memory: &MemoryArgs) -> Self {
        Self::from_operands(
            memory
                .iter()
                .map(|(port, memory)| (*port, memory.desc().clone()))
                .collect(),
        )
    }

    /// Signature of a descriptor set; equal to [`ShapeSignature::of`] for matching memory.
    pub fn of_descs(descs: &MemoryDescArgs) -> Self {
        Self::from_operands(
            descs
                .iter()
                .map(|(port, desc)| (*port, desc.clone()))
                .collect(),
        )
    }

    fn from_operands(operands: Arc<[(ArgPort, MemoryDesc)]>) -> Self {
        let mut hasher = DefaultHasher::new();
        for (port, desc) in operands.iter() {
            port.hash(&mut hasher);
            desc.dtype().hash(&mut hasher);
            desc.shape().dims().hash(&mut hasher);
            desc.layout().hash(&mut hasher);
        }
        ShapeSignature {
            digest: hasher.finish(),
            operands,
        }
    }

    /// Digest shown in logs. Distinct signatures may share it.
    pub fn value(&self) -> u64 {
        self.digest
    }
}

impl PartialEq for ShapeSignature {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.operands == other.operands
    }
}

impl Eq for ShapeSignature {}

impl Hash for ShapeSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.digest)
    }
}
