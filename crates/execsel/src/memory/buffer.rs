//! Concrete operand buffers bound to a descriptor.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{ExecutorError, ExecutorResult};

use super::desc::{ArgPort, MemoryDesc, MemoryDescArgs};
use super::dtype::DType;
use super::layout::for_each_index;
use super::shape::DimVec;

/// Shared handle to an operand buffer.
pub type MemoryPtr = Arc<Memory>;

/// A byte buffer laid out according to its descriptor.
///
/// The buffer is sized for the physical layout, padding included, and padding bytes are kept
/// zeroed by every writer in this crate.
#[derive(Debug)]
pub struct Memory {
    desc: MemoryDesc,
    data: RwLock<Vec<u8>>,
}

impl Memory {
    /// Allocates a zero-filled buffer for a static descriptor.
    pub fn new(desc: MemoryDesc) -> ExecutorResult<Self> {
        let size = required_bytes(&desc)?;
        Ok(Memory {
            desc,
            data: RwLock::new(vec![0; size]),
        })
    }

    /// Wraps an existing buffer, reusing its allocation. The buffer is cleared and resized.
    pub fn from_buffer(desc: MemoryDesc, mut buffer: Vec<u8>) -> ExecutorResult<Self> {
        let size = required_bytes(&desc)?;
        buffer.clear();
        buffer.resize(size, 0);
        Ok(Memory {
            desc,
            data: RwLock::new(buffer),
        })
    }

    /// Builds an `F32` memory from values given in logical (row-major) order.
    pub fn from_f32(desc: MemoryDesc, values: &[f32]) -> ExecutorResult<Self> {
        let memory = Memory::new(desc)?;
        memory.write_f32(values)?;
        Ok(memory)
    }

    pub fn desc(&self) -> &MemoryDesc {
        &self.desc
    }

    pub fn byte_len(&self) -> usize {
        self.read_guard().len()
    }

    /// Runs `f` over the raw physical bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.read_guard();
        f(&guard)
    }

    /// Runs `f` over the raw physical bytes with write access.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Returns the buffer's elements in physical order, padding included.
    pub fn raw_f32(&self) -> ExecutorResult<Vec<f32>> {
        self.ensure_f32()?;
        Ok(self.with_bytes(bytes_to_f32))
    }

    /// Overwrites the buffer with elements given in physical order.
    pub fn write_raw_f32(&self, values: &[f32]) -> ExecutorResult<()> {
        self.ensure_f32()?;
        self.with_bytes_mut(|bytes| {
            if bytes.len() != values.len() * 4 {
                return Err(ExecutorError::memory(format!(
                    "raw write of {} elements into a {}-byte buffer ({})",
                    values.len(),
                    bytes.len(),
                    self.desc
                )));
            }
            for (chunk, value) in bytes.chunks_exact_mut(4).zip(values) {
                chunk.copy_from_slice(&value.to_ne_bytes());
            }
            Ok(())
        })
    }

    /// Returns the logical elements in row-major order, independent of the layout.
    pub fn read_f32(&self) -> ExecutorResult<Vec<f32>> {
        let dims = self.static_dims()?;
        let raw = self.raw_f32()?;
        let layout = self.desc.layout();
        let mut values = Vec::with_capacity(self.desc.shape().num_elements().unwrap_or(0));
        for_each_index(&dims, |index| values.push(raw[layout.offset(&dims, index)]));
        Ok(values)
    }

    /// Writes logical row-major values into their physical positions.
    pub fn write_f32(&self, values: &[f32]) -> ExecutorResult<()> {
        self.ensure_f32()?;
        let dims = self.static_dims()?;
        let expected = self.desc.shape().num_elements().unwrap_or(0);
        if values.len() != expected {
            return Err(ExecutorError::memory(format!(
                "expected {expected} logical values for {}, got {}",
                self.desc,
                values.len()
            )));
        }
        let layout = self.desc.layout();
        self.with_bytes_mut(|bytes| {
            bytes.fill(0);
            let mut next = values.iter();
            for_each_index(&dims, |index| {
                if let Some(value) = next.next() {
                    let offset = layout.offset(&dims, index) * 4;
                    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
                }
            });
        });
        Ok(())
    }

    /// Releases the underlying allocation so it can be recycled.
    pub fn into_buffer(self) -> Vec<u8> {
        self.data.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Vec<u8>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_f32(&self) -> ExecutorResult<()> {
        if self.desc.dtype() != DType::F32 {
            return Err(ExecutorError::memory(format!(
                "f32 access to {} memory",
                self.desc.dtype()
            )));
        }
        Ok(())
    }

    fn static_dims(&self) -> ExecutorResult<DimVec<usize>> {
        self.desc
            .shape()
            .static_dims()
            .ok_or_else(|| ExecutorError::memory(format!("memory {} is not static", self.desc)))
    }
}

/// Bytes needed to back `desc`, with a reason when it cannot be backed at all.
pub(crate) fn required_bytes(desc: &MemoryDesc) -> ExecutorResult<usize> {
    if !desc.is_well_formed() {
        return Err(ExecutorError::memory(format!(
            "layout {} cannot describe rank-{} shape",
            desc.layout(),
            desc.shape().rank()
        )));
    }
    if !desc.is_static() {
        return Err(ExecutorError::memory(format!(
            "cannot allocate memory for dynamic descriptor {desc}"
        )));
    }
    desc.byte_size()
        .ok_or_else(|| ExecutorError::memory(format!("{desc} does not fit in memory")))
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(chunk);
            f32::from_ne_bytes(raw)
        })
        .collect()
}

/// Concrete memory bound to each operand port of a node.
#[derive(Debug, Clone, Default)]
pub struct MemoryArgs {
    args: BTreeMap<ArgPort, MemoryPtr>,
}

impl MemoryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, port: ArgPort, memory: MemoryPtr) -> Self {
        self.insert(port, memory);
        self
    }

    pub fn insert(&mut self, port: ArgPort, memory: MemoryPtr) -> Option<MemoryPtr> {
        self.args.insert(port, memory)
    }

    pub fn get(&self, port: ArgPort) -> Option<&MemoryPtr> {
        self.args.get(&port)
    }

    /// Returns the memory bound to `port`, failing when the port is absent.
    pub fn require(&self, port: ArgPort) -> ExecutorResult<&MemoryPtr> {
        self.args
            .get(&port)
            .ok_or_else(|| ExecutorError::memory(format!("missing memory for port {port}")))
    }

    pub fn contains(&self, port: ArgPort) -> bool {
        self.args.contains_key(&port)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ArgPort, MemoryPtr> {
        self.args.iter()
    }

    /// Descriptor set matching the bound memory.
    pub fn descs(&self) -> MemoryDescArgs {
        self.args
            .iter()
            .map(|(port, memory)| (*port, memory.desc().clone()))
            .collect()
    }
}

impl FromIterator<(ArgPort, MemoryPtr)> for MemoryArgs {
    fn from_iter<T: IntoIterator<Item = (ArgPort, MemoryPtr)>>(iter: T) -> Self {
        MemoryArgs {
            args: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a MemoryArgs {
    type Item = (&'a ArgPort, &'a MemoryPtr);
    type IntoIter = btree_map::Iter<'a, ArgPort, MemoryPtr>;

    fn into_iter(self) -> Self::IntoIter {
        self.args.iter()
    }
}
