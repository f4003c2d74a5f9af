//! Memory descriptors and operand port bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

use super::dtype::DType;
use super::layout::LayoutTag;
use super::shape::Shape;

/// Positional operand slot of a node. Ordering is stable: sources, weights, bias, then outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgPort {
    Src(u8),
    Weights,
    Bias,
    Dst(u8),
}

impl ArgPort {
    pub const SRC: ArgPort = ArgPort::Src(0);
    pub const DST: ArgPort = ArgPort::Dst(0);

    pub fn is_output(self) -> bool {
        matches!(self, ArgPort::Dst(_))
    }

    pub fn is_input(self) -> bool {
        !self.is_output()
    }
}

impl fmt::Display for ArgPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgPort::Src(index) => write!(f, "src{index}"),
            ArgPort::Weights => f.write_str("wei"),
            ArgPort::Bias => f.write_str("bias"),
            ArgPort::Dst(index) => write!(f, "dst{index}"),
        }
    }
}

/// Describes one operand: element type, logical shape and physical layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryDesc {
    dtype: DType,
    shape: Shape,
    layout: LayoutTag,
}

impl MemoryDesc {
    pub fn new(dtype: DType, shape: impl Into<Shape>, layout: LayoutTag) -> Self {
        MemoryDesc {
            dtype,
            shape: shape.into(),
            layout,
        }
    }

    /// Shorthand for a row-major descriptor.
    pub fn planar(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self::new(dtype, shape, LayoutTag::Planar)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn layout(&self) -> LayoutTag {
        self.layout
    }

    pub fn with_layout(&self, layout: LayoutTag) -> Self {
        MemoryDesc {
            layout,
            ..self.clone()
        }
    }

    pub fn with_shape(&self, shape: impl Into<Shape>) -> Self {
        MemoryDesc {
            shape: shape.into(),
            ..self.clone()
        }
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        MemoryDesc {
            dtype,
            ..self.clone()
        }
    }

    pub fn is_static(&self) -> bool {
        self.shape.is_static()
    }

    /// Whether the layout tag can describe this descriptor's rank.
    pub fn is_well_formed(&self) -> bool {
        self.layout.is_applicable(self.shape.rank())
    }

    /// Physical element count, padding included.
    ///
    /// `None` for dynamic shapes, layouts the rank cannot take, and counts overflowing `usize`.
    pub fn element_count(&self) -> Option<usize> {
        let dims = self.shape.static_dims()?;
        if !self.is_well_formed() {
            return None;
        }
        self.layout.element_count(&dims)
    }

    /// Physical byte size, padding included. `None` whenever [`MemoryDesc::element_count`] is.
    pub fn byte_size(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }
}

impl fmt::Display for MemoryDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", self.dtype, self.shape, self.layout)
    }
}

/// Ordered mapping from operand port to descriptor.
pub type MemoryDescArgs = BTreeMap<ArgPort, MemoryDesc>;

/// Display adapter used by log lines and error messages.
pub struct DescsDisplay<'a>(pub &'a MemoryDescArgs);

impl fmt::Display for DescsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (port, desc)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{port}:{desc}")?;
        }
        Ok(())
    }
}
