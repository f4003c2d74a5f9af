//! Logical operand shapes with static or dynamic extents.

use std::fmt;

use smallvec::SmallVec;

/// Inline capacity covering every rank the engine sees in practice.
pub(crate) const INLINE_RANK: usize = 6;

pub(crate) type DimVec<T> = SmallVec<[T; INLINE_RANK]>;

/// A single axis extent. Dynamic extents are only known once memory is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(usize),
    Dynamic,
}

impl Dim {
    pub fn as_static(self) -> Option<usize> {
        match self {
            Dim::Static(value) => Some(value),
            Dim::Dynamic => None,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Dim::Dynamic)
    }

    /// Whether a concrete extent is one of the values this dimension admits.
    pub fn admits(self, value: usize) -> bool {
        match self {
            Dim::Static(expected) => expected == value,
            Dim::Dynamic => true,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Static(value)
    }
}

/// Stores the logical dimensions of an operand, in logical (not physical) order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: DimVec<Dim>,
}

impl Shape {
    /// Constructs a fully static shape.
    pub fn new<D: AsRef<[usize]>>(dims: D) -> Self {
        Shape {
            dims: dims.as_ref().iter().copied().map(Dim::Static).collect(),
        }
    }

    /// Constructs a shape from possibly dynamic dimensions.
    pub fn from_dims<I>(dims: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Dim>,
    {
        Shape {
            dims: dims.into_iter().map(Into::into).collect(),
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, axis: usize) -> Option<Dim> {
        self.dims.get(axis).copied()
    }

    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|dim| !dim.is_dynamic())
    }

    /// Returns the concrete extents when every dimension is static.
    pub fn static_dims(&self) -> Option<DimVec<usize>> {
        self.dims.iter().map(|dim| dim.as_static()).collect()
    }

    /// Logical element count, without any layout padding.
    pub fn num_elements(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in self.dims.iter() {
            count = count.checked_mul(dim.as_static()?)?;
        }
        Some(count)
    }

    /// Whether `concrete` is one of the shapes this (possibly dynamic) shape stands for.
    pub fn is_compatible_with(&self, concrete: &Shape) -> bool {
        self.rank() == concrete.rank()
            && self
                .dims
                .iter()
                .zip(concrete.dims.iter())
                .all(|(pattern, value)| match value.as_static() {
                    Some(value) => pattern.admits(value),
                    None => pattern.is_dynamic(),
                })
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return f.write_str("[]");
        }
        f.write_str("[")?;
        for (index, dim) in self.dims.iter().enumerate() {
            if index > 0 {
                f.write_str("x")?;
            }
            match dim {
                Dim::Static(value) => write!(f, "{value}")?,
                Dim::Dynamic => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_shape_admits_matching_concrete_shapes() {
        let pattern = Shape::from_dims([Dim::Dynamic, Dim::Static(3)]);
        assert!(!pattern.is_static());
        assert!(pattern.is_compatible_with(&Shape::new([7, 3])));
        assert!(!pattern.is_compatible_with(&Shape::new([7, 4])));
        assert!(!pattern.is_compatible_with(&Shape::new([7, 3, 1])));
        assert_eq!(pattern.to_string(), "[?x3]");
    }

    #[test]
    fn num_elements_requires_static_dims() {
        assert_eq!(Shape::new([2, 3, 4]).num_elements(), Some(24));
        assert_eq!(Shape::from_dims([Dim::Static(2), Dim::Dynamic]).num_elements(), None);
    }
}
