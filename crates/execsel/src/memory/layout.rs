//! Physical layout tags and the index arithmetic behind them.
//!
//! Shapes are always expressed in logical order (`N, C, spatial...`). A [`LayoutTag`] decides
//! how that logical index space maps onto a flat buffer: plain row-major, channels moved
//! innermost, or channels split into fixed-size blocks with zero padding.

use std::fmt;

use super::shape::DimVec;

/// Physical arrangement of an operand's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutTag {
    /// Row-major over logical order (`abcd`, e.g. NCHW).
    Planar,
    /// Axis 1 moved innermost (`acdb`, e.g. NHWC). Requires rank >= 3.
    ChannelsLast,
    /// Axis 1 split into `ceil(C / block)` outer and `block` innermost elements (e.g. nChw8c).
    Blocked { block: usize },
}

impl LayoutTag {
    pub const NCHW8C: LayoutTag = LayoutTag::Blocked { block: 8 };
    pub const NCHW16C: LayoutTag = LayoutTag::Blocked { block: 16 };

    /// Whether the layout can describe a tensor of the given rank.
    pub fn is_applicable(self, rank: usize) -> bool {
        match self {
            LayoutTag::Planar => true,
            LayoutTag::ChannelsLast => rank >= 3,
            LayoutTag::Blocked { block } => rank >= 2 && block > 0,
        }
    }

    /// Extents of the physical (row-major) index space, padding included.
    pub fn physical_dims(self, dims: &[usize]) -> DimVec<usize> {
        match self {
            LayoutTag::Planar => dims.iter().copied().collect(),
            LayoutTag::ChannelsLast => {
                let mut physical: DimVec<usize> = DimVec::new();
                physical.push(dims[0]);
                physical.extend(dims[2..].iter().copied());
                physical.push(dims[1]);
                physical
            }
            LayoutTag::Blocked { block } => {
                let mut physical: DimVec<usize> = DimVec::new();
                physical.push(dims[0]);
                physical.push(dims[1].div_ceil(block));
                physical.extend(dims[2..].iter().copied());
                physical.push(block);
                physical
            }
        }
    }

    /// Number of elements the physical buffer holds, padding included. `None` on overflow.
    pub fn element_count(self, dims: &[usize]) -> Option<usize> {
        self.physical_dims(dims)
            .iter()
            .try_fold(1usize, |count, &extent| count.checked_mul(extent))
    }

    /// Flat element offset of a logical index.
    ///
    /// `dims` must be applicable to this layout and `index` must be in bounds.
    pub fn offset(self, dims: &[usize], index: &[usize]) -> usize {
        debug_assert_eq!(dims.len(), index.len());
        match self {
            LayoutTag::Planar => row_major_offset(dims, index),
            LayoutTag::ChannelsLast => {
                let mut offset = index[0];
                for axis in 2..dims.len() {
                    offset = offset * dims[axis] + index[axis];
                }
                offset * dims[1] + index[1]
            }
            LayoutTag::Blocked { block } => {
                let outer = dims[1].div_ceil(block);
                let mut offset = index[0] * outer + index[1] / block;
                for axis in 2..dims.len() {
                    offset = offset * dims[axis] + index[axis];
                }
                offset * block + index[1] % block
            }
        }
    }

    /// Whether every element of the physical buffer maps to a logical element.
    pub fn is_dense(self, dims: &[usize]) -> bool {
        match self {
            LayoutTag::Blocked { block } => dims.get(1).is_some_and(|c| c % block == 0),
            _ => true,
        }
    }
}

impl fmt::Display for LayoutTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutTag::Planar => f.write_str("planar"),
            LayoutTag::ChannelsLast => f.write_str("channels_last"),
            LayoutTag::Blocked { block } => write!(f, "blocked{block}"),
        }
    }
}

fn row_major_offset(dims: &[usize], index: &[usize]) -> usize {
    dims.iter()
        .zip(index.iter())
        .fold(0, |offset, (dim, idx)| offset * dim + idx)
}

/// Visits every logical index of `dims` in row-major order.
pub(crate) fn for_each_index<F>(dims: &[usize], mut visit: F)
where
    F: FnMut(&[usize]),
{
    if dims.iter().any(|&dim| dim == 0) {
        return;
    }
    let mut index: DimVec<usize> = DimVec::from_elem(0, dims.len());
    loop {
        visit(&index);
        let mut axis = dims.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}
