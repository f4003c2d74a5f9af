//! Layout conversion between two memories holding the same logical tensor.

use thiserror::Error;

use super::buffer::Memory;
use super::desc::MemoryDesc;
use super::dtype::DType;
use super::layout::for_each_index;
use super::shape::Shape;

/// Reasons a reorder cannot produce the destination layout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReorderError {
    #[error("element type {src} cannot be reordered into {dst}")]
    DTypeMismatch { src: DType, dst: DType },
    #[error("logical shape {src} does not match {dst}")]
    ShapeMismatch { src: Shape, dst: Shape },
    #[error("descriptor {0} is not static")]
    DynamicShape(MemoryDesc),
    #[error("layout of {0} is not applicable to its rank")]
    MalformedLayout(MemoryDesc),
    #[error("buffer of {actual} bytes is smaller than the {required} bytes {desc} needs")]
    BufferTooSmall {
        desc: MemoryDesc,
        required: usize,
        actual: usize,
    },
}

/// Checks that `src` can be reordered into `dst`.
pub fn check_reorder(src: &MemoryDesc, dst: &MemoryDesc) -> Result<(), ReorderError> {
    if src.dtype() != dst.dtype() {
        return Err(ReorderError::DTypeMismatch {
            src: src.dtype(),
            dst: dst.dtype(),
        });
    }
    if src.shape() != dst.shape() {
        return Err(ReorderError::ShapeMismatch {
            src: src.shape().clone(),
            dst: dst.shape().clone(),
        });
    }
    for desc in [src, dst] {
        if !desc.is_static() {
            return Err(ReorderError::DynamicShape(desc.clone()));
        }
        if !desc.is_well_formed() {
            return Err(ReorderError::MalformedLayout(desc.clone()));
        }
    }
    Ok(())
}

/// Copies every logical element of `src` into its position in `dst`.
///
/// Identical layouts degrade to a plain copy. Padding in the destination is zeroed.
pub fn reorder(src: &Memory, dst: &Memory) -> Result<(), ReorderError> {
    let (src_desc, dst_desc) = (src.desc(), dst.desc());
    check_reorder(src_desc, dst_desc)?;

    if std::ptr::eq(src, dst) {
        return Ok(());
    }

    src.with_bytes(|src_bytes| {
        dst.with_bytes_mut(|dst_bytes| reorder_bytes(src_desc, src_bytes, dst_desc, dst_bytes))
    })
}

fn reorder_bytes(
    src_desc: &MemoryDesc,
    src: &[u8],
    dst_desc: &MemoryDesc,
    dst: &mut [u8],
) -> Result<(), ReorderError> {
    for (desc, actual) in [(src_desc, src.len()), (dst_desc, dst.len())] {
        let required = desc.byte_size().unwrap_or(0);
        if actual < required {
            return Err(ReorderError::BufferTooSmall {
                desc: desc.clone(),
                required,
                actual,
            });
        }
    }

    if src_desc.layout() == dst_desc.layout() {
        let len = dst_desc.byte_size().unwrap_or(0);
        dst[..len].copy_from_slice(&src[..len]);
        return Ok(());
    }

    let Some(dims) = src_desc.shape().static_dims() else {
        return Err(ReorderError::DynamicShape(src_desc.clone()));
    };
    let elem = src_desc.dtype().size_in_bytes();
    let (src_layout, dst_layout) = (src_desc.layout(), dst_desc.layout());

    if !dst_layout.is_dense(&dims) {
        dst.fill(0);
    }
    for_each_index(&dims, |index| {
        let from = src_layout.offset(&dims, index) * elem;
        let to = dst_layout.offset(&dims, index) * elem;
        dst[to..to + elem].copy_from_slice(&src[from..from + elem]);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LayoutTag;

    fn iota(count: usize) -> Vec<f32> {
        (0..count).map(|value| value as f32).collect()
    }

    #[test]
    fn planar_to_channels_last_and_back_preserves_values() {
        let dims = [2, 3, 2, 2];
        let values = iota(24);
        let planar = Memory::from_f32(MemoryDesc::planar(DType::F32, dims), &values).unwrap();
        let nhwc =
            Memory::new(MemoryDesc::new(DType::F32, dims, LayoutTag::ChannelsLast)).unwrap();

        reorder(&planar, &nhwc).unwrap();
        assert_eq!(nhwc.read_f32().unwrap(), values);
        // first pixel holds the three channels contiguously
        assert_eq!(&nhwc.raw_f32().unwrap()[..3], &[0.0, 4.0, 8.0]);

        let back = Memory::new(MemoryDesc::planar(DType::F32, dims)).unwrap();
        reorder(&nhwc, &back).unwrap();
        assert_eq!(back.raw_f32().unwrap(), values);
    }

    #[test]
    fn blocked_destination_keeps_padding_zeroed() {
        let dims = [1, 3, 1, 1];
        let src = Memory::from_f32(MemoryDesc::planar(DType::F32, dims), &[1.0, 2.0, 3.0]).unwrap();
        let dst = Memory::new(MemoryDesc::new(DType::F32, dims, LayoutTag::NCHW8C)).unwrap();
        dst.write_raw_f32(&[9.0; 8]).unwrap();

        reorder(&src, &dst).unwrap();
        assert_eq!(
            dst.raw_f32().unwrap(),
            vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn mismatched_descriptors_are_rejected() {
        let src = MemoryDesc::planar(DType::F32, [2, 2]);
        assert!(matches!(
            check_reorder(&src, &src.with_dtype(DType::F16)),
            Err(ReorderError::DTypeMismatch { .. })
        ));
        assert!(matches!(
            check_reorder(&src, &src.with_shape([4])),
            Err(ReorderError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            check_reorder(&src, &src.with_layout(LayoutTag::ChannelsLast)),
            Err(ReorderError::MalformedLayout(_))
        ));
    }
}
