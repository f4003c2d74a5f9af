//! 2D max/average pooling without padding.
//!
//! The only kernel reads and writes channels-last buffers. Operands in any other layout go
//! through a fallback that reorders them around the kernel.

use anyhow::{ensure, Result};
use execsel::executor::{
    Attributes, Executor, ExecutorConfig, ExecutorContextPtr, FallbackConfig, ImplKind,
    Implementation, LayoutConstraints, RegistryBuilder,
};
use execsel::memory::{ArgPort, Dim, LayoutTag, MemoryArgs};
use execsel::ExecutorResult;
use rayon::prelude::*;

use crate::kernel::{all_f32, concrete_dims, dims_agree, f32_operand};

pub const POOL_NHWC: &str = "pool_nhwc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingAttrs {
    pub kind: PoolKind,
    /// Window extent as `[height, width]`.
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
}

impl PoolingAttrs {
    pub fn new(kind: PoolKind, kernel: [usize; 2], stride: [usize; 2]) -> Self {
        PoolingAttrs {
            kind,
            kernel,
            stride,
        }
    }

    /// Output extent along spatial `axis` (0 = height) for an input extent.
    pub fn output_extent(&self, axis: usize, input: usize) -> Option<usize> {
        let (kernel, stride) = (self.kernel[axis], self.stride[axis]);
        if kernel == 0 || stride == 0 || input < kernel {
            return None;
        }
        Some((input - kernel) / stride + 1)
    }
}

impl Attributes for PoolingAttrs {
    const KEY: &'static str = "pooling";
}

pub(crate) fn register(builder: &mut RegistryBuilder) -> ExecutorResult<()> {
    builder.register::<PoolingAttrs, _>(
        Implementation::new(POOL_NHWC, |attrs: &PoolingAttrs, _, context| {
            let executor: Box<dyn Executor> = Box::new(PoolingExecutor {
                attrs: attrs.clone(),
                context: context.clone(),
            });
            Ok(executor)
        })
        .with_kind(ImplKind::Reference)
        .with_shape_agnostic(true)
        .with_supports(supports)
        .with_fallback(|config| {
            FallbackConfig::relayout(config.descs, |_, _| LayoutTag::ChannelsLast)
        }),
    )?;
    Ok(())
}

fn supports(config: &ExecutorConfig<'_, PoolingAttrs>, constraints: &LayoutConstraints) -> bool {
    let (Some(src), Some(dst)) = (config.desc(ArgPort::SRC), config.desc(ArgPort::DST)) else {
        return false;
    };
    if src.shape().rank() != 4 || dst.shape().rank() != 4 || config.all_descs().count() != 2 {
        return false;
    }

    let attrs = config.attrs;
    let window_ok = attrs.kernel.iter().chain(&attrs.stride).all(|&extent| extent > 0);
    let spatial_ok = (0..2).all(|axis| match src.shape().dim(axis + 2) {
        Some(Dim::Static(input)) => match attrs.output_extent(axis, input) {
            Some(output) => dims_agree(Some(Dim::Static(output)), dst.shape().dim(axis + 2)),
            None => false,
        },
        _ => true,
    });

    window_ok
        && spatial_ok
        && dims_agree(src.shape().dim(0), dst.shape().dim(0))
        && dims_agree(src.shape().dim(1), dst.shape().dim(1))
        && all_f32(config)
        && constraints.admits(config.descs)
}

struct PoolingExecutor {
    attrs: PoolingAttrs,
    context: ExecutorContextPtr,
}

/// Logical `[N, C, H, W]` extents of input and output.
struct PoolGeometry {
    batch: usize,
    channels: usize,
    input: [usize; 2],
    output: [usize; 2],
}

impl PoolingExecutor {
    fn geometry(&self, memory: &MemoryArgs) -> Result<PoolGeometry> {
        let src = f32_operand(memory, ArgPort::SRC)?;
        let dst = f32_operand(memory, ArgPort::DST)?;
        ensure!(
            src.desc().layout() == LayoutTag::ChannelsLast
                && dst.desc().layout() == LayoutTag::ChannelsLast,
            "{POOL_NHWC} runs on channels_last operands only"
        );

        let src_dims = concrete_dims(src.desc())?;
        let dst_dims = concrete_dims(dst.desc())?;
        ensure!(
            src_dims.len() == 4 && dst_dims.len() == 4,
            "pooling expects rank-4 operands"
        );

        let mut output = [0; 2];
        for (axis, extent) in output.iter_mut().enumerate() {
            let input = src_dims[axis + 2];
            *extent = self.attrs.output_extent(axis, input).ok_or_else(|| {
                anyhow::anyhow!("pooling window does not fit input extent {input}")
            })?;
        }
        let expected = [src_dims[0], src_dims[1], output[0], output[1]];
        ensure!(
            dst_dims == expected,
            "pooling output must be {expected:?}, got {dst_dims:?}"
        );

        Ok(PoolGeometry {
            batch: src_dims[0],
            channels: src_dims[1],
            input: [src_dims[2], src_dims[3]],
            output,
        })
    }

    fn run(&self, memory: &MemoryArgs) -> Result<()> {
        let geometry = self.geometry(memory)?;
        let src = f32_operand(memory, ArgPort::SRC)?.raw_f32()?;
        let dst = f32_operand(memory, ArgPort::DST)?;

        let kernel = PoolKernel {
            attrs: &self.attrs,
            src: &src,
            geometry: &geometry,
        };
        let [out_h, out_w] = geometry.output;
        let row_len = out_w * geometry.channels;
        let mut out = vec![0.0f32; geometry.batch * out_h * row_len];
        if row_len > 0 {
            self.context.install(|| {
                out.par_chunks_mut(row_len)
                    .enumerate()
                    .for_each(|(row, out_row)| kernel.row(row / out_h, row % out_h, out_row));
            });
        }
        dst.write_raw_f32(&out)?;
        Ok(())
    }
}

/// Pooling over one channels-last input buffer.
struct PoolKernel<'a> {
    attrs: &'a PoolingAttrs,
    src: &'a [f32],
    geometry: &'a PoolGeometry,
}

impl PoolKernel<'_> {
    /// Fills output row `oh` of image `n`: `out_w * channels` values.
    fn row(&self, n: usize, oh: usize, out: &mut [f32]) {
        let channels = self.geometry.channels;
        for (index, value) in out.iter_mut().enumerate() {
            *value = self.window(n, oh, index / channels, index % channels);
        }
    }

    fn window(&self, n: usize, oh: usize, ow: usize, c: usize) -> f32 {
        let [in_h, in_w] = self.geometry.input;
        let [kernel_h, kernel_w] = self.attrs.kernel;
        let [stride_h, stride_w] = self.attrs.stride;
        let channels = self.geometry.channels;

        let values = (0..kernel_h).flat_map(|kh| {
            let ih = oh * stride_h + kh;
            (0..kernel_w).map(move |kw| {
                let iw = ow * stride_w + kw;
                self.src[((n * in_h + ih) * in_w + iw) * channels + c]
            })
        });
        match self.attrs.kind {
            PoolKind::Max => values.fold(f32::NEG_INFINITY, f32::max),
            PoolKind::Avg => values.sum::<f32>() / (kernel_h * kernel_w) as f32,
        }
    }
}

impl Executor for PoolingExecutor {
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool> {
        Ok(self.geometry(memory).is_ok())
    }

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()> {
        tracing::trace!(implementation = POOL_NHWC, kind = ?self.attrs.kind, "pooling");
        self.run(memory)?;
        Ok(())
    }

    fn implementation_name(&self) -> &str {
        POOL_NHWC
    }
}
