//! Matrix multiplication: `dst[M, N] = src[M, K] x weights (+ bias[N])`.
//!
//! Weights are `[K, N]`, or `[N, K]` with `transpose_b`. Both kernels work on planar buffers.
//! The tiled kernel handles 4x4 output tiles and needs every extent to be a multiple of four;
//! the reference kernel takes any shape and asks for a planar fallback otherwise.

use anyhow::{ensure, Result};
use execsel::executor::{
    Attributes, Executor, ExecutorConfig, ExecutorContextPtr, FallbackConfig, ImplKind,
    Implementation, LayoutConstraints, RegistryBuilder,
};
use execsel::memory::{ArgPort, LayoutTag, MemoryArgs, MemoryDesc};
use execsel::ExecutorResult;
use rayon::prelude::*;

use crate::kernel::{all_f32, concrete_dims, dims_agree, f32_operand};

pub const MATMUL_TILED: &str = "matmul_tiled";
pub const MATMUL_REF: &str = "matmul_ref";

const TILE: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatMulAttrs {
    pub transpose_b: bool,
}

impl Attributes for MatMulAttrs {
    const KEY: &'static str = "matmul";
}

pub(crate) fn register(builder: &mut RegistryBuilder) -> ExecutorResult<()> {
    builder
        .register::<MatMulAttrs, _>(
            Implementation::new(MATMUL_TILED, |attrs: &MatMulAttrs, _, context| {
                Ok(MatMulExecutor::boxed(MATMUL_TILED, attrs, true, context))
            })
            .with_kind(ImplKind::Jit)
            .with_supports(supports_tiled)
            .with_accepts_shapes(|memory| {
                memory
                    .iter()
                    .filter(|(port, _)| **port != ArgPort::Bias)
                    .all(|(_, operand)| extents_tile(operand.desc(), false))
            }),
        )?
        .register::<MatMulAttrs, _>(
            Implementation::new(MATMUL_REF, |attrs: &MatMulAttrs, _, context| {
                Ok(MatMulExecutor::boxed(MATMUL_REF, attrs, false, context))
            })
            .with_kind(ImplKind::Reference)
            .with_shape_agnostic(true)
            .with_supports(|config, constraints| {
                operands_match(config) && constraints.admits(config.descs)
            })
            .with_fallback(|config| {
                FallbackConfig::relayout(config.descs, |_, _| LayoutTag::Planar)
            }),
        )?;
    Ok(())
}

fn operands_match(config: &ExecutorConfig<'_, MatMulAttrs>) -> bool {
    let (Some(src), Some(weights), Some(dst)) = (
        config.desc(ArgPort::SRC),
        config.desc(ArgPort::Weights),
        config.desc(ArgPort::DST),
    ) else {
        return false;
    };
    if [src, weights, dst].iter().any(|desc| desc.shape().rank() != 2) {
        return false;
    }

    let (k_axis, n_axis) = if config.attrs.transpose_b { (1, 0) } else { (0, 1) };
    let n = dst.shape().dim(1);
    let bias_ok = config.desc(ArgPort::Bias).is_none_or(|bias| {
        bias.shape().rank() == 1 && dims_agree(bias.shape().dim(0), n)
    });

    dims_agree(src.shape().dim(1), weights.shape().dim(k_axis))
        && dims_agree(src.shape().dim(0), dst.shape().dim(0))
        && dims_agree(weights.shape().dim(n_axis), n)
        && bias_ok
        && all_f32(config)
}

/// Whether every extent of `desc` is a tile multiple; dynamic extents count as `optimistic`.
fn extents_tile(desc: &MemoryDesc, optimistic: bool) -> bool {
    desc.shape().dims().iter().all(|dim| match dim.as_static() {
        Some(extent) => extent % TILE == 0,
        None => optimistic,
    })
}

fn supports_tiled(
    config: &ExecutorConfig<'_, MatMulAttrs>,
    constraints: &LayoutConstraints,
) -> bool {
    // Unknown extents are left to `accepts_shapes`.
    let tiles = config
        .all_descs()
        .all(|(port, desc)| port == ArgPort::Bias || extents_tile(desc, true));
    operands_match(config)
        && tiles
        && config.all_in_layout(LayoutTag::Planar)
        && constraints.admits(config.descs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatMulDims {
    m: usize,
    k: usize,
    n: usize,
}

impl MatMulDims {
    fn resolve(memory: &MemoryArgs, transpose_b: bool) -> Result<Self> {
        let src = concrete_dims(f32_operand(memory, ArgPort::SRC)?.desc())?;
        let weights = concrete_dims(f32_operand(memory, ArgPort::Weights)?.desc())?;
        let dst = concrete_dims(f32_operand(memory, ArgPort::DST)?.desc())?;
        ensure!(
            src.len() == 2 && weights.len() == 2 && dst.len() == 2,
            "matmul expects rank-2 operands"
        );

        let (m, k) = (src[0], src[1]);
        let (weights_k, n) = if transpose_b {
            (weights[1], weights[0])
        } else {
            (weights[0], weights[1])
        };
        ensure!(k == weights_k, "matmul contraction mismatch: {k} vs {weights_k}");
        ensure!(
            dst == [m, n],
            "matmul output must be [{m}, {n}], got {dst:?}"
        );
        if let Some(bias) = memory.get(ArgPort::Bias) {
            ensure!(
                concrete_dims(bias.desc())? == [n],
                "matmul bias must have {n} elements"
            );
        }
        Ok(MatMulDims { m, k, n })
    }

    fn tiles(self) -> bool {
        self.m % TILE == 0 && self.k % TILE == 0 && self.n % TILE == 0
    }
}

struct MatMulExecutor {
    name: &'static str,
    transpose_b: bool,
    tiled: bool,
    context: ExecutorContextPtr,
}

impl MatMulExecutor {
    fn boxed(
        name: &'static str,
        attrs: &MatMulAttrs,
        tiled: bool,
        context: &ExecutorContextPtr,
    ) -> Box<dyn Executor> {
        Box::new(MatMulExecutor {
            name,
            transpose_b: attrs.transpose_b,
            tiled,
            context: context.clone(),
        })
    }

    fn run(&self, memory: &MemoryArgs) -> Result<()> {
        let dims = MatMulDims::resolve(memory, self.transpose_b)?;
        let src = f32_operand(memory, ArgPort::SRC)?.raw_f32()?;
        let weights = f32_operand(memory, ArgPort::Weights)?.raw_f32()?;
        let bias = match memory.get(ArgPort::Bias) {
            Some(_) => Some(f32_operand(memory, ArgPort::Bias)?.raw_f32()?),
            None => None,
        };
        let dst = f32_operand(memory, ArgPort::DST)?;

        let mut out = vec![0.0f32; dims.m * dims.n];
        if dims.n > 0 {
            let kernel = Kernel {
                dims,
                src: &src,
                weights: &weights,
                bias: bias.as_deref(),
                transpose_b: self.transpose_b,
            };
            if self.tiled {
                ensure!(dims.tiles(), "{} needs extents divisible by {TILE}", self.name);
                self.context.install(|| {
                    out.par_chunks_mut(TILE * dims.n)
                        .enumerate()
                        .for_each(|(block, rows)| kernel.tile_rows(block * TILE, rows));
                });
            } else {
                self.context.install(|| {
                    out.par_chunks_mut(dims.n)
                        .enumerate()
                        .for_each(|(row, out_row)| kernel.row(row, out_row));
                });
            }
        }
        dst.write_raw_f32(&out)?;
        Ok(())
    }
}

/// Borrowed operands of one multiplication.
struct Kernel<'a> {
    dims: MatMulDims,
    src: &'a [f32],
    weights: &'a [f32],
    bias: Option<&'a [f32]>,
    transpose_b: bool,
}

impl Kernel<'_> {
    fn weight(&self, kk: usize, col: usize) -> f32 {
        if self.transpose_b {
            self.weights[col * self.dims.k + kk]
        } else {
            self.weights[kk * self.dims.n + col]
        }
    }

    fn init(&self, col: usize) -> f32 {
        self.bias.map_or(0.0, |bias| bias[col])
    }

    fn row(&self, row: usize, out: &mut [f32]) {
        let k = self.dims.k;
        for (col, value) in out.iter_mut().enumerate() {
            let mut acc = self.init(col);
            for kk in 0..k {
                acc += self.src[row * k + kk] * self.weight(kk, col);
            }
            *value = acc;
        }
    }

    /// Fills `TILE` output rows starting at `row0`, one 4x4 tile at a time.
    fn tile_rows(&self, row0: usize, out: &mut [f32]) {
        let MatMulDims { k, n, .. } = self.dims;
        for col0 in (0..n).step_by(TILE) {
            let mut acc = [[0.0f32; TILE]; TILE];
            for acc_row in acc.iter_mut() {
                for (c, value) in acc_row.iter_mut().enumerate() {
                    *value = self.init(col0 + c);
                }
            }
            for kk in 0..k {
                for (r, acc_row) in acc.iter_mut().enumerate() {
                    let a = self.src[(row0 + r) * k + kk];
                    for (c, value) in acc_row.iter_mut().enumerate() {
                        *value += a * self.weight(kk, col0 + c);
                    }
                }
            }
            for (r, acc_row) in acc.iter().enumerate() {
                out[r * n + col0..r * n + col0 + TILE].copy_from_slice(acc_row);
            }
        }
    }
}

impl Executor for MatMulExecutor {
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool> {
        let planar = memory
            .iter()
            .all(|(_, operand)| operand.desc().layout() == LayoutTag::Planar);
        let runnable = MatMulDims::resolve(memory, self.transpose_b)
            .is_ok_and(|dims| !self.tiled || dims.tiles());
        Ok(planar && runnable)
    }

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()> {
        tracing::trace!(implementation = self.name, "matmul");
        self.run(memory)?;
        Ok(())
    }

    fn implementation_name(&self) -> &str {
        self.name
    }
}
