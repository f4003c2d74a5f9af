#![allow(dead_code)]

use std::sync::Arc;

use execsel::config::ContextConfig;
use execsel::executor::{ExecutorContext, ExecutorContextPtr};
use execsel::memory::{ArgPort, DType, LayoutTag, Memory, MemoryArgs, MemoryDesc, MemoryPtr};

pub fn context() -> ExecutorContextPtr {
    context_with(ContextConfig::default())
}

pub fn context_with(config: ContextConfig) -> ExecutorContextPtr {
    ExecutorContext::new(config.with_num_threads(2)).expect("context should build")
}

/// `f32` memory holding `values` in logical row-major order.
pub fn filled(dims: &[usize], layout: LayoutTag, values: &[f32]) -> MemoryPtr {
    let desc = MemoryDesc::new(DType::F32, dims, layout);
    Arc::new(Memory::from_f32(desc, values).expect("memory should allocate"))
}

pub fn zeroed(dims: &[usize], layout: LayoutTag) -> MemoryPtr {
    let desc = MemoryDesc::new(DType::F32, dims, layout);
    Arc::new(Memory::new(desc).expect("memory should allocate"))
}

/// `count` distinct values around zero, so that relu and max both have work to do.
pub fn ramp(count: usize) -> Vec<f32> {
    (0..count).map(|i| (i as f32 - 5.0) * 0.5).collect()
}

pub fn logical(memory: &MemoryArgs, port: ArgPort) -> Vec<f32> {
    memory
        .get(port)
        .expect("port should be bound")
        .read_f32()
        .expect("memory should be readable")
}

/// Copies `memory` with every operand converted to `layout`.
pub fn relaid(memory: &MemoryArgs, layout: LayoutTag) -> MemoryArgs {
    memory
        .iter()
        .map(|(port, operand)| {
            let dims = operand
                .desc()
                .shape()
                .static_dims()
                .expect("operands are concrete");
            let values = operand.read_f32().expect("memory should be readable");
            (*port, filled(&dims, layout, &values))
        })
        .collect()
}

pub fn naive_matmul(
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    [m, k, n]: [usize; 3],
    transpose_b: bool,
) -> Vec<f32> {
    let mut out = vec![0.0; m * n];
    for row in 0..m {
        for col in 0..n {
            let mut acc = bias.map_or(0.0, |bias| bias[col]);
            for kk in 0..k {
                let weight = if transpose_b {
                    weights[col * k + kk]
                } else {
                    weights[kk * n + col]
                };
                acc += src[row * k + kk] * weight;
            }
            out[row * n + col] = acc;
        }
    }
    out
}

/// Max pooling over a logical NCHW tensor with a square window equal to the stride.
pub fn naive_max_pool(src: &[f32], [n, c, h, w]: [usize; 4], window: usize) -> Vec<f32> {
    let (out_h, out_w) = (h / window, w / window);
    let mut out = Vec::with_capacity(n * c * out_h * out_w);
    for image in 0..n {
        for channel in 0..c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut best = f32::NEG_INFINITY;
                    for kh in 0..window {
                        for kw in 0..window {
                            let (ih, iw) = (oh * window + kh, ow * window + kw);
                            best = best.max(src[((image * c + channel) * h + ih) * w + iw]);
                        }
                    }
                    out.push(best);
                }
            }
        }
    }
    out
}
