//! Elementwise kernels.
//!
//! Every operand of an elementwise node shares one layout, so the kernels walk the physical
//! buffers directly; zero padding stays zero under every supported operation.

use anyhow::{ensure, Result};
use execsel::executor::{
    Attributes, Executor, ExecutorConfig, ExecutorContextPtr, ImplKind, Implementation,
    LayoutConstraints, RegistryBuilder,
};
use execsel::memory::{ArgPort, LayoutTag, MemoryArgs};
use execsel::ExecutorResult;
use rayon::prelude::*;

use crate::kernel::{all_f32, f32_operand, memory_dim, static_dim};

pub const ELTWISE_BLOCKED: &str = "eltwise_blocked";
pub const ELTWISE_ANY_LAYOUT: &str = "eltwise_any_layout";

/// Channel block the blocked kernel is written for.
const BLOCK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EltwiseOp {
    Relu,
    Add,
    Mul,
    Scale(f32),
}

impl EltwiseOp {
    /// Number of `src` operands consumed.
    pub fn arity(self) -> usize {
        match self {
            EltwiseOp::Add | EltwiseOp::Mul => 2,
            EltwiseOp::Relu | EltwiseOp::Scale(_) => 1,
        }
    }

    fn apply(self, lhs: f32, rhs: f32) -> f32 {
        match self {
            EltwiseOp::Relu => lhs.max(0.0),
            EltwiseOp::Add => lhs + rhs,
            EltwiseOp::Mul => lhs * rhs,
            EltwiseOp::Scale(factor) => lhs * factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EltwiseAttrs {
    pub op: EltwiseOp,
}

impl EltwiseAttrs {
    pub fn new(op: EltwiseOp) -> Self {
        EltwiseAttrs { op }
    }
}

impl Attributes for EltwiseAttrs {
    const KEY: &'static str = "eltwise";
}

pub(crate) fn register(builder: &mut RegistryBuilder) -> ExecutorResult<()> {
    builder
        .register::<EltwiseAttrs, _>(
            Implementation::new(ELTWISE_BLOCKED, |attrs: &EltwiseAttrs, _, context| {
                Ok(EltwiseExecutor::boxed(ELTWISE_BLOCKED, attrs.op, context))
            })
            .with_kind(ImplKind::Jit)
            .with_supports(supports_blocked)
            .with_accepts_shapes(|memory| {
                memory_dim(memory, ArgPort::SRC, 1).is_some_and(|channels| channels % BLOCK == 0)
            }),
        )?
        .register::<EltwiseAttrs, _>(
            Implementation::new(ELTWISE_ANY_LAYOUT, |attrs: &EltwiseAttrs, _, context| {
                Ok(EltwiseExecutor::boxed(ELTWISE_ANY_LAYOUT, attrs.op, context))
            })
            .with_kind(ImplKind::Reference)
            .with_shape_agnostic(true)
            .with_supports(supports_any_layout),
        )?;
    Ok(())
}

/// Every port the operation needs is bound with matching rank, and everything is `f32`.
fn operands_match(config: &ExecutorConfig<'_, EltwiseAttrs>) -> bool {
    let Some(dst) = config.desc(ArgPort::DST) else {
        return false;
    };
    let sources = config.attrs.op.arity();
    let bound = (0..sources).all(|index| {
        config
            .desc(ArgPort::Src(index as u8))
            .is_some_and(|src| src.shape().rank() == dst.shape().rank())
    });
    bound && all_f32(config)
}

fn supports_blocked(
    config: &ExecutorConfig<'_, EltwiseAttrs>,
    constraints: &LayoutConstraints,
) -> bool {
    let channels_fit = static_dim(config, ArgPort::SRC, 1).is_none_or(|c| c % BLOCK == 0);
    operands_match(config)
        && config.all_in_layout(LayoutTag::Blocked { block: BLOCK })
        && channels_fit
        && constraints.admits(config.descs)
}

fn supports_any_layout(
    config: &ExecutorConfig<'_, EltwiseAttrs>,
    constraints: &LayoutConstraints,
) -> bool {
    let shared_layout = config
        .desc(ArgPort::DST)
        .is_some_and(|dst| config.all_in_layout(dst.layout()));
    operands_match(config) && shared_layout && constraints.admits(config.descs)
}

struct EltwiseExecutor {
    name: &'static str,
    op: EltwiseOp,
    context: ExecutorContextPtr,
}

impl EltwiseExecutor {
    fn boxed(
        name: &'static str,
        op: EltwiseOp,
        context: &ExecutorContextPtr,
    ) -> Box<dyn Executor> {
        Box::new(EltwiseExecutor {
            name,
            op,
            context: context.clone(),
        })
    }

    fn run(&self, memory: &MemoryArgs) -> Result<()> {
        let dst = f32_operand(memory, ArgPort::DST)?;
        let lhs = f32_operand(memory, ArgPort::SRC)?.raw_f32()?;
        let rhs = match self.op.arity() {
            2 => Some(f32_operand(memory, ArgPort::Src(1))?.raw_f32()?),
            _ => None,
        };
        if let Some(rhs) = &rhs {
            ensure!(rhs.len() == lhs.len(), "eltwise operand size mismatch");
        }

        let op = self.op;
        let result: Vec<f32> = self.context.install(|| match &rhs {
            Some(rhs) => lhs
                .par_iter()
                .zip(rhs.par_iter())
                .map(|(&a, &b)| op.apply(a, b))
                .collect(),
            None => lhs.par_iter().map(|&a| op.apply(a, 0.0)).collect(),
        });
        dst.write_raw_f32(&result)?;
        Ok(())
    }
}

impl Executor for EltwiseExecutor {
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool> {
        let dst = memory.require(ArgPort::DST)?.desc();
        let consistent = (0..self.op.arity()).all(|index| {
            memory.get(ArgPort::Src(index as u8)).is_some_and(|src| {
                src.desc().shape() == dst.shape() && src.desc().layout() == dst.layout()
            })
        });
        Ok(consistent)
    }

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()> {
        tracing::trace!(implementation = self.name, op = ?self.op, "eltwise");
        self.run(memory)?;
        Ok(())
    }

    fn implementation_name(&self) -> &str {
        self.name
    }
}
