use anyhow::{ensure, Context, Result};
use execsel::executor::ExecutorConfig;
use execsel::memory::{ArgPort, DType, Dim, MemoryArgs, MemoryDesc, MemoryPtr};

/// Bound `f32` operand on `port`.
pub(crate) fn f32_operand(memory: &MemoryArgs, port: ArgPort) -> Result<&MemoryPtr> {
    let operand = memory
        .get(port)
        .with_context(|| format!("operand {port} is not bound"))?;
    ensure!(
        operand.desc().dtype() == DType::F32,
        "operand {port} must be f32, got {}",
        operand.desc().dtype()
    );
    Ok(operand)
}

pub(crate) fn concrete_dims(desc: &MemoryDesc) -> Result<Vec<usize>> {
    desc.shape()
        .static_dims()
        .map(|dims| dims.to_vec())
        .with_context(|| format!("operand {desc} has no concrete shape"))
}

pub(crate) fn all_f32<A>(config: &ExecutorConfig<'_, A>) -> bool {
    config
        .all_descs()
        .all(|(_, desc)| desc.dtype() == DType::F32)
}

/// Extent of `axis` on `port`, `None` when unbound, out of range or dynamic.
pub(crate) fn static_dim<A>(
    config: &ExecutorConfig<'_, A>,
    port: ArgPort,
    axis: usize,
) -> Option<usize> {
    config.desc(port)?.shape().dim(axis)?.as_static()
}

/// Whether two extents can be equal once both are known.
pub(crate) fn dims_agree(lhs: Option<Dim>, rhs: Option<Dim>) -> bool {
    match (lhs, rhs) {
        (Some(Dim::Static(lhs)), Some(Dim::Static(rhs))) => lhs == rhs,
        (Some(_), Some(_)) => true,
        _ => false,
    }
}

pub(crate) fn memory_dim(memory: &MemoryArgs, port: ArgPort, axis: usize) -> Option<usize> {
    memory.get(port)?.desc().shape().dim(axis)?.as_static()
}
