//! Reference CPU implementations for `execsel`.
//!
//! Three operations are covered, each with a bucket that exercises a different part of the
//! selection engine:
//!
//! - [`eltwise`]: a blocked kernel that only runs on `nChw8c` operands with a channel count
//!   divisible by eight, ahead of a shape-agnostic kernel that runs on any shared layout.
//! - [`matmul`]: a 4x4 tiled kernel ahead of a shape-agnostic reference kernel that asks for a
//!   planar fallback when operands arrive in another layout.
//! - [`pooling`]: a single channels-last kernel reached through a fallback from any layout.
//!
//! [`default_registry`] holds all of them in priority order.

use std::sync::OnceLock;

use execsel::{ExecutorResult, ImplementationRegistry, RegistryBuilder};

pub mod eltwise;
mod kernel;
pub mod matmul;
pub mod pooling;

pub use eltwise::{EltwiseAttrs, EltwiseOp, ELTWISE_ANY_LAYOUT, ELTWISE_BLOCKED};
pub use matmul::{MatMulAttrs, MATMUL_REF, MATMUL_TILED};
pub use pooling::{PoolKind, PoolingAttrs, POOL_NHWC};

/// Appends the reference implementations to `builder`, specialized kernels first.
pub fn register_reference_implementations(builder: &mut RegistryBuilder) -> ExecutorResult<()> {
    eltwise::register(builder)?;
    matmul::register(builder)?;
    pooling::register(builder)?;
    Ok(())
}

/// Process-wide registry with every reference implementation.
pub fn default_registry() -> &'static ImplementationRegistry {
    static REGISTRY: OnceLock<ImplementationRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut builder = ImplementationRegistry::builder();
        register_reference_implementations(&mut builder)
            .expect("reference implementation names are unique");
        builder.build()
    })
}
