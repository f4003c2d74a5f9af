//! Adapter executors that convert operands into the layout an implementation really wants.

use std::collections::BTreeMap;

use crate::error::{ExecutorError, ExecutorResult};
use crate::memory::reorder::check_reorder;
use crate::memory::{
    reorder, required_bytes, ArgPort, DType, LayoutTag, MemoryArgs, MemoryDesc, MemoryDescArgs,
};

use super::config::{ExecutorConfig, FallbackConfig};
use super::context::{ExecutorContextPtr, ScratchLease};
use super::implementation::{Attributes, ExecutorImplementation};
use super::Executor;

/// Builds an executor that runs `implementation` on operands converted to `fallback_config`.
///
/// Only the construction of the wrapped executor can fail here. Whether the conversions are
/// actually possible is discovered when the adapter runs. When a desired descriptor cannot even
/// be allocated (a layout its rank cannot take), the wrapped executor is not built and every
/// invocation reports the conversion error instead.
pub fn fallback<A: Attributes>(
    config: &ExecutorConfig<'_, A>,
    fallback_config: FallbackConfig,
    memory: &MemoryArgs,
    context: &ExecutorContextPtr,
    implementation: &dyn ExecutorImplementation<A>,
) -> ExecutorResult<Box<dyn Executor>> {
    let name = implementation.name();
    let conversions: Vec<PortConversion> = fallback_config
        .differing_ports(config.descs)
        .filter_map(|port| {
            let desired = fallback_config.descs.get(&port)?.clone();
            Some(PortConversion { port, desired })
        })
        .collect();

    for conversion in &conversions {
        tracing::debug!(
            op = A::KEY,
            implementation = name,
            port = %conversion.port,
            from = %config.descs[&conversion.port],
            to = %conversion.desired,
            "emitting layout fallback"
        );
    }

    let unstaged = conversions
        .iter()
        .find(|conversion| required_bytes(&conversion.desired).is_err());
    let inner = match unstaged {
        Some(conversion) => {
            tracing::debug!(
                op = A::KEY,
                implementation = name,
                port = %conversion.port,
                desired = %conversion.desired,
                "operand cannot be staged, executor left unbuilt"
            );
            None
        }
        None => {
            let mut lease = ScratchLease::new(context.scratch());
            let converted = substitute(memory, &conversions, &mut lease)?;
            let inner = implementation
                .create(config.attrs, &converted, context)
                .map_err(|source| ExecutorError::construction(name, source))?;
            Some(inner)
        }
    };

    let targets = fallback_config
        .descs
        .iter()
        .map(|(port, desc)| (*port, (desc.dtype(), desc.layout())))
        .collect();

    Ok(Box::new(FallbackExecutor {
        implementation: name.to_string(),
        context: context.clone(),
        inner,
        targets,
        actual: config.descs.clone(),
        conversions,
    }))
}

/// One operand that has to travel through a scratch buffer.
#[derive(Debug, Clone)]
struct PortConversion {
    port: ArgPort,
    desired: MemoryDesc,
}

/// Executor that reorders operands around a wrapped executor.
///
/// Inputs are converted before the wrapped kernel runs and outputs are converted back into the
/// caller's buffers afterwards, so the caller only ever sees its own layouts.
pub struct FallbackExecutor {
    implementation: String,
    context: ExecutorContextPtr,
    /// `None` when some operand could not be staged at construction.
    inner: Option<Box<dyn Executor>>,
    /// Element type and layout the wrapped kernel consumes on each port.
    targets: BTreeMap<ArgPort, (DType, LayoutTag)>,
    actual: MemoryDescArgs,
    conversions: Vec<PortConversion>,
}

impl FallbackExecutor {
    /// Ports converted on every call.
    pub fn converted_ports(&self) -> Vec<ArgPort> {
        self.conversions.iter().map(|conversion| conversion.port).collect()
    }

    /// Fails on the first port whose conversion cannot be performed for `memory`.
    fn check_conversions(&self, memory: &MemoryArgs) -> ExecutorResult<()> {
        for conversion in &self.conversions {
            let port = conversion.port;
            check_reorder(memory.require(port)?.desc(), &conversion.desired)
                .map_err(|source| ExecutorError::conversion(port, source))?;
        }
        Ok(())
    }

    fn plan(&self, actual: &MemoryDescArgs) -> Vec<PortConversion> {
        actual
            .iter()
            .filter_map(|(port, desc)| {
                let (dtype, layout) = *self.targets.get(port)?;
                let desired = desc.with_dtype(dtype).with_layout(layout);
                (desired != *desc).then_some(PortConversion {
                    port: *port,
                    desired,
                })
            })
            .collect()
    }
}

impl Executor for FallbackExecutor {
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool> {
        let actual = memory.descs();
        if actual != self.actual {
            self.conversions = self.plan(&actual);
            self.actual = actual;
        }
        if self.check_conversions(memory).is_err() {
            return Ok(false);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(false);
        };
        let mut lease = ScratchLease::new(self.context.scratch());
        let converted = substitute(memory, &self.conversions, &mut lease)?;
        inner.update(&converted)
    }

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()> {
        self.check_conversions(memory)?;
        let Some(inner) = self.inner.as_mut() else {
            return Err(ExecutorError::memory(format!(
                "{} has no executor: its operands could not be staged when it was built",
                self.implementation
            )));
        };

        let mut lease = ScratchLease::new(self.context.scratch());
        let converted = substitute(memory, &self.conversions, &mut lease)?;

        for conversion in self.conversions.iter().filter(|c| c.port.is_input()) {
            let port = conversion.port;
            reorder(memory.require(port)?, converted.require(port)?)
                .map_err(|source| ExecutorError::conversion(port, source))?;
        }

        inner.execute(&converted)?;

        for conversion in self.conversions.iter().filter(|c| c.port.is_output()) {
            let port = conversion.port;
            reorder(converted.require(port)?, memory.require(port)?)
                .map_err(|source| ExecutorError::conversion(port, source))?;
        }

        drop(converted);
        Ok(())
    }

    fn implementation_name(&self) -> &str {
        &self.implementation
    }
}

/// Copy of `memory` with every converted port rebound to a scratch buffer of the lease.
fn substitute(
    memory: &MemoryArgs,
    conversions: &[PortConversion],
    lease: &mut ScratchLease<'_>,
) -> ExecutorResult<MemoryArgs> {
    let mut converted = memory.clone();
    for conversion in conversions {
        memory.require(conversion.port)?;
        let scratch = lease.acquire(&conversion.desired)?;
        converted.insert(conversion.port, scratch);
    }
    Ok(converted)
}
