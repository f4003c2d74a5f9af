#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use execsel::config::ContextConfig;
use execsel::executor::{
    Attributes, Executor, ExecutorConfig, ExecutorContext, ExecutorContextPtr, Implementation,
    LayoutConstraints,
};
use execsel::memory::{ArgPort, DType, LayoutTag, Memory, MemoryArgs, MemoryDesc, MemoryDescArgs};
use execsel::ExecutorResult;

/// Scales `src` into `dst`; the only operation the fixtures know.
#[derive(Debug, Clone)]
pub struct ScaleAttrs {
    pub factor: f32,
}

impl Attributes for ScaleAttrs {
    const KEY: &'static str = "scale";
}

pub fn attrs() -> ScaleAttrs {
    ScaleAttrs { factor: 2.0 }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn context() -> ExecutorContextPtr {
    context_with(ContextConfig::default())
}

pub fn context_with(config: ContextConfig) -> ExecutorContextPtr {
    ExecutorContext::new(config.with_num_threads(1)).expect("context should build")
}

pub fn descs(dims: &[usize], layout: LayoutTag) -> MemoryDescArgs {
    let desc = MemoryDesc::new(DType::F32, dims, layout);
    [(ArgPort::SRC, desc.clone()), (ArgPort::DST, desc)]
        .into_iter()
        .collect()
}

/// `src` filled with `1, 2, 3, ...` in logical order and a zeroed `dst`, both in `layout`.
pub fn operands(dims: &[usize], layout: LayoutTag) -> MemoryArgs {
    let desc = MemoryDesc::new(DType::F32, dims, layout);
    let count: usize = dims.iter().product();
    let values: Vec<f32> = (0..count).map(|i| i as f32 + 1.0).collect();
    let src = Memory::from_f32(desc.clone(), &values).expect("src should allocate");
    let dst = Memory::new(desc).expect("dst should allocate");
    MemoryArgs::new()
        .with(ArgPort::SRC, Arc::new(src))
        .with(ArgPort::DST, Arc::new(dst))
}

pub fn logical(memory: &MemoryArgs, port: ArgPort) -> Vec<f32> {
    memory
        .get(port)
        .expect("port should be bound")
        .read_f32()
        .expect("memory should be readable")
}

pub fn scaled(memory: &MemoryArgs, factor: f32) -> Vec<f32> {
    logical(memory, ArgPort::SRC)
        .into_iter()
        .map(|value| value * factor)
        .collect()
}

/// Size of `src` along `axis`, if bound.
pub fn src_dim(memory: &MemoryArgs, axis: usize) -> Option<usize> {
    memory
        .get(ArgPort::SRC)?
        .desc()
        .shape()
        .dim(axis)?
        .as_static()
}

/// Call counters shared between a fixture implementation and the test observing it.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    supports: Arc<AtomicUsize>,
    accepts: Arc<AtomicUsize>,
    creates: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    executes: Arc<AtomicUsize>,
    layouts: Arc<Mutex<Vec<LayoutTag>>>,
}

impl Probe {
    pub fn supports_calls(&self) -> usize {
        self.supports.load(Ordering::SeqCst)
    }

    pub fn accepts_calls(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    /// Layout of `src` as seen by the kernel on each execution.
    pub fn layouts(&self) -> Vec<LayoutTag> {
        self.layouts.lock().expect("probe mutex poisoned").clone()
    }

    pub fn record_accepts(&self) {
        self.accepts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Kernel multiplying every physical element of `src` by a factor into `dst`.
///
/// Works on any layout as long as both operands share it.
pub struct ScaleExecutor {
    name: String,
    factor: f32,
    max_elements: Option<usize>,
    probe: Probe,
}

impl Executor for ScaleExecutor {
    fn update(&mut self, memory: &MemoryArgs) -> ExecutorResult<bool> {
        self.probe.updates.fetch_add(1, Ordering::SeqCst);
        let elements = memory.require(ArgPort::SRC)?.desc().element_count();
        Ok(self
            .max_elements
            .is_none_or(|max| elements.is_some_and(|count| count <= max)))
    }

    fn execute(&mut self, memory: &MemoryArgs) -> ExecutorResult<()> {
        self.probe.executes.fetch_add(1, Ordering::SeqCst);
        let src = memory.require(ArgPort::SRC)?;
        let dst = memory.require(ArgPort::DST)?;
        self.probe
            .layouts
            .lock()
            .expect("probe mutex poisoned")
            .push(src.desc().layout());

        let values: Vec<f32> = src
            .raw_f32()?
            .into_iter()
            .map(|value| value * self.factor)
            .collect();
        dst.write_raw_f32(&values)
    }

    fn implementation_name(&self) -> &str {
        &self.name
    }
}

fn build<F>(
    name: &str,
    probe: &Probe,
    max_elements: Option<usize>,
    fail_create: bool,
    supports: F,
) -> Implementation<ScaleAttrs>
where
    F: Fn(&ExecutorConfig<'_, ScaleAttrs>, &LayoutConstraints) -> bool + Send + Sync + 'static,
{
    let executor_name = name.to_string();
    let create_probe = probe.clone();
    let supports_probe = probe.clone();

    Implementation::new(name, move |attrs: &ScaleAttrs, _memory, _context| {
        create_probe.creates.fetch_add(1, Ordering::SeqCst);
        if fail_create {
            bail!("{executor_name} refuses to build");
        }
        let executor: Box<dyn Executor> = Box::new(ScaleExecutor {
            name: executor_name.clone(),
            factor: attrs.factor,
            max_elements,
            probe: create_probe.clone(),
        });
        Ok(executor)
    })
    .with_supports(move |config, constraints| {
        supports_probe.supports.fetch_add(1, Ordering::SeqCst);
        supports(config, constraints)
    })
}

/// Scale implementation gated by `supports`.
pub fn scale_impl<F>(name: &str, probe: &Probe, supports: F) -> Implementation<ScaleAttrs>
where
    F: Fn(&ExecutorConfig<'_, ScaleAttrs>, &LayoutConstraints) -> bool + Send + Sync + 'static,
{
    build(name, probe, None, false, supports)
}

/// Scale implementation whose executor refuses operands with more than `max_elements`.
pub fn limited_impl<F>(
    name: &str,
    probe: &Probe,
    max_elements: usize,
    supports: F,
) -> Implementation<ScaleAttrs>
where
    F: Fn(&ExecutorConfig<'_, ScaleAttrs>, &LayoutConstraints) -> bool + Send + Sync + 'static,
{
    build(name, probe, Some(max_elements), false, supports)
}

/// Implementation that supports everything and fails in `create`.
pub fn failing_impl(name: &str, probe: &Probe) -> Implementation<ScaleAttrs> {
    build(name, probe, None, true, |_, _| true)
}
