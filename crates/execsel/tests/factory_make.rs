mod common;

use anyhow::Result;
use common::{
    attrs, context, context_with, descs, failing_impl, logical, operands, scale_impl, scaled,
    Probe, ScaleAttrs,
};
use execsel::config::{ContextConfig, ScratchPolicy};
use execsel::executor::{ExecutorFactory, FallbackConfig, ImplementationRegistry};
use execsel::memory::{ArgPort, DType, LayoutTag, ReorderError};
use execsel::ExecutorError;

#[test]
fn proper_descriptors_follow_candidate_order() -> Result<()> {
    let (a, b) = (Probe::default(), Probe::default());
    let mut builder = ImplementationRegistry::builder();
    builder
        .register::<ScaleAttrs, _>(
            scale_impl("wants_nhwc", &a, |_, _| true).with_fallback(|config| {
                FallbackConfig::relayout(config.descs, |_, _| LayoutTag::ChannelsLast)
            }),
        )?
        .register::<ScaleAttrs, _>(
            scale_impl("takes_anything", &b, |_, _| true).with_shape_agnostic(true),
        )?;
    let registry = builder.build();
    let planar = descs(&[1, 4, 2, 2], LayoutTag::Planar);

    let factory = ExecutorFactory::new(&registry, attrs(), context(), &planar)?;
    let proper = factory.proper_memory_descriptors(&planar);

    assert_eq!(proper.len(), factory.candidates().len());
    assert_eq!(proper[0], descs(&[1, 4, 2, 2], LayoutTag::ChannelsLast));
    assert_eq!(proper[1], planar);

    // Already in the wanted layout: nothing to negotiate.
    let nhwc = descs(&[1, 4, 2, 2], LayoutTag::ChannelsLast);
    let proper = factory.proper_memory_descriptors(&nhwc);
    assert_eq!(proper, vec![nhwc.clone(), nhwc]);
    Ok(())
}

#[test]
fn single_candidate_is_created_directly() -> Result<()> {
    let probe = Probe::default();
    let mut builder = ImplementationRegistry::builder();
    builder.register::<ScaleAttrs, _>(scale_impl("direct", &probe, |_, _| true))?;
    let registry = builder.build();
    let memory = operands(&[2, 3], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &memory.descs())?;
    let mut executor = factory.make(&memory)?;
    assert_eq!(probe.create_calls(), 1);
    assert_eq!(executor.implementation_name(), "direct");

    assert!(executor.update(&memory)?);
    executor.execute(&memory)?;
    assert_eq!(logical(&memory, ArgPort::DST), scaled(&memory, 2.0));
    assert_eq!(probe.layouts(), vec![LayoutTag::Planar]);
    Ok(())
}

fn packed_registry(packer: &Probe, packed_only: &Probe) -> Result<ImplementationRegistry> {
    let mut builder = ImplementationRegistry::builder();
    builder
        .register::<ScaleAttrs, _>(scale_impl("packer", packer, |_, _| true).with_fallback(
            |config| FallbackConfig::relayout(config.descs, |_, _| LayoutTag::NCHW8C),
        ))?
        .register::<ScaleAttrs, _>(scale_impl("packed_only", packed_only, |config, _| {
            config.all_in_layout(LayoutTag::NCHW8C)
        }))?;
    Ok(builder.build())
}

#[test]
fn single_candidate_with_fallback_converts_planar_to_packed() -> Result<()> {
    let (packer, packed_only) = (Probe::default(), Probe::default());
    let registry = packed_registry(&packer, &packed_only)?;
    let memory = operands(&[1, 12, 2, 2], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &memory.descs())?;
    assert_eq!(factory.candidate_names(), vec!["packer"]);

    let mut executor = factory.make(&memory)?;
    assert_eq!(executor.implementation_name(), "packer");
    executor.execute(&memory)?;

    assert_eq!(packer.layouts(), vec![LayoutTag::NCHW8C]);
    assert_eq!(packed_only.create_calls(), 0);
    let dst = memory.get(ArgPort::DST).expect("dst bound");
    assert_eq!(dst.desc().layout(), LayoutTag::Planar);
    assert_eq!(logical(&memory, ArgPort::DST), scaled(&memory, 2.0));
    Ok(())
}

#[test]
fn fallback_matches_running_on_preconverted_operands() -> Result<()> {
    let (packer, packed_only) = (Probe::default(), Probe::default());
    let registry = packed_registry(&packer, &packed_only)?;
    let planar = operands(&[2, 10, 3, 1], LayoutTag::Planar);
    let packed = operands(&[2, 10, 3, 1], LayoutTag::NCHW8C);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &planar.descs())?;
    factory.make(&planar)?.execute(&planar)?;

    let mut direct = ExecutorFactory::new(&registry, attrs(), context(), &packed.descs())?;
    direct.make(&packed)?.execute(&packed)?;

    assert_eq!(
        logical(&planar, ArgPort::DST),
        logical(&packed, ArgPort::DST)
    );
    Ok(())
}

#[test]
fn fallback_update_follows_new_shapes() -> Result<()> {
    let (packer, packed_only) = (Probe::default(), Probe::default());
    let registry = packed_registry(&packer, &packed_only)?;
    let first = operands(&[1, 8, 2, 2], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &first.descs())?;
    let mut executor = factory.make(&first)?;
    executor.execute(&first)?;

    let second = operands(&[1, 3, 5, 1], LayoutTag::Planar);
    assert!(executor.update(&second)?);
    executor.execute(&second)?;
    assert_eq!(logical(&second, ArgPort::DST), scaled(&second, 2.0));
    assert_eq!(packer.layouts(), vec![LayoutTag::NCHW8C, LayoutTag::NCHW8C]);
    Ok(())
}

#[test]
fn scratch_is_recycled_between_calls() -> Result<()> {
    let (packer, packed_only) = (Probe::default(), Probe::default());
    let registry = packed_registry(&packer, &packed_only)?;
    let memory = operands(&[1, 8, 2, 2], LayoutTag::Planar);
    let context = context();

    let mut factory = ExecutorFactory::new(&registry, attrs(), context.clone(), &memory.descs())?;
    let mut executor = factory.make(&memory)?;
    for _ in 0..3 {
        executor.execute(&memory)?;
    }

    assert_eq!(context.scratch().allocations(), 2);
    assert_eq!(context.scratch().pooled(), 2);
    Ok(())
}

#[test]
fn release_policy_frees_scratch_after_each_call() -> Result<()> {
    let (packer, packed_only) = (Probe::default(), Probe::default());
    let registry = packed_registry(&packer, &packed_only)?;
    let memory = operands(&[1, 8, 2, 2], LayoutTag::Planar);
    let context =
        context_with(ContextConfig::default().with_scratch_policy(ScratchPolicy::Release));

    let mut factory = ExecutorFactory::new(&registry, attrs(), context.clone(), &memory.descs())?;
    let mut executor = factory.make(&memory)?;
    executor.execute(&memory)?;
    executor.execute(&memory)?;

    assert_eq!(context.scratch().pooled(), 0);
    assert_eq!(context.scratch().allocations(), 6);
    Ok(())
}

#[test]
fn construction_failure_is_reported_with_the_implementation_name() -> Result<()> {
    let probe = Probe::default();
    let mut builder = ImplementationRegistry::builder();
    builder.register::<ScaleAttrs, _>(failing_impl("broken", &probe))?;
    let registry = builder.build();
    let memory = operands(&[2, 2], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &memory.descs())?;
    let err = factory.make(&memory).err().expect("create must fail");
    match err {
        ExecutorError::ImplementationConstruction {
            implementation,
            source,
        } => {
            assert_eq!(implementation, "broken");
            assert!(source.to_string().contains("refuses to build"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(probe.create_calls(), 1);
    Ok(())
}

#[test]
fn construction_failure_behind_a_fallback_is_reported_too() -> Result<()> {
    let probe = Probe::default();
    let mut builder = ImplementationRegistry::builder();
    builder.register::<ScaleAttrs, _>(failing_impl("broken", &probe).with_fallback(|config| {
        FallbackConfig::relayout(config.descs, |_, _| LayoutTag::ChannelsLast)
    }))?;
    let registry = builder.build();
    let memory = operands(&[1, 2, 2, 2], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &memory.descs())?;
    let err = factory.make(&memory).err().expect("create must fail");
    match err {
        ExecutorError::ImplementationConstruction { implementation, .. } => {
            assert_eq!(implementation, "broken")
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn impossible_conversion_fails_at_invocation_not_construction() -> Result<()> {
    let probe = Probe::default();
    let mut builder = ImplementationRegistry::builder();
    builder.register::<ScaleAttrs, _>(scale_impl("int_only", &probe, |_, _| true).with_fallback(
        |config| {
            let mut descs = config.descs.clone();
            for desc in descs.values_mut() {
                *desc = desc.with_dtype(DType::I32);
            }
            Some(FallbackConfig::new(descs))
        },
    ))?;
    let registry = builder.build();
    let memory = operands(&[2, 4], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &memory.descs())?;
    let mut executor = factory.make(&memory)?;
    assert_eq!(probe.create_calls(), 1);

    let err = executor.execute(&memory).unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Conversion {
            port: ArgPort::SRC,
            ..
        }
    ));
    assert_eq!(probe.execute_calls(), 0);
    Ok(())
}

#[test]
fn layout_the_rank_cannot_take_fails_at_invocation() -> Result<()> {
    let probe = Probe::default();
    let mut builder = ImplementationRegistry::builder();
    builder.register::<ScaleAttrs, _>(
        scale_impl("nhwc_only", &probe, |_, _| true).with_fallback(|config| {
            FallbackConfig::relayout(config.descs, |_, _| LayoutTag::ChannelsLast)
        }),
    )?;
    let registry = builder.build();
    let memory = operands(&[2, 4], LayoutTag::Planar);

    let mut factory = ExecutorFactory::new(&registry, attrs(), context(), &memory.descs())?;
    let mut executor = factory.make(&memory)?;
    assert_eq!(executor.implementation_name(), "nhwc_only");
    assert_eq!(probe.create_calls(), 0);
    assert!(!executor.update(&memory)?);

    let err = executor.execute(&memory).unwrap_err();
    match err {
        ExecutorError::Conversion { port, source } => {
            assert_eq!(port, ArgPort::SRC);
            assert!(matches!(source, ReorderError::MalformedLayout(_)), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(probe.execute_calls(), 0);
    Ok(())
}
