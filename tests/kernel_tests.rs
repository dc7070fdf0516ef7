extern crate texel_calc;

use texel_calc::coding::BuildStep;
use texel_calc::kernel;
use texel_calc::prelude::*;

/// A fresh context, falling back to a software adapter when no hardware one is
/// usable. `None` only when neither is available.
async fn context() -> Option<Context> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let hardware = match GraphicsBindings::new(BindingsConfig::default()).await {
        Ok(bindings) => return Some(Context::new(bindings)),
        Err(err) => err,
    };
    let fallback = BindingsConfig {
        force_fallback_adapter: true,
        ..BindingsConfig::default()
    };
    match GraphicsBindings::new(fallback).await {
        Ok(bindings) => Some(Context::new(bindings)),
        Err(err) => {
            let test = std::thread::current().name().unwrap_or("?").to_string();
            eprintln!("{test}: skipped, no hardware device ({hardware}) nor fallback ({err})");
            None
        }
    }
}

fn scalars(values: &[f32]) -> Vec<Vec4f> {
    values.iter().copied().map(Vec4f::scalar).collect()
}

fn reds(allocation: &Allocation) -> Vec<f32> {
    allocation.data().iter().map(|v| v.r).collect()
}

#[tokio::test]
async fn push_pull_round_trip() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut a = Allocation::new(&mut ctx, "A", 4)?;
    a.data_mut().fill(Vec4f::new(1.0, 0.0, 0.0, 1.0));
    a.push(&ctx)?;
    a.data_mut().fill(Vec4f::ZERO);
    a.pull(&ctx)?;

    assert_eq!(a.data(), &[Vec4f::new(1.0, 0.0, 0.0, 1.0); 4]);
    Ok(())
}

#[tokio::test]
async fn sum_of_two_arrays() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut a = Allocation::new(&mut ctx, "A", 4)?;
    let mut b = Allocation::new(&mut ctx, "B", 4)?;
    let mut c = Allocation::new(&mut ctx, "C", 4)?;
    a.data_mut().copy_from_slice(&scalars(&[1.0, 2.0, 3.0, 4.0]));
    b.data_mut().copy_from_slice(&scalars(&[10.0, 20.0, 30.0, 40.0]));
    a.push(&ctx)?;
    b.push(&ctx)?;

    c.run_source(&ctx, kernel! { fn kernel() { commit(read(A) + read(B)); } })?;
    c.pull(&ctx)?;

    assert_eq!(reds(&c), [11.0, 22.0, 33.0, 44.0]);
    Ok(())
}

#[tokio::test]
async fn odd_shapes_keep_texel_order() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    // 6 records factor into 2x3
    let mut a = Allocation::new(&mut ctx, "A", 6)?;
    let mut b = Allocation::new(&mut ctx, "B", 6)?;
    assert_eq!(a.shape(), Shape::new(2, 3));
    let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    a.data_mut().copy_from_slice(&scalars(&values));
    a.push(&ctx)?;

    b.run_source(&ctx, kernel! { fn kernel() { commit(read(A) * 2.0); } })?;
    b.pull(&ctx)?;

    assert_eq!(reds(&b), values.map(|v| v * 2.0));
    Ok(())
}

#[tokio::test]
async fn kernel_without_commit_leaves_destination_alone() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut a = Allocation::new(&mut ctx, "A", 4)?;
    let mut b = Allocation::new(&mut ctx, "B", 4)?;
    a.data_mut().copy_from_slice(&scalars(&[9.0; 4]));
    b.data_mut().copy_from_slice(&scalars(&[1.0, 2.0, 3.0, 4.0]));
    a.push(&ctx)?;
    b.push(&ctx)?;

    b.run_source(&ctx, kernel! { fn kernel() {} })?;
    b.pull(&ctx)?;

    assert_eq!(reds(&b), [1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[tokio::test]
async fn swap_exchanges_device_storage() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut a = Allocation::new(&mut ctx, "A", 4)?;
    let mut b = Allocation::new(&mut ctx, "B", 4)?;
    a.data_mut().copy_from_slice(&scalars(&[1.0; 4]));
    b.data_mut().copy_from_slice(&scalars(&[2.0; 4]));
    a.push(&ctx)?;
    b.push(&ctx)?;

    let (texture_a, texture_b) = (a.array().texture_id(), b.array().texture_id());
    let (target_a, target_b) = (a.array().target_id(), b.array().target_id());
    a.swap(&b)?;
    assert_eq!(a.array().texture_id(), texture_b);
    assert_eq!(b.array().texture_id(), texture_a);
    assert_eq!(a.array().target_id(), target_b);
    assert_eq!(b.array().target_id(), target_a);

    a.pull(&ctx)?;
    b.pull(&ctx)?;
    assert_eq!(reds(&a), [2.0; 4]);
    assert_eq!(reds(&b), [1.0; 4]);

    // self swap is a no-op
    a.swap(&a)?;
    assert_eq!(a.array().texture_id(), texture_b);
    Ok(())
}

#[tokio::test]
async fn swap_requires_matching_shapes() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let a = Allocation::new(&mut ctx, "A", 4)?;
    let b = Allocation::new(&mut ctx, "B", 6)?;
    assert!(matches!(a.swap(&b), Err(ExecutionError::ShapeMismatch { .. })));
    Ok(())
}

#[tokio::test]
async fn ping_pong_reuses_programs() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut front = Allocation::new(&mut ctx, "front", 4)?;
    let back = Allocation::new(&mut ctx, "back", 4)?;
    front.data_mut().copy_from_slice(&scalars(&[0.0, 1.0, 2.0, 3.0]));
    front.push(&ctx)?;

    // back = front + 1, then exchange so the result is read next time
    let step = back.make(
        &ctx,
        "fn kernel() { commit(read(front) + vec4<f32>(1.0, 0.0, 0.0, 0.0)); }",
    )?;
    for _ in 0..3 {
        back.run(&ctx, &step)?;
        front.swap(&back)?;
    }
    front.pull(&ctx)?;

    assert_eq!(reds(&front), [3.0, 4.0, 5.0, 6.0]);
    Ok(())
}

#[tokio::test]
async fn location_scale_exposes_the_destination_size() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut a = Allocation::new(&mut ctx, "A", 6)?;
    a.run_source(
        &ctx,
        "fn kernel() { commit(vec4<f32>(locationScale.x, locationScale.y, AScale.x, AScale.y)); }",
    )?;
    a.pull(&ctx)?;

    let expected = Vec4f::new(2.0, 3.0, 0.5, 1.0 / 3.0);
    assert!(a.data().iter().all(|v| *v == expected), "{:?}", a.data());
    Ok(())
}

#[tokio::test]
async fn utils_are_visible_to_kernels() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    ctx.set_utils("fn twice(v: vec4<f32>) -> vec4<f32> { return v * 2.0; }\n");
    let mut a = Allocation::new(&mut ctx, "A", 4)?;
    let mut b = Allocation::new(&mut ctx, "B", 4)?;
    a.data_mut().copy_from_slice(&scalars(&[1.0, 2.0, 3.0, 4.0]));
    a.push(&ctx)?;

    b.run_source(&ctx, kernel! { fn kernel() { commit(twice(read(A))); } })?;
    b.pull(&ctx)?;

    assert_eq!(reds(&b), [2.0, 4.0, 6.0, 8.0]);
    Ok(())
}

#[tokio::test]
async fn reading_the_destination_fails_to_link() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let a = Allocation::new(&mut ctx, "A", 4)?;
    let err = a
        .make(&ctx, kernel! { fn kernel() { commit(read(A)); } })
        .unwrap_err();
    assert!(matches!(err, ProgramError::Build { step: BuildStep::Link, .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn bad_kernel_reports_a_compile_error() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let a = Allocation::new(&mut ctx, "A", 4)?;
    let err = a.make(&ctx, "fn kernel() { commit(read(Nope)); }").unwrap_err();
    match err {
        ProgramError::Build { step, log } => {
            assert_eq!(step, BuildStep::Compile(texel_calc::coding::ShaderStage::Fragment));
            assert!(!log.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn programs_only_run_into_their_destination() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let a = Allocation::new(&mut ctx, "A", 4)?;
    let b = Allocation::new(&mut ctx, "B", 4)?;
    let program = a.make(&ctx, kernel! { fn kernel() { commit(read(B)); } })?;
    assert!(matches!(
        b.run(&ctx, &program),
        Err(ExecutionError::ProgramTargetMismatch { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn allocation_arguments_are_validated() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    assert_eq!(
        Allocation::new(&mut ctx, "A", 0).unwrap_err(),
        AllocationError::InvalidLength
    );
    let _a = Allocation::new(&mut ctx, "A", 4)?;
    assert_eq!(
        Allocation::new(&mut ctx, "A", 4).unwrap_err(),
        AllocationError::Registry(RegistryError::DuplicateName("A".into()))
    );
    assert_eq!(
        Allocation::new(&mut ctx, "read", 4).unwrap_err(),
        AllocationError::Registry(RegistryError::ReservedName("read".into()))
    );

    let mut fresh = Allocation::new(&mut ctx, "B", 4)?;
    fresh.pull(&ctx)?;
    assert_eq!(fresh.data(), &[Vec4f::ZERO; 4]);
    assert_eq!(ctx.array_names(), ["A", "B"]);
    Ok(())
}

#[tokio::test]
async fn released_inputs_stop_programs() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let a = Allocation::new(&mut ctx, "A", 4)?;
    let b = Allocation::new(&mut ctx, "B", 4)?;
    let program = b.make(&ctx, kernel! { fn kernel() { commit(read(A)); } })?;
    drop(a);

    assert!(matches!(
        b.run(&ctx, &program),
        Err(ExecutionError::ArrayReleased(name)) if name == "A"
    ));
    Ok(())
}

#[tokio::test]
async fn released_arrays_only_stop_kernels_that_read_them() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let a = Allocation::new(&mut ctx, "A", 4)?;
    let mut b = Allocation::new(&mut ctx, "B", 4)?;
    let mut c = Allocation::new(&mut ctx, "C", 4)?;
    b.data_mut().copy_from_slice(&scalars(&[5.0, 6.0, 7.0, 8.0]));
    b.push(&ctx)?;

    // built while A is alive, so A is declared and bound
    let copy = c.make(&ctx, kernel! { fn kernel() { commit(read(B)); } })?;
    drop(a);

    c.run(&ctx, &copy)?;
    c.pull(&ctx)?;
    assert_eq!(reds(&c), [5.0, 6.0, 7.0, 8.0]);

    // built after the release, A is no longer declared
    let doubled = c.make(&ctx, kernel! { fn kernel() { commit(read(B) * 2.0); } })?;
    assert!(!doubled.fragment_source().get_content().contains("var A:"));
    c.run(&ctx, &doubled)?;
    c.pull(&ctx)?;
    assert_eq!(reds(&c), [10.0, 12.0, 14.0, 16.0]);

    let err = c
        .make(&ctx, kernel! { fn kernel() { commit(read(A)); } })
        .unwrap_err();
    assert!(matches!(err, ProgramError::Build { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn detached_arrays_refuse_kernels_until_reattached() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    let mut a = Allocation::new(&mut ctx, "A", 4)?;
    let fill = a.make(&ctx, "fn kernel() { commit(vec4<f32>(7.0, 0.0, 0.0, 0.0)); }")?;

    let texture = a.array().texture_id();
    assert_eq!(a.array().detach(), Some(texture));
    assert!(matches!(
        a.run(&ctx, &fill),
        Err(ExecutionError::NoAttachment(name)) if name == "A"
    ));

    a.array().reattach(&ctx);
    a.run(&ctx, &fill)?;
    a.pull(&ctx)?;
    assert_eq!(reds(&a), [7.0; 4]);
    Ok(())
}

#[tokio::test]
async fn wgsl_reserved_names_are_refused() -> anyhow::Result<()> {
    let Some(mut ctx) = context().await else {
        return Ok(());
    };

    for name in ["self", "bitcast", "mat3x2", "texture_3d", "vec2f"] {
        assert_eq!(
            Allocation::new(&mut ctx, name, 4).unwrap_err(),
            AllocationError::Registry(RegistryError::ReservedName(name.into()))
        );
    }
    // kernels keep compiling after the refusals
    let a = Allocation::new(&mut ctx, "A", 4)?;
    let b = Allocation::new(&mut ctx, "B", 4)?;
    b.run_source(&ctx, kernel! { fn kernel() { commit(read(A)); } })?;
    drop(a);
    Ok(())
}
