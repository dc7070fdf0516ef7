//! Heat diffusion on a small grid, iterated on the device with two buffers.
//!
//! Run with `cargo run --example diffusion`.

use texel_calc::prelude::*;

const SIDE: usize = 8;
const STEPS: usize = 32;

// Neighbour fetch in texels, clamped to the edge.
const UTILS: &str = r#"
fn at(m: texture_2d<f32>, dx: i32, dy: i32) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(m));
    let here = vec2<i32>(pos * locationScale.xy);
    let there = clamp(here + vec2<i32>(dx, dy), vec2<i32>(0), size - vec2<i32>(1));
    return textureLoad(m, there, 0);
}
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let bindings = GraphicsBindings::new(BindingsConfig::default()).await?;
    let mut ctx = Context::new(bindings);
    ctx.set_utils(UTILS);

    let mut current = Allocation::new(&mut ctx, "current", SIDE * SIDE)?;
    let next = Allocation::new(&mut ctx, "next", SIDE * SIDE)?;

    let centre = (SIDE / 2) * SIDE + SIDE / 2;
    current.data_mut()[centre] = Vec4f::scalar(100.0);
    current.push(&ctx)?;

    let source = Shader::from_file_path(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/demos/diffusion_step.wgsl"
    ))?;
    let step = next.make(&ctx, source.get_content())?;
    for _ in 0..STEPS {
        next.run(&ctx, &step)?;
        current.swap(&next)?;
    }
    current.pull(&ctx)?;

    for row in current.data().chunks(current.width() as usize) {
        let line: Vec<String> = row.iter().map(|v| format!("{:6.2}", v.r)).collect();
        println!("{}", line.join(" "));
    }
    let total: f32 = current.data().iter().map(|v| v.r).sum();
    println!("total heat {total:.2}");
    Ok(())
}
